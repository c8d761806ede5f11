//! Renewal of expired system certificates.
//!
//! When the system certificates of an instance expire, the server can no
//! longer bind to its database with its subsystem certificate, and its
//! startup self-tests refuse to start it. [`cert_fix`] works around both:
//!
//! 1. stop the server
//! 2. switch the affected subsystems to password binds and make their
//!    self-tests non-critical
//! 3. swap in a temporary TLS server certificate if that one is being renewed
//! 4. start the server, renew every certificate through it, stop it again
//! 5. import the renewed certificates and restore the subsystems
//! 6. start the server
//!
//! Step 2 is undone whatever happens in steps 3 to 5.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::actions::{FixContext, LdapPasswordAuth, SelfTestSuspension, ServerStarted};
use crate::command::{CommandRunner, Tool, ToolCommand};
use crate::error::{CertFixError, Result};
use crate::instance::{CertCreate, Instance};
use crate::ldap::{LdapConnection, LdapTarget, SERVICE_UID, people_dn, user_certificate_ldif};
use crate::recovery::{RecoveryScope, ReversibleAction};
use crate::secrets::EphemeralSecrets;
use crate::targets::{affected_subsystems, resolve_fix_list, validate_cert_ids, validate_serials};

/// Default secure port of the CA.
pub const DEFAULT_PORT: u16 = 8443;

/// Options for [`cert_fix`].
#[derive(Clone)]
pub struct CertFixOptions {
    /// Certificates to renew. Empty means every system certificate.
    pub certs: Vec<String>,
    /// Serial numbers of other certificates to renew.
    pub extra_certs: Vec<String>,
    /// Agent account used to authorize renewals.
    pub agent_uid: Option<String>,
    /// LDAPI socket of the directory.
    pub ldapi_socket: Option<PathBuf>,
    /// LDAP URL of the directory.
    pub ldap_url: Option<String>,
    /// Use StartTLS on `ldap://` URLs.
    pub ldap_starttls: bool,
    /// Secure port of the CA, as given on the command line.
    pub port: String,
    /// Directory Manager password.
    pub dm_password: Option<Zeroizing<String>>,
}

impl Default for CertFixOptions {
    fn default() -> Self {
        Self {
            certs: Vec::new(),
            extra_certs: Vec::new(),
            agent_uid: None,
            ldapi_socket: None,
            ldap_url: None,
            ldap_starttls: false,
            port: DEFAULT_PORT.to_string(),
            dm_password: None,
        }
    }
}

impl fmt::Debug for CertFixOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertFixOptions")
            .field("certs", &self.certs)
            .field("extra_certs", &self.extra_certs)
            .field("agent_uid", &self.agent_uid)
            .field("ldapi_socket", &self.ldapi_socket)
            .field("ldap_url", &self.ldap_url)
            .field("ldap_starttls", &self.ldap_starttls)
            .field("port", &self.port)
            .field("dm_password", &self.dm_password.as_ref().map(|_| "******"))
            .finish()
    }
}

impl CertFixOptions {
    /// Checks the options without touching the instance.
    ///
    /// Returns the agent uid and the port.
    pub fn validate(&self) -> Result<(&str, u16)> {
        let agent_uid = match self.agent_uid.as_deref().map(str::trim) {
            None | Some("") => return Err(CertFixError::config("--agent-uid is required")),
            Some(SERVICE_UID) => {
                return Err(CertFixError::config(format!(
                    "'{SERVICE_UID}' cannot be used as agent uid"
                )));
            }
            Some(uid) => uid,
        };

        if self.ldapi_socket.is_some() && self.ldap_url.is_some() {
            return Err(CertFixError::config(
                "--ldapi-socket and --ldap-url are mutually exclusive",
            ));
        }
        if let Some(url) = &self.ldap_url {
            if !(url.starts_with("ldap://") || url.starts_with("ldaps://")) {
                return Err(CertFixError::config(format!("unsupported LDAP URL: {url}")));
            }
        }

        let port = parse_port(&self.port)?;

        validate_cert_ids(&self.certs)?;
        validate_serials(&self.extra_certs)?;

        if self.ldapi_socket.is_none() && self.dm_password.is_none() {
            return Err(CertFixError::precondition(
                "Directory Manager password is required unless --ldapi-socket is used",
            ));
        }

        Ok((agent_uid, port))
    }
}

fn parse_port(text: &str) -> Result<u16> {
    let value: u64 = text
        .trim()
        .parse()
        .map_err(|_| CertFixError::config(format!("invalid port '{text}'")))?;
    u16::try_from(value)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| CertFixError::config(format!("port {value} out of range (1-65535)")))
}

/// Result of renewing one extra certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialOutcome {
    /// Serial number as given.
    pub serial: String,
    /// Where the renewed certificate was written.
    pub path: Option<PathBuf>,
    /// Why renewal failed.
    pub error: Option<String>,
}

impl SerialOutcome {
    /// Whether the certificate was renewed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a completed repair.
#[derive(Debug, Clone, Serialize)]
pub struct CertFixReport {
    /// Instance name.
    pub instance: String,
    /// Subsystems whose auth and self-tests were changed.
    pub subsystems: Vec<String>,
    /// System certificates renewed and imported.
    pub fixed: Vec<String>,
    /// Outcome per extra certificate.
    pub extra: Vec<SerialOutcome>,
    /// When the repair started.
    pub started_at: DateTime<Utc>,
    /// When the server was started again.
    pub finished_at: DateTime<Utc>,
}

impl CertFixReport {
    /// Extra certificates that could not be renewed.
    pub fn failed_extra(&self) -> impl Iterator<Item = &SerialOutcome> {
        self.extra.iter().filter(|o| !o.succeeded())
    }
}

fn ldap_target(
    instance: &dyn Instance,
    targets: &[String],
    options: &CertFixOptions,
) -> Result<LdapTarget> {
    if let Some(socket) = &options.ldapi_socket {
        return Ok(LdapTarget::Ldapi {
            socket: socket.clone(),
        });
    }
    if let Some(url) = &options.ldap_url {
        return Ok(LdapTarget::Url {
            url: url.clone(),
            starttls: options.ldap_starttls,
        });
    }

    let first = targets
        .first()
        .cloned()
        .or_else(|| instance.subsystem_names().into_iter().next())
        .ok_or_else(|| CertFixError::precondition("instance has no subsystems"))?;
    let subsystem = instance
        .subsystem(&first)
        .ok_or_else(|| CertFixError::precondition(format!("subsystem {first} not found")))?;
    let host = subsystem.db_config()?.host;
    Ok(LdapTarget::Url {
        url: format!("ldap://{host}:389"),
        starttls: options.ldap_starttls,
    })
}

/// Base DN holding the agent and service accounts, preferring the CA's.
fn accounts_base_dn(ctx: &FixContext<'_>) -> Result<String> {
    let name = if ctx.instance.subsystem("ca").is_some() {
        "ca".to_string()
    } else {
        ctx.targets
            .first()
            .cloned()
            .ok_or_else(|| CertFixError::precondition("no subsystem to take the base DN from"))?
    };
    let subsystem = ctx
        .instance
        .subsystem(&name)
        .ok_or_else(|| CertFixError::precondition(format!("subsystem {name} not found")))?;
    Ok(subsystem.db_config()?.base_dn)
}

struct Renewal<'o> {
    fix_list: &'o [String],
    extra_certs: &'o [String],
    agent_uid: &'o str,
    port: u16,
}

impl Renewal<'_> {
    /// Everything between switching to password binds and restoring them.
    fn run(&self, ctx: &mut FixContext<'_>) -> Result<Vec<SerialOutcome>> {
        let base_dn = accounts_base_dn(ctx)?;

        ctx.ldap_tools().probe(&base_dn).map_err(|e| {
            CertFixError::precondition(format!("unable to access LDAP server: {e}"))
        })?;

        let agent_file = ctx.secrets.agent_file().to_path_buf();
        ctx.ldap_tools()
            .reset_password(&people_dn(self.agent_uid, &base_dn), &agent_file)?;

        if self.fix_list.iter().any(|id| id == "sslserver") {
            info!("installing temporary sslserver certificate");
            ctx.instance.cert_create(&CertCreate::temporary("sslserver"))?;
            ctx.instance.cert_del("sslserver", false)?;
            ctx.instance.cert_import("sslserver")?;
        }

        let actions: Vec<Box<dyn ReversibleAction<FixContext<'_>>>> = vec![Box::new(ServerStarted)];
        let outcomes = RecoveryScope::new().run(ctx, actions, |ctx| self.renew(ctx, &agent_file))?;

        for id in self.fix_list {
            info!(cert = %id, "importing renewed certificate");
            ctx.instance.cert_del(id, false)?;
            ctx.instance.cert_import(id)?;
        }

        if ctx.cert_auth_before && self.fix_list.iter().any(|id| id == "subsystem") {
            publish_subsystem_cert(ctx, &base_dn)?;
        }

        Ok(outcomes)
    }

    /// Renewals done while the server is up.
    fn renew(&self, ctx: &mut FixContext<'_>, agent_file: &Path) -> Result<Vec<SerialOutcome>> {
        for id in self.fix_list {
            info!(cert = %id, "renewing");
            let request = CertCreate::renewal(id, self.agent_uid, agent_file, self.port);
            ctx.instance
                .cert_create(&request)
                .map_err(|e| CertFixError::renewal(id, e.to_string()))?;
        }

        let mut outcomes = Vec::with_capacity(self.extra_certs.len());
        for serial in self.extra_certs {
            let output = ctx.instance.cert_file(serial);
            let request =
                CertCreate::serial_renewal(serial, &output, self.agent_uid, agent_file, self.port);
            let outcome = match ctx.instance.cert_create(&request) {
                Ok(()) => {
                    info!(serial = %serial, path = %output.display(), "renewed extra certificate");
                    SerialOutcome {
                        serial: serial.clone(),
                        path: Some(output),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(serial = %serial, error = %e, "renewal of extra certificate failed");
                    SerialOutcome {
                        serial: serial.clone(),
                        path: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Adds the renewed subsystem certificate to the service account entry.
fn publish_subsystem_cert(ctx: &mut FixContext<'_>, base_dn: &str) -> Result<()> {
    let pem = ctx.instance.cert_file("subsystem");
    let der = tempfile::Builder::new()
        .prefix(".pki-subsystem-")
        .suffix(".der")
        .tempfile()?;

    let convert = ToolCommand::new(Tool::Openssl)
        .args(["x509", "-inform", "PEM", "-outform", "DER", "-in"])
        .arg(pem.to_string_lossy())
        .arg("-out")
        .arg(der.path().to_string_lossy());
    ctx.runner.run(&convert)?;

    let dn = people_dn(SERVICE_UID, base_dn);
    ctx.ldap_tools()
        .modify(&user_certificate_ldif(&dn, der.path()))?;
    info!(dn = %dn, "published subsystem certificate");
    Ok(())
}

/// Renews the system certificates of `instance`.
///
/// The server is stopped on entry and started again on success. Subsystem
/// configuration is restored before returning, on every path.
pub fn cert_fix(
    instance: &mut dyn Instance,
    runner: &dyn CommandRunner,
    options: &CertFixOptions,
) -> Result<CertFixReport> {
    let started_at = Utc::now();
    let (agent_uid, port) = options.validate()?;

    let fix_list = resolve_fix_list(instance, &options.certs);
    if fix_list.is_empty() && options.extra_certs.is_empty() {
        return Err(CertFixError::precondition("no certificates to fix"));
    }
    let targets = affected_subsystems(instance, &fix_list, &options.extra_certs)?;
    let instance_name = instance.name().to_string();
    info!(
        instance = %instance_name,
        certs = ?fix_list,
        extra = ?options.extra_certs,
        subsystems = ?targets,
        "fixing certificates"
    );

    instance.stop(true)?;

    let target = ldap_target(instance, &targets, options)?;
    let secrets = EphemeralSecrets::create(options.dm_password.as_deref().map(String::as_str))?;
    let ldap = LdapConnection::new(target, secrets.dm_file().map(Path::to_path_buf));

    let mut ctx = FixContext {
        instance,
        runner,
        ldap,
        secrets,
        targets: targets.clone(),
        cert_auth_before: false,
    };

    let renewal = Renewal {
        fix_list: &fix_list,
        extra_certs: &options.extra_certs,
        agent_uid,
        port,
    };
    let actions: Vec<Box<dyn ReversibleAction<FixContext<'_>>>> = vec![
        Box::new(LdapPasswordAuth::default()),
        Box::new(SelfTestSuspension::default()),
    ];
    let extra = RecoveryScope::new().run(&mut ctx, actions, |ctx| renewal.run(ctx))?;

    let FixContext {
        instance, secrets, ..
    } = ctx;
    drop(secrets);
    instance.start(true)?;

    let report = CertFixReport {
        instance: instance_name,
        subsystems: targets,
        fixed: fix_list,
        extra,
        started_at,
        finished_at: Utc::now(),
    };
    info!(
        instance = %report.instance,
        fixed = report.fixed.len(),
        failed_extra = report.failed_extra().count(),
        "certificates fixed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn options() -> CertFixOptions {
        CertFixOptions {
            agent_uid: Some("caadmin".into()),
            dm_password: Some(Zeroizing::new("Secret.123".into())),
            ..CertFixOptions::default()
        }
    }

    #[test]
    fn valid_options() {
        let opts = options();
        assert_eq!(opts.validate().ok(), Some(("caadmin", 8443)));
    }

    #[test_case(|o: &mut CertFixOptions| o.agent_uid = None ; "missing agent")]
    #[test_case(|o: &mut CertFixOptions| o.agent_uid = Some("pkidbuser".into()) ; "reserved agent")]
    #[test_case(|o: &mut CertFixOptions| o.port = "0".into() ; "port zero")]
    #[test_case(|o: &mut CertFixOptions| o.port = "65536".into() ; "port too large")]
    #[test_case(|o: &mut CertFixOptions| o.port = "99999999999".into() ; "port beyond u32")]
    #[test_case(|o: &mut CertFixOptions| o.port = "99999999999999999999999".into() ; "port beyond u64")]
    #[test_case(|o: &mut CertFixOptions| o.port = "-1".into() ; "negative port")]
    #[test_case(|o: &mut CertFixOptions| o.port = "https".into() ; "port not a number")]
    #[test_case(|o: &mut CertFixOptions| {
        o.ldapi_socket = Some("/run/slapd.socket".into());
        o.ldap_url = Some("ldap://localhost".into());
    } ; "both transports")]
    #[test_case(|o: &mut CertFixOptions| o.ldap_url = Some("http://localhost".into()) ; "bad url scheme")]
    #[test_case(|o: &mut CertFixOptions| o.certs = vec!["ca_signing".into()] ; "ca signing")]
    #[test_case(|o: &mut CertFixOptions| o.extra_certs = vec!["abc".into()] ; "bad serial")]
    fn config_errors(change: fn(&mut CertFixOptions)) {
        let mut opts = options();
        change(&mut opts);
        let err = opts.validate().expect_err("invalid");
        assert!(err.is_config_error(), "{err}");
    }

    #[test]
    fn port_tolerates_surrounding_space() {
        let mut opts = options();
        opts.port = " 9443 ".into();
        assert_eq!(opts.validate().ok(), Some(("caadmin", 9443)));
    }

    #[test]
    fn dm_password_needed_without_ldapi() {
        let mut opts = options();
        opts.dm_password = None;
        assert!(matches!(opts.validate(), Err(CertFixError::Precondition(_))));

        opts.ldapi_socket = Some("/run/slapd.socket".into());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn debug_hides_password() {
        let shown = format!("{:?}", options());
        assert!(!shown.contains("Secret.123"));
        assert!(shown.contains("******"));
    }

    #[test]
    fn report_counts_failed_extras() {
        let now = Utc::now();
        let report = CertFixReport {
            instance: "pki-tomcat".into(),
            subsystems: vec!["ca".into()],
            fixed: vec![],
            extra: vec![
                SerialOutcome {
                    serial: "10".into(),
                    path: None,
                    error: Some("revoked".into()),
                },
                SerialOutcome {
                    serial: "11".into(),
                    path: Some("/tmp/11.crt".into()),
                    error: None,
                },
            ],
            started_at: now,
            finished_at: now,
        };
        assert_eq!(report.failed_extra().count(), 1);
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["extra"][1]["path"], "/tmp/11.crt");
    }
}
