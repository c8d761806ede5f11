//! The reversible instance changes made during a repair.

use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::command::CommandRunner;
use crate::config::{AuthType, DbSnapshot};
use crate::error::{CertFixError, Result};
use crate::instance::{Instance, NON_LDAP_SUBSYSTEMS, Subsystem};
use crate::ldap::{LdapConnection, LdapTools, SERVICE_UID, people_dn};
use crate::recovery::ReversibleAction;
use crate::secrets::{EphemeralSecrets, SecretFile, generate_password};

/// Password-store entry of the database service account.
pub const SERVICE_PASSWORD_NAME: &str = "internaldb";

/// Plain LDAP port forced while certificate binds are suspended.
pub const PLAIN_LDAP_PORT: &str = "389";

/// State shared by the repair steps.
pub struct FixContext<'a> {
    /// Instance being repaired.
    pub instance: &'a mut dyn Instance,
    /// Runner for LDAP and conversion tools.
    pub runner: &'a dyn CommandRunner,
    /// Directory connection.
    pub ldap: LdapConnection,
    /// One-time credentials.
    pub secrets: EphemeralSecrets,
    /// Subsystems whose auth and self-tests are changed.
    pub targets: Vec<String>,
    /// Set when any target used certificate binds before the switch.
    pub cert_auth_before: bool,
}

impl FixContext<'_> {
    /// Target subsystem `name`, failing if the instance lacks it.
    pub fn subsystem_mut(&mut self, name: &str) -> Result<&mut dyn Subsystem> {
        let instance = self.instance.name().to_string();
        self.instance.subsystem_mut(name).ok_or_else(|| {
            CertFixError::precondition(format!("subsystem {name} not found in instance {instance}"))
        })
    }

    /// LDAP tools over this context's connection.
    #[must_use]
    pub fn ldap_tools(&self) -> LdapTools<'_> {
        LdapTools::new(self.runner, &self.ldap)
    }
}

fn ldap_targets(targets: &[String]) -> impl Iterator<Item = &String> {
    targets
        .iter()
        .filter(|name| !NON_LDAP_SUBSYSTEMS.contains(&name.as_str()))
}

/// Switches target subsystems from certificate to password binds.
#[derive(Debug, Default)]
pub struct LdapPasswordAuth {
    snapshots: Vec<(String, DbSnapshot)>,
    generated_password: bool,
}

impl LdapPasswordAuth {
    /// Makes sure the service account has a stored password and sets it in the directory.
    fn reset_service_password(&mut self, ctx: &mut FixContext<'_>, base_dn: &str) -> Result<()> {
        let existing = ctx
            .instance
            .passwords()
            .get(SERVICE_PASSWORD_NAME)
            .map(|p| Zeroizing::new(p.to_string()));
        let password = match existing {
            Some(existing) => existing,
            None => {
                let generated = generate_password();
                ctx.instance
                    .passwords_mut()
                    .set(SERVICE_PASSWORD_NAME, &generated);
                self.generated_password = true;
                ctx.instance.store_passwords()?;
                info!("generated service account password");
                generated
            }
        };

        let file = SecretFile::write(&password)?;
        ctx.ldap_tools()
            .reset_password(&people_dn(SERVICE_UID, base_dn), file.path())
    }
}

impl<'a> ReversibleAction<FixContext<'a>> for LdapPasswordAuth {
    fn name(&self) -> &str {
        "ldap-password-auth"
    }

    fn apply(&mut self, ctx: &mut FixContext<'a>) -> Result<()> {
        let targets: Vec<String> = ldap_targets(&ctx.targets).cloned().collect();
        let mut service_password_reset = false;

        for name in targets {
            let subsystem = ctx.subsystem_mut(&name)?;
            let saved = subsystem.db_config()?;
            self.snapshots.push((name.clone(), subsystem.db_snapshot()));

            let mut switched = saved.clone();
            switched.port = PLAIN_LDAP_PORT.to_string();
            switched.secure_conn = false;
            let cert_auth = saved.auth_type == AuthType::SslClientAuth;
            if cert_auth {
                switched.auth_type = AuthType::BasicAuth;
                switched.bind_dn = Some(people_dn(SERVICE_UID, &saved.base_dn));
            }
            subsystem.set_db_config(&switched);
            subsystem.save()?;
            info!(subsystem = %name, cert_auth, "switched to password auth");

            if cert_auth {
                ctx.cert_auth_before = true;
                if !service_password_reset {
                    self.reset_service_password(ctx, &saved.base_dn)?;
                    service_password_reset = true;
                }
            }
        }
        Ok(())
    }

    fn undo(&mut self, ctx: &mut FixContext<'a>) -> Result<()> {
        let mut failures = Vec::new();
        for (name, snapshot) in self.snapshots.drain(..).rev() {
            let restored = ctx.subsystem_mut(&name).and_then(|subsystem| {
                subsystem.restore_db(&snapshot)?;
                subsystem.save()
            });
            match restored {
                Ok(()) => info!(subsystem = %name, "restored database config"),
                Err(e) => failures.push(format!("{name}: {e}")),
            }
        }

        if self.generated_password {
            ctx.instance.passwords_mut().remove(SERVICE_PASSWORD_NAME);
            match ctx.instance.store_passwords() {
                Ok(()) => self.generated_password = false,
                Err(e) => failures.push(format!("password store: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CertFixError::precondition(failures.join(", ")))
        }
    }
}

/// Makes startup self-tests non-critical on the target subsystems.
#[derive(Debug, Default)]
pub struct SelfTestSuspension {
    suspended: Vec<String>,
}

impl<'a> ReversibleAction<FixContext<'a>> for SelfTestSuspension {
    fn name(&self) -> &str {
        "self-test-suspension"
    }

    fn apply(&mut self, ctx: &mut FixContext<'a>) -> Result<()> {
        let targets = ctx.targets.clone();
        for name in targets {
            let subsystem = ctx.subsystem_mut(&name)?;
            if subsystem.startup_tests().is_empty() {
                warn!(subsystem = %name, "no startup self-tests configured");
            }
            self.suspended.push(name.clone());
            subsystem.set_startup_test_criticality(false);
            subsystem.save()?;
            info!(subsystem = %name, "self-tests made non-critical");
        }
        Ok(())
    }

    fn undo(&mut self, ctx: &mut FixContext<'a>) -> Result<()> {
        let mut failures = Vec::new();
        for name in self.suspended.drain(..).rev() {
            let restored = ctx.subsystem_mut(&name).and_then(|subsystem| {
                subsystem.set_startup_test_criticality(true);
                subsystem.save()
            });
            if let Err(e) = restored {
                failures.push(format!("{name}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CertFixError::precondition(failures.join(", ")))
        }
    }
}

/// Server running for the duration of the scope.
#[derive(Debug, Default)]
pub struct ServerStarted;

impl<'a> ReversibleAction<FixContext<'a>> for ServerStarted {
    fn name(&self) -> &str {
        "server-started"
    }

    fn apply(&mut self, ctx: &mut FixContext<'a>) -> Result<()> {
        ctx.instance.start(true)
    }

    fn undo(&mut self, ctx: &mut FixContext<'a>) -> Result<()> {
        ctx.instance.stop(true)
    }
}
