//! Directory access through the OpenLDAP command line tools.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::command::{CommandRunner, Tool, ToolCommand};
use crate::error::Result;

/// DN the simple-bind transports authenticate as.
pub const DIRECTORY_MANAGER_DN: &str = "cn=Directory Manager";

/// Service account the subsystems bind as under password auth.
pub const SERVICE_UID: &str = "pkidbuser";

/// DN of `uid` under the people container of `base_dn`.
#[must_use]
pub fn people_dn(uid: &str, base_dn: &str) -> String {
    format!("uid={uid},ou=people,{base_dn}")
}

/// How the tools reach the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdapTarget {
    /// Unix socket with SASL EXTERNAL.
    Ldapi {
        /// Socket path.
        socket: PathBuf,
    },
    /// `ldap://` or `ldaps://` URL with a simple bind.
    Url {
        /// Server URL.
        url: String,
        /// Upgrade a plain connection with StartTLS.
        starttls: bool,
    },
}

impl LdapTarget {
    /// URL passed to `-H`.
    #[must_use]
    pub fn url(&self) -> String {
        match self {
            Self::Ldapi { socket } => {
                let path = socket.to_string_lossy();
                let mut encoded = String::with_capacity(path.len());
                for c in path.chars() {
                    match c {
                        '/' => encoded.push_str("%2F"),
                        '%' => encoded.push_str("%25"),
                        ':' => encoded.push_str("%3A"),
                        c => encoded.push(c),
                    }
                }
                format!("ldapi://{encoded}")
            }
            Self::Url { url, .. } => url.clone(),
        }
    }
}

impl fmt::Display for LdapTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// A target plus the credentials to bind to it.
#[derive(Debug, Clone)]
pub struct LdapConnection {
    target: LdapTarget,
    dm_password_file: Option<PathBuf>,
}

impl LdapConnection {
    /// Connection over `target`. `dm_password_file` is only read for simple binds.
    #[must_use]
    pub fn new(target: LdapTarget, dm_password_file: Option<PathBuf>) -> Self {
        Self {
            target,
            dm_password_file,
        }
    }

    /// Transport.
    #[must_use]
    pub fn target(&self) -> &LdapTarget {
        &self.target
    }

    /// Appends the `-H` and bind arguments.
    fn connect(&self, mut cmd: ToolCommand) -> ToolCommand {
        cmd = cmd.arg("-H").arg(self.target.url());
        match &self.target {
            LdapTarget::Ldapi { .. } => cmd.args(["-Y", "EXTERNAL"]),
            LdapTarget::Url { url, starttls } => {
                if *starttls && url.starts_with("ldap://") {
                    cmd = cmd.arg("-ZZ");
                }
                cmd = cmd.args(["-x", "-D", DIRECTORY_MANAGER_DN]);
                if let Some(file) = &self.dm_password_file {
                    cmd = cmd.arg("-y").arg(file.to_string_lossy());
                }
                cmd
            }
        }
    }
}

/// Runs LDAP operations for the repair workflow.
pub struct LdapTools<'a> {
    runner: &'a dyn CommandRunner,
    conn: &'a LdapConnection,
}

impl<'a> LdapTools<'a> {
    /// Tools bound to `conn`.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, conn: &'a LdapConnection) -> Self {
        Self { runner, conn }
    }

    /// Base-scope search of `base_dn`, checking reachability and credentials.
    pub fn probe(&self, base_dn: &str) -> Result<()> {
        let cmd = self
            .conn
            .connect(ToolCommand::new(Tool::Ldapsearch))
            .args(["-s", "base", "-b", base_dn, "(objectclass=*)", "1.1"]);
        self.runner.run(&cmd)?;
        debug!(ldap = %self.conn.target, base_dn, "directory reachable");
        Ok(())
    }

    /// Sets the password of `dn` to the contents of `password_file`.
    pub fn reset_password(&self, dn: &str, password_file: &Path) -> Result<()> {
        let cmd = self
            .conn
            .connect(ToolCommand::new(Tool::Ldappasswd))
            .arg("-T")
            .arg(password_file.to_string_lossy())
            .arg(dn);
        self.runner.run(&cmd)?;
        info!(dn, "password reset");
        Ok(())
    }

    /// Applies `ldif` with `ldapmodify`.
    pub fn modify(&self, ldif: &str) -> Result<()> {
        let cmd = self
            .conn
            .connect(ToolCommand::new(Tool::Ldapmodify))
            .stdin(ldif);
        self.runner.run(&cmd)?;
        Ok(())
    }
}

/// LDIF adding a DER certificate file to `dn`'s `userCertificate`.
#[must_use]
pub fn user_certificate_ldif(dn: &str, der_file: &Path) -> String {
    format!(
        "dn: {dn}\nchangetype: modify\nadd: userCertificate\nuserCertificate:< file://{}\n",
        der_file.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(starttls: bool) -> LdapConnection {
        LdapConnection::new(
            LdapTarget::Url {
                url: "ldap://ldap.example.com:389".into(),
                starttls,
            },
            Some(PathBuf::from("/tmp/dm.pw")),
        )
    }

    #[test]
    fn ldapi_url_is_percent_encoded() {
        let target = LdapTarget::Ldapi {
            socket: PathBuf::from("/run/slapd-EXAMPLE.socket"),
        };
        assert_eq!(target.url(), "ldapi://%2Frun%2Fslapd-EXAMPLE.socket");
    }

    #[test]
    fn ldapi_binds_with_external() {
        let conn = LdapConnection::new(
            LdapTarget::Ldapi {
                socket: PathBuf::from("/run/slapd.socket"),
            },
            None,
        );
        let cmd = conn.connect(ToolCommand::new(Tool::Ldapsearch));
        assert_eq!(cmd.to_string(), "ldapsearch -H ldapi://%2Frun%2Fslapd.socket -Y EXTERNAL");
    }

    #[test]
    fn simple_bind_uses_password_file() {
        let cmd = simple(false).connect(ToolCommand::new(Tool::Ldapsearch));
        assert_eq!(
            cmd.to_string(),
            "ldapsearch -H ldap://ldap.example.com:389 -x -D cn=Directory Manager -y /tmp/dm.pw"
        );
    }

    #[test]
    fn starttls_only_for_plain_urls() {
        let cmd = simple(true).connect(ToolCommand::new(Tool::Ldapsearch));
        assert!(cmd.arg_values().any(|a| a == "-ZZ"));

        let ldaps = LdapConnection::new(
            LdapTarget::Url {
                url: "ldaps://ldap.example.com:636".into(),
                starttls: true,
            },
            None,
        );
        let cmd = ldaps.connect(ToolCommand::new(Tool::Ldapsearch));
        assert!(!cmd.arg_values().any(|a| a == "-ZZ"));
    }

    #[test]
    fn service_dn() {
        assert_eq!(
            people_dn(SERVICE_UID, "o=pki-tomcat-CA"),
            "uid=pkidbuser,ou=people,o=pki-tomcat-CA"
        );
    }

    #[test]
    fn certificate_ldif() {
        let ldif = user_certificate_ldif("uid=pkidbuser,ou=people,o=pki-tomcat-CA", Path::new("/tmp/sub.der"));
        assert_eq!(
            ldif,
            "dn: uid=pkidbuser,ou=people,o=pki-tomcat-CA\nchangetype: modify\nadd: userCertificate\nuserCertificate:< file:///tmp/sub.der\n"
        );
    }
}
