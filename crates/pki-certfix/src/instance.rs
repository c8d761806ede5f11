//! Collaborator interfaces for a server instance and its subsystems.
//!
//! The repair workflow only talks to an instance through these traits.
//! [`crate::PkiInstance`] implements them over the on-disk configuration and
//! the `systemctl`/`pki-server` tools; tests use an in-memory fake.

use std::path::{Path, PathBuf};

use crate::config::{DbConfig, DbSnapshot, PasswordStore, SelfTest};
use crate::error::Result;

/// Subsystems that never take part in LDAP auth switching.
pub const NON_LDAP_SUBSYSTEMS: &[&str] = &["acme", "est"];

/// Options for `cert-create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertCreate {
    /// Certificate id, `None` for a serial renewal.
    pub cert_id: Option<String>,
    /// Create a temporary self-signed certificate.
    pub temporary: bool,
    /// Renew through the running CA.
    pub renew: bool,
    /// Serial number of a non-system certificate.
    pub serial: Option<String>,
    /// Output file for the issued certificate.
    pub output: Option<PathBuf>,
    /// Agent account used for renewal.
    pub agent_uid: Option<String>,
    /// File holding the agent password.
    pub password_file: Option<PathBuf>,
    /// Secure port of the CA.
    pub port: Option<u16>,
}

impl CertCreate {
    fn empty() -> Self {
        Self {
            cert_id: None,
            temporary: false,
            renew: false,
            serial: None,
            output: None,
            agent_uid: None,
            password_file: None,
            port: None,
        }
    }

    /// Temporary self-signed certificate for `cert_id`.
    #[must_use]
    pub fn temporary(cert_id: &str) -> Self {
        Self {
            cert_id: Some(cert_id.to_string()),
            temporary: true,
            ..Self::empty()
        }
    }

    /// Renewal of the system certificate `cert_id`.
    #[must_use]
    pub fn renewal(cert_id: &str, agent_uid: &str, password_file: &Path, port: u16) -> Self {
        Self {
            cert_id: Some(cert_id.to_string()),
            renew: true,
            agent_uid: Some(agent_uid.to_string()),
            password_file: Some(password_file.to_path_buf()),
            port: Some(port),
            ..Self::empty()
        }
    }

    /// Renewal of the certificate with `serial`, written to `output`.
    #[must_use]
    pub fn serial_renewal(
        serial: &str,
        output: &Path,
        agent_uid: &str,
        password_file: &Path,
        port: u16,
    ) -> Self {
        Self {
            renew: true,
            serial: Some(serial.to_string()),
            output: Some(output.to_path_buf()),
            agent_uid: Some(agent_uid.to_string()),
            password_file: Some(password_file.to_path_buf()),
            port: Some(port),
            ..Self::empty()
        }
    }
}

/// One subsystem (ca, kra, ocsp, ...) of an instance.
pub trait Subsystem {
    /// Subsystem name, lowercase.
    fn name(&self) -> &str;

    /// Current database connection settings.
    fn db_config(&self) -> Result<DbConfig>;

    /// Replaces the database connection settings in memory.
    fn set_db_config(&mut self, config: &DbConfig);

    /// Raw database settings, for restoring them exactly.
    fn db_snapshot(&self) -> DbSnapshot;

    /// Puts back settings taken with [`Subsystem::db_snapshot`], in memory.
    fn restore_db(&mut self, snapshot: &DbSnapshot) -> Result<()>;

    /// Persists in-memory changes.
    fn save(&mut self) -> Result<()>;

    /// Configured startup self-tests.
    fn startup_tests(&self) -> Vec<SelfTest>;

    /// Marks every startup self-test critical or not, in memory.
    fn set_startup_test_criticality(&mut self, critical: bool);

    /// Tags of the system certificates this subsystem owns.
    fn cert_tags(&self) -> Vec<String>;
}

/// A server instance.
pub trait Instance {
    /// Instance name.
    fn name(&self) -> &str;

    /// Subsystem names in configuration order.
    fn subsystem_names(&self) -> Vec<String>;

    /// Subsystem by name.
    fn subsystem(&self, name: &str) -> Option<&dyn Subsystem>;

    /// Mutable subsystem by name.
    fn subsystem_mut(&mut self, name: &str) -> Option<&mut dyn Subsystem>;

    /// Starts the server, blocking until it is up when `wait` is set.
    fn start(&mut self, wait: bool) -> Result<()>;

    /// Stops the server, blocking until it is down when `wait` is set.
    fn stop(&mut self, wait: bool) -> Result<()>;

    /// Creates or renews a certificate.
    fn cert_create(&mut self, request: &CertCreate) -> Result<()>;

    /// Removes a system certificate from the NSS database.
    fn cert_del(&mut self, cert_id: &str, remove_key: bool) -> Result<()>;

    /// Imports a system certificate into the NSS database.
    fn cert_import(&mut self, cert_id: &str) -> Result<()>;

    /// Instance secret store.
    fn passwords(&self) -> &PasswordStore;

    /// Mutable instance secret store.
    fn passwords_mut(&mut self) -> &mut PasswordStore;

    /// Persists the secret store.
    fn store_passwords(&mut self) -> Result<()>;

    /// Location of the PEM file for certificate `name`.
    fn cert_file(&self, name: &str) -> PathBuf;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_request_carries_agent() {
        let req = CertCreate::renewal("sslserver", "caadmin", Path::new("/tmp/pw"), 8443);
        assert!(req.renew);
        assert!(!req.temporary);
        assert_eq!(req.agent_uid.as_deref(), Some("caadmin"));
        assert_eq!(req.port, Some(8443));
    }

    #[test]
    fn serial_renewal_has_no_cert_id() {
        let req = CertCreate::serial_renewal(
            "0x1f",
            Path::new("/var/lib/pki/pki-tomcat/conf/certs/0x1f.crt"),
            "caadmin",
            Path::new("/tmp/pw"),
            8443,
        );
        assert_eq!(req.cert_id, None);
        assert_eq!(req.serial.as_deref(), Some("0x1f"));
        assert!(req.output.is_some());
    }

    #[test]
    fn temporary_request() {
        let req = CertCreate::temporary("sslserver");
        assert!(req.temporary);
        assert!(req.agent_uid.is_none());
    }
}
