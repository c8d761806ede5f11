//! One-time passwords and the files that hand them to external tools.

use std::fmt;
use std::io::Write;
use std::path::Path;

use rand::distributions::{Alphanumeric, DistString};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::error::Result;

const PASSWORD_LEN: usize = 24;

/// A random alphanumeric password.
#[must_use]
pub fn generate_password() -> Zeroizing<String> {
    Zeroizing::new(Alphanumeric.sample_string(&mut rand::thread_rng(), PASSWORD_LEN))
}

/// A password written to an owner-only temporary file, removed on drop.
#[derive(Debug)]
pub struct SecretFile {
    file: NamedTempFile,
}

impl SecretFile {
    /// Writes `secret` without a trailing newline.
    pub fn write(secret: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new().prefix(".pki-secret-").tempfile()?;
        file.write_all(secret.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Credentials that live only for one repair run.
pub struct EphemeralSecrets {
    agent_file: SecretFile,
    dm_file: Option<SecretFile>,
}

impl EphemeralSecrets {
    /// Generates the agent password and writes both password files.
    pub fn create(dm_password: Option<&str>) -> Result<Self> {
        let agent_password = generate_password();
        let agent_file = SecretFile::write(&agent_password)?;
        let dm_file = dm_password.map(SecretFile::write).transpose()?;
        Ok(Self {
            agent_file,
            dm_file,
        })
    }

    /// File holding the agent password.
    #[must_use]
    pub fn agent_file(&self) -> &Path {
        self.agent_file.path()
    }

    /// File holding the Directory Manager password, if one was given.
    #[must_use]
    pub fn dm_file(&self) -> Option<&Path> {
        self.dm_file.as_ref().map(SecretFile::path)
    }
}

impl fmt::Debug for EphemeralSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralSecrets")
            .field("agent_file", &self.agent_file.path())
            .field("dm_file", &self.dm_file())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn passwords_are_alphanumeric_and_distinct() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), PASSWORD_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(*a, *b);
    }

    #[test]
    fn files_are_removed_on_drop() {
        let secrets = EphemeralSecrets::create(Some("Secret.123")).expect("secrets");
        let agent = secrets.agent_file().to_path_buf();
        let dm = secrets.dm_file().expect("dm file").to_path_buf();
        assert_eq!(fs::read_to_string(&dm).expect("read"), "Secret.123");
        let agent_password = fs::read_to_string(&agent).expect("read");
        assert_eq!(agent_password.len(), PASSWORD_LEN);
        assert!(agent_password.chars().all(|c| c.is_ascii_alphanumeric()));
        drop(secrets);
        assert!(!agent.exists());
        assert!(!dm.exists());
    }

    #[cfg(unix)]
    #[test]
    fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let file = SecretFile::write("x").expect("write");
        let mode = fs::metadata(file.path()).expect("stat").permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn no_dm_file_without_password() {
        let secrets = EphemeralSecrets::create(None).expect("secrets");
        assert!(secrets.dm_file().is_none());
    }
}
