//! System certificate repair command.

use std::fs;
use std::io::Write;
use std::path::Path;

use pki_certfix::{CertFixOptions, PkiInstance, SystemRunner, cert_fix};
use tracing::info;
use zeroize::Zeroizing;

use crate::cli::{CertFixArgs, Format};
use crate::error::CliError;

/// Cert-fix command executor.
pub struct CertFixCommand<'a> {
    args: &'a CertFixArgs,
}

impl<'a> CertFixCommand<'a> {
    /// Create a new cert-fix command.
    #[must_use]
    pub const fn new(args: &'a CertFixArgs) -> Self {
        Self { args }
    }

    /// Build the orchestrator options from the command line.
    ///
    /// # Errors
    ///
    /// Returns an error if both password sources are given or the password
    /// file cannot be read.
    pub fn options(&self) -> Result<CertFixOptions, CliError> {
        let args = self.args;
        let dm_password = match (&args.dm_password, &args.dm_password_file) {
            (Some(_), Some(_)) => {
                return Err(CliError::config(
                    "--dm-password and --dm-password-file are mutually exclusive",
                ));
            }
            (Some(password), None) => Some(Zeroizing::new(password.clone())),
            (None, Some(path)) => Some(read_password_file(path)?),
            (None, None) => None,
        };

        Ok(CertFixOptions {
            certs: args.certs.clone(),
            extra_certs: args.extra_certs.clone(),
            agent_uid: args.agent_uid.clone(),
            ldapi_socket: args.ldapi_socket.clone(),
            ldap_url: args.ldap_url.clone(),
            ldap_starttls: args.ldap_starttls,
            port: args.port.clone(),
            dm_password,
        })
    }

    /// Execute the repair.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid, the instance cannot be
    /// loaded or the repair fails.
    pub fn execute<W: Write>(&self, writer: &mut W, format: Format) -> Result<(), CliError> {
        let options = self.options()?;
        options.validate()?;

        let instance_name = &self.args.instance;
        let mut instance =
            PkiInstance::load(&self.args.instance_root, instance_name, SystemRunner)?;
        info!(instance = %instance_name, "loaded instance");

        let report = cert_fix(&mut instance, &SystemRunner, &options)?;
        format.render(writer, &report)?;
        Ok(())
    }
}

fn read_password_file(path: &Path) -> Result<Zeroizing<String>, CliError> {
    let mut text = Zeroizing::new(fs::read_to_string(path)?);
    let trimmed = text.trim_end_matches(['\r', '\n']).len();
    text.truncate(trimmed);
    Ok(text)
}
