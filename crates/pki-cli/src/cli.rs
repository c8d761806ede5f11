//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use pki_certfix::{DEFAULT_INSTANCE_ROOT, DEFAULT_PORT};
use pki_profile::Archetype;

/// PKI server administration: certificate profiles and system certificate repair.
#[derive(Parser, Debug, Clone)]
#[command(name = "pki-admin")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Log progress to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log debug details to stderr.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Renew expired system certificates of an instance.
    ///
    /// Stops the server, temporarily switches the subsystems to password
    /// authentication against the directory, renews the certificates through
    /// the CA and restores the original configuration.
    CertFix(CertFixArgs),

    /// Certificate profile documents.
    Profile {
        /// Profile subcommand to execute.
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

/// Arguments for the cert-fix command.
#[derive(Args, Debug, Clone)]
pub struct CertFixArgs {
    /// Instance name.
    #[arg(short = 'i', long, env = "PKI_INSTANCE", default_value = "pki-tomcat")]
    pub instance: String,

    /// Directory holding the instances.
    #[arg(long, default_value = DEFAULT_INSTANCE_ROOT)]
    pub instance_root: PathBuf,

    /// System certificate to renew (repeatable). Defaults to all of them.
    #[arg(long = "cert", value_name = "ID")]
    pub certs: Vec<String>,

    /// Serial number of another certificate to renew (repeatable).
    #[arg(long = "extra-cert", value_name = "SERIAL")]
    pub extra_certs: Vec<String>,

    /// Agent account used to authorize the renewals.
    #[arg(long, value_name = "UID")]
    pub agent_uid: Option<String>,

    /// Reach the directory through this LDAPI socket.
    #[arg(long, value_name = "PATH")]
    pub ldapi_socket: Option<PathBuf>,

    /// Reach the directory at this URL.
    #[arg(long, value_name = "URL")]
    pub ldap_url: Option<String>,

    /// Use StartTLS for ldap:// URLs.
    #[arg(long)]
    pub ldap_starttls: bool,

    /// Secure port of the CA.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT.to_string())]
    pub port: String,

    /// Directory Manager password.
    #[arg(long, env = "PKI_DM_PASSWORD", hide_env_values = true)]
    pub dm_password: Option<String>,

    /// File holding the Directory Manager password.
    #[arg(long, value_name = "PATH")]
    pub dm_password_file: Option<PathBuf>,
}

/// Profile subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ProfileCommands {
    /// Create profile documents for an archetype.
    Create(ProfileCreateArgs),

    /// Apply overrides to an existing profile document in place.
    Edit(ProfileEditArgs),
}

/// Override sources shared by the profile subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// JSON object of overrides.
    #[arg(long, value_name = "FILE")]
    pub overrides: Option<PathBuf>,

    /// Single override (repeatable). Wins over the JSON file.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

fn parse_archetype(s: &str) -> Result<Archetype, String> {
    s.parse().map_err(|e: pki_profile::ProfileError| e.to_string())
}

/// Arguments for `profile create`.
#[derive(Args, Debug, Clone)]
pub struct ProfileCreateArgs {
    /// Profile id.
    #[arg(long)]
    pub id: String,

    /// Profile archetype: user, smime, server, other, dualcert or ca.
    #[arg(long, default_value = "user", value_parser = parse_archetype)]
    pub archetype: Archetype,

    /// Directory to write the documents to. Defaults to temporary files.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Overrides.
    #[command(flatten)]
    pub overrides: OverrideArgs,
}

/// Arguments for `profile edit`.
#[derive(Args, Debug, Clone)]
pub struct ProfileEditArgs {
    /// Profile document to modify.
    pub path: PathBuf,

    /// Archetype supplying values the overrides leave out.
    #[arg(long, default_value = "user", value_parser = parse_archetype)]
    pub archetype: Archetype,

    /// Overrides.
    #[command(flatten)]
    pub overrides: OverrideArgs,
}
