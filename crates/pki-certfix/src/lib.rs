//! Renewal of expired PKI server system certificates.
//!
//! [`cert_fix`] renews the system certificates of an instance whose
//! certificates have expired, temporarily switching its subsystems to
//! password-based database binds and non-critical self-tests. Every change
//! it makes to the instance configuration is a [`ReversibleAction`] undone
//! before it returns, on success and on failure.
//!
//! The instance is reached through the [`Instance`] and [`Subsystem`]
//! traits and external tools through [`CommandRunner`].
//! [`PkiInstance`] and [`SystemRunner`] are the production implementations.

#![forbid(unsafe_code)]

pub mod actions;
pub mod certfix;
pub mod command;
pub mod config;
pub mod error;
pub mod instance;
pub mod ldap;
pub mod pki_instance;
pub mod recovery;
pub mod secrets;
pub mod targets;

pub use actions::{FixContext, LdapPasswordAuth, SelfTestSuspension, ServerStarted};
pub use certfix::{CertFixOptions, CertFixReport, DEFAULT_PORT, SerialOutcome, cert_fix};
pub use command::{CommandRunner, SystemRunner, Tool, ToolCommand, ToolOutput};
pub use config::{AuthType, DbConfig, DbSnapshot, PasswordStore, Properties, SelfTest};
pub use error::{CertFixError, CommandError, Result};
pub use instance::{CertCreate, Instance, Subsystem};
pub use ldap::{LdapConnection, LdapTarget};
pub use pki_instance::{DEFAULT_INSTANCE_ROOT, PkiInstance, PkiSubsystem, Readiness};
pub use recovery::{RecoveryScope, ReversibleAction};
pub use targets::{affected_subsystems, resolve_fix_list};
