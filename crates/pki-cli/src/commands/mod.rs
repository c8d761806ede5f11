//! CLI command implementations.
//!
//! Each submodule implements a specific CLI command:
//! - [`cert_fix`] - System certificate repair
//! - [`profile`] - Profile document creation and editing

pub mod cert_fix;
pub mod profile;

pub use cert_fix::CertFixCommand;
pub use profile::ProfileCommand;
