//! Instance configuration files.
//!
//! `CS.cfg` and `password.conf` are both `key=value` property files. They are
//! rewritten in place, so [`Properties`] keeps comments, blank lines and key
//! order exactly as read.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{CertFixError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Other(String),
}

/// An ordered `key=value` property file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    lines: Vec<Line>,
}

impl Properties {
    /// Parses property text. Lines without `=` and `#` comments are kept verbatim.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|line| {
                if line.trim_start().starts_with('#') {
                    return Line::Other(line.to_string());
                }
                match line.split_once('=') {
                    Some((key, value)) => Line::Entry {
                        key: key.trim().to_string(),
                        value: value.to_string(),
                    },
                    None => Line::Other(line.to_string()),
                }
            })
            .collect();
        Self { lines }
    }

    /// Reads a property file.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Reads a property file, treating a missing file as empty.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the file back.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    /// Value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets `key`, in place when present, appended otherwise.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value;
                    return;
                }
            }
        }
        self.lines.push(Line::Entry {
            key: key.to_string(),
            value,
        });
    }

    /// Removes `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| !matches!(line, Line::Entry { key: k, .. } if k == key));
        self.lines.len() != before
    }

    /// Sets `key` when `value` is present, removes it otherwise.
    pub fn set_or_remove(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => self.set(key, value),
            None => {
                self.remove(key);
            }
        }
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                Line::Entry { key, value } => writeln!(f, "{key}={value}")?,
                Line::Other(text) => writeln!(f, "{text}")?,
            }
        }
        Ok(())
    }
}

/// How a subsystem binds to its database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthType {
    /// Simple bind with DN and password.
    BasicAuth,
    /// TLS client certificate bind.
    SslClientAuth,
}

impl AuthType {
    /// Value as written in `CS.cfg`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BasicAuth => "BasicAuth",
            Self::SslClientAuth => "SslClientAuth",
        }
    }
}

impl FromStr for AuthType {
    type Err = CertFixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "BasicAuth" => Ok(Self::BasicAuth),
            "SslClientAuth" => Ok(Self::SslClientAuth),
            other => Err(CertFixError::precondition(format!(
                "unsupported database auth type: {other}"
            ))),
        }
    }
}

/// Config keys for the internal database connection.
pub mod keys {
    /// Bind mechanism.
    pub const AUTH_TYPE: &str = "internaldb.ldapauth.authtype";
    /// Bind DN for `BasicAuth`.
    pub const BIND_DN: &str = "internaldb.ldapauth.bindDN";
    /// Directory host.
    pub const HOST: &str = "internaldb.ldapconn.host";
    /// Directory port.
    pub const PORT: &str = "internaldb.ldapconn.port";
    /// Whether the connection uses TLS.
    pub const SECURE_CONN: &str = "internaldb.ldapconn.secureConn";
    /// Base DN of the subsystem's tree.
    pub const BASE_DN: &str = "internaldb.basedn";
    /// Startup self-test list.
    pub const STARTUP_TESTS: &str = "selftests.container.order.startup";

    /// Every key [`super::DbConfig`] reads or writes.
    pub const DB_KEYS: [&str; 6] = [AUTH_TYPE, BIND_DN, HOST, PORT, SECURE_CONN, BASE_DN];
}

/// Database connection settings of one subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Bind mechanism.
    pub auth_type: AuthType,
    /// Directory host.
    pub host: String,
    /// Directory port, as written.
    pub port: String,
    /// Whether the connection uses TLS.
    pub secure_conn: bool,
    /// Bind DN, absent for certificate binds.
    pub bind_dn: Option<String>,
    /// Base DN.
    pub base_dn: String,
}

impl DbConfig {
    /// Reads the settings from `props`.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let required = |key: &str| {
            props
                .get(key)
                .map(|v| v.trim().to_string())
                .ok_or_else(|| CertFixError::precondition(format!("missing config key {key}")))
        };
        Ok(Self {
            auth_type: required(keys::AUTH_TYPE)?.parse()?,
            host: required(keys::HOST)?,
            port: required(keys::PORT)?,
            secure_conn: props
                .get(keys::SECURE_CONN)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            bind_dn: props.get(keys::BIND_DN).map(|v| v.trim().to_string()),
            base_dn: required(keys::BASE_DN)?,
        })
    }

    /// Writes the settings to `props`, removing the bind DN when absent.
    pub fn apply_to(&self, props: &mut Properties) {
        props.set(keys::AUTH_TYPE, self.auth_type.as_str());
        props.set(keys::HOST, self.host.as_str());
        props.set(keys::PORT, self.port.as_str());
        props.set(keys::SECURE_CONN, if self.secure_conn { "true" } else { "false" });
        props.set_or_remove(keys::BIND_DN, self.bind_dn.as_deref());
        props.set(keys::BASE_DN, self.base_dn.as_str());
    }
}

/// Raw values of the database keys as read, absent keys included.
///
/// Restoring writes back exactly these strings and removes keys that were
/// absent, so a switch and restore leaves the file byte for byte as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSnapshot {
    entries: Vec<(&'static str, Option<String>)>,
}

impl DbSnapshot {
    /// Records the database keys of `props`.
    #[must_use]
    pub fn capture(props: &Properties) -> Self {
        Self {
            entries: keys::DB_KEYS
                .iter()
                .map(|&key| (key, props.get(key).map(str::to_string)))
                .collect(),
        }
    }

    /// Puts the recorded values back into `props`.
    pub fn restore(&self, props: &mut Properties) {
        for (key, value) in &self.entries {
            props.set_or_remove(key, value.as_deref());
        }
    }
}

/// One startup self-test entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfTest {
    /// Test name.
    pub name: String,
    /// Whether a failure blocks startup.
    pub critical: bool,
}

/// Parses a `Name[:critical], ...` self-test list.
#[must_use]
pub fn parse_self_tests(value: &str) -> Vec<SelfTest> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((name, flag)) => SelfTest {
                name: name.trim().to_string(),
                critical: flag.trim() == "critical",
            },
            None => SelfTest {
                name: entry.to_string(),
                critical: false,
            },
        })
        .collect()
}

/// Formats a self-test list in `CS.cfg` syntax.
#[must_use]
pub fn format_self_tests(tests: &[SelfTest]) -> String {
    tests
        .iter()
        .map(|t| {
            if t.critical {
                format!("{}:critical", t.name)
            } else {
                t.name.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Instance secret store (`password.conf`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordStore {
    props: Properties,
}

impl PasswordStore {
    /// Wraps parsed properties.
    #[must_use]
    pub fn new(props: Properties) -> Self {
        Self { props }
    }

    /// Password stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.props.get(name)
    }

    /// Whether `name` is stored.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.props.contains(name)
    }

    /// Stores `password` under `name`.
    pub fn set(&mut self, name: &str, password: &str) {
        self.props.set(name, password);
    }

    /// Removes `name`.
    pub fn remove(&mut self, name: &str) -> bool {
        self.props.remove(name)
    }

    /// Underlying properties for persisting.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.props
    }
}
