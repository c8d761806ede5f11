//! Test helpers for cert-fix integration tests.
//!
//! [`FakeInstance`] and [`RecordingRunner`] share one event log. Every
//! server, certificate, save and tool call is recorded as a short label, and
//! a fault can be injected at the n-th event starting with a given label.

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use pki_certfix::{
    AuthType, CertCreate, CertFixError, CertFixOptions, CommandError, CommandRunner, DbConfig,
    DbSnapshot, Instance, PasswordStore, Properties, SelfTest, Subsystem, Tool, ToolCommand,
    ToolOutput,
};
use zeroize::Zeroizing;

struct Fault {
    pattern: String,
    nth: usize,
    seen: usize,
}

/// Event log and pending faults.
#[derive(Default)]
pub struct Journal {
    events: Vec<String>,
    faults: Vec<Fault>,
    commands: Vec<(Tool, Vec<String>, Option<String>)>,
}

/// Shared handle to the journal.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Journal>>);

impl Log {
    /// Fails the `nth` (1-based) event starting with `pattern`, once.
    pub fn fail_at(&self, pattern: &str, nth: usize) {
        self.0.borrow_mut().faults.push(Fault {
            pattern: pattern.to_string(),
            nth,
            seen: 0,
        });
    }

    /// Recorded event labels.
    pub fn events(&self) -> Vec<String> {
        self.0.borrow().events.clone()
    }

    /// Raw argument vectors of every tool run, with stdin.
    pub fn commands(&self) -> Vec<(Tool, Vec<String>, Option<String>)> {
        self.0.borrow().commands.clone()
    }

    /// Argument that followed `flag` in the first run of `tool`.
    pub fn arg_after(&self, tool: Tool, flag: &str) -> Option<String> {
        self.commands()
            .into_iter()
            .find(|(t, _, _)| *t == tool)
            .and_then(|(_, args, _)| {
                args.iter()
                    .position(|a| a == flag)
                    .and_then(|i| args.get(i + 1).cloned())
            })
    }

    fn record(&self, event: String) -> bool {
        let mut journal = self.0.borrow_mut();
        journal.events.push(event.clone());
        let mut triggered = None;
        for (i, fault) in journal.faults.iter_mut().enumerate() {
            if event.starts_with(&fault.pattern) {
                fault.seen += 1;
                if fault.seen == fault.nth && triggered.is_none() {
                    triggered = Some(i);
                }
            }
        }
        if let Some(i) = triggered {
            journal.faults.remove(i);
            return true;
        }
        false
    }

    fn check(&self, event: String) -> Result<(), CommandError> {
        if self.record(event.clone()) {
            return Err(CommandError::non_zero_exit(event, 1, "injected fault"));
        }
        Ok(())
    }
}

/// In-memory subsystem. `save` copies the working state to the persisted state.
pub struct FakeSubsystem {
    name: String,
    db: DbConfig,
    tests: Vec<SelfTest>,
    tags: Vec<String>,
    persisted: (DbConfig, Vec<SelfTest>),
    log: Log,
}

impl FakeSubsystem {
    fn new(name: &str, auth_type: AuthType, tags: &[&str], with_tests: bool) -> Self {
        let db = DbConfig {
            auth_type,
            host: "ldap.example.com".into(),
            port: if auth_type == AuthType::SslClientAuth {
                "636".into()
            } else {
                "389".into()
            },
            secure_conn: auth_type == AuthType::SslClientAuth,
            bind_dn: (auth_type == AuthType::BasicAuth).then(|| "cn=Directory Manager".into()),
            base_dn: format!("o=pki-tomcat-{}", name.to_uppercase()),
        };
        let tests = if with_tests {
            vec![
                SelfTest {
                    name: format!("{}Presence", name.to_uppercase()),
                    critical: true,
                },
                SelfTest {
                    name: "SystemCertsVerification".into(),
                    critical: true,
                },
            ]
        } else {
            Vec::new()
        };
        Self {
            name: name.to_string(),
            persisted: (db.clone(), tests.clone()),
            db,
            tests,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            log: Log::default(),
        }
    }

    /// Subsystem binding with its certificate.
    pub fn cert_auth(name: &str, tags: &[&str]) -> Self {
        Self::new(name, AuthType::SslClientAuth, tags, true)
    }

    /// Subsystem binding with a password.
    pub fn password_auth(name: &str, tags: &[&str]) -> Self {
        Self::new(name, AuthType::BasicAuth, tags, true)
    }

    /// Drops the configured self-tests.
    pub fn without_self_tests(mut self) -> Self {
        self.tests.clear();
        self.persisted.1.clear();
        self
    }
}

impl Subsystem for FakeSubsystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn db_config(&self) -> pki_certfix::Result<DbConfig> {
        Ok(self.db.clone())
    }

    fn set_db_config(&mut self, config: &DbConfig) {
        self.db = config.clone();
    }

    fn db_snapshot(&self) -> DbSnapshot {
        let mut props = Properties::default();
        self.db.apply_to(&mut props);
        DbSnapshot::capture(&props)
    }

    fn restore_db(&mut self, snapshot: &DbSnapshot) -> pki_certfix::Result<()> {
        let mut props = Properties::default();
        snapshot.restore(&mut props);
        self.db = DbConfig::from_properties(&props)?;
        Ok(())
    }

    fn save(&mut self) -> pki_certfix::Result<()> {
        self.log.check(format!("save {}", self.name))?;
        self.persisted = (self.db.clone(), self.tests.clone());
        Ok(())
    }

    fn startup_tests(&self) -> Vec<SelfTest> {
        self.tests.clone()
    }

    fn set_startup_test_criticality(&mut self, critical: bool) {
        for test in &mut self.tests {
            test.critical = critical;
        }
    }

    fn cert_tags(&self) -> Vec<String> {
        self.tags.clone()
    }
}

/// Persisted state of an instance, for before/after comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub subsystems: Vec<(String, DbConfig, Vec<SelfTest>)>,
    pub passwords: PasswordStore,
}

/// In-memory instance.
pub struct FakeInstance {
    name: String,
    subsystems: Vec<FakeSubsystem>,
    passwords: PasswordStore,
    persisted_passwords: PasswordStore,
    log: Log,
}

impl FakeInstance {
    /// Empty instance named `pki-tomcat`.
    pub fn new(log: &Log) -> Self {
        let passwords = PasswordStore::new(Properties::parse("internal=nss-password\n"));
        Self {
            name: "pki-tomcat".into(),
            persisted_passwords: passwords.clone(),
            passwords,
            subsystems: Vec::new(),
            log: log.clone(),
        }
    }

    /// Adds a subsystem.
    pub fn with(mut self, mut subsystem: FakeSubsystem) -> Self {
        subsystem.log = self.log.clone();
        self.subsystems.push(subsystem);
        self
    }

    /// Pre-stores a service account password.
    pub fn with_service_password(mut self, password: &str) -> Self {
        self.passwords.set("internaldb", password);
        self.persisted_passwords = self.passwords.clone();
        self
    }

    /// What is on disk right now.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            subsystems: self
                .subsystems
                .iter()
                .map(|s| (s.name.clone(), s.persisted.0.clone(), s.persisted.1.clone()))
                .collect(),
            passwords: self.persisted_passwords.clone(),
        }
    }
}

impl Instance for FakeInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn subsystem_names(&self) -> Vec<String> {
        self.subsystems.iter().map(|s| s.name.clone()).collect()
    }

    fn subsystem(&self, name: &str) -> Option<&dyn Subsystem> {
        self.subsystems
            .iter()
            .find(|s| s.name == name)
            .map(|s| s as &dyn Subsystem)
    }

    fn subsystem_mut(&mut self, name: &str) -> Option<&mut dyn Subsystem> {
        self.subsystems
            .iter_mut()
            .find(|s| s.name == name)
            .map(|s| s as &mut dyn Subsystem)
    }

    fn start(&mut self, _wait: bool) -> pki_certfix::Result<()> {
        self.log.check("start".into()).map_err(Into::into)
    }

    fn stop(&mut self, _wait: bool) -> pki_certfix::Result<()> {
        self.log.check("stop".into()).map_err(Into::into)
    }

    fn cert_create(&mut self, request: &CertCreate) -> pki_certfix::Result<()> {
        let label = match (&request.cert_id, &request.serial) {
            (Some(id), _) if request.temporary => format!("cert-create --temp {id}"),
            (Some(id), _) => format!("cert-create --renew {id}"),
            (None, Some(serial)) => format!("cert-create --renew --serial {serial}"),
            (None, None) => "cert-create".to_string(),
        };
        self.log.check(label).map_err(Into::into)
    }

    fn cert_del(&mut self, cert_id: &str, _remove_key: bool) -> pki_certfix::Result<()> {
        self.log.check(format!("cert-del {cert_id}")).map_err(Into::into)
    }

    fn cert_import(&mut self, cert_id: &str) -> pki_certfix::Result<()> {
        self.log.check(format!("cert-import {cert_id}")).map_err(Into::into)
    }

    fn passwords(&self) -> &PasswordStore {
        &self.passwords
    }

    fn passwords_mut(&mut self) -> &mut PasswordStore {
        &mut self.passwords
    }

    fn store_passwords(&mut self) -> pki_certfix::Result<()> {
        self.log.check("store-passwords".into())?;
        self.persisted_passwords = self.passwords.clone();
        Ok(())
    }

    fn cert_file(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("/var/lib/pki/pki-tomcat/conf/certs/{name}.crt"))
    }
}

/// Records tool runs into the shared log. `ldappasswd` is labelled with its target DN.
pub struct RecordingRunner {
    log: Log,
}

impl RecordingRunner {
    pub fn new(log: &Log) -> Self {
        Self { log: log.clone() }
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, CommandError> {
        command.check()?;
        let args: Vec<String> = command.arg_values().map(str::to_string).collect();
        let label = match command.tool() {
            Tool::Ldappasswd => format!("ldappasswd {}", args.last().cloned().unwrap_or_default()),
            tool => tool.to_string(),
        };
        self.log.0.borrow_mut().commands.push((
            command.tool(),
            args,
            command.stdin_data().map(str::to_string),
        ));
        self.log.check(label)?;
        Ok(ToolOutput::default())
    }
}

/// Options every scenario starts from.
pub fn options(certs: &[&str]) -> CertFixOptions {
    CertFixOptions {
        certs: certs.iter().map(|c| (*c).to_string()).collect(),
        agent_uid: Some("caadmin".into()),
        dm_password: Some(Zeroizing::new("Secret.123".into())),
        ..CertFixOptions::default()
    }
}

/// CA, KRA, OCSP and ACME, all binding with certificates except ACME.
pub fn full_instance(log: &Log) -> FakeInstance {
    FakeInstance::new(log)
        .with(FakeSubsystem::cert_auth(
            "ca",
            &["signing", "ocsp_signing", "sslserver", "subsystem", "audit_signing"],
        ))
        .with(FakeSubsystem::cert_auth(
            "kra",
            &["transport", "storage", "sslserver", "subsystem", "audit_signing"],
        ))
        .with(FakeSubsystem::cert_auth(
            "ocsp",
            &["signing", "sslserver", "subsystem", "audit_signing"],
        ))
        .with(FakeSubsystem::password_auth("acme", &[]).without_self_tests())
}

/// A lone CA binding with its certificate.
pub fn ca_instance(log: &Log) -> FakeInstance {
    FakeInstance::new(log).with(FakeSubsystem::cert_auth(
        "ca",
        &["signing", "ocsp_signing", "sslserver", "subsystem", "audit_signing"],
    ))
}

/// Error kind, for assertions that ignore messages.
pub fn kind(err: &CertFixError) -> &'static str {
    match err {
        CertFixError::Config(_) => "config",
        CertFixError::Precondition(_) => "precondition",
        CertFixError::Command(_) => "command",
        CertFixError::Renewal { .. } => "renewal",
        CertFixError::Io(_) => "io",
        CertFixError::Unwind(_) => "unwind",
    }
}
