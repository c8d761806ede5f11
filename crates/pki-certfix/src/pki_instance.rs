//! Instance backed by the server's configuration directory and tools.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::command::{CommandRunner, Tool, ToolCommand};
use crate::config::{
    DbConfig, DbSnapshot, PasswordStore, Properties, SelfTest, format_self_tests, keys,
    parse_self_tests,
};
use crate::error::{CertFixError, CommandError, Result};
use crate::instance::{CertCreate, Instance, Subsystem};

/// Default parent directory of instances.
pub const DEFAULT_INSTANCE_ROOT: &str = "/var/lib/pki";

/// Subsystem directories looked for under `conf/`, in load order.
pub const KNOWN_SUBSYSTEMS: &[&str] = &["ca", "kra", "ocsp", "tks", "tps", "acme", "est"];

/// Marker `pki-server status` prints once the server answers requests.
const RUNNING_MARKER: &str = "server running: true";

/// How long a blocking start waits for the server to report itself running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Status checks before giving up.
    pub attempts: u32,
    /// Pause between checks.
    pub interval: Duration,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval: Duration::from_secs(1),
        }
    }
}

/// A subsystem read from `conf/<name>/CS.cfg`.
#[derive(Debug, Clone)]
pub struct PkiSubsystem {
    name: String,
    cfg_path: PathBuf,
    props: Properties,
}

impl PkiSubsystem {
    /// Loads `CS.cfg` for subsystem `name`.
    pub fn load(name: &str, cfg_path: PathBuf) -> Result<Self> {
        let props = Properties::load(&cfg_path)?;
        Ok(Self {
            name: name.to_string(),
            cfg_path,
            props,
        })
    }
}

impl Subsystem for PkiSubsystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn db_config(&self) -> Result<DbConfig> {
        DbConfig::from_properties(&self.props)
    }

    fn set_db_config(&mut self, config: &DbConfig) {
        config.apply_to(&mut self.props);
    }

    fn db_snapshot(&self) -> DbSnapshot {
        DbSnapshot::capture(&self.props)
    }

    fn restore_db(&mut self, snapshot: &DbSnapshot) -> Result<()> {
        snapshot.restore(&mut self.props);
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        debug!(subsystem = %self.name, path = %self.cfg_path.display(), "saving CS.cfg");
        self.props.save(&self.cfg_path)
    }

    fn startup_tests(&self) -> Vec<SelfTest> {
        self.props
            .get(keys::STARTUP_TESTS)
            .map(parse_self_tests)
            .unwrap_or_default()
    }

    fn set_startup_test_criticality(&mut self, critical: bool) {
        let mut tests = self.startup_tests();
        if tests.is_empty() {
            return;
        }
        for test in &mut tests {
            test.critical = critical;
        }
        self.props.set(keys::STARTUP_TESTS, format_self_tests(&tests));
    }

    fn cert_tags(&self) -> Vec<String> {
        let key = format!("{}.cert.list", self.name);
        self.props
            .get(&key)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An installed instance, driven through `systemctl` and `pki-server`.
pub struct PkiInstance<R: CommandRunner> {
    name: String,
    conf_dir: PathBuf,
    subsystems: Vec<PkiSubsystem>,
    passwords: PasswordStore,
    readiness: Readiness,
    runner: R,
}

impl<R: CommandRunner> PkiInstance<R> {
    /// Loads instance `name` from `root`.
    pub fn load(root: &Path, name: &str, runner: R) -> Result<Self> {
        let conf_dir = root.join(name).join("conf");
        if !conf_dir.is_dir() {
            return Err(CertFixError::precondition(format!(
                "instance {name} not found under {}",
                root.display()
            )));
        }

        let mut subsystems = Vec::new();
        for sub in KNOWN_SUBSYSTEMS {
            let cfg = conf_dir.join(sub).join("CS.cfg");
            if cfg.is_file() {
                subsystems.push(PkiSubsystem::load(sub, cfg)?);
            }
        }
        if subsystems.is_empty() {
            return Err(CertFixError::precondition(format!(
                "instance {name} has no subsystems"
            )));
        }

        let passwords = PasswordStore::new(Properties::load_or_default(
            &conf_dir.join("password.conf"),
        )?);

        info!(
            instance = %name,
            subsystems = subsystems.len(),
            "loaded instance"
        );
        Ok(Self {
            name: name.to_string(),
            conf_dir,
            subsystems,
            passwords,
            readiness: Readiness::default(),
            runner,
        })
    }

    /// Replaces the wait applied by `start(true)`.
    #[must_use]
    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    fn service_name(&self) -> String {
        format!("pki-tomcatd@{}.service", self.name)
    }

    fn systemctl(&self, action: &str, wait: bool) -> Result<()> {
        let mut cmd = ToolCommand::new(Tool::Systemctl).arg(action);
        if !wait {
            cmd = cmd.arg("--no-block");
        }
        let cmd = cmd.arg(self.service_name());
        self.runner.run(&cmd)?;
        Ok(())
    }

    fn pki_server(&self, subcommand: &str) -> ToolCommand {
        ToolCommand::new(Tool::PkiServer)
            .arg(subcommand)
            .args(["-i", self.name.as_str()])
    }

    /// Whether `pki-server status` reports the server running. A non-zero
    /// exit counts as not running yet.
    fn is_running(&self) -> Result<bool> {
        match self.runner.run(&self.pki_server("status")) {
            Ok(output) => Ok(output
                .stdout_lossy()
                .to_ascii_lowercase()
                .contains(RUNNING_MARKER)),
            Err(CommandError::NonZeroExit { exit_code, .. }) => {
                debug!(instance = %self.name, exit_code, "status check failed");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Polls until the server is running or the attempts run out.
    fn wait_until_running(&self) -> Result<()> {
        let Readiness { attempts, interval } = self.readiness;
        for attempt in 1..=attempts {
            if self.is_running()? {
                info!(instance = %self.name, attempt, "server running");
                return Ok(());
            }
            if attempt < attempts {
                thread::sleep(interval);
            }
        }
        warn!(instance = %self.name, attempts, "server did not report running");
        Err(CertFixError::precondition(format!(
            "server {} did not become ready after {attempts} status checks",
            self.name
        )))
    }
}

impl<R: CommandRunner> Instance for PkiInstance<R> {
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

    fn start(&mut self, wait: bool) -> Result<()> {
        info!(instance = %self.name, "starting server");
        self.systemctl("start", wait)?;
        if wait {
            self.wait_until_running()?;
        }
        Ok(())
    }

    fn stop(&mut self, wait: bool) -> Result<()> {
        info!(instance = %self.name, "stopping server");
        self.systemctl("stop", wait)
    }

    fn cert_create(&mut self, request: &CertCreate) -> Result<()> {
        let mut cmd = self.pki_server("cert-create");
        if let Some(id) = &request.cert_id {
            cmd = cmd.arg(id);
        }
        if request.temporary {
            cmd = cmd.arg("--temp");
        }
        if request.renew {
            cmd = cmd.arg("--renew");
        }
        if let Some(serial) = &request.serial {
            cmd = cmd.args(["--serial", serial.as_str()]);
        }
        if let Some(output) = &request.output {
            cmd = cmd.arg("--output").arg(output.to_string_lossy());
        }
        if let Some(uid) = &request.agent_uid {
            cmd = cmd.args(["--username", uid.as_str()]);
        }
        if let Some(file) = &request.password_file {
            cmd = cmd.arg("--password-file").arg(file.to_string_lossy());
        }
        if let Some(port) = request.port {
            cmd = cmd.arg("--port").arg(port.to_string());
        }
        self.runner.run(&cmd)?;
        Ok(())
    }

    fn cert_del(&mut self, cert_id: &str, remove_key: bool) -> Result<()> {
        let mut cmd = self.pki_server("cert-del").arg(cert_id);
        if remove_key {
            cmd = cmd.arg("--remove-key");
        }
        self.runner.run(&cmd)?;
        Ok(())
    }

    fn cert_import(&mut self, cert_id: &str) -> Result<()> {
        let cmd = self.pki_server("cert-import").arg(cert_id);
        self.runner.run(&cmd)?;
        Ok(())
    }

    fn passwords(&self) -> &PasswordStore {
        &self.passwords
    }

    fn passwords_mut(&mut self) -> &mut PasswordStore {
        &mut self.passwords
    }

    fn store_passwords(&mut self) -> Result<()> {
        self.passwords
            .properties()
            .save(&self.conf_dir.join("password.conf"))
    }

    fn cert_file(&self, name: &str) -> PathBuf {
        self.conf_dir.join("certs").join(format!("{name}.crt"))
    }
}
