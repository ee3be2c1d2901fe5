use crate::core::{MajorVersion, Result, UpgradeError};
use crate::readiness::ReadinessPolicy;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATA_ROOT: &str = "/var/lib/postgresql";
pub const DEFAULT_BIN_ROOT: &str = "/usr/lib/postgresql";
pub const DEFAULT_CONF_ROOT: &str = "/etc/postgresql";
pub const DEFAULT_TMP_CONF_ROOT: &str = "/var/tmp/postgresql/conf";
pub const DEFAULT_RUN_ROOT: &str = "/var/run/postgresql";
pub const DEFAULT_SERVICE_USER: &str = "postgres";
pub const DEFAULT_BASE_PORT: u16 = 50432;
pub const DEFAULT_MEMORY_PROBE: &str = "/container_memory_limit.sh";

/// Everything the upgrade needs to know about the host
///
/// Replaces fixed filesystem roots and OS identity lookups so the whole
/// orchestration can be pointed at a scratch directory in tests.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// One subdirectory per installed major version, each with `main/`
    pub data_root: PathBuf,

    /// Binary installations, `<bin_root>/<version>/bin`
    pub bin_root: PathBuf,

    /// Holds exactly one active configuration set, `<conf_root>/<version>/main`
    pub conf_root: PathBuf,

    /// Where per-version configuration overlays are generated
    pub tmp_conf_root: PathBuf,

    /// PID files and statistics temp directories
    pub run_root: PathBuf,

    /// Account the upgrade must run as
    pub service_user: String,

    /// First port of the per-hop port counter
    pub base_port: u16,

    /// Command printing the container memory limit in MB
    pub memory_probe: PathBuf,

    /// Memory limit in MB; skips the probe when set
    pub ram_mb: Option<u64>,

    /// Command run once before the chain is planned
    pub pre_upgrade_hook: Option<PathBuf>,

    /// Worker count passed to pg_upgrade and vacuumdb
    pub jobs: usize,

    /// How to wait for the final server to come up
    pub readiness: ReadinessPolicy,
}

impl UpgradeConfig {
    pub fn new() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            bin_root: PathBuf::from(DEFAULT_BIN_ROOT),
            conf_root: PathBuf::from(DEFAULT_CONF_ROOT),
            tmp_conf_root: PathBuf::from(DEFAULT_TMP_CONF_ROOT),
            run_root: PathBuf::from(DEFAULT_RUN_ROOT),
            service_user: DEFAULT_SERVICE_USER.to_string(),
            base_port: DEFAULT_BASE_PORT,
            memory_probe: PathBuf::from(DEFAULT_MEMORY_PROBE),
            ram_mb: None,
            pre_upgrade_hook: None,
            jobs: num_cpus::get(),
            readiness: ReadinessPolicy::default(),
        }
    }

    /// Put every root under a single prefix (`<root>/data`, `<root>/bin`, ...)
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new()
            .data_root(root.join("data"))
            .bin_root(root.join("bin"))
            .conf_root(root.join("etc"))
            .tmp_conf_root(root.join("tmp/conf"))
            .run_root(root.join("run"))
    }

    pub fn data_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_root = path.into();
        self
    }

    pub fn bin_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.bin_root = path.into();
        self
    }

    pub fn conf_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.conf_root = path.into();
        self
    }

    pub fn tmp_conf_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmp_conf_root = path.into();
        self
    }

    pub fn run_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_root = path.into();
        self
    }

    pub fn service_user(mut self, user: &str) -> Self {
        self.service_user = user.to_string();
        self
    }

    pub fn base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn memory_probe(mut self, path: impl Into<PathBuf>) -> Self {
        self.memory_probe = path.into();
        self
    }

    pub fn ram_mb(mut self, ram_mb: u64) -> Self {
        self.ram_mb = Some(ram_mb);
        self
    }

    pub fn pre_upgrade_hook(mut self, path: impl Into<PathBuf>) -> Self {
        self.pre_upgrade_hook = Some(path.into());
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn readiness(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = policy;
        self
    }

    /// Load from `PGUPGRADE_*` environment variables (after reading `.env`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`UpgradeConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(value) = lookup("PGUPGRADE_DATA_ROOT") {
            config.data_root = PathBuf::from(value);
        }
        if let Some(value) = lookup("PGUPGRADE_BIN_ROOT") {
            config.bin_root = PathBuf::from(value);
        }
        if let Some(value) = lookup("PGUPGRADE_CONF_ROOT") {
            config.conf_root = PathBuf::from(value);
        }
        if let Some(value) = lookup("PGUPGRADE_TMP_CONF_ROOT") {
            config.tmp_conf_root = PathBuf::from(value);
        }
        if let Some(value) = lookup("PGUPGRADE_RUN_ROOT") {
            config.run_root = PathBuf::from(value);
        }
        if let Some(value) = lookup("PGUPGRADE_SERVICE_USER") {
            config.service_user = value;
        }
        if let Some(value) = lookup("PGUPGRADE_BASE_PORT") {
            config.base_port = parse_var("PGUPGRADE_BASE_PORT", &value)?;
        }
        if let Some(value) = lookup("PGUPGRADE_MEMORY_PROBE") {
            config.memory_probe = PathBuf::from(value);
        }
        if let Some(value) = lookup("PGUPGRADE_RAM_MB") {
            config.ram_mb = Some(parse_var("PGUPGRADE_RAM_MB", &value)?);
        }
        if let Some(value) = lookup("PGUPGRADE_PRE_HOOK") {
            config.pre_upgrade_hook = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("PGUPGRADE_JOBS") {
            config.jobs = parse_var("PGUPGRADE_JOBS", &value)?;
        }
        if let Some(value) = lookup("PGUPGRADE_READINESS_TIMEOUT_SECS") {
            let secs: u64 = parse_var("PGUPGRADE_READINESS_TIMEOUT_SECS", &value)?;
            config.readiness = config.readiness.deadline(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.service_user.is_empty() {
            return Err(UpgradeError::Config("service user cannot be empty".to_string()));
        }

        if self.base_port == 0 {
            return Err(UpgradeError::Config("base port must be > 0".to_string()));
        }

        if self.jobs == 0 {
            return Err(UpgradeError::Config("jobs must be > 0".to_string()));
        }

        if self.ram_mb == Some(0) {
            return Err(UpgradeError::Config("RAM size can't be zero".to_string()));
        }

        self.readiness.validate()
    }

    pub fn data_dir(&self, version: MajorVersion) -> PathBuf {
        self.data_root.join(version.to_string())
    }

    pub fn main_dir(&self, version: MajorVersion) -> PathBuf {
        self.data_dir(version).join("main")
    }

    pub fn bin_dir(&self, version: MajorVersion) -> PathBuf {
        self.bin_root.join(version.to_string()).join("bin")
    }

    /// Overlay directory; keyed by port too since a version is configured
    /// once as a hop target and once as the old side of the next hop
    pub fn tmp_conf_dir(&self, version: MajorVersion, port: u16) -> PathBuf {
        self.tmp_conf_root.join(format!("{}-{}", version, port))
    }

    pub fn external_pid_file(&self, version: MajorVersion) -> PathBuf {
        self.run_root.join(format!("{}-main.pid", version))
    }

    pub fn stats_temp_dir(&self, version: MajorVersion) -> PathBuf {
        self.run_root.join(format!("{}-main.pg_stat_tmp", version))
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| UpgradeError::Config(format!("{} has an invalid value: '{}'", key, value)))
}
