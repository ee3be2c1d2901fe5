use super::conf::{ConfigGenerator, POSTGRESQL_CONF};
use crate::config::UpgradeConfig;
use crate::core::fs::{create_dir_all, dir_accessible, is_executable};
use crate::core::{MajorVersion, Result, UpgradeError, VersionRole};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Marker file PostgreSQL keeps in every initialised data directory
pub const PG_VERSION_FILE: &str = "PG_VERSION";

/// Present while a server is running against a data directory
pub const POSTMASTER_PID_FILE: &str = "postmaster.pid";

/// Executables a hop target must provide
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolBinaries {
    pub initdb: PathBuf,
    pub pg_upgrade: PathBuf,
    pub vacuumdb: PathBuf,
    pub postgres: PathBuf,
}

impl ToolBinaries {
    /// Resolve all four binaries inside `bin_dir`, failing on the first one
    /// that is missing or not executable
    pub fn locate(bin_dir: &Path) -> Result<Self> {
        let find = |name: &str| -> Result<PathBuf> {
            let path = bin_dir.join(name);
            if !is_executable(&path) {
                return Err(UpgradeError::Environment(format!(
                    "'{}' at {} does not exist.",
                    name,
                    path.display()
                )));
            }
            Ok(path)
        };

        Ok(Self {
            initdb: find("initdb")?,
            pg_upgrade: find("pg_upgrade")?,
            vacuumdb: find("vacuumdb")?,
            postgres: find("postgres")?,
        })
    }
}

/// One major version as seen by a single hop
///
/// Construction runs every precondition for the version's role and writes its
/// configuration overlay; afterwards the descriptor is read-only.
#[derive(Debug, Clone, Serialize)]
pub struct VersionDescriptor {
    version: MajorVersion,
    role: VersionRole,
    port: u16,
    data_dir: PathBuf,
    main_dir: PathBuf,
    bin_dir: PathBuf,
    tmp_conf_dir: PathBuf,
    binaries: Option<ToolBinaries>,
}

impl VersionDescriptor {
    pub fn new(
        config: &UpgradeConfig,
        version: MajorVersion,
        role: VersionRole,
        port: u16,
        extra_directives: &[String],
    ) -> Result<Self> {
        if version == 0 {
            return Err(UpgradeError::Precondition(
                "Version number must be a positive integer.".to_string(),
            ));
        }

        let data_dir = config.data_dir(version);
        let main_dir = config.main_dir(version);

        match role {
            VersionRole::Target => {
                if data_dir.exists() {
                    return Err(UpgradeError::Precondition(format!(
                        "New data directory {dir} already exists; if the previous attempt to upgrade failed, \
                         run something like this:\n\n    rm -rf {dir}\n\n\
                         or adjust the path on the host, or revert to an old filesystem snapshot.",
                        dir = data_dir.display()
                    )));
                }
            }
            VersionRole::Source => Self::check_source(&data_dir, &main_dir)?,
            VersionRole::Intermediate => {}
        }

        create_dir_all(&config.stats_temp_dir(version))?;

        let bin_dir = config.bin_dir(version);
        if !dir_accessible(&bin_dir) {
            return Err(UpgradeError::Environment(format!(
                "Binaries directory {} does not exist or is inaccessible.",
                bin_dir.display()
            )));
        }

        let binaries = if role.is_target() {
            Some(ToolBinaries::locate(&bin_dir)?)
        } else {
            None
        };

        let tmp_conf_dir = ConfigGenerator::new(config).generate(version, port, extra_directives)?;

        Ok(Self {
            version,
            role,
            port,
            data_dir,
            main_dir,
            bin_dir,
            tmp_conf_dir,
            binaries,
        })
    }

    fn check_source(data_dir: &Path, main_dir: &Path) -> Result<()> {
        if !dir_accessible(data_dir) {
            return Err(UpgradeError::Precondition(format!(
                "Old data directory {} does not exist or is inaccessible; forgot to mount it?",
                data_dir.display()
            )));
        }

        if !dir_accessible(main_dir) {
            return Err(UpgradeError::Precondition(format!(
                "Old main directory {} does not exist or is inaccessible.",
                main_dir.display()
            )));
        }

        let pg_version = main_dir.join(PG_VERSION_FILE);
        if !pg_version.is_file() {
            return Err(UpgradeError::Precondition(format!(
                "{} does not exist or is inaccessible.",
                pg_version.display()
            )));
        }

        let postmaster_pid = main_dir.join(POSTMASTER_PID_FILE);
        if postmaster_pid.exists() {
            return Err(UpgradeError::Precondition(format!(
                "{} exists; is the database running?",
                postmaster_pid.display()
            )));
        }

        Ok(())
    }

    pub fn version(&self) -> MajorVersion {
        self.version
    }

    pub fn role(&self) -> VersionRole {
        self.role
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn main_dir(&self) -> &Path {
        &self.main_dir
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn tmp_conf_dir(&self) -> &Path {
        &self.tmp_conf_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.tmp_conf_dir.join(POSTGRESQL_CONF)
    }

    /// Tool binaries; only hop targets carry them
    pub fn binaries(&self) -> Result<&ToolBinaries> {
        self.binaries.as_ref().ok_or_else(|| {
            UpgradeError::Precondition(format!(
                "Version {} ({}) has no tool binaries; only upgrade targets do.",
                self.version, self.role
            ))
        })
    }
}
