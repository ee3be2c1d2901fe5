use crate::config::UpgradeConfig;
use crate::core::{MajorVersion, PortAllocator, Result, UpgradeError, VersionRole};
use crate::layout::VersionDescriptor;
use serde::Serialize;
use tracing::info;

/// Two adjacent versions to upgrade between, e.g. 11 and 12
#[derive(Debug, Clone, Serialize)]
pub struct VersionPair {
    pub old: VersionDescriptor,
    pub new: VersionDescriptor,
}

impl VersionPair {
    pub fn new(old: VersionDescriptor, new: VersionDescriptor) -> Result<Self> {
        if new.version() != old.version() + 1 {
            return Err(UpgradeError::Precondition(format!(
                "Versions {} and {} are not adjacent.",
                old.version(),
                new.version()
            )));
        }
        if !new.role().is_target() {
            return Err(UpgradeError::Precondition(format!(
                "Version {} is not configured as an upgrade target.",
                new.version()
            )));
        }
        Ok(Self { old, new })
    }
}

/// Ordered hops from the source version up to the target version
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeChain {
    pairs: Vec<VersionPair>,
}

impl UpgradeChain {
    pub fn pairs(&self) -> &[VersionPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Descriptor of the version the chain ends on
    pub fn final_version(&self) -> Option<&VersionDescriptor> {
        self.pairs.last().map(|pair| &pair.new)
    }
}

/// `maintenance_work_mem` directive for a container with `total_ram_mb` of RAM
pub fn maintenance_work_mem_directive(total_ram_mb: u64) -> String {
    format!("maintenance_work_mem = {}MB", total_ram_mb / 10)
}

pub struct PairSequencer<'a> {
    config: &'a UpgradeConfig,
}

impl<'a> PairSequencer<'a> {
    pub fn new(config: &'a UpgradeConfig) -> Self {
        Self { config }
    }

    /// Build every descriptor of the chain up front.
    ///
    /// Nothing is executed here, so a failing precondition anywhere in the
    /// chain stops the run before the first hop touches any data directory.
    pub fn build_chain(
        &self,
        source: MajorVersion,
        target: MajorVersion,
        total_ram_mb: u64,
    ) -> Result<UpgradeChain> {
        if target <= source {
            return Err(UpgradeError::Precondition(format!(
                "Target version {} is not newer than source version {}.",
                target, source
            )));
        }
        if total_ram_mb == 0 {
            return Err(UpgradeError::Environment("RAM size can't be zero.".to_string()));
        }

        let tuning = maintenance_work_mem_directive(total_ram_mb);
        info!("New maintenance work memory limit: {}", tuning);

        let mut ports = PortAllocator::new(self.config.base_port);
        let mut pairs = Vec::with_capacity((target - source) as usize);

        for version in source..target {
            let (old_port, new_port) = ports.next_pair()?;
            let old_role = if version == source {
                VersionRole::Source
            } else {
                VersionRole::Intermediate
            };

            let old = VersionDescriptor::new(self.config, version, old_role, old_port, &[])?;
            let new = VersionDescriptor::new(
                self.config,
                version + 1,
                VersionRole::Target,
                new_port,
                std::slice::from_ref(&tuning),
            )?;

            pairs.push(VersionPair::new(old, new)?);
        }

        Ok(UpgradeChain { pairs })
    }
}
