use std::fs;
use std::path::PathBuf;

use super::HardwareSource;
use crate::errors::HardwareQueryError;

pub const DEFAULT_NET_ROOT: &str = "/sys/class/net";
pub const DEFAULT_CPUINFO_PATH: &str = "/proc/cpuinfo";

/// `/proc/cpuinfo` keys that take part in the fingerprint.
pub const CPU_DESCRIPTOR_KEYS: [&str; 5] =
    ["vendor_id", "cpu family", "model", "model name", "stepping"];

/// Reads interface addresses from sysfs and CPU descriptors from procfs.
#[derive(Debug, Clone)]
pub struct SysfsHardware {
    net_root: PathBuf,
    cpuinfo: PathBuf,
}

impl Default for SysfsHardware {
    fn default() -> Self {
        Self::new(DEFAULT_NET_ROOT, DEFAULT_CPUINFO_PATH)
    }
}

impl SysfsHardware {
    pub fn new(net_root: impl Into<PathBuf>, cpuinfo: impl Into<PathBuf>) -> Self {
        Self {
            net_root: net_root.into(),
            cpuinfo: cpuinfo.into(),
        }
    }
}

impl HardwareSource for SysfsHardware {
    fn mac_addresses(&self) -> Result<Vec<String>, HardwareQueryError> {
        let interfaces_error = |source| HardwareQueryError::Interfaces {
            path: self.net_root.clone(),
            source,
        };

        let mut addresses = Vec::new();
        for entry in fs::read_dir(&self.net_root).map_err(interfaces_error)? {
            let entry = entry.map_err(interfaces_error)?;

            // Some virtual interfaces expose no address file.
            let Ok(raw) = fs::read_to_string(entry.path().join("address")) else {
                continue;
            };

            let address = raw.trim();
            if !address.is_empty() {
                addresses.push(address.to_string());
            }
        }

        Ok(addresses)
    }

    fn cpu_descriptors(&self) -> Result<Vec<String>, HardwareQueryError> {
        let content =
            fs::read_to_string(&self.cpuinfo).map_err(|source| HardwareQueryError::CpuInfo {
                path: self.cpuinfo.clone(),
                source,
            })?;

        Ok(cpu_descriptor_lines(&content))
    }
}

/// Keep the descriptor lines verbatim, in the order they appear.
pub(crate) fn cpu_descriptor_lines(cpuinfo: &str) -> Vec<String> {
    cpuinfo
        .lines()
        .filter(|line| {
            line.split_once(':')
                .map(|(key, _)| CPU_DESCRIPTOR_KEYS.contains(&key.trim()))
                .unwrap_or(false)
        })
        .map(str::to_string)
        .collect()
}
