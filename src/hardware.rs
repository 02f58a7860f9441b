//! Hardware fingerprinting.
//!
//! The fingerprint is a SHA-512 digest over the sorted, de-duplicated set of
//! network interface hardware addresses followed by the CPU descriptor lines
//! in the order the kernel lists them. Every line is newline-terminated
//! before hashing.

use sha2::{Digest, Sha512};
use std::fmt;

use crate::errors::HardwareQueryError;

mod linux;

pub use linux::{SysfsHardware, CPU_DESCRIPTOR_KEYS, DEFAULT_CPUINFO_PATH, DEFAULT_NET_ROOT};

/// Something that can enumerate the raw hardware identifiers.
pub trait HardwareSource {
    /// Hardware (MAC) addresses of the network interfaces, in any order.
    fn mac_addresses(&self) -> Result<Vec<String>, HardwareQueryError>;

    /// CPU descriptor lines for every logical CPU, in enumeration order.
    fn cpu_descriptors(&self) -> Result<Vec<String>, HardwareQueryError>;
}

/// Lowercase hex SHA-512 digest identifying this machine's hardware.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint the current machine.
pub fn compute_fingerprint() -> Result<Fingerprint, HardwareQueryError> {
    #[cfg(target_os = "linux")]
    {
        fingerprint_from(&SysfsHardware::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(HardwareQueryError::Unsupported)
    }
}

/// Fingerprint whatever `source` reports.
pub fn fingerprint_from<S>(source: &S) -> Result<Fingerprint, HardwareQueryError>
where
    S: HardwareSource + ?Sized,
{
    let mut addresses = source.mac_addresses()?;
    addresses.sort();
    addresses.dedup();

    let cpu_lines = source.cpu_descriptors()?;

    if addresses.is_empty() && cpu_lines.is_empty() {
        return Err(HardwareQueryError::Empty);
    }

    let mut hasher = Sha512::new();
    for line in addresses.iter().chain(cpu_lines.iter()) {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    Ok(Fingerprint(hex::encode(hasher.finalize())))
}
