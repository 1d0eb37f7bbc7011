//! Producer device identity

use core::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a producer: its Bluetooth address, normalised to
/// upper case so that `aa:bb:..` and `AA:BB:..` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

/// Snapshot of a device handed to callbacks and storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub address: DeviceAddress,
    /// Advertised name; may be empty
    pub name: String,
}

impl DeviceIdentity {
    pub fn new(address: impl Into<DeviceAddress>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Name to show for the device, falling back to its address
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            self.address.as_str()
        } else {
            &self.name
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}
