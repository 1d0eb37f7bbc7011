//! BTLogger BLE
//!
//! Discovery of log producers, connection management and delivery of the
//! records they notify. The platform Bluetooth stack sits behind the
//! [`BleLink`] trait: [`BtleplugLink`] drives real adapters through btleplug,
//! and with the `testing` feature [`mock::MockLink`] provides a scriptable
//! stand-in.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod btleplug_link;
pub mod device;
pub mod error;
pub mod link;
pub mod manager;
pub mod protocol;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use btleplug_link::BtleplugLink;
pub use device::{ConnectionState, DeviceHandle, DeviceId};
pub use error::LinkError;
pub use link::{BleLink, LinkEvent};
pub use manager::{ConnectionManager, ConnectionStats};
pub use protocol::DeviceFilter;
