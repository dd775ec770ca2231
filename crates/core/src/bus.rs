//! Transport bus classification.
//!
//! The HID interface itself does not say which bus it sits on. Its parent
//! device node does, indirectly: the parent's compatible identifiers carry
//! bus-specific tokens (`USB\Class_03`, `BTHENUM\{...}`, `ACPI\PNP0C50`, ...).
//!
//! References:
//! - <https://learn.microsoft.com/windows-hardware/drivers/install/standard-usb-identifiers>
//! - <https://learn.microsoft.com/windows-hardware/drivers/bluetooth/installing-a-bluetooth-device>
//! - <https://learn.microsoft.com/windows-hardware/drivers/hid/plug-and-play-support-and-power-management>
//! - <https://learn.microsoft.com/windows-hardware/drivers/hid/plug-and-play-for-spi>

use crate::platform::{DevNode, DeviceProperty, HidHost};
use crate::property::{interface_string, node_string_list};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Transport bus of a HID device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusType {
    #[default]
    Unknown,
    Usb,
    Bluetooth,
    I2c,
    Spi,
}

impl std::fmt::Display for BusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Usb => "USB",
            Self::Bluetooth => "Bluetooth",
            Self::I2c => "I2C",
            Self::Spi => "SPI",
        };
        f.write_str(name)
    }
}

/// Result of bus resolution.
///
/// `node` is the deepest node reached, even when classification failed; the
/// enrichment heuristics start from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusClassification {
    pub bus_type: BusType,
    /// Bluetooth Low Energy (HID over GATT).
    pub ble: bool,
    pub node: Option<DevNode>,
}

/// Compatible-id markers in priority order.
const MARKERS: [(&str, BusType, bool); 5] = [
    ("USB", BusType::Usb, false),
    ("BTHENUM", BusType::Bluetooth, false),
    ("BTHLEDEVICE", BusType::Bluetooth, true),
    ("PNP0C50", BusType::I2c, false),
    ("PNP0C51", BusType::Spi, false),
];

/// Scan compatible ids in list order; the first id matching any marker
/// decides, with [`MARKERS`] order breaking ties within that id.
pub fn classify_compatible_ids<S: AsRef<str>>(ids: &[S]) -> (BusType, bool) {
    for id in ids {
        let id = id.as_ref().to_ascii_uppercase();
        if let Some((_, bus, ble)) = MARKERS.iter().find(|(marker, _, _)| id.contains(marker)) {
            return (*bus, *ble);
        }
    }
    (BusType::Unknown, false)
}

/// Classify the bus of the HID interface at `path`.
pub fn classify<H: HidHost>(host: &H, path: &str) -> BusClassification {
    let mut result = BusClassification::default();

    let instance_id = match interface_string(host, path, DeviceProperty::InstanceId) {
        Ok(id) => id,
        Err(e) => {
            debug!(path, error = %e, "no instance id for interface");
            return result;
        }
    };

    let node = match host.locate_node(&instance_id) {
        Ok(node) => node,
        Err(e) => {
            debug!(instance_id = %instance_id, error = %e, "device node not found");
            return result;
        }
    };
    result.node = Some(node);

    let parent = match host.parent(node) {
        Ok(parent) => parent,
        Err(e) => {
            debug!(node = node.0, error = %e, "no parent node");
            return result;
        }
    };
    result.node = Some(parent);

    let ids = match node_string_list(host, parent, DeviceProperty::CompatibleIds) {
        Ok(ids) => ids,
        Err(e) => {
            debug!(node = parent.0, error = %e, "no compatible ids on parent");
            return result;
        }
    };

    let (bus_type, ble) = classify_compatible_ids(&ids);
    result.bus_type = bus_type;
    result.ble = ble;
    debug!(path, %bus_type, ble, "bus classified");
    result
}
