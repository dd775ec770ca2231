//! Device identity collection.
//!
//! [`collect`] fills a [`DeviceIdentity`] from the HID class driver
//! (attributes, capabilities, display strings), then classifies the bus and
//! backfills whatever the driver left empty from the device tree. Every
//! lookup here is best-effort: a miss is logged and the field keeps its
//! default.

use crate::bus::{classify, BusType};
use crate::platform::{DevNode, DeviceProperty, HidDevice, HidHost, StringKind};
use crate::property::{node_string, node_string_list};
use crate::query::wide_to_string;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Capacity, in UTF-16 units, of a display-string query.
///
/// `MAXIMUM_USB_STRING_LENGTH` is 255 and `BLUETOOTH_DEVICE_NAME_SIZE` is 256.
pub const MAX_STRING_UNITS: usize = 256;

/// Display-string capacity for USB devices.
///
/// Some USB devices return a corrupted string when the buffer holds 127 or
/// more units, even though the query reports success.
pub const MAX_STRING_UNITS_USB: usize = 126;

/// Identity of one HID interface.
///
/// String fields are never absent; an empty string means "unknown".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Binary-coded decimal device release number (`bcdDevice`).
    pub release_number: u16,
    pub serial_number: String,
    pub manufacturer_string: String,
    pub product_string: String,
    pub usage_page: u16,
    pub usage: u16,
    /// USB interface number; -1 for non-USB devices.
    pub interface_number: i32,
    pub bus_type: BusType,
    /// Bluetooth Low Energy (HID over GATT).
    pub ble: bool,
}

impl DeviceIdentity {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            vendor_id: 0,
            product_id: 0,
            release_number: 0,
            serial_number: String::new(),
            manufacturer_string: String::new(),
            product_string: String::new(),
            usage_page: 0,
            usage: 0,
            interface_number: -1,
            bus_type: BusType::Unknown,
            ble: false,
        }
    }

    /// Best human-readable label.
    pub fn display_name(&self) -> String {
        [&self.product_string, &self.manufacturer_string]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("{:04x}:{:04x}", self.vendor_id, self.product_id))
    }
}

/// Parse the hex value that follows `token` in `s`.
pub fn token_value(s: &str, token: &str) -> Option<u32> {
    let start = s.find(token)? + token.len();
    let digits: String = s[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    u32::from_str_radix(&digits, 16).ok()
}

/// Serial number embedded in a USB device instance id.
///
/// The last path component of `USB\VID_xxxx&PID_xxxx\<serial>` is the serial
/// when the device reports one. Without it, the component is a bus-scoped id
/// containing `&` and is not globally unique.
pub fn serial_from_instance_id(instance_id: &str) -> Option<&str> {
    match instance_id.rfind(['\\', '&']) {
        Some(pos) if pos > 0 && instance_id[pos..].starts_with('\\') => {
            Some(&instance_id[pos + 1..])
        }
        _ => None,
    }
}

fn read_display_string<D: HidDevice>(device: &D, kind: StringKind, capacity: usize) -> String {
    let mut buf = vec![0u16; capacity];
    match device.read_string(kind, &mut buf) {
        Ok(()) => wide_to_string(&buf),
        Err(e) => {
            debug!(?kind, error = %e, "string query failed");
            String::new()
        }
    }
}

/// Fill `field` from `lookup` when it is still empty.
fn backfill<F>(field: &mut String, what: &'static str, lookup: F)
where
    F: FnOnce() -> crate::error::Result<String>,
{
    if !field.is_empty() {
        return;
    }
    match lookup() {
        Ok(value) => *field = value,
        Err(e) => debug!(what, error = %e, "backfill lookup missed"),
    }
}

/// Build the identity of the interface at `path`, opened as `device`.
pub fn collect<H: HidHost>(host: &H, path: &str, device: &H::Device) -> DeviceIdentity {
    let mut identity = DeviceIdentity::new(path);

    match device.attributes() {
        Ok(attrs) => {
            identity.vendor_id = attrs.vendor_id;
            identity.product_id = attrs.product_id;
            identity.release_number = attrs.version_number;
        }
        Err(e) => debug!(path, error = %e, "attribute query failed"),
    }

    match device.capabilities() {
        Ok(caps) => {
            identity.usage = caps.usage;
            identity.usage_page = caps.usage_page;
        }
        Err(e) => debug!(path, error = %e, "capability query failed"),
    }

    // Bus type decides the string capacity, so classify first.
    let bus = classify(host, path);
    identity.bus_type = bus.bus_type;
    identity.ble = bus.ble;

    let capacity = if bus.bus_type == BusType::Usb {
        MAX_STRING_UNITS_USB
    } else {
        MAX_STRING_UNITS
    };
    identity.serial_number = read_display_string(device, StringKind::SerialNumber, capacity);
    identity.manufacturer_string = read_display_string(device, StringKind::Manufacturer, capacity);
    identity.product_string = read_display_string(device, StringKind::Product, capacity);

    match bus.bus_type {
        BusType::Usb => enrich_usb(host, &mut identity, bus.node),
        BusType::Bluetooth if bus.ble => {
            if let Some(node) = bus.node {
                enrich_ble(host, &mut identity, node);
            }
        }
        _ => {}
    }

    identity
}

fn enrich_usb<H: HidHost>(host: &H, identity: &mut DeviceIdentity, node: Option<DevNode>) {
    if let Some(node) = node {
        usb_node_info(host, identity, node);
    }
    // No MI_ token anywhere: single-interface device.
    if identity.interface_number == -1 {
        identity.interface_number = 0;
    }
}

fn usb_node_info<H: HidHost>(host: &H, identity: &mut DeviceIdentity, mut node: DevNode) {
    let instance_id = match node_string(host, node, DeviceProperty::InstanceId) {
        Ok(id) => id.to_ascii_uppercase(),
        Err(e) => {
            debug!(node = node.0, error = %e, "no instance id on USB node");
            return;
        }
    };

    // XUSB (XInput) interface groups hang one level below the USB function.
    if token_value(&instance_id, "IG_").is_some() {
        node = match host.parent(node) {
            Ok(parent) => parent,
            Err(e) => {
                debug!(node = node.0, error = %e, "no parent for interface group");
                return;
            }
        };
    }

    let hardware_ids = match node_string_list(host, node, DeviceProperty::HardwareIds) {
        Ok(ids) => ids,
        Err(e) => {
            debug!(node = node.0, error = %e, "no hardware ids on USB node");
            return;
        }
    };
    for id in hardware_ids.iter().map(|id| id.to_ascii_uppercase()) {
        if identity.release_number == 0 {
            if let Some(rev) = token_value(&id, "REV_").and_then(|v| u16::try_from(v).ok()) {
                identity.release_number = rev;
            }
        }
        if identity.interface_number == -1 {
            if let Some(mi) = token_value(&id, "MI_").and_then(|v| i32::try_from(v).ok()) {
                identity.interface_number = mi;
            }
        }
    }

    backfill(&mut identity.manufacturer_string, "manufacturer", || {
        node_string(host, node, DeviceProperty::Manufacturer)
    });

    if identity.serial_number.is_empty() {
        // Interfaces of a composite device sit below the composite parent,
        // which carries the serial in its instance id.
        let usb_node = if identity.interface_number != -1 {
            match host.parent(node) {
                Ok(parent) => parent,
                Err(e) => {
                    debug!(node = node.0, error = %e, "no composite parent");
                    return;
                }
            }
        } else {
            node
        };
        match node_string(host, usb_node, DeviceProperty::InstanceId) {
            Ok(id) => {
                if let Some(serial) = serial_from_instance_id(&id) {
                    identity.serial_number = serial.to_string();
                }
            }
            Err(e) => debug!(node = usb_node.0, error = %e, "no instance id on USB device"),
        }
    }
}

fn enrich_ble<H: HidHost>(host: &H, identity: &mut DeviceIdentity, node: DevNode) {
    backfill(&mut identity.manufacturer_string, "ble manufacturer", || {
        node_string(host, node, DeviceProperty::BluetoothManufacturer)
    });
    backfill(&mut identity.serial_number, "ble address", || {
        node_string(host, node, DeviceProperty::BluetoothDeviceAddress)
    });
    backfill(&mut identity.product_string, "ble model", || {
        node_string(host, node, DeviceProperty::BluetoothModelNumber).or_else(|_| {
            let parent = host.parent(node)?;
            node_string(host, parent, DeviceProperty::FriendlyName)
        })
    });
}
