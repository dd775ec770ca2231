//! Typed property store accessors.
//!
//! Every lookup is a two-call query whose reply carries a type tag. A tag
//! that differs from the expected one is a lookup failure, same as absence.

use crate::error::{Error, Result};
use crate::platform::{DevNode, DeviceProperty, HidHost, PropertyReply, PropertyType};
use crate::query::{bytes_to_wide, fetch_sized, wide_multi_sz, wide_to_string};

fn read_typed<F>(
    op: &'static str,
    key: DeviceProperty,
    expected: PropertyType,
    mut query: F,
) -> Result<Vec<u16>>
where
    F: FnMut(&mut [u8]) -> Result<PropertyReply>,
{
    let blob = fetch_sized(op, |buf: &mut [u8]| {
        let reply = query(buf)?;
        if reply.ty != expected {
            return Err(Error::PropertyType { key });
        }
        Ok(reply.fetch)
    })?;
    Ok(bytes_to_wide(&blob))
}

/// String property of an interface path.
pub fn interface_string<H: HidHost>(host: &H, path: &str, key: DeviceProperty) -> Result<String> {
    let units = read_typed("interface_property", key, PropertyType::String, |buf| {
        host.interface_property(path, key, buf)
    })?;
    Ok(wide_to_string(&units))
}

/// String property of a device node.
pub fn node_string<H: HidHost>(host: &H, node: DevNode, key: DeviceProperty) -> Result<String> {
    let units = read_typed("node_property", key, PropertyType::String, |buf| {
        host.node_property(node, key, buf)
    })?;
    Ok(wide_to_string(&units))
}

/// String-list property of a device node.
pub fn node_string_list<H: HidHost>(
    host: &H,
    node: DevNode,
    key: DeviceProperty,
) -> Result<Vec<String>> {
    let units = read_typed("node_property", key, PropertyType::StringList, |buf| {
        host.node_property(node, key, buf)
    })?;
    Ok(wide_multi_sz(&units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockHost, MockNode};

    fn host() -> MockHost {
        MockHost::new().with_node(
            DevNode(7),
            MockNode::new("HID\\VID_0FD9&PID_0060\\7&1")
                .with_list(DeviceProperty::CompatibleIds, &["HID_DEVICE_UP:000C", "HID_DEVICE"])
                .with_string(DeviceProperty::Manufacturer, "Elgato"),
        )
    }

    #[test]
    fn reads_node_string() {
        let h = host();
        assert_eq!(
            node_string(&h, DevNode(7), DeviceProperty::Manufacturer).unwrap(),
            "Elgato"
        );
        assert_eq!(
            node_string(&h, DevNode(7), DeviceProperty::InstanceId).unwrap(),
            "HID\\VID_0FD9&PID_0060\\7&1"
        );
    }

    #[test]
    fn reads_node_string_list() {
        let h = host();
        assert_eq!(
            node_string_list(&h, DevNode(7), DeviceProperty::CompatibleIds).unwrap(),
            vec!["HID_DEVICE_UP:000C", "HID_DEVICE"]
        );
    }

    #[test]
    fn type_mismatch_is_a_failure() {
        let h = host();
        assert!(matches!(
            node_string(&h, DevNode(7), DeviceProperty::CompatibleIds),
            Err(Error::PropertyType { .. })
        ));
        assert!(node_string_list(&h, DevNode(7), DeviceProperty::Manufacturer).is_err());
    }

    #[test]
    fn missing_property_and_node() {
        let h = host();
        assert!(node_string(&h, DevNode(7), DeviceProperty::FriendlyName).is_err());
        assert!(node_string(&h, DevNode(99), DeviceProperty::InstanceId).is_err());
    }
}
