//! HID interface discovery.

use crate::info::{collect, DeviceIdentity};
use crate::platform::{HidDevice, HidHost};
use crate::query::{fetch_sized, wide_multi_sz};
use tracing::{debug, info, warn};

/// Whether `vendor_id`/`product_id` pass a filter where 0 matches anything.
pub fn matches_filter(vendor_id: u16, product_id: u16, vendor_filter: u16, product_filter: u16) -> bool {
    (vendor_filter == 0 || vendor_id == vendor_filter)
        && (product_filter == 0 || product_id == product_filter)
}

/// Discover present HID interfaces matching the filter, in enumeration order.
///
/// Interfaces that cannot be opened or do not answer the attribute query
/// are skipped. A failed interface-list query yields an empty list.
pub fn discover<H: HidHost>(host: &H, vendor_filter: u16, product_filter: u16) -> Vec<DeviceIdentity> {
    debug!(
        vid = format_args!("0x{:04X}", vendor_filter),
        pid = format_args!("0x{:04X}", product_filter),
        "Starting HID interface enumeration"
    );

    let list = match fetch_sized("interface_list", |buf: &mut [u16]| host.interface_list(buf)) {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "HID interface list query failed");
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    for path in wide_multi_sz(&list) {
        // Scratch handle; closed when it drops at the end of the iteration.
        let device = match host.open_for_query(&path) {
            Ok(device) => device,
            Err(e) => {
                debug!(path = %path, error = %e, "Skipping interface");
                continue;
            }
        };

        let attrs = match device.attributes() {
            Ok(attrs) => attrs,
            Err(e) => {
                debug!(path = %path, error = %e, "attribute query failed");
                continue;
            }
        };
        if !matches_filter(attrs.vendor_id, attrs.product_id, vendor_filter, product_filter) {
            continue;
        }

        let identity = collect(host, &path, &device);
        info!(
            vid = format_args!("0x{:04X}", identity.vendor_id),
            pid = format_args!("0x{:04X}", identity.product_id),
            bus = %identity.bus_type,
            interface = identity.interface_number,
            path = %identity.path,
            "Found HID interface"
        );
        devices.push(identity);
    }

    debug!(count = devices.len(), "HID enumeration complete");
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockHost, MockInterface};

    const DECK_A: &str = "\\\\?\\hid#vid_0fd9&pid_0060#a";
    const DECK_B: &str = "\\\\?\\hid#vid_0fd9&pid_006c#b";
    const MOUSE: &str = "\\\\?\\hid#vid_046d&pid_c08b#c";

    #[test]
    fn finds_matching_vendor_and_product() {
        let host = MockHost::new()
            .with_interface(MockInterface::new(MOUSE, 0x046D, 0xC08B))
            .with_interface(MockInterface::new(DECK_A, 0x0FD9, 0x0060));
        let found = discover(&host, 0x0FD9, 0x0060);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].vendor_id, 0x0FD9);
        assert_eq!(found[0].product_id, 0x0060);
        assert_eq!(found[0].path, DECK_A);
    }

    #[test]
    fn zero_filters_match_everything_in_order() {
        let host = MockHost::new()
            .with_interface(MockInterface::new(DECK_B, 0x0FD9, 0x006C))
            .with_interface(MockInterface::new(MOUSE, 0x046D, 0xC08B))
            .with_interface(MockInterface::new(DECK_A, 0x0FD9, 0x0060));
        let paths: Vec<_> = discover(&host, 0, 0).into_iter().map(|d| d.path).collect();
        assert_eq!(paths, vec![DECK_B, MOUSE, DECK_A]);

        let decks = discover(&host, 0x0FD9, 0);
        assert_eq!(decks.len(), 2);
    }

    #[test]
    fn unopenable_interface_is_skipped() {
        let host = MockHost::new()
            .with_interface(MockInterface::new(DECK_B, 0x0FD9, 0x006C).unopenable())
            .with_interface(MockInterface::new(DECK_A, 0x0FD9, 0x0060));
        let found = discover(&host, 0x0FD9, 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, DECK_A);
        assert_eq!(host.opens(), vec![DECK_B.to_string(), DECK_A.to_string()]);
    }

    #[test]
    fn query_only_interface_is_listed() {
        let host = MockHost::new()
            .with_interface(MockInterface::new(MOUSE, 0x046D, 0xC08B).query_only());
        let found = discover(&host, 0, 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, MOUSE);
    }

    #[test]
    fn missing_attributes_skip_interface() {
        let host = MockHost::new()
            .with_interface(MockInterface::new(DECK_B, 0x0FD9, 0x006C).without_attributes());
        assert!(discover(&host, 0, 0).is_empty());
    }

    #[test]
    fn list_growing_between_size_and_fetch() {
        let host = MockHost::new()
            .with_interface(MockInterface::new(DECK_A, 0x0FD9, 0x0060))
            .with_late_interface(MockInterface::new(DECK_B, 0x0FD9, 0x006C));
        let found = discover(&host, 0x0FD9, 0);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn scratch_handles_are_closed() {
        let iface = MockInterface::new(DECK_A, 0x0FD9, 0x0060);
        let state = iface.state();
        let host = MockHost::new().with_interface(iface);
        assert_eq!(discover(&host, 0, 0).len(), 1);
        assert_eq!(state.lock().unwrap().open_handles, 0);
    }

    #[test]
    fn empty_host() {
        assert!(discover(&MockHost::new(), 0, 0).is_empty());
    }

    #[test]
    fn filter_rules() {
        assert!(matches_filter(0x0FD9, 0x0060, 0, 0));
        assert!(matches_filter(0x0FD9, 0x0060, 0x0FD9, 0));
        assert!(matches_filter(0x0FD9, 0x0060, 0, 0x0060));
        assert!(!matches_filter(0x0FD9, 0x0060, 0x046D, 0));
        assert!(!matches_filter(0x0FD9, 0x0060, 0x0FD9, 0x006C));
    }
}
