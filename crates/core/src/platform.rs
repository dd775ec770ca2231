//! Host service abstraction.
//!
//! The discovery and transport layers never call the OS directly. They go
//! through [`HidHost`] (device-class enumeration, property store, device-node
//! tree) and [`HidDevice`] (one opened device handle), so the same code runs
//! against the native backend and the simulated host used in tests.

use crate::error::Result;
use std::time::Duration;

/// Reference to a node in the host's device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevNode(pub u32);

/// Property keys read during identity collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProperty {
    /// Device instance identifier (string).
    InstanceId,
    /// Hardware identifiers (string list).
    HardwareIds,
    /// Compatible identifiers (string list).
    CompatibleIds,
    /// Node-level manufacturer (string).
    Manufacturer,
    /// Friendly device name (string).
    FriendlyName,
    /// GATT Manufacturer Name String, UUID 0x2A29 (string).
    BluetoothManufacturer,
    /// Bluetooth device address (string).
    BluetoothDeviceAddress,
    /// GATT Model Number String, UUID 0x2A24 (string).
    BluetoothModelNumber,
}

/// Type tag attached to a stored property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    StringList,
    Other(u32),
}

/// Outcome of one call of a two-call variable-length query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// The buffer was large enough; this many units were written.
    Complete(usize),
    /// The buffer must hold at least this many units.
    TooSmall(usize),
}

/// Reply to a property query: the stored type tag plus the fetch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyReply {
    pub ty: PropertyType,
    pub fetch: Fetch,
}

/// Vendor, product and version attributes of an opened device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HidAttributes {
    pub vendor_id: u16,
    pub product_id: u16,
    pub version_number: u16,
}

/// Top-level collection usage and report byte lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HidCaps {
    pub usage: u16,
    pub usage_page: u16,
    pub input_report_len: u16,
    pub output_report_len: u16,
    pub feature_report_len: u16,
}

/// The three display strings a HID device can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringKind {
    SerialNumber,
    Manufacturer,
    Product,
}

/// Control-channel "get" requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    GetFeature,
    GetInput,
}

/// Outcome of submitting an asynchronous read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Finished synchronously with this byte count.
    Completed(usize),
    /// Queued; completion is signalled on the context.
    Pending,
}

/// Outcome of waiting on a completion context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

/// Host-wide services: HID interface enumeration, property store and
/// device-node tree.
pub trait HidHost {
    type Device: HidDevice;

    /// Two-call query for the present HID interface paths as a
    /// null-separated UTF-16 multi-string. An empty `buf` is a size query.
    fn interface_list(&self, buf: &mut [u16]) -> Result<Fetch>;

    /// Two-call property query against an interface path.
    fn interface_property(
        &self,
        path: &str,
        key: DeviceProperty,
        buf: &mut [u8],
    ) -> Result<PropertyReply>;

    /// Two-call property query against a device node.
    fn node_property(&self, node: DevNode, key: DeviceProperty, buf: &mut [u8])
        -> Result<PropertyReply>;

    /// Resolve a device instance identifier to its node.
    fn locate_node(&self, instance_id: &str) -> Result<DevNode>;

    /// Immediate parent of a node.
    fn parent(&self, node: DevNode) -> Result<DevNode>;

    /// Open an interface path for shared, overlapped read/write access.
    /// Fails when read/write access is refused.
    fn open(&self, path: &str) -> Result<Self::Device>;

    /// Open an interface path for attribute, capability and string queries
    /// only. Hosts that can grant a reduced-access handle when read/write is
    /// refused do so here; the device must not be used for report I/O.
    fn open_for_query(&self, path: &str) -> Result<Self::Device> {
        self.open(path)
    }
}

/// One opened OS device handle. Dropping it closes the handle.
///
/// Buffers passed to `submit_read`/`submit_write` may still be written or
/// read by the host until the matching completion has been observed with
/// `overlapped_result`, or until `cancel_io` followed by `reap`.
///
/// A device is shared between a reading and a writing thread. Each
/// completion context is only ever used by one thread at a time.
pub trait HidDevice: Send + Sync {
    /// Per-direction completion context (OS event plus overlapped state).
    type Completion: Send;

    fn attributes(&self) -> Result<HidAttributes>;

    fn capabilities(&self) -> Result<HidCaps>;

    /// Depth of the driver's input-report ring buffer.
    fn set_input_buffer_count(&self, count: u32) -> Result<()>;

    /// Bounded string query; `buf.len()` is the capacity in UTF-16 units.
    fn read_string(&self, kind: StringKind, buf: &mut [u16]) -> Result<()>;

    fn new_completion(&self) -> Result<Self::Completion>;

    /// Synchronous feature-report "set" control transfer.
    fn set_feature(&self, data: &[u8]) -> Result<()>;

    /// Issue a control "get" over `completion` and block until it completes.
    /// Returns the driver-reported byte count.
    fn get_report(
        &self,
        request: ControlRequest,
        buf: &mut [u8],
        completion: &mut Self::Completion,
    ) -> Result<usize>;

    fn submit_read(&self, buf: &mut [u8], completion: &mut Self::Completion)
        -> Result<Submitted>;

    fn submit_write(&self, data: &[u8], completion: &mut Self::Completion) -> Result<Submitted>;

    fn wait(&self, completion: &Self::Completion, timeout: Duration) -> Result<WaitStatus>;

    /// Non-blocking fetch of a signalled operation's byte count. `buf` is the
    /// buffer the operation was submitted with.
    fn overlapped_result(&self, completion: &mut Self::Completion, buf: &mut [u8])
        -> Result<usize>;

    /// Cancel every operation in flight on this handle.
    fn cancel_io(&self) -> Result<()>;

    /// Block until a cancelled operation on `completion` has drained.
    fn reap(&self, completion: &mut Self::Completion);
}

#[cfg(test)]
pub mod mock;
