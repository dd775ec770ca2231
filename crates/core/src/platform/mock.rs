//! A simulated host for testing.
//!
//! Interfaces, device nodes and their properties are registered up front.
//! Each interface shares a [`MockDeviceState`] with the devices opened from
//! it, so tests can script replies and completion timing and inspect the
//! bytes that reached the "wire".

use super::*;
use crate::error::{Error, Result};
use crate::query::to_wide;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// A stored property value.
#[derive(Debug, Clone)]
pub enum MockValue {
    String(String),
    List(Vec<String>),
}

impl MockValue {
    fn ty(&self) -> PropertyType {
        match self {
            Self::String(_) => PropertyType::String,
            Self::List(_) => PropertyType::StringList,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let units: Vec<u16> = match self {
            Self::String(s) => to_wide(s),
            Self::List(items) => {
                let mut units: Vec<u16> = items.iter().flat_map(|s| to_wide(s)).collect();
                units.push(0);
                units
            }
        };
        units.iter().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn reply(&self, buf: &mut [u8]) -> PropertyReply {
        let bytes = self.encode();
        let fetch = if buf.len() < bytes.len() {
            Fetch::TooSmall(bytes.len())
        } else {
            buf[..bytes.len()].copy_from_slice(&bytes);
            Fetch::Complete(bytes.len())
        };
        PropertyReply {
            ty: self.ty(),
            fetch,
        }
    }
}

/// A node in the simulated device tree.
#[derive(Debug, Clone, Default)]
pub struct MockNode {
    pub parent: Option<DevNode>,
    props: HashMap<DeviceProperty, MockValue>,
}

impl MockNode {
    pub fn new(instance_id: &str) -> Self {
        Self::default().with_string(DeviceProperty::InstanceId, instance_id)
    }

    pub fn with_parent(mut self, parent: DevNode) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_string(mut self, key: DeviceProperty, value: &str) -> Self {
        self.props.insert(key, MockValue::String(value.to_string()));
        self
    }

    pub fn with_list(mut self, key: DeviceProperty, values: &[&str]) -> Self {
        self.props.insert(
            key,
            MockValue::List(values.iter().map(|s| s.to_string()).collect()),
        );
        self
    }

    fn instance_id(&self) -> Option<&str> {
        match self.props.get(&DeviceProperty::InstanceId) {
            Some(MockValue::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Scripted outcome of the next read submission.
#[derive(Debug, Clone)]
pub enum ReadStep {
    /// Completes synchronously with these bytes.
    Ready(Vec<u8>),
    /// Goes pending; completes with these bytes once released.
    Delayed(Vec<u8>),
    /// Submission fails outright.
    Fail,
}

/// Scripted outcome of the next write submission.
#[derive(Debug, Clone, Copy)]
pub enum WriteStep {
    Ready,
    Delayed,
    Fail,
}

/// State shared between a [`MockInterface`] and the devices opened from it.
#[derive(Debug, Default)]
pub struct MockDeviceState {
    pub input_buffer_count: Option<u32>,
    pub string_capacities: Vec<(StringKind, usize)>,
    pub feature_writes: Vec<Vec<u8>>,
    pub fail_set_feature: bool,
    pub writes: Vec<Vec<u8>>,
    pub read_script: VecDeque<ReadStep>,
    pub write_script: VecDeque<WriteStep>,
    /// Reply to `GetFeature`; byte 0 is the report id.
    pub feature_reply: Vec<u8>,
    /// Reply to `GetInput`; byte 0 is the report id.
    pub input_reply: Vec<u8>,
    /// Report-id byte observed in the caller buffer at each control request.
    pub control_requests: Vec<(ControlRequest, u8)>,
    /// Signals pending operations; cleared when one is consumed.
    pub released: bool,
    /// Make `wait` block until `released` or the timeout instead of
    /// returning at once.
    pub blocking_wait: bool,
    pub read_submits: usize,
    pub write_submits: usize,
    pub completions: usize,
    pub cancels: usize,
    pub reaps: usize,
    pub open_handles: usize,
}

/// A HID interface exposed by the simulated host.
#[derive(Debug, Clone)]
pub struct MockInterface {
    pub path: String,
    pub instance_id: Option<String>,
    pub attributes: Option<HidAttributes>,
    pub caps: Option<HidCaps>,
    pub strings: HashMap<StringKind, String>,
    pub openable: bool,
    /// Read/write opens are refused; query-only opens still succeed.
    pub query_only: bool,
    pub accepts_input_buffers: bool,
    state: Arc<Mutex<MockDeviceState>>,
}

impl MockInterface {
    pub fn new(path: &str, vendor_id: u16, product_id: u16) -> Self {
        Self {
            path: path.to_string(),
            instance_id: None,
            attributes: Some(HidAttributes {
                vendor_id,
                product_id,
                version_number: 0,
            }),
            caps: Some(HidCaps::default()),
            strings: HashMap::new(),
            openable: true,
            query_only: false,
            accepts_input_buffers: true,
            state: Arc::new(Mutex::new(MockDeviceState::default())),
        }
    }

    pub fn with_instance_id(mut self, id: &str) -> Self {
        self.instance_id = Some(id.to_string());
        self
    }

    pub fn with_version(mut self, version: u16) -> Self {
        if let Some(attrs) = self.attributes.as_mut() {
            attrs.version_number = version;
        }
        self
    }

    pub fn with_report_lens(mut self, input: u16, output: u16, feature: u16) -> Self {
        let caps = self.caps.get_or_insert_with(HidCaps::default);
        caps.input_report_len = input;
        caps.output_report_len = output;
        caps.feature_report_len = feature;
        self
    }

    pub fn with_usage(mut self, usage_page: u16, usage: u16) -> Self {
        let caps = self.caps.get_or_insert_with(HidCaps::default);
        caps.usage_page = usage_page;
        caps.usage = usage;
        self
    }

    pub fn with_string(mut self, kind: StringKind, value: &str) -> Self {
        self.strings.insert(kind, value.to_string());
        self
    }

    pub fn without_attributes(mut self) -> Self {
        self.attributes = None;
        self
    }

    pub fn without_caps(mut self) -> Self {
        self.caps = None;
        self
    }

    pub fn unopenable(mut self) -> Self {
        self.openable = false;
        self
    }

    /// Held exclusively by the OS, like a keyboard or mouse.
    pub fn query_only(mut self) -> Self {
        self.query_only = true;
        self
    }

    pub fn rejecting_input_buffers(mut self) -> Self {
        self.accepts_input_buffers = false;
        self
    }

    pub fn state(&self) -> Arc<Mutex<MockDeviceState>> {
        Arc::clone(&self.state)
    }
}

/// The simulated host.
#[derive(Debug, Default)]
pub struct MockHost {
    interfaces: Mutex<Vec<MockInterface>>,
    /// Interfaces that appear right after the next size query.
    late: Mutex<Vec<MockInterface>>,
    nodes: HashMap<DevNode, MockNode>,
    opens: Mutex<Vec<String>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface(self, iface: MockInterface) -> Self {
        self.interfaces.lock().unwrap().push(iface);
        self
    }

    /// Register an interface that shows up between a size query and its fetch.
    pub fn with_late_interface(self, iface: MockInterface) -> Self {
        self.late.lock().unwrap().push(iface);
        self
    }

    pub fn with_node(mut self, node: DevNode, data: MockNode) -> Self {
        self.nodes.insert(node, data);
        self
    }

    /// Paths opened so far.
    pub fn opens(&self) -> Vec<String> {
        self.opens.lock().unwrap().clone()
    }

    fn find(&self, path: &str) -> Option<MockInterface> {
        self.interfaces
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.path == path)
            .cloned()
    }
}

impl HidHost for MockHost {
    type Device = MockDevice;

    fn interface_list(&self, buf: &mut [u16]) -> Result<Fetch> {
        let mut ifaces = self.interfaces.lock().unwrap();
        let mut units: Vec<u16> = ifaces.iter().flat_map(|i| to_wide(&i.path)).collect();
        units.push(0);
        if buf.len() < units.len() {
            if buf.is_empty() {
                ifaces.extend(self.late.lock().unwrap().drain(..));
            }
            return Ok(Fetch::TooSmall(units.len()));
        }
        buf[..units.len()].copy_from_slice(&units);
        Ok(Fetch::Complete(units.len()))
    }

    fn interface_property(
        &self,
        path: &str,
        key: DeviceProperty,
        buf: &mut [u8],
    ) -> Result<PropertyReply> {
        let iface = self
            .find(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        match (key, iface.instance_id) {
            (DeviceProperty::InstanceId, Some(id)) => Ok(MockValue::String(id).reply(buf)),
            _ => Err(Error::NotFound(format!("{key:?} on {path}"))),
        }
    }

    fn node_property(
        &self,
        node: DevNode,
        key: DeviceProperty,
        buf: &mut [u8],
    ) -> Result<PropertyReply> {
        let data = self
            .nodes
            .get(&node)
            .ok_or_else(|| Error::NotFound(format!("node {}", node.0)))?;
        let value = data
            .props
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("{key:?} on node {}", node.0)))?;
        Ok(value.reply(buf))
    }

    fn locate_node(&self, instance_id: &str) -> Result<DevNode> {
        self.nodes
            .iter()
            .find(|(_, n)| {
                n.instance_id()
                    .is_some_and(|id| id.eq_ignore_ascii_case(instance_id))
            })
            .map(|(k, _)| *k)
            .ok_or_else(|| Error::NotFound(instance_id.to_string()))
    }

    fn parent(&self, node: DevNode) -> Result<DevNode> {
        self.nodes
            .get(&node)
            .and_then(|n| n.parent)
            .ok_or_else(|| Error::NotFound(format!("parent of node {}", node.0)))
    }

    fn open(&self, path: &str) -> Result<MockDevice> {
        self.open_with(path, true)
    }

    fn open_for_query(&self, path: &str) -> Result<MockDevice> {
        self.open_with(path, false)
    }
}

impl MockHost {
    fn open_with(&self, path: &str, read_write: bool) -> Result<MockDevice> {
        self.opens.lock().unwrap().push(path.to_string());
        let iface = self
            .find(path)
            .ok_or_else(|| Error::Open(format!("no such path {path}")))?;
        if !iface.openable || (read_write && iface.query_only) {
            return Err(Error::Open(format!("access denied: {path}")));
        }
        iface.state.lock().unwrap().open_handles += 1;
        Ok(MockDevice { iface })
    }
}

#[derive(Debug)]
enum PendingOp {
    Read(Vec<u8>),
    Write(usize),
    Never,
}

/// Completion context of a [`MockDevice`].
#[derive(Debug, Default)]
pub struct MockCompletion {
    pending: Option<PendingOp>,
}

/// A device opened from a [`MockInterface`].
#[derive(Debug)]
pub struct MockDevice {
    iface: MockInterface,
}

impl MockDevice {
    fn state(&self) -> std::sync::MutexGuard<'_, MockDeviceState> {
        self.iface.state.lock().unwrap()
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.state().open_handles -= 1;
    }
}

fn copy_into(buf: &mut [u8], data: &[u8]) -> usize {
    let n = data.len().min(buf.len());
    buf[..n].copy_from_slice(&data[..n]);
    n
}

impl HidDevice for MockDevice {
    type Completion = MockCompletion;

    fn attributes(&self) -> Result<HidAttributes> {
        self.iface.attributes.ok_or(Error::Query {
            op: "attributes",
            code: 1,
        })
    }

    fn capabilities(&self) -> Result<HidCaps> {
        self.iface.caps.ok_or(Error::Query {
            op: "capabilities",
            code: 1,
        })
    }

    fn set_input_buffer_count(&self, count: u32) -> Result<()> {
        if !self.iface.accepts_input_buffers {
            return Err(Error::Query {
                op: "set_input_buffer_count",
                code: 87,
            });
        }
        self.state().input_buffer_count = Some(count);
        Ok(())
    }

    fn read_string(&self, kind: StringKind, buf: &mut [u16]) -> Result<()> {
        self.state().string_capacities.push((kind, buf.len()));
        let value = self.iface.strings.get(&kind).ok_or(Error::Query {
            op: "read_string",
            code: 31,
        })?;
        let units: Vec<u16> = value.encode_utf16().collect();
        let n = units.len().min(buf.len().saturating_sub(1));
        buf[..n].copy_from_slice(&units[..n]);
        if let Some(terminator) = buf.get_mut(n) {
            *terminator = 0;
        }
        Ok(())
    }

    fn new_completion(&self) -> Result<MockCompletion> {
        self.state().completions += 1;
        Ok(MockCompletion::default())
    }

    fn set_feature(&self, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.fail_set_feature {
            return Err(Error::Io("set_feature rejected".into()));
        }
        state.feature_writes.push(data.to_vec());
        Ok(())
    }

    fn get_report(
        &self,
        request: ControlRequest,
        buf: &mut [u8],
        _completion: &mut MockCompletion,
    ) -> Result<usize> {
        let mut state = self.state();
        state
            .control_requests
            .push((request, buf.first().copied().unwrap_or_default()));
        let reply = match request {
            ControlRequest::GetFeature => state.feature_reply.clone(),
            ControlRequest::GetInput => state.input_reply.clone(),
        };
        if reply.is_empty() {
            return Err(Error::Io("control request stalled".into()));
        }
        let n = copy_into(buf, &reply);
        // The driver leaves the report-id byte out of the count for
        // unnumbered reports.
        Ok(if reply[0] == 0 { n - 1 } else { n })
    }

    fn submit_read(&self, buf: &mut [u8], completion: &mut MockCompletion) -> Result<Submitted> {
        let mut state = self.state();
        state.read_submits += 1;
        match state.read_script.pop_front() {
            Some(ReadStep::Ready(data)) => Ok(Submitted::Completed(copy_into(buf, &data))),
            Some(ReadStep::Delayed(data)) => {
                completion.pending = Some(PendingOp::Read(data));
                Ok(Submitted::Pending)
            }
            Some(ReadStep::Fail) => Err(Error::Io("read failed".into())),
            None => {
                completion.pending = Some(PendingOp::Never);
                Ok(Submitted::Pending)
            }
        }
    }

    fn submit_write(&self, data: &[u8], completion: &mut MockCompletion) -> Result<Submitted> {
        let mut state = self.state();
        state.write_submits += 1;
        state.writes.push(data.to_vec());
        match state.write_script.pop_front().unwrap_or(WriteStep::Ready) {
            WriteStep::Ready => Ok(Submitted::Completed(data.len())),
            WriteStep::Delayed => {
                completion.pending = Some(PendingOp::Write(data.len()));
                Ok(Submitted::Pending)
            }
            WriteStep::Fail => Err(Error::Io("write failed".into())),
        }
    }

    fn wait(&self, completion: &MockCompletion, timeout: Duration) -> Result<WaitStatus> {
        if !matches!(
            completion.pending,
            Some(PendingOp::Read(_)) | Some(PendingOp::Write(_))
        ) {
            return Ok(WaitStatus::TimedOut);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let (released, blocking) = {
                let state = self.state();
                (state.released, state.blocking_wait)
            };
            if released {
                return Ok(WaitStatus::Signaled);
            }
            if !blocking || Instant::now() >= deadline {
                return Ok(WaitStatus::TimedOut);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn overlapped_result(&self, completion: &mut MockCompletion, buf: &mut [u8]) -> Result<usize> {
        self.state().released = false;
        match completion.pending.take() {
            Some(PendingOp::Read(data)) => Ok(copy_into(buf, &data)),
            Some(PendingOp::Write(n)) => Ok(n),
            Some(PendingOp::Never) | None => Err(Error::Io("no completed operation".into())),
        }
    }

    fn cancel_io(&self) -> Result<()> {
        self.state().cancels += 1;
        Ok(())
    }

    fn reap(&self, completion: &mut MockCompletion) {
        if completion.pending.take().is_some() {
            self.state().reaps += 1;
        }
    }
}
