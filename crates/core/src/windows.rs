//! Native host backend: CfgMgr32 for enumeration and the device tree, the
//! HID class driver for attributes and control transfers, overlapped file
//! I/O for interrupt reports.

use crate::error::{Error, Result};
use crate::platform::{
    ControlRequest, DevNode, DeviceProperty, Fetch, HidAttributes, HidCaps, HidDevice, HidHost,
    PropertyReply, PropertyType, StringKind, Submitted, WaitStatus,
};
use crate::query::to_wide;
use std::ffi::c_void;
use std::ptr::{null, null_mut};
use std::time::Duration;
use tracing::{debug, trace};

use windows_sys::core::GUID;
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    CM_Get_DevNode_PropertyW, CM_Get_Device_Interface_ListW, CM_Get_Device_Interface_List_SizeW,
    CM_Get_Device_Interface_PropertyW, CM_Get_Parent, CM_Locate_DevNodeW, CM_GET_DEVICE_INTERFACE_LIST_PRESENT,
    CM_LOCATE_DEVNODE_NORMAL, CR_BUFFER_SMALL, CR_SUCCESS,
};
use windows_sys::Win32::Devices::HumanInterfaceDevice::{
    HidD_FreePreparsedData, HidD_GetAttributes, HidD_GetManufacturerString,
    HidD_GetPreparsedData, HidD_GetProductString, HidD_GetSerialNumberString, HidD_SetFeature,
    HidD_SetNumInputBuffers, HidP_GetCaps, HIDD_ATTRIBUTES, HIDP_CAPS, HIDP_STATUS_SUCCESS,
    PHIDP_PREPARSED_DATA,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_IO_PENDING, ERROR_NOT_FOUND, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows_sys::Win32::System::IO::{CancelIoEx, DeviceIoControl, GetOverlappedResult, OVERLAPPED};

/// `HID_OUT_CTL_CODE(100)`
const IOCTL_HID_GET_FEATURE: u32 = 0x000B_0192;
/// `HID_OUT_CTL_CODE(104)`
const IOCTL_HID_GET_INPUT_REPORT: u32 = 0x000B_01A2;

const GUID_DEVINTERFACE_HID: GUID = GUID::from_u128(0x4d1e55b2_f16f_11cf_88cb_001111000030);

const DEVPROP_TYPE_STRING: u32 = 0x0000_0012;
const DEVPROP_TYPE_STRING_LIST: u32 = 0x0000_2012;

/// Property key layout shared with the config manager.
#[repr(C)]
struct PropKey {
    fmtid: GUID,
    pid: u32,
}

const fn key(fmtid: u128, pid: u32) -> PropKey {
    PropKey {
        fmtid: GUID::from_u128(fmtid),
        pid,
    }
}

static DEVPKEY_DEVICE_INSTANCE_ID: PropKey = key(0x78c34fc8_104a_4aca_9ea4_524d52996e57, 256);
static DEVPKEY_DEVICE_HARDWARE_IDS: PropKey = key(0xa45c254e_df1c_4efd_8020_67d146a850e0, 3);
static DEVPKEY_DEVICE_COMPATIBLE_IDS: PropKey = key(0xa45c254e_df1c_4efd_8020_67d146a850e0, 4);
static DEVPKEY_DEVICE_MANUFACTURER: PropKey = key(0xa45c254e_df1c_4efd_8020_67d146a850e0, 13);
static DEVPKEY_NAME: PropKey = key(0xb725f130_47ef_101a_a5f1_02608c9ebac0, 10);
static DEVPKEY_BLUETOOTH_DEVICE_ADDRESS: PropKey = key(0x2bd67d8b_8beb_48d5_87e0_6cda3428040a, 1);
static DEVPKEY_BLUETOOTH_MANUFACTURER: PropKey = key(0x2bd67d8b_8beb_48d5_87e0_6cda3428040a, 4);
static DEVPKEY_BLUETOOTH_MODEL_NUMBER: PropKey = key(0x2bd67d8b_8beb_48d5_87e0_6cda3428040a, 5);

fn prop_key(property: DeviceProperty) -> &'static PropKey {
    match property {
        DeviceProperty::InstanceId => &DEVPKEY_DEVICE_INSTANCE_ID,
        DeviceProperty::HardwareIds => &DEVPKEY_DEVICE_HARDWARE_IDS,
        DeviceProperty::CompatibleIds => &DEVPKEY_DEVICE_COMPATIBLE_IDS,
        DeviceProperty::Manufacturer => &DEVPKEY_DEVICE_MANUFACTURER,
        DeviceProperty::FriendlyName => &DEVPKEY_NAME,
        DeviceProperty::BluetoothDeviceAddress => &DEVPKEY_BLUETOOTH_DEVICE_ADDRESS,
        DeviceProperty::BluetoothManufacturer => &DEVPKEY_BLUETOOTH_MANUFACTURER,
        DeviceProperty::BluetoothModelNumber => &DEVPKEY_BLUETOOTH_MODEL_NUMBER,
    }
}

fn property_type(raw: u32) -> PropertyType {
    match raw {
        DEVPROP_TYPE_STRING => PropertyType::String,
        DEVPROP_TYPE_STRING_LIST => PropertyType::StringList,
        other => PropertyType::Other(other),
    }
}

fn last_os_error() -> std::io::Error {
    std::io::Error::last_os_error()
}

/// Map a property call's return code and reported size to a reply.
fn property_reply(op: &'static str, ret: u32, ty: u32, size: u32) -> Result<PropertyReply> {
    let fetch = match ret {
        CR_SUCCESS => Fetch::Complete(size as usize),
        CR_BUFFER_SMALL => Fetch::TooSmall(size as usize),
        code => return Err(Error::Query { op, code }),
    };
    Ok(PropertyReply {
        ty: property_type(ty),
        fetch,
    })
}

fn buf_ptr<T>(buf: &mut [T]) -> *mut T {
    if buf.is_empty() {
        null_mut()
    } else {
        buf.as_mut_ptr()
    }
}

fn len_u32(op: &'static str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::OutOfRange {
        field: op,
        value: u32::MAX,
        min: 0,
        max: u32::MAX,
    })
}

/// Native host services of the local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsHost;

impl WindowsHost {
    pub fn new() -> Self {
        Self
    }

    fn create_file(&self, wide: &[u16], access: u32) -> HANDLE {
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        unsafe {
            CreateFileW(
                wide.as_ptr(),
                access,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                null(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                null_mut(),
            )
        }
    }
}

impl HidHost for WindowsHost {
    type Device = WindowsDevice;

    fn interface_list(&self, buf: &mut [u16]) -> Result<Fetch> {
        if buf.is_empty() {
            let mut len = 0u32;
            // SAFETY: out-pointer to a local; the GUID outlives the call.
            let ret = unsafe {
                CM_Get_Device_Interface_List_SizeW(&mut len, &GUID_DEVINTERFACE_HID, null(), CM_GET_DEVICE_INTERFACE_LIST_PRESENT)
            };
            if ret != CR_SUCCESS {
                return Err(Error::Query {
                    op: "CM_Get_Device_Interface_List_SizeW",
                    code: ret,
                });
            }
            return Ok(Fetch::TooSmall(len as usize));
        }

        let len = len_u32("interface_list_len", buf.len())?;
        // SAFETY: `buf` holds `len` units.
        let ret = unsafe {
            CM_Get_Device_Interface_ListW(
                &GUID_DEVINTERFACE_HID,
                null(),
                buf.as_mut_ptr(),
                len,
                CM_GET_DEVICE_INTERFACE_LIST_PRESENT,
            )
        };
        match ret {
            CR_SUCCESS => Ok(Fetch::Complete(buf.len())),
            // The list grew between the size query and the fetch.
            CR_BUFFER_SMALL => self.interface_list(&mut []),
            code => Err(Error::Query {
                op: "CM_Get_Device_Interface_ListW",
                code,
            }),
        }
    }

    fn interface_property(&self, path: &str, key: DeviceProperty, buf: &mut [u8]) -> Result<PropertyReply> {
        let wide = to_wide(path);
        let mut ty = 0u32;
        let mut size = len_u32("property_len", buf.len())?;
        // SAFETY: `buf` holds `size` bytes (or is null with size 0); the key
        // is a static with the DEVPROPKEY layout.
        let ret = unsafe {
            CM_Get_Device_Interface_PropertyW(
                wide.as_ptr(),
                prop_key(key) as *const PropKey as *const _,
                &mut ty,
                buf_ptr(buf),
                &mut size,
                0,
            )
        };
        property_reply("CM_Get_Device_Interface_PropertyW", ret, ty, size)
    }

    fn node_property(&self, node: DevNode, key: DeviceProperty, buf: &mut [u8]) -> Result<PropertyReply> {
        let mut ty = 0u32;
        let mut size = len_u32("property_len", buf.len())?;
        // SAFETY: as in `interface_property`.
        let ret = unsafe {
            CM_Get_DevNode_PropertyW(
                node.0,
                prop_key(key) as *const PropKey as *const _,
                &mut ty,
                buf_ptr(buf),
                &mut size,
                0,
            )
        };
        property_reply("CM_Get_DevNode_PropertyW", ret, ty, size)
    }

    fn locate_node(&self, instance_id: &str) -> Result<DevNode> {
        let wide = to_wide(instance_id);
        let mut node = 0u32;
        // SAFETY: `wide` is NUL-terminated; out-pointer to a local.
        let ret = unsafe { CM_Locate_DevNodeW(&mut node, wide.as_ptr(), CM_LOCATE_DEVNODE_NORMAL) };
        if ret != CR_SUCCESS {
            return Err(Error::Query {
                op: "CM_Locate_DevNodeW",
                code: ret,
            });
        }
        Ok(DevNode(node))
    }

    fn parent(&self, node: DevNode) -> Result<DevNode> {
        let mut parent = 0u32;
        // SAFETY: out-pointer to a local.
        let ret = unsafe { CM_Get_Parent(&mut parent, node.0, 0) };
        if ret != CR_SUCCESS {
            return Err(Error::Query {
                op: "CM_Get_Parent",
                code: ret,
            });
        }
        Ok(DevNode(parent))
    }

    fn open(&self, path: &str) -> Result<WindowsDevice> {
        let handle = self.create_file(&to_wide(path), GENERIC_READ | GENERIC_WRITE);
        if handle == INVALID_HANDLE_VALUE {
            return Err(Error::Open(last_os_error().to_string()));
        }
        trace!(path, "Opened device handle");
        Ok(WindowsDevice { handle })
    }

    fn open_for_query(&self, path: &str) -> Result<WindowsDevice> {
        let wide = to_wide(path);
        let mut handle = self.create_file(&wide, GENERIC_READ | GENERIC_WRITE);
        // SAFETY: reads the calling thread's last-error value.
        if handle == INVALID_HANDLE_VALUE && unsafe { GetLastError() } == ERROR_ACCESS_DENIED {
            // Keyboards and mice are held exclusively by the OS; attributes
            // and strings stay readable without data access.
            debug!(path, "Read/write access denied, opening for queries only");
            handle = self.create_file(&wide, 0);
        }
        if handle == INVALID_HANDLE_VALUE {
            return Err(Error::Open(last_os_error().to_string()));
        }
        trace!(path, "Opened query handle");
        Ok(WindowsDevice { handle })
    }
}

/// Event-backed overlapped context. The `OVERLAPPED` is boxed so its address
/// stays fixed while the driver holds it.
pub struct WindowsCompletion {
    overlapped: Box<OVERLAPPED>,
    event: HANDLE,
}

// SAFETY: the event handle and overlapped block are owned exclusively and
// usable from any thread.
unsafe impl Send for WindowsCompletion {}

impl WindowsCompletion {
    /// Clear offsets and status left by the previous operation, keeping the
    /// event.
    fn rearm(&mut self) -> *mut OVERLAPPED {
        // SAFETY: OVERLAPPED is plain data; all-zero is a valid value.
        *self.overlapped = unsafe { std::mem::zeroed() };
        self.overlapped.hEvent = self.event;
        &mut *self.overlapped
    }
}

impl Drop for WindowsCompletion {
    fn drop(&mut self) {
        // SAFETY: the event was created by `new_completion` and is closed once.
        unsafe { CloseHandle(self.event) };
    }
}

/// One opened HID interface handle.
pub struct WindowsDevice {
    handle: HANDLE,
}

// SAFETY: the file handle is owned exclusively; the HID and file APIs used
// here may be called from any thread.
unsafe impl Send for WindowsDevice {}

// SAFETY: concurrent calls only share the handle itself. Every overlapped
// call takes its own `WindowsCompletion`, and `DeviceHandle` gives each
// direction a separate one.
unsafe impl Sync for WindowsDevice {}

impl Drop for WindowsDevice {
    fn drop(&mut self) {
        // SAFETY: the handle came from CreateFileW and is closed once.
        unsafe { CloseHandle(self.handle) };
    }
}

impl WindowsDevice {
    fn check(&self, op: &'static str, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(Error::Io(format!("{op}: {}", last_os_error())))
        }
    }

    /// Interpret the return of ReadFile/WriteFile/DeviceIoControl.
    fn submitted(&self, op: &'static str, ok: i32, transferred: u32) -> Result<Submitted> {
        if ok != 0 {
            return Ok(Submitted::Completed(transferred as usize));
        }
        // SAFETY: reads the calling thread's last-error value.
        match unsafe { GetLastError() } {
            ERROR_IO_PENDING => Ok(Submitted::Pending),
            _ => Err(Error::Io(format!("{op}: {}", last_os_error()))),
        }
    }
}

impl HidDevice for WindowsDevice {
    type Completion = WindowsCompletion;

    fn attributes(&self) -> Result<HidAttributes> {
        // SAFETY: HIDD_ATTRIBUTES is plain data.
        let mut attrs: HIDD_ATTRIBUTES = unsafe { std::mem::zeroed() };
        attrs.Size = std::mem::size_of::<HIDD_ATTRIBUTES>() as u32;
        // SAFETY: out-pointer to a local of the declared size.
        if unsafe { HidD_GetAttributes(self.handle, &mut attrs) } == 0 {
            return Err(Error::Query {
                op: "HidD_GetAttributes",
                code: last_os_error().raw_os_error().unwrap_or_default() as u32,
            });
        }
        Ok(HidAttributes {
            vendor_id: attrs.VendorID,
            product_id: attrs.ProductID,
            version_number: attrs.VersionNumber,
        })
    }

    fn capabilities(&self) -> Result<HidCaps> {
        let mut ppd: PHIDP_PREPARSED_DATA = 0;
        // SAFETY: out-pointer to a local.
        if unsafe { HidD_GetPreparsedData(self.handle, &mut ppd) } == 0 {
            return Err(Error::Query {
                op: "HidD_GetPreparsedData",
                code: last_os_error().raw_os_error().unwrap_or_default() as u32,
            });
        }
        // SAFETY: HIDP_CAPS is plain data; `ppd` is valid until freed below.
        let mut caps: HIDP_CAPS = unsafe { std::mem::zeroed() };
        let status = unsafe { HidP_GetCaps(ppd, &mut caps) };
        // SAFETY: `ppd` came from HidD_GetPreparsedData and is freed once.
        unsafe { HidD_FreePreparsedData(ppd) };
        if status != HIDP_STATUS_SUCCESS {
            return Err(Error::Query {
                op: "HidP_GetCaps",
                code: status as u32,
            });
        }
        Ok(HidCaps {
            usage: caps.Usage,
            usage_page: caps.UsagePage,
            input_report_len: caps.InputReportByteLength,
            output_report_len: caps.OutputReportByteLength,
            feature_report_len: caps.FeatureReportByteLength,
        })
    }

    fn set_input_buffer_count(&self, count: u32) -> Result<()> {
        // SAFETY: plain handle call.
        let ok = unsafe { HidD_SetNumInputBuffers(self.handle, count) } != 0;
        if ok {
            Ok(())
        } else {
            Err(Error::Query {
                op: "HidD_SetNumInputBuffers",
                code: last_os_error().raw_os_error().unwrap_or_default() as u32,
            })
        }
    }

    fn read_string(&self, kind: StringKind, buf: &mut [u16]) -> Result<()> {
        let bytes = len_u32("string_len", buf.len() * 2)?;
        let ptr = buf.as_mut_ptr() as *mut c_void;
        // SAFETY: `buf` holds `bytes` bytes.
        let ok = unsafe {
            match kind {
                StringKind::SerialNumber => HidD_GetSerialNumberString(self.handle, ptr, bytes),
                StringKind::Manufacturer => HidD_GetManufacturerString(self.handle, ptr, bytes),
                StringKind::Product => HidD_GetProductString(self.handle, ptr, bytes),
            }
        } != 0;
        if ok {
            Ok(())
        } else {
            Err(Error::Query {
                op: "read_string",
                code: last_os_error().raw_os_error().unwrap_or_default() as u32,
            })
        }
    }

    fn new_completion(&self) -> Result<WindowsCompletion> {
        // Manual-reset, initially unsignalled.
        // SAFETY: no security attributes, unnamed event.
        let event = unsafe { CreateEventW(null(), 1, 0, null()) };
        if event.is_null() {
            return Err(Error::Open(format!("CreateEventW: {}", last_os_error())));
        }
        let mut completion = WindowsCompletion {
            // SAFETY: OVERLAPPED is plain data.
            overlapped: Box::new(unsafe { std::mem::zeroed() }),
            event,
        };
        completion.rearm();
        Ok(completion)
    }

    fn set_feature(&self, data: &[u8]) -> Result<()> {
        let len = len_u32("feature_len", data.len())?;
        // SAFETY: `data` holds `len` bytes and is only read.
        let ok = unsafe { HidD_SetFeature(self.handle, data.as_ptr() as *const c_void, len) } != 0;
        self.check("HidD_SetFeature", ok)
    }

    fn get_report(&self, request: ControlRequest, buf: &mut [u8], completion: &mut WindowsCompletion) -> Result<usize> {
        let ioctl = match request {
            ControlRequest::GetFeature => IOCTL_HID_GET_FEATURE,
            ControlRequest::GetInput => IOCTL_HID_GET_INPUT_REPORT,
        };
        let len = len_u32("report_len", buf.len())?;
        let overlapped = completion.rearm();
        let mut transferred = 0u32;
        // SAFETY: `buf` is both the report-id input and the output; the
        // call is waited on below before `buf` is released.
        let ok = unsafe {
            DeviceIoControl(
                self.handle,
                ioctl,
                buf.as_ptr() as *const c_void,
                len,
                buf.as_mut_ptr() as *mut c_void,
                len,
                &mut transferred,
                overlapped,
            )
        };
        match self.submitted("DeviceIoControl", ok, transferred)? {
            Submitted::Completed(n) => Ok(n),
            Submitted::Pending => {
                // SAFETY: blocks until the operation on `overlapped` is done.
                let ok = unsafe { GetOverlappedResult(self.handle, overlapped, &mut transferred, 1) } != 0;
                self.check("GetOverlappedResult", ok)?;
                Ok(transferred as usize)
            }
        }
    }

    fn submit_read(&self, buf: &mut [u8], completion: &mut WindowsCompletion) -> Result<Submitted> {
        let len = len_u32("input_len", buf.len())?;
        let overlapped = completion.rearm();
        let mut transferred = 0u32;
        // SAFETY: `buf` is handle-owned and outlives the operation.
        let ok = unsafe { ReadFile(self.handle, buf.as_mut_ptr(), len, &mut transferred, overlapped) };
        self.submitted("ReadFile", ok, transferred)
    }

    fn submit_write(&self, data: &[u8], completion: &mut WindowsCompletion) -> Result<Submitted> {
        let len = len_u32("output_len", data.len())?;
        let overlapped = completion.rearm();
        let mut transferred = 0u32;
        // SAFETY: `data` is handle-owned and outlives the operation.
        let ok = unsafe { WriteFile(self.handle, data.as_ptr(), len, &mut transferred, overlapped) };
        self.submitted("WriteFile", ok, transferred)
    }

    fn wait(&self, completion: &WindowsCompletion, timeout: Duration) -> Result<WaitStatus> {
        let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        // SAFETY: the event stays open for the completion's lifetime.
        match unsafe { WaitForSingleObject(completion.event, ms) } {
            WAIT_OBJECT_0 => Ok(WaitStatus::Signaled),
            WAIT_TIMEOUT => Ok(WaitStatus::TimedOut),
            _ => Err(Error::Io(format!("WaitForSingleObject: {}", last_os_error()))),
        }
    }

    fn overlapped_result(&self, completion: &mut WindowsCompletion, _buf: &mut [u8]) -> Result<usize> {
        let mut transferred = 0u32;
        // SAFETY: the overlapped block belongs to a signalled operation.
        let ok = unsafe { GetOverlappedResult(self.handle, &*completion.overlapped, &mut transferred, 0) } != 0;
        self.check("GetOverlappedResult", ok)?;
        Ok(transferred as usize)
    }

    fn cancel_io(&self) -> Result<()> {
        // SAFETY: a null overlapped cancels every operation on the handle.
        let ok = unsafe { CancelIoEx(self.handle, null()) } != 0;
        // SAFETY: reads the calling thread's last-error value.
        if !ok && unsafe { GetLastError() } == ERROR_NOT_FOUND {
            // Everything already completed.
            return Ok(());
        }
        self.check("CancelIoEx", ok)
    }

    fn reap(&self, completion: &mut WindowsCompletion) {
        let mut transferred = 0u32;
        // SAFETY: blocks until the cancelled operation releases its buffer.
        let ok = unsafe { GetOverlappedResult(self.handle, &*completion.overlapped, &mut transferred, 1) } != 0;
        if !ok {
            trace!(error = %last_os_error(), "Cancelled operation drained");
        }
    }
}
