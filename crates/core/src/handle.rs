//! Opened device handles.
//!
//! A [`DeviceHandle`] owns the OS handle and one [`Channel`] per direction:
//! a report buffer sized to the device's declared length plus its completion
//! context. Each channel sits behind its own lock, so one thread can block in
//! a read while another writes. Report I/O lives in [`crate::transport`].

use crate::config::TransportConfig;
use crate::error::{OpenError, Result};
use crate::info::DeviceIdentity;
use crate::platform::{HidCaps, HidDevice, HidHost};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed-size, zero-initialised report buffer.
///
/// The heap allocation never moves or changes size, so the host may keep
/// writing into it while an asynchronous operation is outstanding.
#[derive(Debug)]
pub struct ReportBuffer {
    data: Box<[u8]>,
}

impl ReportBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0u8; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy `payload` in and zero the rest of the buffer. Returns the number
    /// of payload bytes copied, which is less than `payload.len()` only when
    /// the payload does not fit.
    pub fn load(&mut self, payload: &[u8]) -> usize {
        let n = payload.len().min(self.data.len());
        self.data[..n].copy_from_slice(&payload[..n]);
        self.data[n..].fill(0);
        n
    }
}

/// Completion context of one I/O direction.
///
/// `pending` is set while an operation submitted on `completion` has not been
/// observed to finish.
#[derive(Debug)]
pub(crate) struct IoContext<C> {
    pub(crate) completion: C,
    pub(crate) pending: bool,
}

impl<C> IoContext<C> {
    fn new(completion: C) -> Self {
        Self {
            completion,
            pending: false,
        }
    }
}

/// Report buffer and completion context of one direction.
#[derive(Debug)]
pub(crate) struct Channel<C> {
    pub(crate) buffer: ReportBuffer,
    pub(crate) ctx: IoContext<C>,
}

impl<C> Channel<C> {
    fn new(report_len: u16, completion: C) -> Mutex<Self> {
        Mutex::new(Self {
            buffer: ReportBuffer::new(usize::from(report_len)),
            ctx: IoContext::new(completion),
        })
    }
}

/// Lock a channel. A panic on another thread mid-operation leaves the
/// channel's `pending` flag accurate, so the poison is ignored.
pub(crate) fn lock<T>(channel: &Mutex<T>) -> MutexGuard<'_, T> {
    channel.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An opened HID interface.
///
/// All I/O goes through `&self`: reads, writes and control transfers each
/// serialise on their own channel, so a `DeviceHandle` shared between a
/// reading thread and a writing thread never makes one wait on the other.
///
/// Dropping the handle cancels outstanding reads and writes, waits for them
/// to drain, then releases the OS handle.
pub struct DeviceHandle<D: HidDevice> {
    pub(crate) device: D,
    pub(crate) identity: DeviceIdentity,
    pub(crate) caps: HidCaps,
    /// Input reports.
    pub(crate) reader: Mutex<Channel<D::Completion>>,
    /// Output reports.
    pub(crate) writer: Mutex<Channel<D::Completion>>,
    /// Feature reports and synchronous report fetches.
    pub(crate) control: Mutex<Channel<D::Completion>>,
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
}

type Contexts<C> = (HidCaps, C, C, C);

fn configure<D: HidDevice>(device: &D, input_buffer_count: u32) -> Result<Contexts<D::Completion>> {
    device.set_input_buffer_count(input_buffer_count)?;
    let caps = device.capabilities()?;
    Ok((
        caps,
        device.new_completion()?,
        device.new_completion()?,
        device.new_completion()?,
    ))
}

impl<D: HidDevice> DeviceHandle<D> {
    /// Open the interface described by `identity`.
    ///
    /// On failure the identity is handed back inside the [`OpenError`].
    pub fn open<H>(host: &H, identity: DeviceIdentity, config: &TransportConfig) -> std::result::Result<Self, OpenError>
    where
        H: HidHost<Device = D>,
    {
        let device = match host.open(&identity.path) {
            Ok(device) => device,
            Err(source) => {
                warn!(path = %identity.path, error = %source, "Failed to open device");
                return Err(OpenError { source, identity });
            }
        };

        // `device` drops on the error path, closing the OS handle.
        let (caps, read, write, control) = match configure(&device, config.input_buffer_count) {
            Ok(parts) => parts,
            Err(source) => {
                warn!(path = %identity.path, error = %source, "Failed to configure device");
                return Err(OpenError { source, identity });
            }
        };

        info!(
            path = %identity.path,
            input_len = caps.input_report_len,
            output_len = caps.output_report_len,
            feature_len = caps.feature_report_len,
            "Device opened"
        );

        Ok(Self {
            device,
            identity,
            caps,
            reader: Channel::new(caps.input_report_len, read),
            writer: Channel::new(caps.output_report_len, write),
            control: Channel::new(caps.feature_report_len, control),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn capabilities(&self) -> &HidCaps {
        &self.caps
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Whether a read submitted earlier is still outstanding.
    pub fn read_pending(&self) -> bool {
        lock(&self.reader).ctx.pending
    }

    /// Whether a write submitted earlier is still outstanding.
    pub fn write_pending(&self) -> bool {
        lock(&self.writer).ctx.pending
    }

    /// Cancel in-flight I/O and release the handle.
    pub fn close(self) {
        drop(self);
    }
}

/// Close `handle` if there is one.
pub fn close<D: HidDevice>(handle: Option<DeviceHandle<D>>) {
    if let Some(handle) = handle {
        handle.close();
    }
}

impl<D: HidDevice> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        let reader = self.reader.get_mut().unwrap_or_else(PoisonError::into_inner);
        let writer = self.writer.get_mut().unwrap_or_else(PoisonError::into_inner);
        let pending = [&mut reader.ctx, &mut writer.ctx];

        if pending.iter().any(|ctx| ctx.pending) {
            if let Err(e) = self.device.cancel_io() {
                warn!(path = %self.identity.path, error = %e, "Failed to cancel pending I/O");
            }
            for ctx in pending {
                if ctx.pending {
                    self.device.reap(&mut ctx.completion);
                    ctx.pending = false;
                }
            }
        }
        debug!(path = %self.identity.path, "Device closed");
    }
}

impl<D: HidDevice> std::fmt::Debug for DeviceHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.identity.path)
            .field("caps", &self.caps)
            .field("read_pending", &self.read_pending())
            .field("write_pending", &self.write_pending())
            .finish()
    }
}
