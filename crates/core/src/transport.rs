//! Report transport over an opened [`DeviceHandle`].
//!
//! Feature reports go over the control channel, input and output reports
//! over overlapped reads and writes. Outgoing reports are always padded to
//! the device's declared length: the driver rejects shorter buffers.

use crate::error::{Error, Result};
use crate::handle::{lock, DeviceHandle, IoContext, ReportBuffer};
use crate::platform::{ControlRequest, HidDevice, Submitted, WaitStatus};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// HID report types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Input,
    Output,
    Feature,
}

/// Outcome of a timeout-bounded read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// Finished with this many bytes.
    Completed(usize),
    /// Still outstanding in the driver. A later call on the same direction
    /// picks it up.
    TimedOut,
}

impl IoOutcome {
    pub fn completed(self) -> Option<usize> {
        match self {
            Self::Completed(n) => Some(n),
            Self::TimedOut => None,
        }
    }
}

/// Pad `payload` into `buffer`, warning when it has to be cut short.
fn load_padded(op: &'static str, buffer: &mut ReportBuffer, payload: &[u8]) -> Result<()> {
    if buffer.is_empty() {
        return Err(Error::Unsupported(format!("{op}: device declares no report of this type")));
    }
    let copied = buffer.load(payload);
    if copied < payload.len() {
        warn!(
            op,
            payload_len = payload.len(),
            report_len = buffer.len(),
            "Payload longer than report, truncated"
        );
    }
    trace!(op, report_hex = format_args!("{:02X?}", buffer.as_slice()), "TX");
    Ok(())
}

/// Wait on an outstanding operation and collect its byte count if it
/// finished in time.
fn await_pending<D: HidDevice>(
    device: &D,
    ctx: &mut IoContext<D::Completion>,
    buf: &mut [u8],
    timeout: Duration,
    op: &'static str,
) -> Result<IoOutcome> {
    match device.wait(&ctx.completion, timeout)? {
        WaitStatus::TimedOut => {
            debug!(op, timeout_ms = timeout.as_millis() as u64, "Operation still pending");
            Ok(IoOutcome::TimedOut)
        }
        WaitStatus::Signaled => {
            ctx.pending = false;
            let n = device.overlapped_result(&mut ctx.completion, buf)?;
            Ok(IoOutcome::Completed(n))
        }
    }
}

impl<D: HidDevice> DeviceHandle<D> {
    /// Send a feature or output report, padded to the declared length.
    ///
    /// Returns the number of bytes transmitted. An output write that times
    /// out is reported as [`Error::Timeout`].
    pub fn set_report(&self, payload: &[u8], kind: ReportKind) -> Result<usize> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        match kind {
            ReportKind::Feature => {
                let mut control = lock(&self.control);
                load_padded("set_report", &mut control.buffer, payload)?;
                self.device.set_feature(control.buffer.as_slice())?;
                Ok(control.buffer.len())
            }
            ReportKind::Output => match self.write(payload)? {
                IoOutcome::Completed(n) => Ok(n),
                IoOutcome::TimedOut => Err(Error::Timeout(format!(
                    "output report not sent within {} ms",
                    self.write_timeout.as_millis()
                ))),
            },
            ReportKind::Input => Err(Error::UnsupportedReportKind {
                op: "set_report",
                kind,
            }),
        }
    }

    /// Fetch a feature or input report over the control channel into `buf`.
    ///
    /// Byte 0 is set to report id 0 before the request. The returned count
    /// includes byte 0 even when the driver leaves it out, which it does for
    /// devices without numbered reports.
    pub fn get_report(&self, buf: &mut [u8], kind: ReportKind) -> Result<usize> {
        self.get_numbered_report(0, buf, kind)
    }

    /// [`get_report`](Self::get_report) for a specific report id.
    pub fn get_numbered_report(&self, report_id: u8, buf: &mut [u8], kind: ReportKind) -> Result<usize> {
        let request = match kind {
            ReportKind::Feature => ControlRequest::GetFeature,
            ReportKind::Input => ControlRequest::GetInput,
            ReportKind::Output => {
                return Err(Error::UnsupportedReportKind {
                    op: "get_report",
                    kind,
                })
            }
        };
        let Some(first) = buf.first_mut() else {
            return Err(Error::EmptyPayload);
        };
        *first = report_id;

        let mut n = self
            .device
            .get_report(request, buf, &mut lock(&self.control).ctx.completion)?;
        if buf[0] == 0 {
            n += 1;
        }
        trace!(?kind, report_hex = format_args!("{:02X?}", &buf[..n.min(buf.len())]), "RX");
        Ok(n)
    }

    /// Read one input report into `buf`, waiting up to the read timeout.
    ///
    /// The report lands in the handle's input buffer first; at most
    /// `buf.len()` bytes are copied out and that count is returned. A timed-out
    /// read stays outstanding and the next call waits on it instead of
    /// submitting another. Only the read channel is held while waiting, so
    /// writes from another thread go through meanwhile.
    pub fn read(&self, buf: &mut [u8]) -> Result<IoOutcome> {
        if buf.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let mut reader = lock(&self.reader);
        let reader = &mut *reader;
        if reader.buffer.is_empty() {
            return Err(Error::Unsupported("read: device declares no input report".into()));
        }

        if reader.ctx.pending {
            debug!("Read already outstanding, waiting on it");
        } else {
            match self
                .device
                .submit_read(reader.buffer.as_mut_slice(), &mut reader.ctx.completion)?
            {
                Submitted::Completed(n) => return Ok(IoOutcome::Completed(deliver(&reader.buffer, n, buf))),
                Submitted::Pending => reader.ctx.pending = true,
            }
        }

        match await_pending(
            &self.device,
            &mut reader.ctx,
            reader.buffer.as_mut_slice(),
            self.read_timeout,
            "read",
        )? {
            IoOutcome::Completed(n) => Ok(IoOutcome::Completed(deliver(&reader.buffer, n, buf))),
            IoOutcome::TimedOut => Ok(IoOutcome::TimedOut),
        }
    }

    /// Write one output report, padded to the declared length, waiting up to
    /// the write timeout.
    ///
    /// If an earlier write is still outstanding it is waited on first; if it
    /// is still pending after that, `payload` is not submitted and the call
    /// returns [`IoOutcome::TimedOut`].
    pub fn write(&self, payload: &[u8]) -> Result<IoOutcome> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let mut writer = lock(&self.writer);
        let writer = &mut *writer;

        if writer.ctx.pending {
            match await_pending(
                &self.device,
                &mut writer.ctx,
                writer.buffer.as_mut_slice(),
                self.write_timeout,
                "write",
            )? {
                IoOutcome::TimedOut => return Ok(IoOutcome::TimedOut),
                IoOutcome::Completed(n) => debug!(bytes = n, "Earlier write completed"),
            }
        }

        load_padded("write", &mut writer.buffer, payload)?;
        match self
            .device
            .submit_write(writer.buffer.as_slice(), &mut writer.ctx.completion)?
        {
            Submitted::Completed(n) => Ok(IoOutcome::Completed(n)),
            Submitted::Pending => {
                writer.ctx.pending = true;
                await_pending(
                    &self.device,
                    &mut writer.ctx,
                    writer.buffer.as_mut_slice(),
                    self.write_timeout,
                    "write",
                )
            }
        }
    }
}

/// Copy a completed input report out to the caller.
fn deliver(input: &ReportBuffer, n: usize, buf: &mut [u8]) -> usize {
    let n = n.min(input.len()).min(buf.len());
    buf[..n].copy_from_slice(&input.as_slice()[..n]);
    trace!(report_hex = format_args!("{:02X?}", &buf[..n]), "RX");
    n
}
