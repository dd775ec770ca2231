//! Stream Deck commands over an opened [`DeviceHandle`].

use crate::config::TransportConfig;
use crate::device::{find_deck, DeckModel, KeyLayout, Protocol};
use crate::error::{Error, Result};
use crate::handle::DeviceHandle;
use crate::platform::{HidDevice, HidHost};
use crate::safety::{clamp_brightness, validate_image_len, validate_key_index};
use crate::transport::{IoOutcome, ReportKind};
use tracing::{debug, info, warn};

/// Report id of image and key-stream output reports.
const IMAGE_REPORT_ID: u8 = 0x02;
/// "Set key image" command of V2 image reports.
const SET_KEY_IMAGE: u8 = 0x07;
const V2_IMAGE_HEADER_LEN: usize = 8;

/// Pack key-state bytes into a bit mask; bit `i` is set when key `i` is down.
///
/// `offset` is where the first key byte sits in the input report. At most 32
/// keys are reported.
pub fn key_mask(report: &[u8], offset: usize, key_count: usize) -> u32 {
    report
        .iter()
        .skip(offset)
        .take(key_count.min(32))
        .enumerate()
        .filter(|(_, &state)| state != 0)
        .fold(0, |mask, (i, _)| mask | (1 << i))
}

/// Indices of the keys set in `mask`.
pub fn pressed_keys(mask: u32) -> Vec<u8> {
    (0..32u8).filter(|i| mask & (1 << i) != 0).collect()
}

/// Build one V2 image report:
/// `[0x02, 0x07, key, is_last, len_lo, len_hi, index_lo, index_hi, payload…]`,
/// zero-padded to `report_len`.
pub fn image_report(report_len: usize, key: u8, index: u16, is_last: bool, chunk: &[u8]) -> Result<Vec<u8>> {
    let max = report_len.saturating_sub(V2_IMAGE_HEADER_LEN);
    if chunk.is_empty() || chunk.len() > max {
        return Err(Error::OutOfRange {
            field: "chunk_len",
            value: u32::try_from(chunk.len()).unwrap_or(u32::MAX),
            min: 1,
            max: u32::try_from(max).unwrap_or(u32::MAX),
        });
    }
    let len = u16::try_from(chunk.len()).map_err(|_| Error::OutOfRange {
        field: "chunk_len",
        value: u32::try_from(chunk.len()).unwrap_or(u32::MAX),
        min: 1,
        max: u32::from(u16::MAX),
    })?;
    let [len_lo, len_hi] = len.to_le_bytes();
    let [index_lo, index_hi] = index.to_le_bytes();

    let mut report = vec![0u8; report_len];
    report[..V2_IMAGE_HEADER_LEN].copy_from_slice(&[
        IMAGE_REPORT_ID,
        SET_KEY_IMAGE,
        key,
        u8::from(is_last),
        len_lo,
        len_hi,
        index_lo,
        index_hi,
    ]);
    report[V2_IMAGE_HEADER_LEN..V2_IMAGE_HEADER_LEN + chunk.len()].copy_from_slice(chunk);
    Ok(report)
}

/// An opened Stream Deck.
pub struct StreamDeck<D: HidDevice> {
    handle: DeviceHandle<D>,
    model: DeckModel,
}

impl<D: HidDevice> StreamDeck<D> {
    pub fn new(handle: DeviceHandle<D>, model: DeckModel) -> Self {
        Self { handle, model }
    }

    /// Find and open the first connected deck.
    pub fn open<H>(host: &H, config: &TransportConfig) -> Result<Self>
    where
        H: HidHost<Device = D>,
    {
        let (model, identity) = find_deck(host, config)
            .ok_or_else(|| Error::NotFound("no Stream Deck connected".into()))?;
        let handle = DeviceHandle::open(host, identity, config).map_err(|e| e.source)?;
        Ok(Self::new(handle, model))
    }

    pub fn model(&self) -> DeckModel {
        self.model
    }

    pub fn layout(&self) -> KeyLayout {
        self.model.layout()
    }

    pub fn handle(&self) -> &DeviceHandle<D> {
        &self.handle
    }

    pub fn close(self) {
        self.handle.close();
    }

    /// Set display brightness; values above 100 are clamped.
    pub fn set_brightness(&self, percent: u8) -> Result<usize> {
        let percent = clamp_brightness(percent);
        let report: &[u8] = match self.model.protocol() {
            Protocol::V1 => &[0x05, 0x55, 0xAA, 0xD1, 0x01, percent],
            Protocol::V2 => &[0x03, 0x08, percent],
        };
        let sent = self.handle.set_report(report, ReportKind::Feature)?;
        info!(model = self.model.name(), percent, "Brightness set");
        Ok(sent)
    }

    /// Show the logo screen and clear every key.
    pub fn reset(&self) -> Result<usize> {
        let report: &[u8] = match self.model.protocol() {
            Protocol::V1 => &[0x0B, 0x63],
            Protocol::V2 => &[0x03, 0x02],
        };
        self.handle.set_report(report, ReportKind::Feature)
    }

    /// Abort any half-sent key image by sending an empty image report.
    pub fn reset_key_stream(&self) -> Result<usize> {
        self.handle.set_report(&[IMAGE_REPORT_ID], ReportKind::Output)
    }

    /// Upload an already-encoded key image. Returns the number of reports
    /// sent.
    ///
    /// Chunks are sized to the output report length the device declares,
    /// which normally matches the model's layout.
    pub fn set_key_image(&self, key: usize, image: &[u8]) -> Result<usize> {
        let layout = self.layout();
        let key = validate_key_index(key, &layout)?;
        if self.model.protocol() != Protocol::V2 || !layout.has_displays() {
            return Err(Error::Unsupported(format!(
                "{} does not take JPEG key images",
                self.model.name()
            )));
        }
        let report_len = usize::from(self.handle.capabilities().output_report_len);
        if report_len != layout.image_report_len {
            warn!(
                model = self.model.name(),
                declared = report_len,
                expected = layout.image_report_len,
                "Output report length differs from model, chunking to the declared length"
            );
        }
        let payload_len = report_len.saturating_sub(V2_IMAGE_HEADER_LEN);
        let chunks = validate_image_len(image.len(), payload_len)?;

        for (i, chunk) in image.chunks(payload_len).enumerate() {
            let index = u16::try_from(i).map_err(|_| Error::OutOfRange {
                field: "chunk_index",
                value: u32::try_from(i).unwrap_or(u32::MAX),
                min: 0,
                max: u32::from(u16::MAX),
            })?;
            let report = image_report(report_len, key, index, i + 1 == chunks, chunk)?;
            match self.handle.write(&report)? {
                IoOutcome::Completed(_) => {}
                IoOutcome::TimedOut => {
                    return Err(Error::Timeout(format!(
                        "key {key} image chunk {i}/{chunks} not sent within {} ms",
                        self.handle.write_timeout().as_millis()
                    )))
                }
            }
        }
        debug!(key, bytes = image.len(), chunks, "Key image uploaded");
        Ok(chunks)
    }

    /// Read one input report and return the pressed-key mask, or `None` if
    /// no report arrived within the read timeout.
    pub fn read_key_states(&self) -> Result<Option<u32>> {
        let len = usize::from(self.handle.capabilities().input_report_len);
        let mut buf = vec![0u8; len.max(1)];
        let offset = match self.model.protocol() {
            Protocol::V1 => 1,
            Protocol::V2 => 4,
        };
        match self.handle.read(&mut buf)? {
            IoOutcome::Completed(n) => Ok(Some(key_mask(&buf[..n], offset, self.layout().key_count()))),
            IoOutcome::TimedOut => Ok(None),
        }
    }

    /// Raw firmware-version feature report.
    pub fn firmware_report(&self) -> Result<Vec<u8>> {
        let len = usize::from(self.handle.capabilities().feature_report_len);
        if len == 0 {
            return Err(Error::Unsupported("device declares no feature report".into()));
        }
        let report_id = match self.model.protocol() {
            Protocol::V1 => 0x04,
            Protocol::V2 => 0x05,
        };
        let mut buf = vec![0u8; len];
        let n = self
            .handle
            .get_numbered_report(report_id, &mut buf, ReportKind::Feature)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Firmware version string from [`firmware_report`](Self::firmware_report).
    pub fn firmware_version(&self) -> Result<String> {
        let offset = match self.model.protocol() {
            Protocol::V1 => 5,
            Protocol::V2 => 6,
        };
        let report = self.firmware_report()?;
        let text: Vec<u8> = report
            .iter()
            .skip(offset)
            .take_while(|&&b| b != 0)
            .copied()
            .collect();
        Ok(String::from_utf8_lossy(&text).into_owned())
    }
}
