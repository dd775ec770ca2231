//! Safety layer: validates deck command parameters before any bytes are
//! sent to the device.
//!
//! ## Key index
//! - **Range**: 0 to `rows * cols - 1` of the model's [`KeyLayout`]
//!
//! ## Brightness
//! - **Range**: 0 to 100 percent; larger values are clamped to 100.
//!
//! ## Key images
//! - Images are uploaded pre-encoded (JPEG for V2 decks); no decoding or
//!   resizing happens here.
//! - The chunk index is 16 bits wide, which caps an image at 65536 chunks.

use crate::device::KeyLayout;
use crate::error::{Error, Result};

pub const BRIGHTNESS_MAX: u8 = 100;

/// Largest chunk count addressable by the 16-bit chunk index.
pub const MAX_IMAGE_CHUNKS: usize = 1 << 16;

/// Validate a key index against the layout.
pub fn validate_key_index(key: usize, layout: &KeyLayout) -> Result<u8> {
    let count = layout.key_count();
    match u8::try_from(key) {
        Ok(k) if key < count => Ok(k),
        _ => Err(Error::OutOfRange {
            field: "key_index",
            value: u32::try_from(key).unwrap_or(u32::MAX),
            min: 0,
            max: count.saturating_sub(1) as u32,
        }),
    }
}

/// Clamp a brightness percentage to 0..=100.
pub fn clamp_brightness(percent: u8) -> u8 {
    percent.min(BRIGHTNESS_MAX)
}

/// Validate an encoded image length and return the number of chunks it
/// takes at `payload_len` bytes per report.
pub fn validate_image_len(len: usize, payload_len: usize) -> Result<usize> {
    if len == 0 {
        return Err(Error::EmptyPayload);
    }
    if payload_len == 0 {
        return Err(Error::Unsupported("image reports carry no payload".into()));
    }
    let chunks = len.div_ceil(payload_len);
    if chunks > MAX_IMAGE_CHUNKS {
        return Err(Error::OutOfRange {
            field: "image_len",
            value: u32::try_from(len).unwrap_or(u32::MAX),
            min: 1,
            max: u32::try_from(MAX_IMAGE_CHUNKS * payload_len).unwrap_or(u32::MAX),
        });
    }
    Ok(chunks)
}
