//! Two-call variable-length query loop and UTF-16 helpers.
//!
//! Host queries for lists and properties follow the same convention: ask for
//! the required size, allocate, fetch, and go around again if the data grew
//! in between. [`fetch_sized`] runs that loop for any element type.

use crate::error::{Error, Result};
use crate::platform::Fetch;
use tracing::trace;

/// Upper bound on size/fetch rounds before the query is abandoned.
pub const MAX_QUERY_ATTEMPTS: usize = 8;

/// Run a two-call query to completion.
///
/// `query` is first called with an empty buffer. Whenever it answers
/// [`Fetch::TooSmall`], the buffer is reallocated to the requested size and
/// the query is repeated. The returned vector is truncated to the number of
/// units actually written.
pub fn fetch_sized<T, F>(op: &'static str, mut query: F) -> Result<Vec<T>>
where
    T: Copy + Default,
    F: FnMut(&mut [T]) -> Result<Fetch>,
{
    let mut buf: Vec<T> = Vec::new();
    for attempt in 0..MAX_QUERY_ATTEMPTS {
        match query(&mut buf)? {
            Fetch::Complete(len) => {
                buf.truncate(len);
                return Ok(buf);
            }
            Fetch::TooSmall(required) => {
                trace!(op, attempt, required, "query buffer too small, resizing");
                buf = vec![T::default(); required];
            }
        }
    }
    Err(Error::BufferTooSmall {
        op,
        attempts: MAX_QUERY_ATTEMPTS,
    })
}

/// Decode a null-terminated UTF-16 string, stopping at the first NUL.
pub fn wide_to_string(units: &[u16]) -> String {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..end])
}

/// Split a null-separated, double-null-terminated UTF-16 list.
pub fn wide_multi_sz(units: &[u16]) -> Vec<String> {
    units
        .split(|&u| u == 0)
        .take_while(|s| !s.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

/// Reinterpret a little-endian byte blob as UTF-16 units.
pub fn bytes_to_wide(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode a string as null-terminated UTF-16.
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}
