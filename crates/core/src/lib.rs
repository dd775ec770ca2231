//! open-deck-core: HID discovery, report transport, and Stream Deck control.
//!
//! Discovery enumerates HID interfaces, classifies the bus each one sits on
//! and collects its identity. An identity opens into a
//! [`handle::DeviceHandle`], which carries the feature/output/input report
//! operations. The [`deck`] module drives Elgato Stream Decks on top of that.
//!
//! All OS access goes through the [`platform::HidHost`] and
//! [`platform::HidDevice`] traits; the native backend is Windows-only.

pub mod bus;
pub mod comm;
pub mod config;
pub mod deck;
pub mod device;
pub mod enumerate;
pub mod error;
pub mod handle;
pub mod info;
pub mod platform;
pub mod property;
pub mod query;
pub mod safety;
pub mod transport;
#[cfg(windows)]
pub mod windows;

/// Elgato USB Vendor ID.
pub const ELGATO_VID: u16 = 0x0FD9;

/// Known Stream Deck product IDs.
pub mod pids {
    pub const ORIGINAL: u16 = 0x0060;
    pub const ORIGINAL_V2: u16 = 0x006D;
    /// MK.2, including the 2023 scissor-key revision.
    pub const MK2: u16 = 0x0080;
    pub const MINI: u16 = 0x0063;
    pub const MINI_2022: u16 = 0x0090;
    pub const NEO: u16 = 0x009A;
    pub const XL: u16 = 0x006C;
    pub const XL_2022: u16 = 0x008F;
    pub const PEDAL: u16 = 0x0086;
    pub const PLUS: u16 = 0x0084;
}

/// The host backend for the current platform.
#[cfg(windows)]
pub fn native_host() -> windows::WindowsHost {
    windows::WindowsHost::new()
}
