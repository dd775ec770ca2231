//! Device model: the Stream Deck catalogue and deck discovery.

use crate::config::TransportConfig;
use crate::enumerate::discover;
use crate::info::DeviceIdentity;
use crate::platform::HidHost;
use crate::{pids, ELGATO_VID};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Wire protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// First-generation decks (Original, Mini): BMP key images, key states
    /// from byte 1 of the input report.
    V1,
    /// Later decks: JPEG key images in 1024-byte reports, key states from
    /// byte 4.
    V2,
}

/// Supported Stream Deck models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeckModel {
    Original,
    OriginalV2,
    Mk2,
    Mini,
    Mini2022,
    Neo,
    Xl,
    Xl2022,
    Pedal,
    Plus,
}

/// Key grid and image report geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyLayout {
    pub rows: u8,
    pub cols: u8,
    /// Key image size in pixels; 0 for decks without displays.
    pub pixel_width: u16,
    pub pixel_height: u16,
    pub image_report_len: usize,
    pub image_header_len: usize,
}

impl KeyLayout {
    pub fn key_count(&self) -> usize {
        usize::from(self.rows) * usize::from(self.cols)
    }

    /// Image bytes carried by one report.
    pub fn image_payload_len(&self) -> usize {
        self.image_report_len.saturating_sub(self.image_header_len)
    }

    pub fn has_displays(&self) -> bool {
        self.pixel_width > 0 && self.pixel_height > 0
    }
}

const fn layout(rows: u8, cols: u8, pixels: u16, image_report_len: usize, image_header_len: usize) -> KeyLayout {
    KeyLayout {
        rows,
        cols,
        pixel_width: pixels,
        pixel_height: pixels,
        image_report_len,
        image_header_len,
    }
}

impl DeckModel {
    /// Every model, in the order [`find_deck`] tries them.
    pub const ALL: &'static [DeckModel] = &[
        DeckModel::Original,
        DeckModel::OriginalV2,
        DeckModel::Mini,
        DeckModel::Neo,
        DeckModel::Xl,
        DeckModel::Xl2022,
        DeckModel::Mk2,
        DeckModel::Pedal,
        DeckModel::Mini2022,
        DeckModel::Plus,
    ];

    /// Look up model from USB product ID.
    pub fn from_pid(pid: u16) -> Option<Self> {
        match pid {
            pids::ORIGINAL => Some(Self::Original),
            pids::ORIGINAL_V2 => Some(Self::OriginalV2),
            pids::MK2 => Some(Self::Mk2),
            pids::MINI => Some(Self::Mini),
            pids::MINI_2022 => Some(Self::Mini2022),
            pids::NEO => Some(Self::Neo),
            pids::XL => Some(Self::Xl),
            pids::XL_2022 => Some(Self::Xl2022),
            pids::PEDAL => Some(Self::Pedal),
            pids::PLUS => Some(Self::Plus),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Original => "Stream Deck",
            Self::OriginalV2 => "Stream Deck (2019)",
            Self::Mk2 => "Stream Deck MK.2",
            Self::Mini => "Stream Deck Mini",
            Self::Mini2022 => "Stream Deck Mini (2022)",
            Self::Neo => "Stream Deck Neo",
            Self::Xl => "Stream Deck XL",
            Self::Xl2022 => "Stream Deck XL (2022)",
            Self::Pedal => "Stream Deck Pedal",
            Self::Plus => "Stream Deck +",
        }
    }

    /// USB Product ID.
    pub fn pid(&self) -> u16 {
        match self {
            Self::Original => pids::ORIGINAL,
            Self::OriginalV2 => pids::ORIGINAL_V2,
            Self::Mk2 => pids::MK2,
            Self::Mini => pids::MINI,
            Self::Mini2022 => pids::MINI_2022,
            Self::Neo => pids::NEO,
            Self::Xl => pids::XL,
            Self::Xl2022 => pids::XL_2022,
            Self::Pedal => pids::PEDAL,
            Self::Plus => pids::PLUS,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Original | Self::Mini | Self::Mini2022 => Protocol::V1,
            _ => Protocol::V2,
        }
    }

    pub fn layout(&self) -> KeyLayout {
        match self {
            Self::Original => layout(3, 5, 72, 8191, 16),
            Self::OriginalV2 | Self::Mk2 => layout(3, 5, 72, 1024, 8),
            Self::Mini | Self::Mini2022 => layout(2, 3, 80, 1024, 16),
            Self::Neo => layout(2, 4, 96, 1024, 8),
            Self::Xl | Self::Xl2022 => layout(4, 8, 96, 1024, 8),
            Self::Pedal => layout(1, 3, 0, 1024, 8),
            Self::Plus => layout(2, 4, 120, 1024, 8),
        }
    }
}

impl std::fmt::Display for DeckModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Find the first connected Stream Deck.
///
/// Known product ids are tried in [`DeckModel::ALL`] order; a non-zero
/// `product_id` in `config` restricts the search to that model. A zero
/// `vendor_id` means the Elgato vendor id.
pub fn find_deck<H: HidHost>(host: &H, config: &TransportConfig) -> Option<(DeckModel, DeviceIdentity)> {
    let vendor_id = if config.vendor_id == 0 {
        ELGATO_VID
    } else {
        config.vendor_id
    };

    let candidates: Vec<DeckModel> = if config.product_id == 0 {
        DeckModel::ALL.to_vec()
    } else {
        DeckModel::from_pid(config.product_id).into_iter().collect()
    };

    for model in candidates {
        if let Some(identity) = discover(host, vendor_id, model.pid()).into_iter().next() {
            info!(
                model = model.name(),
                path = %identity.path,
                serial = %identity.serial_number,
                "Found Stream Deck"
            );
            return Some((model, identity));
        }
    }
    debug!(vid = format_args!("0x{:04X}", vendor_id), "No Stream Deck found");
    None
}
