//! Decoded symbols and the detector seam

use crate::frame::PixelBuffer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Axis-aligned rectangle in source-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl BoundingBox {
    /// Create a bounding box
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest box enclosing every point, or `None` for an empty set
    pub fn enclosing(points: impl IntoIterator<Item = (f32, f32)>) -> Option<Self> {
        let mut points = points.into_iter();
        let (x0, y0) = points.next()?;
        let (min_x, min_y, max_x, max_y) = points.fold((x0, y0, x0, y0), |acc, (x, y)| {
            (acc.0.min(x), acc.1.min(y), acc.2.max(x), acc.3.max(y))
        });
        let left = min_x.floor() as i32;
        let top = min_y.floor() as i32;
        Some(Self {
            x: left,
            y: top,
            width: (max_x.ceil() as i32 - left).max(0) as u32,
            height: (max_y.ceil() as i32 - top).max(0) as u32,
        })
    }
}

/// Code formats the scanner can report.
///
/// Serialized names are the tags carried in the `type` field of the result
/// wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Symbology {
    /// QR Code
    #[serde(rename = "QRCODE")]
    QrCode,
    /// Codabar
    #[serde(rename = "CODABAR")]
    Codabar,
    /// EAN-13
    #[serde(rename = "EAN13")]
    Ean13,
    /// EAN-8
    #[serde(rename = "EAN8")]
    Ean8,
    /// UPC-A
    #[serde(rename = "UPCA")]
    UpcA,
    /// UPC-E
    #[serde(rename = "UPCE")]
    UpcE,
    /// ISBN-10 (reported from a 978-prefixed EAN-13)
    #[serde(rename = "ISBN10")]
    Isbn10,
    /// ISBN-13 (978/979-prefixed EAN-13)
    #[serde(rename = "ISBN13")]
    Isbn13,
    /// Interleaved 2 of 5
    #[serde(rename = "I25")]
    Interleaved2of5,
    /// PDF417
    #[serde(rename = "PDF417")]
    Pdf417,
    /// Code 39
    #[serde(rename = "CODE39")]
    Code39,
    /// Code 93
    #[serde(rename = "CODE93")]
    Code93,
    /// Code 128
    #[serde(rename = "CODE128")]
    Code128,
}

impl Symbology {
    /// The fixed allow-list the scanner reports by default
    pub const SUPPORTED: [Symbology; 11] = [
        Symbology::QrCode,
        Symbology::Codabar,
        Symbology::Ean13,
        Symbology::Ean8,
        Symbology::UpcA,
        Symbology::UpcE,
        Symbology::Isbn10,
        Symbology::Isbn13,
        Symbology::Interleaved2of5,
        Symbology::Pdf417,
        Symbology::Code39,
    ];

    /// Wire tag for this symbology
    pub fn tag(self) -> &'static str {
        match self {
            Symbology::QrCode => "QRCODE",
            Symbology::Codabar => "CODABAR",
            Symbology::Ean13 => "EAN13",
            Symbology::Ean8 => "EAN8",
            Symbology::UpcA => "UPCA",
            Symbology::UpcE => "UPCE",
            Symbology::Isbn10 => "ISBN10",
            Symbology::Isbn13 => "ISBN13",
            Symbology::Interleaved2of5 => "I25",
            Symbology::Pdf417 => "PDF417",
            Symbology::Code39 => "CODE39",
            Symbology::Code93 => "CODE93",
            Symbology::Code128 => "CODE128",
        }
    }

    /// Whether this is a linear (one-dimensional) barcode
    pub fn is_linear(self) -> bool {
        !matches!(self, Symbology::QrCode | Symbology::Pdf417)
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Symbology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Symbology::SUPPORTED
            .iter()
            .chain([Symbology::Code93, Symbology::Code128].iter())
            .copied()
            .find(|symbology| symbology.tag() == s)
            .ok_or_else(|| format!("unknown symbology tag: {s}"))
    }
}

/// One symbol found in one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// Location in the source frame
    #[serde(flatten)]
    pub bounding_box: BoundingBox,
    /// Decoded text content
    #[serde(rename = "data")]
    pub payload: String,
    /// Code format
    #[serde(rename = "type")]
    pub symbology: Symbology,
}

impl Detection {
    /// Create a detection
    pub fn new(bounding_box: BoundingBox, payload: impl Into<String>, symbology: Symbology) -> Self {
        Self {
            bounding_box,
            payload: payload.into(),
            symbology,
        }
    }
}

/// Turns one frame into the symbols visible in it.
///
/// Implementations are pure: no I/O, no state carried between frames, and
/// failure to decode yields an empty list rather than an error. Results are
/// in the backend's native order; callers that need a stable order sort
/// them.
pub trait Detector: Send + Sync + fmt::Debug {
    /// Scan a frame
    fn detect(&self, frame: &PixelBuffer) -> Vec<Detection>;
}

impl<D: Detector + ?Sized> Detector for std::sync::Arc<D> {
    fn detect(&self, frame: &PixelBuffer) -> Vec<Detection> {
        (**self).detect(frame)
    }
}
