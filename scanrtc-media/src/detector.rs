//! Barcode [`Detector`] backed by rxing

use crate::error::{MediaError, MediaResult};
use crate::preprocess;
use image::GrayImage;
use rxing::{BarcodeFormat, Exceptions, RXingResult};
use scanrtc_core::{BoundingBox, Detection, Detector, PixelBuffer, Symbology};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Share of a neighbouring line that must repeat the decoded line's bar
/// pattern for it to count as part of the same symbol
const MIN_LINE_MATCH_PERCENT: usize = 90;

/// Which symbologies the detector reports
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Allow-list; symbols of any other format are never reported
    pub symbologies: Vec<Symbology>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            symbologies: Symbology::SUPPORTED.to_vec(),
        }
    }
}

/// Scans frames for barcodes and QR codes.
///
/// Each frame goes through [`preprocess::preprocess`] and the binarized
/// image is handed to rxing's multi-symbol reader. Results outside the
/// allow-list are dropped.
#[derive(Debug, Clone)]
pub struct BarcodeDetector {
    allowed: HashSet<Symbology>,
}

impl BarcodeDetector {
    /// Detector with the default allow-list
    pub fn new() -> Self {
        Self {
            allowed: Symbology::SUPPORTED.into_iter().collect(),
        }
    }

    /// Detector with a custom allow-list
    pub fn with_config(config: DetectorConfig) -> MediaResult<Self> {
        if config.symbologies.is_empty() {
            return Err(MediaError::InvalidConfiguration {
                message: "at least one symbology must be allowed".to_string(),
            });
        }
        Ok(Self {
            allowed: config.symbologies.into_iter().collect(),
        })
    }

    /// Whether `symbology` may be reported
    pub fn allows(&self, symbology: Symbology) -> bool {
        self.allowed.contains(&symbology)
    }

    /// Scan one frame. A frame without symbols is `Ok` with no detections.
    pub fn scan(&self, frame: &PixelBuffer) -> MediaResult<Vec<Detection>> {
        let binary = preprocess::preprocess(frame)?;
        let (width, height) = binary.dimensions();

        let results = match rxing::helpers::detect_multiple_in_luma(binary.as_raw().clone(), width, height) {
            Ok(results) => results,
            Err(Exceptions::NotFoundException(_)) => return Ok(Vec::new()),
            Err(e) => return Err(MediaError::decoding("rxing", e)),
        };

        Ok(results
            .iter()
            .filter_map(|result| self.to_detection(result, &binary))
            .collect())
    }

    fn to_detection(&self, result: &RXingResult, binary: &GrayImage) -> Option<Detection> {
        let text = result.getText();
        let Some((symbology, payload)) = self.classify(result.getBarcodeFormat(), text) else {
            trace!(format = ?result.getBarcodeFormat(), "Ignoring symbol outside the allow-list");
            return None;
        };
        let mut bounding_box =
            BoundingBox::enclosing(result.getPoints().iter().map(|p| (p.x, p.y)))?;
        // Linear readers only report the ends of the one line they decoded
        if symbology.is_linear() {
            bounding_box = extend_along_bars(binary, bounding_box);
        }
        Some(Detection::new(bounding_box, payload, symbology))
    }

    fn classify(&self, format: &BarcodeFormat, text: &str) -> Option<(Symbology, String)> {
        let symbology = match format {
            BarcodeFormat::EAN_13 => return self.classify_ean13(text),
            BarcodeFormat::QR_CODE => Symbology::QrCode,
            BarcodeFormat::CODABAR => Symbology::Codabar,
            BarcodeFormat::EAN_8 => Symbology::Ean8,
            BarcodeFormat::UPC_A => Symbology::UpcA,
            BarcodeFormat::UPC_E => Symbology::UpcE,
            BarcodeFormat::ITF => Symbology::Interleaved2of5,
            BarcodeFormat::PDF_417 => Symbology::Pdf417,
            BarcodeFormat::CODE_39 => Symbology::Code39,
            BarcodeFormat::CODE_93 => Symbology::Code93,
            BarcodeFormat::CODE_128 => Symbology::Code128,
            _ => return None,
        };
        self.allows(symbology).then(|| (symbology, text.to_string()))
    }

    /// Bookland EAN-13s are reported as ISBNs when an ISBN symbology is
    /// allowed; ISBN-13 wins when both are.
    fn classify_ean13(&self, text: &str) -> Option<(Symbology, String)> {
        let bookland = text.len() == 13 && (text.starts_with("978") || text.starts_with("979"));
        if bookland && self.allows(Symbology::Isbn13) {
            return Some((Symbology::Isbn13, text.to_string()));
        }
        if bookland && text.starts_with("978") && self.allows(Symbology::Isbn10) {
            if let Some(isbn10) = isbn10_from_ean13(text) {
                return Some((Symbology::Isbn10, isbn10));
            }
        }
        self.allows(Symbology::Ean13)
            .then(|| (Symbology::Ean13, text.to_string()))
    }
}

impl Default for BarcodeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for BarcodeDetector {
    fn detect(&self, frame: &PixelBuffer) -> Vec<Detection> {
        match self.scan(frame) {
            Ok(detections) => detections,
            Err(e) => {
                debug!(error = %e, "Frame scan failed");
                Vec::new()
            }
        }
    }
}

/// Grow the box of a linear symbol from its decoded scan line to the full
/// length of its bars.
///
/// The line through the middle of `bbox` is taken as the reference pattern.
/// Neighbouring lines are added on both sides for as long as they repeat it.
/// A box wider than tall was read along a row; otherwise along a column.
fn extend_along_bars(binary: &GrayImage, bbox: BoundingBox) -> BoundingBox {
    let (width, height) = binary.dimensions();
    let along_rows = bbox.width >= bbox.height;
    let (span_len, line_count) = if along_rows { (width, height) } else { (height, width) };
    if span_len == 0 || line_count == 0 {
        return bbox;
    }
    let (span_start, span, lines_start, lines) = if along_rows {
        (bbox.x, bbox.width, bbox.y, bbox.height)
    } else {
        (bbox.y, bbox.height, bbox.x, bbox.width)
    };
    let pixel = |pos: u32, line: u32| {
        let (x, y) = if along_rows { (pos, line) } else { (line, pos) };
        binary.get_pixel(x, y).0[0]
    };

    let first = span_start.clamp(0, span_len as i32 - 1) as u32;
    let last = (span_start + span as i32).clamp(0, span_len as i32 - 1) as u32;
    let center = (lines_start + lines as i32 / 2).clamp(0, line_count as i32 - 1) as u32;
    let reference: Vec<u8> = (first..=last).map(|pos| pixel(pos, center)).collect();
    let dark = reference.iter().filter(|&&v| v == 0).count();
    if last <= first || dark == 0 || dark == reference.len() {
        return bbox;
    }

    let repeats = |line: u32| {
        let same = (first..=last)
            .zip(&reference)
            .filter(|&(pos, &v)| pixel(pos, line) == v)
            .count();
        same * 100 >= reference.len() * MIN_LINE_MATCH_PERCENT
    };
    let mut low = center;
    while low > 0 && repeats(low - 1) {
        low -= 1;
    }
    let mut high = center;
    while high + 1 < line_count && repeats(high + 1) {
        high += 1;
    }

    let top = (low as i32).min(lines_start);
    let bottom = (high as i32 + 1).max(lines_start + lines as i32);
    let extent = (bottom - top) as u32;
    if along_rows {
        BoundingBox::new(bbox.x, top, bbox.width, extent)
    } else {
        BoundingBox::new(top, bbox.y, extent, bbox.height)
    }
}

/// Convert a 978-prefixed EAN-13 into its 10-character ISBN
pub fn isbn10_from_ean13(ean13: &str) -> Option<String> {
    let body = ean13.strip_prefix("978")?.get(..9)?;
    let mut sum = 0u32;
    for (i, c) in body.chars().enumerate() {
        sum += c.to_digit(10)? * (10 - i as u32);
    }
    let check = match (11 - sum % 11) % 11 {
        10 => 'X',
        n => char::from_digit(n, 10)?,
    };
    Some(format!("{body}{check}"))
}
