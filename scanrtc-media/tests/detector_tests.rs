//! Detector tests on rendered symbols
//!
//! Symbols are drawn with rxing's own writers onto a white canvas and then
//! decoded back through the full preprocessing path.

use rxing::{BarcodeFormat, MultiFormatWriter, Writer};
use scanrtc_core::{decode_detections, encode_detections, Detector, PixelBuffer, PixelFormat, Symbology};
use scanrtc_media::{BarcodeDetector, DetectorConfig};
use tokio_test::assert_ok;

const SCALE: u32 = 5;
const BAR_HEIGHT: u32 = 100;

struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![255; (width * height) as usize],
        }
    }

    fn fill(&mut self, left: u32, top: u32, width: u32, height: u32) {
        for y in top..top + height {
            for x in left..left + width {
                self.pixels[(y * self.width + x) as usize] = 0;
            }
        }
    }

    /// Draw a symbol with its top-left corner at (left, top); returns the
    /// bottom edge
    fn draw(&mut self, contents: &str, format: BarcodeFormat, left: u32, top: u32) -> u32 {
        let matrix = MultiFormatWriter::default()
            .encode(contents, &format, 0, 0)
            .unwrap();
        let linear = matrix.getHeight() == 1;
        let module_height = if linear { BAR_HEIGHT } else { SCALE };

        for my in 0..matrix.getHeight() {
            for mx in 0..matrix.getWidth() {
                if matrix.get(mx, my) {
                    self.fill(left + mx * SCALE, top + my * module_height, SCALE, module_height);
                }
            }
        }
        top + matrix.getHeight() * module_height
    }

    fn gray(self) -> PixelBuffer {
        PixelBuffer::gray(self.width, self.height, self.pixels).unwrap()
    }

    fn rgb(self) -> PixelBuffer {
        let data: Vec<u8> = self.pixels.iter().flat_map(|&v| [v, v, v]).collect();
        PixelBuffer::new(self.width, self.height, PixelFormat::Rgb24, data).unwrap()
    }
}

fn single(contents: &str, format: BarcodeFormat) -> Canvas {
    let mut canvas = Canvas::new(720, 240);
    canvas.draw(contents, format, 40, 60);
    canvas
}

#[test]
fn test_single_upca() {
    let frame = single("036000291452", BarcodeFormat::UPC_A).gray();
    let detections = BarcodeDetector::new().detect(&frame);

    assert_eq!(detections.len(), 1);
    let detection = &detections[0];
    assert_eq!(detection.payload, "036000291452");
    assert_eq!(detection.symbology, Symbology::UpcA);

    // Bars are drawn over rows 60..160; the blur may shave a row or two
    let bbox = detection.bounding_box;
    assert!(bbox.x >= 40 && bbox.x < 720, "{bbox:?}");
    assert!((56..=64).contains(&bbox.y), "{bbox:?}");
    let bottom = bbox.y + bbox.height as i32;
    assert!((156..=164).contains(&bottom), "{bbox:?}");
    assert!(bbox.width > 300, "{bbox:?}");

    let wire = encode_detections(&detections).unwrap();
    assert!(wire.contains(r#""data":"036000291452","type":"UPCA""#));
}

#[test]
fn test_four_symbols_sorted_by_payload() {
    let mut canvas = Canvas::new(720, 820);
    let mut top = 40;
    top = canvas.draw("http://en.m.wikipedia.org", BarcodeFormat::QR_CODE, 40, top) + 60;
    top = canvas.draw("96385074", BarcodeFormat::EAN_8, 40, top) + 60;
    top = canvas.draw("5901234123457", BarcodeFormat::EAN_13, 40, top) + 60;
    canvas.draw("036000291452", BarcodeFormat::UPC_A, 40, top);

    let detections = BarcodeDetector::new().detect(&canvas.gray());
    assert_eq!(detections.len(), 4, "{detections:?}");
    for detection in detections.iter().filter(|d| d.symbology.is_linear()) {
        let bbox = detection.bounding_box;
        assert!((90..=BAR_HEIGHT + 4).contains(&bbox.height), "{detection:?}");
    }

    let wire = decode_detections(&encode_detections(&detections).unwrap()).unwrap();
    let found: Vec<_> = wire
        .iter()
        .map(|d| (d.payload.as_str(), d.symbology.tag()))
        .collect();
    assert_eq!(
        found,
        [
            ("036000291452", "UPCA"),
            ("5901234123457", "EAN13"),
            ("96385074", "EAN8"),
            ("http://en.m.wikipedia.org", "QRCODE"),
        ]
    );
}

#[test]
fn test_disallowed_symbology_is_never_reported() {
    let frame = single("SCAN-7", BarcodeFormat::CODE_128).gray();

    assert!(BarcodeDetector::new().detect(&frame).is_empty());

    let permissive = assert_ok!(BarcodeDetector::with_config(DetectorConfig {
        symbologies: vec![Symbology::Code128],
    }));
    let detections = permissive.detect(&frame);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].payload, "SCAN-7");
}

#[test]
fn test_bookland_ean_is_reported_as_isbn13() {
    let frame = single("9780306406157", BarcodeFormat::EAN_13).gray();
    let detections = BarcodeDetector::new().detect(&frame);

    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].symbology, Symbology::Isbn13);
    assert_eq!(detections[0].payload, "9780306406157");
}

#[test]
fn test_color_frames_are_scanned_through_luminance() {
    let frame = single("http://en.m.wikipedia.org", BarcodeFormat::QR_CODE).rgb();
    let detections = BarcodeDetector::new().detect(&frame);

    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].symbology, Symbology::QrCode);
    let bbox = detections[0].bounding_box;
    assert!(bbox.width > 0 && bbox.height > 0);
}

#[test]
fn test_blank_frame_is_empty() {
    let frame = Canvas::new(320, 240).gray();
    assert!(BarcodeDetector::new().detect(&frame).is_empty());
}
