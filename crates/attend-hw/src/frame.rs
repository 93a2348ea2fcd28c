//! Frame type and pixel helpers: YUYV/GREY to RGB, dark detection,
//! box overlays and JPEG encoding for the preview stream.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = (self.image.width() * self.image.height()) as usize;
        if pixels == 0 {
            return 0.0;
        }
        self.image.pixels().map(|p| luma(p) as f32).sum::<f32>() / pixels as f32
    }

    pub fn is_dark(&self) -> bool {
        is_dark_frame(&self.image, 0.95)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

fn luma(p: &Rgb<u8>) -> u8 {
    let [r, g, b] = p.0;
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// BT.601 YCbCr → RGB for one pixel.
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let y = y as f32;
    let cb = u as f32 - 128.0;
    let cr = v as f32 - 128.0;
    Rgb([
        clamp_u8(y + 1.402 * cr),
        clamp_u8(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp_u8(y + 1.772 * cb),
    ])
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// Each 4-byte group `[Y0, U, Y1, V]` yields two pixels sharing U and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut raw = Vec::with_capacity((width * height * 3) as usize);
    for group in yuyv[..expected].chunks_exact(4) {
        let [y0, u, y1, v] = [group[0], group[1], group[2], group[3]];
        raw.extend_from_slice(&ycbcr_to_rgb(y0, u, v).0);
        raw.extend_from_slice(&ycbcr_to_rgb(y1, u, v).0);
    }
    RgbImage::from_raw(width, height, raw).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Replicate an 8-bit grey buffer into RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let g = grey[(y * width + x) as usize];
        Rgb([g, g, g])
    }))
}

/// True if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let total = (image.width() * image.height()) as usize;
    if total == 0 {
        return true;
    }
    let dark = image.pixels().filter(|p| luma(p) < 32).count();
    (dark as f32 / total as f32) > threshold_pct
}

/// Draw a rectangle outline, clipped to the image.
pub fn draw_outline(
    image: &mut RgbImage,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    colour: Rgb<u8>,
    thickness: u32,
) {
    let (iw, ih) = (image.width() as i64, image.height() as i64);
    if iw == 0 || ih == 0 || w <= 0.0 || h <= 0.0 {
        return;
    }
    let x0 = (x.round() as i64).clamp(0, iw - 1);
    let y0 = (y.round() as i64).clamp(0, ih - 1);
    let x1 = ((x + w).round() as i64).clamp(0, iw - 1);
    let y1 = ((y + h).round() as i64).clamp(0, ih - 1);
    let t = thickness.max(1) as i64;

    for py in y0..=y1 {
        for px in x0..=x1 {
            let on_edge = px < x0 + t || px > x1 - t || py < y0 + t || py > y1 - t;
            if on_edge {
                image.put_pixel(px as u32, py as u32, colour);
            }
        }
    }
}

/// Encode as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out)
}
