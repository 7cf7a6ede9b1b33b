use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{
    DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageReader, RgbImage, Rgba,
    RgbaImage,
};
use std::io::Cursor;

use crate::config::ImageConfig;
use crate::error::Result;

/// Widest thumbnail we produce; height is the binding constraint in practice
const THUMBNAIL_MAX_WIDTH: u32 = 9999;

/// An upload after orientation fix and re-encoding
#[derive(Debug)]
pub struct PreparedImage {
    /// Upright pixels, used for embedding
    pub image: DynamicImage,
    /// JPEG bytes stored as the original
    pub original: Bytes,
}

/// Converts uploads into stored originals and thumbnails
#[derive(Debug, Clone, Copy)]
pub struct ImageProcessor {
    thumb_height: u32,
    jpeg_quality: u8,
}

impl ImageProcessor {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            thumb_height: config.thumb_height.max(1),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    /// Decode an uploaded payload, turn it upright and re-encode it as the
    /// stored original.
    pub fn prepare_upload(&self, data: &[u8]) -> Result<PreparedImage> {
        let image = decode_upright(data)?;
        let original = self.encode_original(&image)?;
        Ok(PreparedImage { image, original })
    }

    /// Lossy, opaque encoding of the full-size image
    pub fn encode_original(&self, image: &DynamicImage) -> Result<Bytes> {
        let rgb = flatten(image);
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality).write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(Bytes::from(buf))
    }

    /// PNG preview of a stored original, at most `thumb_height` tall
    pub fn make_thumbnail(&self, original: &[u8]) -> Result<Bytes> {
        let image = decode_upright(original)?;
        let (width, height) =
            fit_within(image.width(), image.height(), THUMBNAIL_MAX_WIDTH, self.thumb_height);

        let resized = if (width, height) == (image.width(), image.height()) {
            image
        } else {
            image.resize_exact(width, height, FilterType::Lanczos3)
        };

        let rgb = flatten(&resized);
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf).write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(Bytes::from(buf))
    }
}

/// Decode `data` and apply its EXIF orientation.
///
/// Missing or unreadable orientation metadata leaves the pixels untouched.
pub fn decode_upright(data: &[u8]) -> Result<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_decoder()?;

    let orientation = decoder.orientation().unwrap_or_else(|e| {
        tracing::debug!("Ignoring unreadable orientation metadata: {}", e);
        Orientation::NoTransforms
    });

    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Composite any transparency over white and drop the alpha channel
pub fn flatten(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let mut canvas = RgbaImage::from_pixel(image.width(), image.height(), Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &image.to_rgba8(), 0, 0);
    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

/// Largest size with the same aspect ratio inside `max_w x max_h`.
/// Images that already fit are left alone.
fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let scale = f64::min(max_w as f64 / width as f64, max_h as f64 / height as f64);
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).max(1);
    (scaled(width).min(max_w), scaled(height).min(max_h))
}
