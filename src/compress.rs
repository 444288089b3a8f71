//! Image recompression for stored uploads.
//!
//! JPEG input stays JPEG at the requested quality, PNG input is re-encoded
//! with maximum compression, everything else becomes WebP. WebP is lossy at
//! the requested quality unless `lossless` is set.

use std::io::Cursor;

use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilter, PngEncoder},
    },
    imageops::FilterType,
    metadata::Orientation,
    DynamicImage, ImageDecoder, ImageFormat, ImageReader,
};

use crate::types::CompressRequest;

pub const DEFAULT_QUALITY: u8 = 75;

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("unsupported input: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("webp encoding failed: {0}")]
    WebP(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("compression task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    pub quality: u8,
    pub max_width: Option<u32>,
    pub to_webp: bool,
    /// Only affects WebP output.
    pub lossless: bool,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self { quality: DEFAULT_QUALITY, max_width: None, to_webp: false, lossless: false }
    }
}

impl From<&CompressRequest> for CompressOptions {
    fn from(req: &CompressRequest) -> Self {
        Self {
            quality: req.quality.unwrap_or(DEFAULT_QUALITY).clamp(1, 100),
            max_width: req.max_width.filter(|w| *w > 0),
            to_webp: req.to_webp.unwrap_or(false),
            lossless: req.lossless.unwrap_or(false),
        }
    }
}

#[derive(Debug)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
    /// Dimensions before resizing.
    pub source_width: u32,
    pub source_height: u32,
}

/// Recompresses on the blocking pool.
pub async fn compress(input: Vec<u8>, opts: CompressOptions) -> Result<Compressed, CompressError> {
    tokio::task::spawn_blocking(move || compress_bytes(&input, opts)).await?
}

pub fn compress_bytes(input: &[u8], opts: CompressOptions) -> Result<Compressed, CompressError> {
    let reader = ImageReader::new(Cursor::new(input)).with_guessed_format()?;
    let Some(format) = reader.format() else {
        return Err(CompressError::Unsupported("not a recognised image format".into()));
    };

    let mut decoder = reader.into_decoder()?;
    // Phone cameras store rotation in EXIF instead of rotating pixels.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    let (source_width, source_height) = (img.width(), img.height());

    if let Some(max_width) = opts.max_width {
        if img.width() > max_width {
            let ratio = f64::from(max_width) / f64::from(img.width());
            let height = ((f64::from(img.height()) * ratio).round() as u32).max(1);
            img = img.resize_exact(max_width, height, FilterType::Lanczos3);
        }
    }

    let mut out = Vec::new();
    let content_type = match (opts.to_webp, format) {
        (false, ImageFormat::Jpeg) => {
            let encoder = JpegEncoder::new_with_quality(&mut out, opts.quality);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
            "image/jpeg"
        }
        (false, ImageFormat::Png) => {
            let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive);
            img.write_with_encoder(encoder)?;
            "image/png"
        }
        _ => {
            out = encode_webp(&img, opts)?;
            "image/webp"
        }
    };

    Ok(Compressed { bytes: out, content_type, width: img.width(), height: img.height(), source_width, source_height })
}

fn encode_webp(img: &DynamicImage, opts: CompressOptions) -> Result<Vec<u8>, CompressError> {
    // libwebp only takes 8-bit RGB or RGBA.
    let img = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };
    let encoder = webp::Encoder::from_image(&img).map_err(|e| CompressError::WebP(e.to_string()))?;
    let encoded = encoder
        .encode_simple(opts.lossless, f32::from(opts.quality))
        .map_err(|e| CompressError::WebP(format!("{:?}", e)))?;
    Ok(encoded.to_vec())
}
