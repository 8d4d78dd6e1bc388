//! Pure Rust image backend on the `image` crate.
//!
//! Everything is statically linked into the binary; there is no process-wide
//! library state to set up, so [`NativeBackend::shutdown`] only marks the
//! engine as stopped.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, BMP, TIFF, WebP) | `image::ImageReader` with content sniffing |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Crop | `DynamicImage::crop_imm` (centered window from the plan) |
//! | Sharpen | `DynamicImage::unsharpen` (threshold 0) |
//! | Blur | `DynamicImage::blur` (Gaussian) |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` |
//! | Encode → PNG | `PngEncoder::new_with_quality` (compression level) |
//! | Encode → others | `DynamicImage::write_to` |

use super::backend::{BackendError, Dimensions, Encoded, ImageBackend};
use super::calculations::{AspectComparison, ResizeGeometry, SizeSpec, plan_resize};
use super::params::{DecodeHint, EncodeOptions};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::{Cursor, Write};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Format names whose decoders are compiled in.
const FORMAT_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpeg", ImageFormat::Jpeg),
    ("jpg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("gif", ImageFormat::Gif),
    ("bmp", ImageFormat::Bmp),
    ("tiff", ImageFormat::Tiff),
    ("tif", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_FORMATS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    FORMAT_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(name, _)| *name)
        .collect()
});

fn lookup_format(name: &str) -> Option<ImageFormat> {
    let name = name.to_ascii_lowercase();
    FORMAT_CANDIDATES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, fmt)| *fmt)
}

/// Decoded image owned by one request.
pub struct NativeImage {
    image: DynamicImage,
}

/// Backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct NativeBackend {
    comparison: AspectComparison,
    stopped: AtomicBool,
}

impl NativeBackend {
    /// Set up the engine. Construct once per process.
    pub fn new(comparison: AspectComparison) -> Self {
        tracing::debug!(
            backend = "native",
            formats = %SUPPORTED_FORMATS.join(", "),
            ?comparison,
            "image backend initialized"
        );
        Self {
            comparison,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new(AspectComparison::default())
    }
}

/// Normalize to an 8-bit buffer every encoder accepts.
fn to_8bit(image: &DynamicImage) -> DynamicImage {
    if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    }
}

fn png_compression(name: &str) -> Option<CompressionType> {
    match name.to_ascii_lowercase().as_str() {
        "default" => Some(CompressionType::Default),
        "fast" => Some(CompressionType::Fast),
        "best" => Some(CompressionType::Best),
        _ => None,
    }
}

fn encode_to_buffer(image: &DynamicImage, format: ImageFormat, options: &EncodeOptions) -> Result<Vec<u8>, BackendError> {
    let encode_err = |e: image::ImageError| {
        BackendError::EncodeFailure(format!("{} encode failed: {e}", options.format))
    };
    let mut buf = Cursor::new(Vec::new());

    if let Some(compression) = options.compression.as_deref()
        && format != ImageFormat::Png
    {
        return Err(BackendError::EncodeFailure(format!(
            "unsupported compression '{compression}' for format {}",
            options.format
        )));
    }

    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel and quality 0 is not a valid setting.
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, options.quality.value().max(1));
            rgb.write_with_encoder(encoder).map_err(encode_err)?;
        }
        ImageFormat::Png => {
            let compression = match options.compression.as_deref() {
                None => CompressionType::Default,
                Some(name) => png_compression(name).ok_or_else(|| {
                    BackendError::EncodeFailure(format!("unsupported compression '{name}' for format png"))
                })?,
            };
            let encoder = PngEncoder::new_with_quality(&mut buf, compression, PngFilter::Adaptive);
            to_8bit(image).write_with_encoder(encoder).map_err(encode_err)?;
        }
        ImageFormat::Gif => {
            DynamicImage::ImageRgba8(image.to_rgba8())
                .write_to(&mut buf, format)
                .map_err(encode_err)?;
        }
        _ => {
            to_8bit(image).write_to(&mut buf, format).map_err(encode_err)?;
        }
    }
    Ok(buf.into_inner())
}

impl ImageBackend for NativeBackend {
    type Handle = NativeImage;

    fn name(&self) -> &'static str {
        "native"
    }

    fn supported_formats(&self) -> &[&'static str] {
        &SUPPORTED_FORMATS
    }

    fn decode(&self, data: &[u8], hint: DecodeHint<'_>) -> Result<NativeImage, BackendError> {
        let hinted = if hint.format.is_empty() {
            None
        } else {
            let format = lookup_format(hint.format)
                .filter(|f| f.reading_enabled())
                .ok_or_else(|| BackendError::UnsupportedFormat(hint.format.to_string()))?;
            Some(format)
        };

        let mut reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
        if reader.format().is_none()
            && let Some(format) = hinted
        {
            reader.set_format(format);
        }
        let detected = reader.format();
        let image = reader
            .decode()
            .map_err(|e| BackendError::DecodeFailure(e.to_string()))?;

        tracing::debug!(
            format = ?detected,
            width = image.width(),
            height = image.height(),
            hint_width = hint.width,
            hint_height = hint.height,
            "decoded image"
        );
        Ok(NativeImage { image })
    }

    fn resize(
        &self,
        handle: &mut NativeImage,
        size: SizeSpec,
        geometry: ResizeGeometry,
    ) -> Result<(), BackendError> {
        let source = (handle.image.width(), handle.image.height());
        let plan = plan_resize(source, size, geometry, self.comparison)?;
        let scaled = handle
            .image
            .resize_exact(plan.scale_width, plan.scale_height, FilterType::Lanczos3);
        handle.image = match plan.crop {
            Some(c) => scaled.crop_imm(c.x, c.y, c.width, c.height),
            None => scaled,
        };
        Ok(())
    }

    fn sharpen(&self, handle: &mut NativeImage, sigma: f32) -> Result<(), BackendError> {
        handle.image = handle.image.unsharpen(sigma, 0);
        Ok(())
    }

    fn blur(&self, handle: &mut NativeImage, sigma: f32) -> Result<(), BackendError> {
        handle.image = handle.image.blur(sigma);
        Ok(())
    }

    fn encode(
        &self,
        handle: &NativeImage,
        options: &EncodeOptions,
        out: &mut dyn Write,
    ) -> Result<Encoded, BackendError> {
        let format = lookup_format(&options.format)
            .filter(|f| f.writing_enabled())
            .ok_or_else(|| BackendError::UnsupportedFormat(options.format.clone()))?;
        if let Some(tile) = options.tile.as_deref() {
            tracing::debug!(tile, format = %options.format, "tiling ignored for untiled format");
        }

        let bytes = encode_to_buffer(&handle.image, format, options)?;
        out.write_all(&bytes)?;
        out.flush()?;
        Ok(Encoded {
            size: bytes.len() as u64,
            mimetype: format.to_mime_type().to_string(),
        })
    }

    fn dimensions(&self, handle: &NativeImage) -> Dimensions {
        Dimensions {
            width: handle.image.width(),
            height: handle.image.height(),
        }
    }

    fn release(&self, handle: NativeImage) {
        drop(handle);
    }

    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::warn!(backend = "native", "image backend already shut down");
            return;
        }
        tracing::info!(backend = "native", "image backend shut down");
    }
}
