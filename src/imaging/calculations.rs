//! Pure calculation functions for resize geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//! Backends call [`plan_resize`] and then execute the returned plan with
//! whatever scaling and cropping primitives they have.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("invalid size format '{0}', expected <width>x<height>")]
    Malformed(String),
    #[error("both width and height are 0")]
    BothZero,
    #[error("both width and height must be set for {0} resize")]
    MissingDimension(ResizeGeometry),
    #[error("source image has no pixels")]
    EmptySource,
    #[error("planned size {width}x{height} exceeds the 65535 pixel limit per side")]
    TooLarge { width: u64, height: u64 },
}

/// Largest scaled width or height a plan may ask a backend for.
pub const MAX_DIMENSION: u32 = 65_535;

/// Requested target box, parsed from `"<W>x<H>"`.
///
/// A zero dimension means "unconstrained" and is only accepted under
/// [`ResizeGeometry::Aspect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    pub width: u32,
    pub height: u32,
}

impl FromStr for SizeSpec {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SizeError::Malformed(s.to_string());
        let (w, h) = s.trim().split_once('x').ok_or_else(malformed)?;
        let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        if !digits(w) || !digits(h) {
            return Err(malformed());
        }
        Ok(Self {
            width: w.parse().map_err(|_| malformed())?,
            height: h.parse().map_err(|_| malformed())?,
        })
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Fit policy for a resize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResizeGeometry {
    /// Fit inside the box, preserving the source aspect ratio.
    #[default]
    Aspect,
    /// Exactly the box, aspect ratio not preserved.
    Stretch,
    /// Cover the box, then center-crop to it.
    Crop,
}

impl ResizeGeometry {
    /// Check that `size` carries every dimension this geometry needs.
    pub fn validate(self, size: SizeSpec) -> Result<(), SizeError> {
        if size.width == 0 && size.height == 0 {
            return Err(SizeError::BothZero);
        }
        match self {
            Self::Aspect => Ok(()),
            Self::Stretch | Self::Crop if size.width == 0 || size.height == 0 => {
                Err(SizeError::MissingDimension(self))
            }
            Self::Stretch | Self::Crop => Ok(()),
        }
    }
}

impl fmt::Display for ResizeGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Aspect => "aspect",
            Self::Stretch => "stretch",
            Self::Crop => "crop",
        })
    }
}

/// How source and target aspect ratios are compared before picking a branch.
///
/// `Truncating` divides `w / h` in integer arithmetic on both sides, which is
/// what deployed workers have always done. Near-square images collapse to the
/// same ratio and can take the other branch than the true ratios would pick.
/// `Exact` compares cross products instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectComparison {
    #[default]
    Truncating,
    Exact,
}

impl AspectComparison {
    /// Ordering of `src_w / src_h` relative to `tgt_w / tgt_h`.
    fn compare(self, source: (u64, u64), target: (u64, u64)) -> std::cmp::Ordering {
        let (sw, sh) = source;
        let (tw, th) = target;
        match self {
            Self::Truncating => (sw / sh).cmp(&(tw / th)),
            Self::Exact => (u128::from(sw) * u128::from(th)).cmp(&(u128::from(tw) * u128::from(sh))),
        }
    }
}

/// Centered crop window applied after scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scale-then-crop instructions for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub scale_width: u32,
    pub scale_height: u32,
    pub crop: Option<CropWindow>,
}

impl ResizePlan {
    /// Final output dimensions once the plan has been executed.
    pub fn output(&self) -> (u32, u32) {
        match self.crop {
            Some(c) => (c.width, c.height),
            None => (self.scale_width, self.scale_height),
        }
    }
}

/// Compute the scale dimensions (and crop window, for Crop) for a resize.
///
/// # Examples
/// ```
/// # use mediaserver_image::imaging::{plan_resize, AspectComparison, ResizeGeometry, SizeSpec};
/// let size: SizeSpec = "100x0".parse().unwrap();
/// let plan = plan_resize((200, 100), size, ResizeGeometry::Aspect, AspectComparison::Truncating).unwrap();
/// assert_eq!(plan.output(), (100, 50));
/// ```
pub fn plan_resize(
    source: (u32, u32),
    size: SizeSpec,
    geometry: ResizeGeometry,
    comparison: AspectComparison,
) -> Result<ResizePlan, SizeError> {
    geometry.validate(size)?;
    let (src_w, src_h) = (u64::from(source.0), u64::from(source.1));
    if src_w == 0 || src_h == 0 {
        return Err(SizeError::EmptySource);
    }

    let plan = match geometry {
        ResizeGeometry::Stretch => {
            check_bounds(u64::from(size.width), u64::from(size.height))?;
            ResizePlan {
                scale_width: size.width,
                scale_height: size.height,
                crop: None,
            }
        }
        ResizeGeometry::Aspect => {
            let (tgt_w, tgt_h) = (u64::from(size.width), u64::from(size.height));
            // A single constrained side pins that side; only a full box needs
            // the ratio comparison.
            let (w, h) = match (tgt_w, tgt_h) {
                (w, 0) => (w, src_h * w / src_w),
                (0, h) => (src_w * h / src_h, h),
                (w, h) if comparison.compare((src_w, src_h), (w, h)).is_gt() => (w, src_h * w / src_w),
                (_, h) => (src_w * h / src_h, h),
            };
            check_bounds(w, h)?;
            ResizePlan {
                scale_width: clamp_dimension(w),
                scale_height: clamp_dimension(h),
                crop: None,
            }
        }
        ResizeGeometry::Crop => {
            let (tgt_w, tgt_h) = (u64::from(size.width), u64::from(size.height));
            // Opposite branch of Aspect: the scaled image covers the box.
            let (w, h) = if comparison.compare((src_w, src_h), (tgt_w, tgt_h)).is_lt() {
                (tgt_w, src_h * tgt_w / src_w)
            } else {
                (src_w * tgt_h / src_h, tgt_h)
            };
            check_bounds(w, h)?;
            let (scale_width, scale_height) = (clamp_dimension(w), clamp_dimension(h));
            let width = size.width.min(scale_width);
            let height = size.height.min(scale_height);
            ResizePlan {
                scale_width,
                scale_height,
                crop: Some(CropWindow {
                    x: (scale_width - width) / 2,
                    y: (scale_height - height) / 2,
                    width,
                    height,
                }),
            }
        }
    };
    Ok(plan)
}

fn check_bounds(width: u64, height: u64) -> Result<(), SizeError> {
    let limit = u64::from(MAX_DIMENSION);
    if width > limit || height > limit {
        return Err(SizeError::TooLarge { width, height });
    }
    Ok(())
}

fn clamp_dimension(d: u64) -> u32 {
    u32::try_from(d).unwrap_or(u32::MAX).max(1)
}
