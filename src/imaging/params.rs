//! Parameter types for backend operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the [action router](crate::action), which parses them
//! from request parameters, and the [`backend`](super::backend), which does
//! the pixel work.
//!
//! ## Types
//!
//! - [`Quality`]: Encoding quality (0–100, default 100). Rejected, not clamped, when out of range.
//! - [`Sigma`]: Gaussian standard deviation for sharpen and blur.
//! - [`DecodeHint`]: Advisory dimensions and expected format for a decode.
//! - [`EncodeOptions`]: Output format, compression, quality and tiling for an encode.

use std::fmt;
use std::str::FromStr;

/// Encoding quality setting (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    /// Returns `None` when `value` is outside 0-100.
    pub fn new(value: u32) -> Option<Self> {
        u8::try_from(value).ok().filter(|v| *v <= 100).map(Self)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(100)
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| format!("quality '{s}' must be an integer in 0-100"))
    }
}

/// Standard deviation for sharpen/blur kernels. Always finite and positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sigma(f32);

impl Sigma {
    pub fn value(self) -> f32 {
        self.0
    }
}

impl FromStr for Sigma {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<f32>() {
            Ok(v) if v.is_finite() && v > 0.0 => Ok(Self(v)),
            _ => Err(format!("invalid sigma '{s}'")),
        }
    }
}

impl fmt::Display for Sigma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hints passed to a decode. Width and height are advisory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeHint<'a> {
    pub width: u32,
    pub height: u32,
    /// Expected format (`"jpeg"`, `"png"`, …). Empty means sniff the content.
    pub format: &'a str,
}

/// Everything an encode needs besides the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    pub format: String,
    pub compression: Option<String>,
    pub quality: Quality,
    pub tile: Option<String>,
}

impl EncodeOptions {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            compression: None,
            quality: Quality::default(),
            tile: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_rejects_out_of_range() {
        assert_eq!(Quality::new(0).map(Quality::value), Some(0));
        assert_eq!(Quality::new(100).map(Quality::value), Some(100));
        assert_eq!(Quality::new(101), None);
        assert!("101".parse::<Quality>().is_err());
        assert!("-3".parse::<Quality>().is_err());
        assert!("high".parse::<Quality>().is_err());
    }

    #[test]
    fn quality_default_is_100() {
        assert_eq!(Quality::default().value(), 100);
        assert_eq!(EncodeOptions::new("png").quality.value(), 100);
    }

    #[test]
    fn sigma_must_be_positive() {
        assert_eq!("1.5".parse::<Sigma>().unwrap().value(), 1.5);
        assert!("0".parse::<Sigma>().is_err());
        assert!("-1".parse::<Sigma>().is_err());
        assert!("NaN".parse::<Sigma>().is_err());
        assert!("soft".parse::<Sigma>().is_err());
    }
}
