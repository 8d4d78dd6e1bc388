//! Action parameters: the wire bag and the typed per-action requests.
//!
//! [`ActionParams`] keeps the parameters exactly as received (name → value,
//! empty value = presence flag) in a sorted map, so its canonical string is
//! independent of insertion order. That string feeds the cache addressor.
//! [`ResizeParams`] and [`ConvertParams`] are parsed from it once, up front,
//! and carry validated values to the pipeline.

use crate::imaging::{EncodeOptions, Quality, ResizeGeometry, Sigma, SizeSpec};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Separator between entries of the canonical string.
const ENTRY_SEPARATOR: char = '/';

/// Parameters whose values are case-insensitive.
const CASE_FOLDED: &[&str] = &["format", "compress"];

/// Output format when the caller does not ask for one.
pub const DEFAULT_FORMAT: &str = "jpeg";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("invalid parameter name '{0}'")]
    InvalidName(String),
    #[error("invalid value for parameter '{name}': '{value}'")]
    InvalidValue { name: String, value: String },
    #[error("no {0} defined")]
    Missing(&'static str),
    #[error("unknown parameter '{name}' for action {action}")]
    Unknown { action: &'static str, name: String },
    #[error("parameters '{0}' and '{1}' are mutually exclusive")]
    Conflict(&'static str, &'static str),
    #[error("parameter '{name}': {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Parameter bag with an order-independent canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionParams {
    entries: BTreeMap<String, String>,
}

impl ActionParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from wire pairs. Later duplicates replace earlier ones.
    pub fn from_wire<I, K, V>(pairs: I) -> Result<Self, ParamsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (name, value) in pairs {
            params.insert(name, value)?;
        }
        Ok(params)
    }

    /// Insert a valued entry. An empty value makes it a flag.
    ///
    /// `format` and `compress` values are stored lowercase.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), ParamsError> {
        let name = name.into();
        let mut value = value.into();
        if CASE_FOLDED.contains(&name.as_str()) {
            value.make_ascii_lowercase();
        }
        if name.is_empty() || name.contains(['=', ENTRY_SEPARATOR]) {
            return Err(ParamsError::InvalidName(name));
        }
        if value.contains(ENTRY_SEPARATOR) {
            return Err(ParamsError::InvalidValue { name, value });
        }
        self.entries.insert(name, value);
        Ok(())
    }

    pub fn set_flag(&mut self, name: impl Into<String>) -> Result<(), ParamsError> {
        self.insert(name, "")
    }

    /// Value of `name`; `None` when absent or a bare flag.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted `name=value` / `name` entries joined by `/`.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Inverse of [`canonical`](Self::canonical).
    pub fn parse_canonical(s: &str) -> Result<Self, ParamsError> {
        let mut params = Self::new();
        for entry in s.split(ENTRY_SEPARATOR).filter(|e| !e.is_empty()) {
            match entry.split_once('=') {
                Some((name, value)) => params.insert(name, value)?,
                None => params.set_flag(entry)?,
            }
        }
        Ok(params)
    }

    fn reject_unknown(&self, action: &'static str, allowed: &[&str]) -> Result<(), ParamsError> {
        match self.names().find(|n| !allowed.contains(n)) {
            Some(name) => Err(ParamsError::Unknown {
                action,
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn parse_value<T: std::str::FromStr>(&self, name: &'static str) -> Result<Option<T>, ParamsError>
    where
        T::Err: fmt::Display,
    {
        match self.entries.get(name) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|e: T::Err| ParamsError::Invalid {
                name,
                reason: e.to_string(),
            }),
        }
    }

    /// Format, compression, quality and tile, shared by every action.
    fn encode_options(&self) -> Result<EncodeOptions, ParamsError> {
        let mut options = EncodeOptions::new(self.get("format").unwrap_or(DEFAULT_FORMAT));
        if let Some(quality) = self.parse_value::<Quality>("quality")? {
            options.quality = quality;
        }
        options.compression = self.get("compress").map(str::to_string);
        options.tile = self.get("tile").map(str::to_string);
        Ok(options)
    }
}

impl fmt::Display for ActionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "{ENTRY_SEPARATOR}")?;
            }
            if value.is_empty() {
                f.write_str(name)?;
            } else {
                write!(f, "{name}={value}")?;
            }
        }
        Ok(())
    }
}

/// Recognised parameters of `resize`, in announcement order.
pub const RESIZE_PARAMS: &[&str] = &[
    "size", "format", "quality", "compress", "tile", "stretch", "crop", "sharpen", "blur",
];

/// Recognised parameters of `convert`, in announcement order.
pub const CONVERT_PARAMS: &[&str] = &["format", "tile", "compress", "quality"];

/// Validated `resize` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub size: SizeSpec,
    pub geometry: ResizeGeometry,
    pub sharpen: Option<Sigma>,
    pub blur: Option<Sigma>,
    pub encode: EncodeOptions,
}

impl ResizeParams {
    pub fn parse(params: &ActionParams) -> Result<Self, ParamsError> {
        params.reject_unknown("resize", RESIZE_PARAMS)?;
        let size = params
            .parse_value::<SizeSpec>("size")?
            .ok_or(ParamsError::Missing("size"))?;
        let geometry = match (params.has("stretch"), params.has("crop")) {
            (true, true) => return Err(ParamsError::Conflict("stretch", "crop")),
            (true, false) => ResizeGeometry::Stretch,
            (false, true) => ResizeGeometry::Crop,
            (false, false) => ResizeGeometry::Aspect,
        };
        geometry.validate(size).map_err(|e| ParamsError::Invalid {
            name: "size",
            reason: e.to_string(),
        })?;
        Ok(Self {
            size,
            geometry,
            sharpen: params.parse_value("sharpen")?,
            blur: params.parse_value("blur")?,
            encode: params.encode_options()?,
        })
    }
}

/// Validated `convert` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertParams {
    pub encode: EncodeOptions,
}

impl ConvertParams {
    pub fn parse(params: &ActionParams) -> Result<Self, ParamsError> {
        params.reject_unknown("convert", CONVERT_PARAMS)?;
        Ok(Self {
            encode: params.encode_options()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> ActionParams {
        ActionParams::from_wire(pairs.iter().copied()).unwrap()
    }

    // =========================================================================
    // Canonical form
    // =========================================================================

    #[test]
    fn canonical_is_order_independent() {
        let a = bag(&[("size", "100x100"), ("crop", "")]);
        let b = bag(&[("crop", ""), ("size", "100x100")]);
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "crop/size=100x100");
    }

    #[test]
    fn canonical_is_order_independent_for_every_permutation() {
        let entries = [("size", "10x20"), ("format", "png"), ("stretch", ""), ("quality", "80")];
        let expected = bag(&entries).canonical();
        // All 24 orderings of four entries.
        let mut order = [0usize, 1, 2, 3];
        let mut seen = 0;
        loop {
            let permuted: Vec<_> = order.iter().map(|&i| entries[i]).collect();
            assert_eq!(bag(&permuted).canonical(), expected, "order {order:?}");
            seen += 1;
            // Next lexicographic permutation.
            let Some(i) = (0..3).rev().find(|&i| order[i] < order[i + 1]) else {
                break;
            };
            let j = (i + 1..4).rev().find(|&j| order[j] > order[i]).unwrap();
            order.swap(i, j);
            order[i + 1..].reverse();
        }
        assert_eq!(seen, 24);
    }

    #[test]
    fn canonical_roundtrip() {
        let params = bag(&[("size", "100x0"), ("format", "png"), ("crop", ""), ("blur", "1.5")]);
        let parsed = ActionParams::parse_canonical(&params.canonical()).unwrap();
        assert_eq!(parsed, params);
        assert_eq!(ActionParams::parse_canonical("").unwrap(), ActionParams::new());
    }

    #[test]
    fn format_and_compress_are_case_insensitive() {
        let upper = bag(&[("format", "PNG"), ("compress", "Best"), ("size", "10x10")]);
        let lower = bag(&[("format", "png"), ("compress", "best"), ("size", "10x10")]);
        assert_eq!(upper.canonical(), lower.canonical());
        assert_eq!(upper.get("format"), Some("png"));
        assert_eq!(ResizeParams::parse(&upper).unwrap().encode.format, "png");
    }

    #[test]
    fn flags_and_values() {
        let params = bag(&[("crop", ""), ("size", "1x1")]);
        assert!(params.has("crop"));
        assert_eq!(params.get("crop"), None);
        assert_eq!(params.get("size"), Some("1x1"));
        assert!(!params.has("stretch"));
    }

    #[test]
    fn rejects_separator_characters() {
        let mut params = ActionParams::new();
        assert!(matches!(params.insert("", "x"), Err(ParamsError::InvalidName(_))));
        assert!(matches!(params.insert("a=b", "x"), Err(ParamsError::InvalidName(_))));
        assert!(matches!(params.insert("a/b", "x"), Err(ParamsError::InvalidName(_))));
        assert!(matches!(
            params.insert("tile", "a/b"),
            Err(ParamsError::InvalidValue { .. })
        ));
        // '=' inside a value survives the round trip.
        params.insert("note", "a=b").unwrap();
        assert_eq!(
            ActionParams::parse_canonical(&params.canonical()).unwrap(),
            params
        );
    }

    // =========================================================================
    // resize
    // =========================================================================

    #[test]
    fn resize_defaults() {
        let req = ResizeParams::parse(&bag(&[("size", "100x100")])).unwrap();
        assert_eq!(req.geometry, ResizeGeometry::Aspect);
        assert_eq!(req.encode.format, "jpeg");
        assert_eq!(req.encode.quality.value(), 100);
        assert_eq!(req.sharpen, None);
        assert_eq!(req.encode.compression, None);
    }

    #[test]
    fn resize_full() {
        let req = ResizeParams::parse(&bag(&[
            ("size", "50x50"),
            ("crop", ""),
            ("format", "PNG"),
            ("quality", "75"),
            ("compress", "best"),
            ("sharpen", "0.5"),
            ("blur", "2"),
        ]))
        .unwrap();
        assert_eq!(req.geometry, ResizeGeometry::Crop);
        assert_eq!(req.encode.format, "png");
        assert_eq!(req.encode.quality.value(), 75);
        assert_eq!(req.encode.compression.as_deref(), Some("best"));
        assert_eq!(req.sharpen.map(Sigma::value), Some(0.5));
        assert_eq!(req.blur.map(Sigma::value), Some(2.0));
    }

    #[test]
    fn resize_requires_size() {
        assert_eq!(
            ResizeParams::parse(&ActionParams::new()),
            Err(ParamsError::Missing("size"))
        );
        // A bare `size` flag carries no value either.
        assert!(ResizeParams::parse(&bag(&[("size", "")])).is_err());
    }

    #[test]
    fn resize_rejects_bad_values() {
        for pairs in [
            vec![("size", "big")],
            vec![("size", "0x0")],
            vec![("size", "0x10"), ("stretch", "")],
            vec![("size", "10x0"), ("crop", "")],
            vec![("size", "10x10"), ("quality", "101")],
            vec![("size", "10x10"), ("sharpen", "much")],
        ] {
            let err = ResizeParams::parse(&bag(&pairs)).unwrap_err();
            assert!(matches!(err, ParamsError::Invalid { .. }), "{pairs:?}: {err}");
        }
    }

    #[test]
    fn resize_fit_flags_are_exclusive() {
        assert_eq!(
            ResizeParams::parse(&bag(&[("size", "10x10"), ("stretch", ""), ("crop", "")])),
            Err(ParamsError::Conflict("stretch", "crop"))
        );
    }

    #[test]
    fn resize_rejects_unknown_parameter() {
        let err = ResizeParams::parse(&bag(&[("size", "10x10"), ("rotate", "90")])).unwrap_err();
        assert_eq!(err.to_string(), "unknown parameter 'rotate' for action resize");
    }

    // =========================================================================
    // convert
    // =========================================================================

    #[test]
    fn convert_accepts_only_encode_parameters() {
        let req = ConvertParams::parse(&bag(&[("format", "webp"), ("quality", "0")])).unwrap();
        assert_eq!(req.encode.format, "webp");
        assert_eq!(req.encode.quality.value(), 0);
        assert!(matches!(
            ConvertParams::parse(&bag(&[("size", "10x10")])),
            Err(ParamsError::Unknown { action: "convert", .. })
        ));
    }
}
