//! Byte-store collaborator.
//!
//! The router reads sources and writes artifacts through [`ByteStore`] so
//! that the transform pipeline never touches the filesystem directly.
//! [`LocalStore`] maps paths (optionally `file://` URLs) onto the local
//! filesystem; other URL schemes are rejected.

use std::io::{Read, Write};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot create {path}: {source}")]
    Create {
        path: String,
        source: std::io::Error,
    },
    #[error("unsupported storage scheme in {0}")]
    UnsupportedScheme(String),
}

/// Open and create byte streams by path.
pub trait ByteStore: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, StoreError>;
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, StoreError>;
}

/// `<scheme>://` prefix, if any.
pub fn url_scheme(path: &str) -> Option<&str> {
    let (scheme, _) = path.split_once("://")?;
    (!scheme.is_empty() && scheme.bytes().all(|b| b.is_ascii_lowercase())).then_some(scheme)
}

/// Join path segments with single slashes, keeping a leading slash or URL
/// scheme of the first segment.
pub fn join_path(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if out.is_empty() {
            out.push_str(part.trim_end_matches('/'));
            continue;
        }
        let part = part.trim_matches('/');
        if part.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(part);
    }
    out
}

/// Local filesystem store.
#[derive(Debug, Default, Clone)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }

    fn resolve(path: &str) -> Result<PathBuf, StoreError> {
        match url_scheme(path) {
            None => Ok(PathBuf::from(path)),
            Some("file") => Ok(PathBuf::from(&path["file://".len()..])),
            Some(_) => Err(StoreError::UnsupportedScheme(path.to_string())),
        }
    }
}

impl ByteStore for LocalStore {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, StoreError> {
        let local = Self::resolve(path)?;
        let file = std::fs::File::open(&local).map_err(|source| StoreError::Open {
            path: path.to_string(),
            source,
        })?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, StoreError> {
        let local = Self::resolve(path)?;
        let create_err = |source| StoreError::Create {
            path: path.to_string(),
            source,
        };
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).map_err(create_err)?;
        }
        let file = std::fs::File::create(&local).map_err(create_err)?;
        Ok(Box::new(std::io::BufWriter::new(file)))
    }
}
