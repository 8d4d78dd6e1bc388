//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the capability contract every engine
//! must honour: decode, resize, sharpen, blur, encode, dimensions, release
//! and a process-wide shutdown. Exactly one implementation is active per
//! deployment; the router is generic over it rather than holding a trait
//! object.
//!
//! The production implementation is
//! [`NativeBackend`](super::native_backend::NativeBackend), built on the
//! `image` crate.
//!
//! ## Handles
//!
//! `decode` hands out an owned [`ImageBackend::Handle`]; `release` consumes
//! it. Handles belong to a single request and are never shared or pooled,
//! because engines keep per-image state that is not safe to alias. Callers
//! should hold handles through an [`ImageGuard`], which releases exactly once
//! on every exit path.

use super::calculations::{ResizeGeometry, SizeError, SizeSpec};
use super::params::{DecodeHint, EncodeOptions};
use std::io::Write;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported format '{0}'")]
    UnsupportedFormat(String),
    #[error("cannot decode image: {0}")]
    DecodeFailure(String),
    #[error("invalid size: {0}")]
    InvalidSize(#[from] SizeError),
    #[error("{0} is not supported by this backend")]
    NotSupported(&'static str),
    #[error("cannot encode image: {0}")]
    EncodeFailure(String),
}

/// Pixel dimensions of a decoded image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Result of an encode: bytes written and the mimetype of the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub size: u64,
    pub mimetype: String,
}

/// Capability contract for image engines.
///
/// `sharpen` and `blur` are optional capabilities: the default
/// implementations fail with [`BackendError::NotSupported`].
pub trait ImageBackend: Send + Sync {
    /// Request-scoped decoded image.
    type Handle: Send;

    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Lower-case format names accepted as decode hints.
    fn supported_formats(&self) -> &[&'static str];

    fn decode(&self, data: &[u8], hint: DecodeHint<'_>) -> Result<Self::Handle, BackendError>;

    fn resize(
        &self,
        image: &mut Self::Handle,
        size: SizeSpec,
        geometry: ResizeGeometry,
    ) -> Result<(), BackendError>;

    fn sharpen(&self, _image: &mut Self::Handle, _sigma: f32) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("sharpen"))
    }

    fn blur(&self, _image: &mut Self::Handle, _sigma: f32) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("blur"))
    }

    fn encode(
        &self,
        image: &Self::Handle,
        options: &EncodeOptions,
        out: &mut dyn Write,
    ) -> Result<Encoded, BackendError>;

    fn dimensions(&self, image: &Self::Handle) -> Dimensions;

    fn release(&self, image: Self::Handle);

    /// Process-wide teardown. Called once, after the last request.
    fn shutdown(&self);
}

/// Owns a decoded handle and releases it when dropped.
pub struct ImageGuard<'a, B: ImageBackend + ?Sized> {
    backend: &'a B,
    handle: ManuallyDrop<B::Handle>,
}

impl<'a, B: ImageBackend + ?Sized> ImageGuard<'a, B> {
    /// Decode `data` and wrap the resulting handle.
    pub fn decode(backend: &'a B, data: &[u8], hint: DecodeHint<'_>) -> Result<Self, BackendError> {
        let handle = backend.decode(data, hint)?;
        Ok(Self {
            backend,
            handle: ManuallyDrop::new(handle),
        })
    }

    pub fn get(&self) -> &B::Handle {
        &self.handle
    }

    pub fn get_mut(&mut self) -> &mut B::Handle {
        &mut self.handle
    }
}

impl<B: ImageBackend + ?Sized> Drop for ImageGuard<'_, B> {
    fn drop(&mut self) {
        // SAFETY: the handle is taken only here and never touched again.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        self.backend.release(handle);
    }
}

/// Calls [`ImageBackend::shutdown`] once, when dropped.
///
/// Hold it for the lifetime of the process so early returns tear down too.
pub struct ShutdownGuard<B: ImageBackend + ?Sized> {
    backend: Arc<B>,
}

impl<B: ImageBackend + ?Sized> ShutdownGuard<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

impl<B: ImageBackend + ?Sized> Drop for ShutdownGuard<B> {
    fn drop(&mut self) {
        self.backend.shutdown();
    }
}
