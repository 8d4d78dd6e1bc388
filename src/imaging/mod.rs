//! Image processing behind a single backend contract.
//!
//! | Operation | Where |
//! |---|---|
//! | **Geometry** | [`plan_resize`] (pure math, Aspect / Stretch / Crop) |
//! | **Decode → transform → encode** | [`ImageBackend`] implementations |
//! | **Engine** | [`NativeBackend`] (`image` crate, Lanczos3) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for resize geometry (unit testable)
//! - **Parameters**: Data structures describing decode and encode settings
//! - **Backend**: [`ImageBackend`] trait, [`ImageGuard`], [`ShutdownGuard`] and the error type
//! - **Native backend**: the production engine

pub mod backend;
mod calculations;
pub mod native_backend;
mod params;

pub use backend::{BackendError, Dimensions, Encoded, ImageBackend, ImageGuard, ShutdownGuard};
pub use calculations::{
    AspectComparison, CropWindow, ResizeGeometry, ResizePlan, SizeError, SizeSpec, plan_resize,
};
pub use native_backend::NativeBackend;
pub use params::{DecodeHint, EncodeOptions, Quality, Sigma};
