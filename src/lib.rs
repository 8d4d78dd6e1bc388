//! # Media Server Image Worker
//!
//! An image worker for a distributed media server. It registers with one or
//! more dispatchers, answers RPCs over HTTP, and executes image actions
//! (`resize`, `convert`) against assets whose canonical renditions are known
//! to the media server's database.
//!
//! # Request Flow
//!
//! ```text
//! POST /action ─→ ActionRouter ─→ database: canonical rendition of the item
//!                      │
//!                      ├─→ ByteStore::open(source) ─→ decode ─→ transform ─→ encode
//!                      │
//!                      └─→ ByteStore::create(filebase/datadir/<cache name>) ─→ CacheRecord
//! ```
//!
//! Every artifact name is derived from the full request fingerprint (see
//! [`cache`]), so repeating a request overwrites the same file.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Backend contract, resize geometry and the `image`-crate backend |
//! | [`action`] | Parameter parsing and the resize/convert pipelines |
//! | [`cache`] | Deterministic artifact names |
//! | [`registration`] | Per-dispatcher register/renew/deregister loops |
//! | [`server`] | HTTP routes for `Ping`, `GetParams` and `Action` |
//! | [`client`] | Dispatcher and database clients |
//! | [`storage`] | Byte store for sources and artifacts |
//! | [`types`] | Wire types shared with the media server |
//! | [`config`] | TOML configuration loading and validation |
//! | [`logging`] | `tracing` subscriber setup |
//!
//! # Design Decisions
//!
//! ## One Backend, Chosen at Startup
//!
//! The router is generic over its [`imaging::ImageBackend`] rather than
//! holding a trait object. Decoded images are a backend-specific handle type
//! that is moved through the pipeline and released exactly once by
//! [`imaging::ImageGuard`], on success and on every error path.
//!
//! ## Typed Parameters
//!
//! Wire parameters are a flat name → value map. They are validated once into
//! `ResizeParams`/`ConvertParams` before any I/O happens, and their canonical
//! string (sorted, `/`-joined) feeds the cache name so parameter order never
//! matters.
//!
//! ## Blocking Work Off the Runtime
//!
//! Decoding, resampling and encoding run on tokio's blocking pool behind a
//! semaphore sized by `concurrency`. Registration loops and the HTTP server
//! share only a cancellation token; the backend is shut down after both have
//! finished.

pub mod action;
pub mod cache;
pub mod client;
pub mod config;
pub mod imaging;
pub mod logging;
pub mod registration;
pub mod server;
pub mod storage;
pub mod types;
