//! Action router: validates and executes named image actions.
//!
//! Two pipelines are built in:
//!
//! ```text
//! resize   canonical rendition → decode → resize → [blur] → [sharpen] → encode → store
//! convert  canonical rendition → decode → encode → store
//! ```
//!
//! Each execution resolves the item's canonical rendition through the
//! database (`action = "item"`), reads its bytes through the
//! [`ByteStore`](crate::storage::ByteStore), transforms them with the single
//! active [`ImageBackend`] and writes the artifact under the name produced by
//! [`create_cache_name`]. Re-running an identical request overwrites the same
//! artifact.
//!
//! Pixel work runs on tokio's blocking pool. A request deadline stops the
//! caller from waiting, but the `image` engine has no cancellation points, so
//! an in-flight transform always runs to completion and keeps its
//! concurrency slot until it does.

pub mod params;

use crate::cache::create_cache_name;
use crate::client::CacheLookup;
use crate::imaging::{
    BackendError, DecodeHint, Dimensions, EncodeOptions, Encoded, ImageBackend, ImageGuard,
};
use crate::storage::{ByteStore, join_path, url_scheme};
use crate::types::{ActionRequest, CacheRecord};
use params::{ActionParams, CONVERT_PARAMS, ConvertParams, ParamsError, RESIZE_PARAMS, ResizeParams};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Controller type announced to the dispatcher.
pub const ACTION_TYPE: &str = "image";

/// Database action naming an item's canonical full-resolution rendition.
pub const CANONICAL_ACTION: &str = "item";

/// Failure of one action, classified by RPC status.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unimplemented(String),
    #[error("{0}")]
    DeadlineExceeded(String),
    #[error("{0}")]
    Internal(String),
}

impl ActionError {
    /// Status code name as reported to RPC callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::NotFound(_) => "NotFound",
            Self::Unimplemented(_) => "Unimplemented",
            Self::DeadlineExceeded(_) => "DeadlineExceeded",
            Self::Internal(_) => "Internal",
        }
    }

    /// Classify a backend failure on `path`.
    fn backend(path: &str, stage: &str, err: BackendError) -> Self {
        let message = format!("cannot {stage} {path}: {err}");
        match err {
            BackendError::InvalidSize(_) => Self::InvalidArgument(message),
            BackendError::NotSupported(_) => Self::Unimplemented(message),
            _ => Self::Internal(message),
        }
    }
}

impl From<ParamsError> for ActionError {
    fn from(err: ParamsError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

/// A parsed, validated action.
#[derive(Debug, Clone)]
enum Job {
    Resize(ResizeParams),
    Convert(ConvertParams),
}

impl Job {
    fn parse(action: &str, params: &ActionParams) -> Result<Self, ActionError> {
        match action {
            "resize" => Ok(Self::Resize(ResizeParams::parse(params)?)),
            "convert" => Ok(Self::Convert(ConvertParams::parse(params)?)),
            other => Err(ActionError::NotFound(format!(
                "action {ACTION_TYPE}::{other} not found"
            ))),
        }
    }

    fn encode_options(&self) -> &EncodeOptions {
        match self {
            Self::Resize(p) => &p.encode,
            Self::Convert(p) => &p.encode,
        }
    }
}

/// Where the canonical rendition lives and what it claims to be.
#[derive(Debug, Clone)]
struct Source {
    path: String,
    width: u32,
    height: u32,
    format: String,
}

/// Executes actions against one backend, store and database.
pub struct ActionRouter<B: ImageBackend> {
    backend: Arc<B>,
    store: Arc<dyn ByteStore>,
    database: Arc<dyn CacheLookup>,
    limiter: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl<B: ImageBackend + 'static> ActionRouter<B> {
    pub fn new(backend: Arc<B>, store: Arc<dyn ByteStore>, database: Arc<dyn CacheLookup>) -> Self {
        Self {
            backend,
            store,
            database,
            limiter: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            timeout: None,
        }
    }

    /// Cap in-flight actions and optionally bound how long a caller waits.
    pub fn with_limits(mut self, concurrency: usize, timeout: Option<Duration>) -> Self {
        self.limiter = Arc::new(Semaphore::new(concurrency.max(1)));
        self.timeout = timeout;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Capability descriptor announced to dispatchers.
    pub fn capabilities() -> BTreeMap<String, Vec<String>> {
        [("resize", RESIZE_PARAMS), ("convert", CONVERT_PARAMS)]
            .into_iter()
            .map(|(action, names)| {
                (
                    action.to_string(),
                    names.iter().map(|n| n.to_string()).collect(),
                )
            })
            .collect()
    }

    /// Recognised parameter names of `kind::action`.
    pub fn get_params(kind: &str, action: &str) -> Result<&'static [&'static str], ActionError> {
        let params = match (kind, action) {
            (ACTION_TYPE, "resize") => Some(RESIZE_PARAMS),
            (ACTION_TYPE, "convert") => Some(CONVERT_PARAMS),
            _ => None,
        };
        params.ok_or_else(|| ActionError::NotFound(format!("action {kind}::{action} not found")))
    }

    /// Run one action and describe the artifact it produced.
    pub async fn action(&self, request: ActionRequest) -> Result<CacheRecord, ActionError> {
        match self.timeout {
            None => self.execute(request).await,
            Some(limit) => {
                let what = format!("{} action", request.action);
                tokio::time::timeout(limit, self.execute(request))
                    .await
                    .map_err(|_| {
                        ActionError::DeadlineExceeded(format!(
                            "{what} did not finish within {}s",
                            limit.as_secs_f32()
                        ))
                    })?
            }
        }
    }

    async fn execute(&self, request: ActionRequest) -> Result<CacheRecord, ActionError> {
        let item = request
            .item
            .ok_or_else(|| ActionError::InvalidArgument("no item defined".into()))?;
        let storage = request
            .storage
            .ok_or_else(|| ActionError::InvalidArgument("no storage defined".into()))?;
        if request.action.is_empty() {
            return Err(ActionError::InvalidArgument("no action defined".into()));
        }
        let action = request.action;
        let params = ActionParams::from_wire(request.params)?;
        let job = Job::parse(&action, &params)?;
        let canonical = params.canonical();
        let id = item.identifier;

        tracing::info!(
            item = %id,
            action = %action,
            params = %canonical,
            "executing action"
        );

        let permit = Arc::clone(&self.limiter)
            .acquire_owned()
            .await
            .map_err(|_| ActionError::Internal("worker is shutting down".into()))?;

        let rendition = self
            .database
            .get_cache(&id, CANONICAL_ACTION)
            .await
            .map_err(|e| ActionError::Internal(format!("cannot look up {id}: {e}")))?
            .ok_or_else(|| ActionError::NotFound(format!("no canonical rendition for {id}")))?;

        let source_path = if url_scheme(&rendition.path).is_some() {
            rendition.path.clone()
        } else {
            join_path(&[&storage.filebase, &rendition.path])
        };
        let source_format = match rendition.format() {
            "" => item
                .mimetype
                .as_deref()
                .and_then(|m| m.split_once('/'))
                .map(|(_, sub)| sub.to_string())
                .unwrap_or_default(),
            format => format.to_string(),
        };
        let source = Source {
            path: source_path,
            width: u32::try_from(rendition.width).unwrap_or(u32::MAX),
            height: u32::try_from(rendition.height).unwrap_or(u32::MAX),
            format: source_format.to_ascii_lowercase(),
        };

        let format = job.encode_options().format.clone();
        let cache_name = create_cache_name(&id.collection, &id.signature, &action, &canonical, &format);
        let target = join_path(&[&storage.filebase, &storage.datadir, &cache_name]);

        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let target_path = target.clone();
        let (dims, encoded) = tokio::task::spawn_blocking(move || {
            run_pipeline(backend.as_ref(), store.as_ref(), &job, &source, &target_path, permit)
        })
        .await
        .map_err(|e| ActionError::Internal(format!("action task for {target} failed: {e}")))??;

        tracing::info!(
            item = %id,
            action = %action,
            target = %target,
            width = dims.width,
            height = dims.height,
            size = encoded.size,
            "action finished"
        );

        Ok(CacheRecord {
            identifier: id,
            action,
            params: canonical,
            width: u64::from(dims.width),
            height: u64::from(dims.height),
            duration: 0,
            size: encoded.size,
            mimetype: encoded.mimetype,
            path: join_path(&[&storage.datadir, &cache_name]),
            storage: storage.name,
        })
    }
}

/// Decode, transform and encode on the calling (blocking) thread.
///
/// The permit is held until the pixels are written.
fn run_pipeline<B: ImageBackend + ?Sized>(
    backend: &B,
    store: &dyn ByteStore,
    job: &Job,
    source: &Source,
    target: &str,
    _permit: OwnedSemaphorePermit,
) -> Result<(Dimensions, Encoded), ActionError> {
    let mut data = Vec::new();
    store
        .open(&source.path)
        .map_err(|e| ActionError::NotFound(e.to_string()))?
        .read_to_end(&mut data)
        .map_err(|e| ActionError::Internal(format!("cannot read {}: {e}", source.path)))?;

    let hint = DecodeHint {
        width: source.width,
        height: source.height,
        format: &source.format,
    };
    let mut image = ImageGuard::decode(backend, &data, hint)
        .map_err(|e| ActionError::backend(&source.path, "decode", e))?;
    drop(data);

    if let Job::Resize(p) = job {
        backend
            .resize(image.get_mut(), p.size, p.geometry)
            .map_err(|e| ActionError::backend(&source.path, "resize", e))?;
        if let Some(sigma) = p.blur {
            backend
                .blur(image.get_mut(), sigma.value())
                .map_err(|e| ActionError::backend(&source.path, "blur", e))?;
        }
        if let Some(sigma) = p.sharpen {
            backend
                .sharpen(image.get_mut(), sigma.value())
                .map_err(|e| ActionError::backend(&source.path, "sharpen", e))?;
        }
    }

    // Nothing reaches the cache path unless encoding succeeded.
    let mut bytes = Vec::new();
    let encoded = backend
        .encode(image.get(), job.encode_options(), &mut bytes)
        .map_err(|e| ActionError::backend(target, "encode", e))?;
    let write_err = |e: std::io::Error| ActionError::Internal(format!("cannot write {target}: {e}"));
    let mut sink = store
        .create(target)
        .map_err(|e| ActionError::Internal(e.to_string()))?;
    sink.write_all(&bytes).map_err(write_err)?;
    sink.flush().map_err(write_err)?;

    Ok((backend.dimensions(image.get()), encoded))
}
