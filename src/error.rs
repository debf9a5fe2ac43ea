//! Error kinds surfaced by the pool.
//!
//! Setup failures are fatal and returned synchronously from
//! [`TilePool::new`](crate::TilePool::new). Everything that can go wrong
//! while serving one tile is a [`TileError`] delivered through that tile's
//! callback and never affects other requests.

use crate::filter::FilterError;
use crate::style::StyleError;

/// Fatal configuration errors. No worker is left running when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("no valid array of style layers")]
    NoLayers,
    #[error("layer '{id}' has type '{kind}', which is not a vector layer type")]
    NotVectorLayer { id: String, kind: String },
    #[error("supplied layers use different sources ('{first}' and '{other}')")]
    MixedSources { first: String, other: String },
    #[error("a tile source is required")]
    MissingSource,
    #[error("no valid vector tile endpoints")]
    NoTileEndpoints,
    #[error("layer '{0}' reads a vector source but names no source-layer")]
    MissingSourceLayer(String),
    #[error("vector sources need a {0} collaborator")]
    MissingCollaborator(&'static str),
    #[error("thread count must be at least 1")]
    NoThreads,
    #[error("invalid filter on layer '{layer}': {source}")]
    Filter {
        layer: String,
        #[source]
        source: FilterError,
    },
    #[error("invalid style on layer '{layer}': {source}")]
    Style {
        layer: String,
        #[source]
        source: StyleError,
    },
    #[error("layer '{layer}' draws {expected} features, but the source data has none")]
    GeometryMismatch { layer: String, expected: &'static str },
    #[error("invalid GeoJSON source data: {0}")]
    GeoJson(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Per-tile failures, delivered as `Err` to the request callback.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TileError {
    /// Fetch or decode failure for one tile.
    #[error("transport error: {0}")]
    Transport(String),
    /// Streamed counts disagree with the header the worker announced.
    #[error("result from worker failed integrity checks for layer '{layer}'")]
    Integrity { layer: String },
    /// The worker sent a message that does not fit the stream state.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The pool was terminated while the request was outstanding.
    #[error("tile pool terminated")]
    Terminated,
}

/// Returned when work is submitted to a dispatcher that has been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dispatcher has been terminated")]
pub struct DispatchError;
