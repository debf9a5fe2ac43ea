//! Parallel vector tile filtering with cooperative buffer construction.
//!
//! Tiles are fetched, decoded, style-filtered and grouped on a pool of
//! worker threads. Results stream back to the host thread, where render
//! buffers (triangulated fills, line control points, shaped labels) are
//! built in small chunks so the host never stalls.
//!
//! ```no_run
//! use std::time::Duration;
//! use tile_mixer::{Collaborators, SetupParams, TilePool, TileRequest};
//!
//! # fn main() -> anyhow::Result<()> {
//! let params: SetupParams = serde_json::from_str(&std::fs::read_to_string("setup.json")?)?;
//! let pool = TilePool::new(params, Collaborators::default())?;
//! pool.request(TileRequest::new(10, 512, 511), |result| match result {
//!     Ok(tile) => println!("{} layers", tile.layers.len()),
//!     Err(e) => eprintln!("{e}"),
//! });
//! while pool.poll_wait(Duration::from_millis(10), Duration::from_millis(4)) {}
//! # Ok(())
//! # }
//! ```

pub mod compress;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod feature;
pub mod filter;
pub mod label;
pub mod logging;
pub mod pool;
pub mod queue;
pub mod serialize;
pub mod source;
pub mod style;
pub mod worker;

pub use compress::{Buffers, CompressedLayer, GroupedFeature};
pub use config::{Collaborators, SetupParams, SourceConfig};
pub use error::{DispatchError, SetupError, TileError};
pub use feature::{Feature, Geometry, RawSourceLayer, SourceLayers};
pub use pool::{RequestHandle, Tile, TilePool, TileRequest};
pub use source::{AbortSignal, TileCoords, TileDecoder, TileFetcher};
