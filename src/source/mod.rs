//! Tile sources: where raw source layers come from.
//!
//! A vector source fetches and decodes tiles through the [`TileFetcher`]
//! and [`TileDecoder`] collaborators; a GeoJSON source slices an in-memory
//! collection.

pub mod geojson;
pub mod projection;
pub mod spatial;

pub use self::geojson::{GeoJsonSource, GEOJSON_SOURCE_LAYER};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{SetupError, TileError};
use crate::feature::SourceLayers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoords {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for TileCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Cooperative cancellation flag shared between a task's owner and the
/// worker running it
#[derive(Clone, Debug, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Raw network fetch. Implementations should give up early once `abort`
/// is set.
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, url: &str, abort: &AbortSignal) -> Result<Vec<u8>, TileError>;
}

/// Binary vector tile decoding
pub trait TileDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], coords: &TileCoords) -> Result<SourceLayers, TileError>;
}

/// Anything that can produce the raw source layers of a tile
pub trait TileSource: Send + Sync {
    fn load(&self, coords: &TileCoords, abort: &AbortSignal) -> Result<SourceLayers, TileError>;
}

/// Tile URL templates with `{z}`, `{x}`, `{y}` tokens. Successive requests
/// rotate across the endpoints, starting from the second.
#[derive(Debug)]
pub struct UrlTemplates {
    endpoints: Vec<String>,
    next: AtomicUsize,
}

impl UrlTemplates {
    pub fn new(endpoints: Vec<String>) -> Result<Self, SetupError> {
        if endpoints.is_empty() {
            return Err(SetupError::NoTileEndpoints);
        }
        Ok(Self {
            endpoints,
            next: AtomicUsize::new(1),
        })
    }

    pub fn url(&self, coords: &TileCoords) -> String {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        self.endpoints[index]
            .replace("{z}", &coords.z.to_string())
            .replace("{x}", &coords.x.to_string())
            .replace("{y}", &coords.y.to_string())
    }
}

pub struct VectorTileSource {
    urls: UrlTemplates,
    fetcher: Arc<dyn TileFetcher>,
    decoder: Arc<dyn TileDecoder>,
}

impl VectorTileSource {
    pub fn new(urls: UrlTemplates, fetcher: Arc<dyn TileFetcher>, decoder: Arc<dyn TileDecoder>) -> Self {
        Self {
            urls,
            fetcher,
            decoder,
        }
    }
}

impl TileSource for VectorTileSource {
    fn load(&self, coords: &TileCoords, abort: &AbortSignal) -> Result<SourceLayers, TileError> {
        let url = self.urls.url(coords);
        let bytes = self.fetcher.fetch(&url, abort)?;
        if abort.is_aborted() {
            return Err(TileError::Transport(format!("request for {url} aborted")));
        }
        self.decoder.decode(&bytes, coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_urls_round_robin() {
        let urls = UrlTemplates::new(vec![
            "https://a.example/{z}/{x}/{y}.pbf".into(),
            "https://b.example/{z}/{x}/{y}.pbf".into(),
        ])
        .unwrap();
        let c = TileCoords { z: 3, x: 4, y: 5 };
        assert_eq!(urls.url(&c), "https://b.example/3/4/5.pbf");
        assert_eq!(urls.url(&c), "https://a.example/3/4/5.pbf");
        assert_eq!(urls.url(&c), "https://b.example/3/4/5.pbf");
    }

    #[test]
    fn test_no_endpoints() {
        assert!(matches!(UrlTemplates::new(vec![]), Err(SetupError::NoTileEndpoints)));
    }

    struct RecordingFetcher(Mutex<Vec<String>>);

    impl TileFetcher for RecordingFetcher {
        fn fetch(&self, url: &str, _abort: &AbortSignal) -> Result<Vec<u8>, TileError> {
            self.0.lock().unwrap().push(url.to_string());
            Ok(url.as_bytes().to_vec())
        }
    }

    struct EmptyDecoder;

    impl TileDecoder for EmptyDecoder {
        fn decode(&self, bytes: &[u8], _coords: &TileCoords) -> Result<SourceLayers, TileError> {
            if bytes.is_empty() {
                return Err(TileError::Transport("empty body".into()));
            }
            Ok(SourceLayers::new())
        }
    }

    #[test]
    fn test_vector_source_fetches_then_decodes() {
        let fetcher = Arc::new(RecordingFetcher(Mutex::new(Vec::new())));
        let source = VectorTileSource::new(
            UrlTemplates::new(vec!["t/{z}/{x}/{y}".into()]).unwrap(),
            fetcher.clone(),
            Arc::new(EmptyDecoder),
        );
        let layers = source
            .load(&TileCoords { z: 1, x: 0, y: 1 }, &AbortSignal::new())
            .unwrap();
        assert!(layers.is_empty());
        assert_eq!(fetcher.0.lock().unwrap().as_slice(), ["t/1/0/1"]);
    }

    #[test]
    fn test_aborted_load_is_transport_error() {
        let source = VectorTileSource::new(
            UrlTemplates::new(vec!["t/{z}/{x}/{y}".into()]).unwrap(),
            Arc::new(RecordingFetcher(Mutex::new(Vec::new()))),
            Arc::new(EmptyDecoder),
        );
        let abort = AbortSignal::new();
        abort.abort();
        assert!(matches!(
            source.load(&TileCoords { z: 0, x: 0, y: 0 }, &abort),
            Err(TileError::Transport(_))
        ));
    }
}
