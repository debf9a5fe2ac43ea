//! The public face of the crate: a tile pool tying the worker dispatcher
//! to the host thread's cooperative queue.
//!
//! The host calls [`TilePool::request`] for tiles it wants and
//! [`TilePool::poll`] from its event loop. Worker results are turned into
//! render buffers on the host thread, one feature group per queue turn,
//! and handed to the request's callback.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::compress::{CompressedLayer, FeatureGroup};
use crate::config::{Collaborators, SetupParams};
use crate::dispatch::{Dispatcher, TaskTicket, WorkerTile};
use crate::error::{SetupError, TileError};
use crate::feature::Feature;
use crate::label::Atlas;
use crate::queue::{Chunk, Priority, QueueTaskId, TaskQueue};
use crate::serialize::{serialize_group, CollisionIndex, TileContext};
use crate::source::TileCoords;
use crate::style::StyleLayer;
use crate::worker::protocol::TileJob;
use crate::worker::WorkerContext;

/// A finished tile: every style layer with something to draw, keyed by id
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct Tile {
    #[serde(skip)]
    pub atlas: Option<Arc<Atlas>>,
    pub layers: BTreeMap<String, CompressedLayer>,
}

pub type TileCallback = Box<dyn FnOnce(Result<Tile, TileError>)>;

pub struct TileRequest {
    pub coords: TileCoords,
    pub priority: Option<Priority>,
}

impl TileRequest {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self {
            coords: TileCoords { z, x, y },
            priority: None,
        }
    }

    /// Queued serialization work for this tile runs in descending priority
    pub fn with_priority(mut self, priority: impl Fn() -> f64 + 'static) -> Self {
        self.priority = Some(Rc::new(priority));
        self
    }
}

type RequestId = u64;

enum Stage {
    Worker(TaskTicket),
    Queued(QueueTaskId),
}

struct PendingRequest {
    coords: TileCoords,
    priority: Option<Priority>,
    stage: Stage,
    callback: TileCallback,
}

struct PoolShared {
    layers: HashMap<String, Arc<StyleLayer>>,
    dispatcher: RefCell<Dispatcher>,
    queue: TaskQueue,
    requests: RefCell<BTreeMap<RequestId, PendingRequest>>,
    next_request: Cell<RequestId>,
}

impl PoolShared {
    fn take_request(&self, id: RequestId) -> Option<PendingRequest> {
        self.requests.borrow_mut().remove(&id)
    }
}

/// Serialization state of one tile while its queue task runs
struct TileBuild {
    zoom: f64,
    atlas: Option<Arc<Atlas>>,
    collisions: CollisionIndex,
    layers: BTreeMap<String, CompressedLayer>,
}

pub struct TilePool {
    shared: Rc<PoolShared>,
}

impl TilePool {
    /// Validate `params`, compile the style and start the workers
    pub fn new(params: SetupParams, collaborators: Collaborators) -> Result<Self, SetupError> {
        params.validate()?;
        let source_config = params.source.as_ref().ok_or(SetupError::MissingSource)?;
        let layers = params.compile_layers()?;
        let source = collaborators.build_source(source_config, &layers)?;

        let context = WorkerContext::new(&layers, source, collaborators.atlas_builder());
        let dispatcher = Dispatcher::new(params.threads, Arc::new(context), params.chunk_bytes)?;
        info!(
            layers = layers.len(),
            threads = params.threads,
            glyphs = params.glyphs.as_deref().unwrap_or("default"),
            "tile pool ready"
        );

        Ok(Self {
            shared: Rc::new(PoolShared {
                layers: layers.into_iter().map(|l| (l.id.clone(), l)).collect(),
                dispatcher: RefCell::new(dispatcher),
                queue: TaskQueue::new(),
                requests: RefCell::new(BTreeMap::new()),
                next_request: Cell::new(0),
            }),
        })
    }

    /// Ask for a tile. `callback` runs from a later [`poll`](Self::poll)
    /// with the tile or the reason it could not be built, unless the
    /// request is aborted first.
    pub fn request(
        &self,
        request: TileRequest,
        callback: impl FnOnce(Result<Tile, TileError>) + 'static,
    ) -> RequestHandle {
        let id = self.shared.next_request.get();
        self.shared.next_request.set(id + 1);
        let handle = RequestHandle {
            id,
            pool: Rc::downgrade(&self.shared),
        };

        let job = TileJob {
            coords: request.coords,
        };
        let started = self.shared.dispatcher.borrow().start_task(job);
        match started {
            Ok(ticket) => {
                debug!(id, coords = %request.coords, task = ticket.id, "tile requested");
                self.shared.requests.borrow_mut().insert(
                    id,
                    PendingRequest {
                        coords: request.coords,
                        priority: request.priority,
                        stage: Stage::Worker(ticket),
                        callback: Box::new(callback),
                    },
                );
            }
            Err(_) => callback(Err(TileError::Terminated)),
        }
        handle
    }

    /// Requests waiting on a worker
    pub fn worker_tasks(&self) -> usize {
        self.shared.dispatcher.borrow().active_tasks()
    }

    /// Requests whose buffers are being built on this thread
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn active_tasks(&self) -> usize {
        self.worker_tasks() + self.queued_tasks()
    }

    /// No request is waiting for its callback
    pub fn is_idle(&self) -> bool {
        self.shared.requests.borrow().is_empty()
    }

    /// Drive the pool for about `budget`: route worker messages, move
    /// finished worker results onto the queue and run queue turns. At
    /// least one queue turn runs if any work is queued. Returns whether
    /// requests are still outstanding.
    pub fn poll(&self, budget: Duration) -> bool {
        let start = Instant::now();
        self.shared.dispatcher.borrow().pump();
        self.promote_finished();

        self.shared.queue.sort_tasks();
        self.shared
            .queue
            .run_for(budget.saturating_sub(start.elapsed()));
        !self.is_idle()
    }

    /// Like [`poll`](Self::poll), but first waits up to `timeout` for a
    /// worker message when nothing is queued
    pub fn poll_wait(&self, timeout: Duration, budget: Duration) -> bool {
        if self.shared.queue.is_empty() {
            self.shared.dispatcher.borrow().pump_timeout(timeout);
        }
        self.poll(budget)
    }

    fn promote_finished(&self) {
        let finished: Vec<_> = self
            .shared
            .requests
            .borrow()
            .iter()
            .filter_map(|(id, request)| match &request.stage {
                Stage::Worker(ticket) => ticket.outcome.try_recv().ok().map(|o| (*id, o)),
                Stage::Queued(_) => None,
            })
            .collect();

        for (id, outcome) in finished {
            match outcome {
                Ok(tile) => self.enqueue_serialization(id, tile),
                Err(error) => {
                    if let Some(request) = self.shared.take_request(id) {
                        debug!(id, coords = %request.coords, %error, "tile failed");
                        (request.callback)(Err(error));
                    }
                }
            }
        }
    }

    /// One chunk per feature group, upper style layers first so their
    /// labels win collisions, then a final chunk delivering the tile
    fn enqueue_serialization(&self, id: RequestId, tile: WorkerTile) {
        let (zoom, priority) = {
            let requests = self.shared.requests.borrow();
            let Some(request) = requests.get(&id) else {
                return;
            };
            (f64::from(request.coords.z), request.priority.clone())
        };

        let build = Rc::new(RefCell::new(TileBuild {
            zoom,
            atlas: tile.atlas,
            collisions: CollisionIndex::new(),
            layers: BTreeMap::new(),
        }));

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut interactive: Vec<(String, Vec<Feature>)> = Vec::new();
        for (layer_id, layer) in tile.layers.into_iter().rev() {
            let Some(style) = self.shared.layers.get(&layer_id) else {
                warn!(id, layer = %layer_id, "result for unknown style layer dropped");
                continue;
            };
            if let Some(features) = layer.features {
                interactive.push((layer_id.clone(), features));
            }
            for group in layer.compressed {
                chunks.push(serialize_chunk(
                    Rc::clone(&build),
                    Arc::clone(style),
                    layer.extent,
                    group,
                ));
            }
        }
        chunks.push(deliver_chunk(
            id,
            Rc::downgrade(&self.shared),
            build,
            interactive,
        ));

        let task = self.shared.queue.enqueue_task(priority, chunks);
        if let Some(request) = self.shared.requests.borrow_mut().get_mut(&id) {
            request.stage = Stage::Queued(task);
        }
        debug!(id, task, "tile queued for serialization");
    }

    /// Stop all workers and drop queued work. Every outstanding request's
    /// callback gets [`TileError::Terminated`]; later requests fail the same
    /// way.
    pub fn terminate(&self) {
        self.shared.dispatcher.borrow_mut().terminate();

        let outstanding = std::mem::take(&mut *self.shared.requests.borrow_mut());
        for request in outstanding.values() {
            if let Stage::Queued(task) = request.stage {
                self.shared.queue.cancel_task(task);
            }
        }
        if !outstanding.is_empty() {
            info!(outstanding = outstanding.len(), "tile pool terminated");
        }
        for (_, request) in outstanding {
            (request.callback)(Err(TileError::Terminated));
        }
    }
}

fn serialize_chunk(
    build: Rc<RefCell<TileBuild>>,
    style: Arc<StyleLayer>,
    extent: u32,
    group: FeatureGroup,
) -> Chunk {
    Box::new(move || {
        let mut build = build.borrow_mut();
        let TileBuild {
            zoom,
            atlas,
            collisions,
            layers,
        } = &mut *build;
        let mut ctx = TileContext {
            zoom: *zoom,
            atlas: atlas.as_deref(),
            collisions,
        };
        if let Some(grouped) = serialize_group(&style, &group, &mut ctx) {
            layers
                .entry(style.id.clone())
                .or_insert_with(|| CompressedLayer {
                    layer_type: style.layer_type,
                    extent,
                    compressed: Vec::new(),
                    features: None,
                })
                .compressed
                .push(grouped);
        }
    })
}

fn deliver_chunk(
    id: RequestId,
    pool: Weak<PoolShared>,
    build: Rc<RefCell<TileBuild>>,
    interactive: Vec<(String, Vec<Feature>)>,
) -> Chunk {
    Box::new(move || {
        let Some(request) = pool.upgrade().and_then(|pool| pool.take_request(id)) else {
            return;
        };
        let mut build = build.borrow_mut();
        let mut layers = std::mem::take(&mut build.layers);
        for (layer_id, features) in interactive {
            if let Some(layer) = layers.get_mut(&layer_id) {
                layer.features = Some(features);
            }
        }
        let tile = Tile {
            atlas: build.atlas.take(),
            layers,
        };
        drop(build);

        debug!(id, coords = %request.coords, layers = tile.layers.len(), "tile ready");
        (request.callback)(Ok(tile));
    })
}

/// Returned by [`TilePool::request`]
#[derive(Clone, Debug)]
pub struct RequestHandle {
    id: RequestId,
    pool: Weak<PoolShared>,
}

impl RequestHandle {
    /// Cancel the request wherever it is. Its callback is never invoked.
    /// No-op once the callback has run.
    pub fn abort(&self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let Some(request) = pool.take_request(self.id) else {
            return;
        };
        match request.stage {
            Stage::Worker(ticket) => pool.dispatcher.borrow().cancel_task(ticket.id),
            Stage::Queued(task) => {
                pool.queue.cancel_task(task);
            }
        }
        debug!(id = self.id, coords = %request.coords, "request aborted");
    }
}

impl std::fmt::Debug for PoolShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolShared")
            .field("layers", &self.layers.len())
            .field("requests", &self.requests.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::style::StyleLayerDescriptor;
    use serde_json::json;

    fn params() -> SetupParams {
        let layers: Vec<StyleLayerDescriptor> = serde_json::from_value(json!([
            {"id": "dots", "type": "circle"}
        ]))
        .unwrap();
        let data = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0.5, 0.5]}}
        ]}"#
        .parse()
        .unwrap();
        let mut params = SetupParams::new(layers, SourceConfig::Geojson { data });
        params.threads = 1;
        params
    }

    fn settle(pool: &TilePool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while pool.poll_wait(Duration::from_millis(20), Duration::from_millis(5)) {
            assert!(Instant::now() < deadline, "pool did not settle");
        }
    }

    type Results = Rc<RefCell<Vec<Result<Tile, TileError>>>>;

    fn record(results: &Results) -> impl FnOnce(Result<Tile, TileError>) + 'static {
        let results = Rc::clone(results);
        move |result| results.borrow_mut().push(result)
    }

    #[test]
    fn test_request_delivers_tile() {
        let pool = TilePool::new(params(), Collaborators::default()).unwrap();
        let results = Results::default();
        pool.request(TileRequest::new(1, 1, 1), record(&results));
        assert_eq!(pool.active_tasks(), 1);
        settle(&pool);

        let results = results.borrow();
        assert_eq!(results.len(), 1);
        let tile = results[0].as_ref().unwrap();
        let dots = &tile.layers["dots"];
        assert_eq!(dots.compressed.len(), 1);
        assert_eq!(dots.compressed[0].buffers.vertex_count(), 1);
        assert!(tile.atlas.is_none());
        assert_eq!(pool.active_tasks(), 0);
    }

    #[test]
    fn test_empty_tile_has_no_layers() {
        let pool = TilePool::new(params(), Collaborators::default()).unwrap();
        let results = Results::default();
        pool.request(TileRequest::new(5, 0, 0), record(&results));
        settle(&pool);
        assert!(results.borrow()[0].as_ref().unwrap().layers.is_empty());
    }

    #[test]
    fn test_abort_suppresses_callback() {
        let pool = TilePool::new(params(), Collaborators::default()).unwrap();
        let results = Results::default();
        let handle = pool.request(TileRequest::new(1, 1, 1), record(&results));
        handle.abort();
        handle.abort();
        assert!(pool.is_idle());
        assert_eq!(pool.worker_tasks(), 0);

        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            pool.poll_wait(Duration::from_millis(10), Duration::from_millis(5));
        }
        assert!(results.borrow().is_empty());
    }

    #[test]
    fn test_terminate_fails_outstanding_and_later_requests() {
        let pool = TilePool::new(params(), Collaborators::default()).unwrap();
        let results = Results::default();
        pool.request(TileRequest::new(1, 1, 1), record(&results));
        pool.terminate();
        pool.request(TileRequest::new(1, 0, 0), record(&results));

        let results = results.borrow();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r == &Err(TileError::Terminated)));
        assert!(pool.is_idle());
    }

    #[test]
    fn test_setup_errors_are_fatal() {
        let mut bad = params();
        bad.layers.clear();
        assert!(matches!(
            TilePool::new(bad, Collaborators::default()),
            Err(SetupError::NoLayers)
        ));
    }
}
