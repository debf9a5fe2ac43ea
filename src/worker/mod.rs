//! Worker threads: fetch, decode, filter and compress tiles off the host
//! thread, then stream the result back chunk by chunk.

pub mod protocol;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use tracing::{debug, info_span, trace, warn};

use self::protocol::{
    take_chunk, ChunkData, Header, TaskId, TileJob, WireLayer, WorkerCommand, WorkerMessage,
    WorkerReply,
};
use crate::compress::{FeatureGrouper, GroupMember};
use crate::error::TileError;
use crate::filter::SourceFilter;
use crate::label::{Atlas, GlyphAtlasBuilder, GlyphRequest, LabelText};
use crate::source::{AbortSignal, TileSource};
use crate::style::StyleLayer;

/// A processed tile, ready to stream
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessedTile {
    pub atlas: Option<Arc<Atlas>>,
    /// Style layer ids in style order
    pub layers: Vec<(String, WireLayer)>,
}

/// The per-task work a worker thread performs
pub trait TaskProcessor: Send + Sync {
    fn process(&self, job: &TileJob, abort: &AbortSignal) -> Result<ProcessedTile, TileError>;
}

/// Immutable state every worker shares, built once at setup
pub struct WorkerContext {
    source: Arc<dyn TileSource>,
    filter: SourceFilter,
    groupers: HashMap<String, FeatureGrouper>,
    atlas: Arc<dyn GlyphAtlasBuilder>,
}

impl WorkerContext {
    pub fn new(
        layers: &[Arc<StyleLayer>],
        source: Arc<dyn TileSource>,
        atlas: Arc<dyn GlyphAtlasBuilder>,
    ) -> Self {
        Self {
            source,
            filter: SourceFilter::new(layers),
            groupers: layers
                .iter()
                .map(|l| (l.id.clone(), FeatureGrouper::new(l)))
                .collect(),
            atlas,
        }
    }
}

impl TaskProcessor for WorkerContext {
    fn process(&self, job: &TileJob, abort: &AbortSignal) -> Result<ProcessedTile, TileError> {
        let raw = self.source.load(&job.coords, abort)?;
        let zoom = f64::from(job.coords.z);

        let mut glyphs = GlyphRequest::new();
        let mut layers = Vec::new();
        for filtered in self.filter.apply(&raw, zoom) {
            let style = Arc::clone(&filtered.layer);
            let Some(grouper) = self.groupers.get(&style.id) else {
                continue;
            };

            let features = style.interactive.then(|| filtered.features.clone());
            let members = filtered.features.into_iter().map(|feature| {
                let label = LabelText::resolve(&style, zoom, &feature.properties);
                if let Some(label) = &label {
                    label.collect_into(&mut glyphs);
                }
                GroupMember { feature, label }
            });
            let compressed = grouper.group(members);

            layers.push((
                style.id.clone(),
                WireLayer {
                    layer_type: style.layer_type,
                    extent: filtered.extent,
                    compressed,
                    features,
                },
            ));
        }

        let atlas = if glyphs.is_empty() {
            None
        } else {
            Some(Arc::new(self.atlas.build(&glyphs)?))
        };
        Ok(ProcessedTile { atlas, layers })
    }
}

/// A processed tile being streamed out
struct Stream {
    layers: VecDeque<(String, WireLayer)>,
}

impl Stream {
    fn new(tile: ProcessedTile) -> (Header, Self) {
        let header = Header {
            layers: tile
                .layers
                .iter()
                .map(|(id, layer)| (id.clone(), layer.header()))
                .collect(),
            atlas: tile.atlas,
        };
        let stream = Self {
            layers: tile.layers.into(),
        };
        (header, stream)
    }

    /// Grouped features go first, then raw features; drained layers are
    /// discarded. `Done` once nothing remains.
    fn next_message(&mut self, budget: usize) -> WorkerMessage {
        while let Some((id, layer)) = self.layers.front_mut() {
            if !layer.compressed.is_empty() {
                return WorkerMessage::Chunk {
                    layer: id.clone(),
                    data: ChunkData::Compressed(take_chunk(&mut layer.compressed, budget)),
                };
            }
            if let Some(features) = layer.features.as_mut().filter(|f| !f.is_empty()) {
                return WorkerMessage::Chunk {
                    layer: id.clone(),
                    data: ChunkData::Features(take_chunk(features, budget)),
                };
            }
            self.layers.pop_front();
        }
        WorkerMessage::Done
    }
}

/// Dispatcher-side handle of one worker thread
pub struct WorkerHandle {
    pub commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            warn!("worker thread is gone, command dropped");
        }
    }

    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

pub fn spawn_worker(
    index: usize,
    processor: Arc<dyn TaskProcessor>,
    chunk_bytes: usize,
    replies: Sender<WorkerReply>,
) -> std::io::Result<WorkerHandle> {
    let (commands, inbox) = flume::unbounded();
    let thread = thread::Builder::new()
        .name(format!("tile-worker-{index}"))
        .spawn(move || run(index, processor, chunk_bytes, inbox, replies))?;
    Ok(WorkerHandle {
        commands,
        thread: Some(thread),
    })
}

fn run(
    index: usize,
    processor: Arc<dyn TaskProcessor>,
    chunk_bytes: usize,
    inbox: Receiver<WorkerCommand>,
    replies: Sender<WorkerReply>,
) {
    let _span = info_span!("worker", index).entered();
    debug!("worker started");

    let mut streams: HashMap<TaskId, Stream> = HashMap::new();
    let reply = |id, message| {
        trace!(id, kind = WorkerMessage::kind(&message), "reply");
        // The dispatcher hanging up means the pool is going away
        replies.send(WorkerReply { worker: index, id, message }).is_ok()
    };

    for command in inbox.iter() {
        let delivered = match command {
            WorkerCommand::Start { id, job, abort } => {
                let result = processor.process(&job, &abort);
                if abort.is_aborted() {
                    debug!(id, "task aborted, result discarded");
                    continue;
                }
                match result {
                    Ok(tile) => {
                        let (header, stream) = Stream::new(tile);
                        streams.insert(id, stream);
                        reply(id, WorkerMessage::Header(header))
                    }
                    Err(e) => reply(id, WorkerMessage::Error(e)),
                }
            }
            WorkerCommand::Continue { id } => {
                let Some(stream) = streams.get_mut(&id) else {
                    continue;
                };
                let message = stream.next_message(chunk_bytes);
                if matches!(message, WorkerMessage::Done) {
                    streams.remove(&id);
                }
                reply(id, message)
            }
            WorkerCommand::Cancel { id } => {
                streams.remove(&id);
                true
            }
            WorkerCommand::Shutdown => break,
        };
        if !delivered {
            break;
        }
    }
    debug!(pending = streams.len(), "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::FeatureGroup;
    use crate::feature::{Feature, Geometry, Properties};
    use crate::style::LayerType;

    fn group(n: usize) -> FeatureGroup {
        FeatureGroup {
            properties: Properties::new(),
            members: (0..n)
                .map(|i| GroupMember {
                    feature: Feature::new(Geometry::Point((i as f64, 0.0)), Properties::new()),
                    label: None,
                })
                .collect(),
        }
    }

    fn layer(groups: usize, features: Option<usize>) -> WireLayer {
        WireLayer {
            layer_type: LayerType::Circle,
            extent: 512,
            compressed: (0..groups).map(|_| group(1)).collect(),
            features: features.map(|n| {
                (0..n)
                    .map(|_| Feature::new(Geometry::Point((0.0, 0.0)), Properties::new()))
                    .collect()
            }),
        }
    }

    #[test]
    fn test_stream_order() {
        let tile = ProcessedTile {
            atlas: None,
            layers: vec![("a".into(), layer(2, Some(1))), ("b".into(), layer(1, None))],
        };
        let (header, mut stream) = Stream::new(tile);
        assert_eq!(header.layers[0].1.compressed, 2);
        assert_eq!(header.layers[0].1.features, Some(1));
        assert_eq!(header.layers[1].1.features, None);

        // One item per chunk with a tiny budget
        let mut kinds = Vec::new();
        loop {
            match stream.next_message(1) {
                WorkerMessage::Chunk { layer, data } => {
                    let kind = match data {
                        ChunkData::Compressed(_) => "compressed",
                        ChunkData::Features(_) => "features",
                    };
                    kinds.push(format!("{layer}:{kind}"));
                }
                WorkerMessage::Done => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(
            kinds,
            vec!["a:compressed", "a:compressed", "a:features", "b:compressed"]
        );
    }

    #[test]
    fn test_large_budget_sends_layer_at_once() {
        let tile = ProcessedTile {
            atlas: None,
            layers: vec![("a".into(), layer(5, None))],
        };
        let (_, mut stream) = Stream::new(tile);
        match stream.next_message(100_000) {
            WorkerMessage::Chunk { data, .. } => assert_eq!(data.len(), 5),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(stream.next_message(100_000), WorkerMessage::Done);
    }

    struct Echo;

    impl TaskProcessor for Echo {
        fn process(&self, _job: &TileJob, _abort: &AbortSignal) -> Result<ProcessedTile, TileError> {
            Ok(ProcessedTile {
                atlas: None,
                layers: vec![("a".into(), layer(3, None))],
            })
        }
    }

    #[test]
    fn test_worker_thread_streams_on_continue() {
        let (replies_tx, replies) = flume::unbounded();
        let mut worker = spawn_worker(0, Arc::new(Echo), 1, replies_tx).unwrap();
        let job = TileJob {
            coords: crate::source::TileCoords { z: 0, x: 0, y: 0 },
        };
        worker.send(WorkerCommand::Start {
            id: 9,
            job,
            abort: AbortSignal::new(),
        });

        let header = replies.recv().unwrap();
        assert_eq!(header.id, 9);
        assert_eq!(header.message.kind(), "header");

        let mut chunks = 0;
        loop {
            worker.send(WorkerCommand::Continue { id: 9 });
            match replies.recv().unwrap().message {
                WorkerMessage::Chunk { .. } => chunks += 1,
                WorkerMessage::Done => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(chunks, 3);

        worker.send(WorkerCommand::Shutdown);
        worker.join();
    }

    #[test]
    fn test_aborted_start_sends_nothing() {
        let (replies_tx, replies) = flume::unbounded();
        let mut worker = spawn_worker(1, Arc::new(Echo), 1, replies_tx).unwrap();
        let abort = AbortSignal::new();
        abort.abort();
        worker.send(WorkerCommand::Start {
            id: 1,
            job: TileJob {
                coords: crate::source::TileCoords { z: 0, x: 0, y: 0 },
            },
            abort,
        });
        worker.send(WorkerCommand::Shutdown);
        worker.join();
        assert!(replies.try_recv().is_err());
    }
}
