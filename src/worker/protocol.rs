//! Messages exchanged between the dispatcher and its worker threads.
//!
//! A task's result is streamed: one [`WorkerMessage::Header`] announcing
//! per-layer counts, then [`WorkerMessage::Chunk`]s, each sent only after
//! the dispatcher acknowledged the previous message with
//! [`WorkerCommand::Continue`], then [`WorkerMessage::Done`].

use serde::Serialize;
use std::io;
use std::sync::Arc;

use crate::compress::FeatureGroup;
use crate::error::TileError;
use crate::feature::Feature;
use crate::label::Atlas;
use crate::source::{AbortSignal, TileCoords};
use crate::style::LayerType;

pub type TaskId = u64;

/// What a worker is asked to produce
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileJob {
    pub coords: TileCoords,
}

#[derive(Debug)]
pub enum WorkerCommand {
    Start {
        id: TaskId,
        job: TileJob,
        abort: AbortSignal,
    },
    Continue {
        id: TaskId,
    },
    Cancel {
        id: TaskId,
    },
    Shutdown,
}

/// Per-layer entry of a header: what to expect before `Done`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerHeader {
    pub layer_type: LayerType,
    pub extent: u32,
    pub compressed: usize,
    /// Present only for interactive layers
    pub features: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    /// Style layer ids in style order
    pub layers: Vec<(String, LayerHeader)>,
    pub atlas: Option<Arc<Atlas>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChunkData {
    Compressed(Vec<FeatureGroup>),
    Features(Vec<Feature>),
}

impl ChunkData {
    pub fn len(&self) -> usize {
        match self {
            ChunkData::Compressed(groups) => groups.len(),
            ChunkData::Features(features) => features.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorkerMessage {
    Header(Header),
    Chunk { layer: String, data: ChunkData },
    Done,
    Error(TileError),
}

impl WorkerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Header(_) => "header",
            WorkerMessage::Chunk { .. } => "chunk",
            WorkerMessage::Done => "done",
            WorkerMessage::Error(_) => "error",
        }
    }
}

/// A message tagged with the worker that sent it and the task it is for
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerReply {
    pub worker: usize,
    pub id: TaskId,
    pub message: WorkerMessage,
}

/// One style layer of a processed tile, before streaming
#[derive(Clone, Debug, PartialEq)]
pub struct WireLayer {
    pub layer_type: LayerType,
    pub extent: u32,
    pub compressed: Vec<FeatureGroup>,
    pub features: Option<Vec<Feature>>,
}

impl WireLayer {
    pub fn header(&self) -> LayerHeader {
        LayerHeader {
            layer_type: self.layer_type,
            extent: self.extent,
            compressed: self.compressed.len(),
            features: self.features.as_ref().map(Vec::len),
        }
    }

    /// Empty shell a dispatcher accumulates chunks into
    pub fn from_header(header: &LayerHeader) -> Self {
        Self {
            layer_type: header.layer_type,
            extent: header.extent,
            compressed: Vec::new(),
            features: header.features.map(|_| Vec::new()),
        }
    }
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Length of an item's JSON encoding
pub fn json_size<T: Serialize>(item: &T) -> usize {
    let mut counter = ByteCounter(0);
    match serde_json::to_writer(&mut counter, item) {
        Ok(()) => counter.0,
        Err(_) => 0,
    }
}

/// Remove a prefix of `items` whose JSON size first reaches `budget`.
/// Always takes at least one item when any remain.
pub fn take_chunk<T: Serialize>(items: &mut Vec<T>, budget: usize) -> Vec<T> {
    let mut size = 0;
    let mut count = 0;
    for item in items.iter() {
        if size >= budget {
            break;
        }
        size += json_size(item);
        count += 1;
    }
    items.drain(..count).collect()
}
