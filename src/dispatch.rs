//! Worker pool dispatcher.
//!
//! Owns a fixed set of worker threads, assigns each task to the least
//! loaded one and reassembles the streamed result. All worker replies
//! arrive on one channel and are handled by [`Dispatcher::handle_reply`],
//! so task records and load counters only change on the owning thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::error::{DispatchError, SetupError, TileError};
use crate::label::Atlas;
use crate::source::AbortSignal;
use crate::worker::protocol::{
    ChunkData, Header, TaskId, TileJob, WireLayer, WorkerCommand, WorkerMessage, WorkerReply,
};
use crate::worker::{spawn_worker, TaskProcessor, WorkerHandle};

/// A fully received and validated worker result
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerTile {
    pub atlas: Option<Arc<Atlas>>,
    /// Style layer ids in style order
    pub layers: Vec<(String, WireLayer)>,
}

pub type TaskOutcome = Result<WorkerTile, TileError>;

/// Returned by [`Dispatcher::start_task`]. The outcome arrives on
/// `outcome`; a canceled task's sender is dropped without sending.
#[derive(Debug)]
pub struct TaskTicket {
    pub id: TaskId,
    pub outcome: Receiver<TaskOutcome>,
}

enum Phase {
    Requested,
    Streaming {
        header: Header,
        received: HashMap<String, WireLayer>,
    },
}

struct TaskRecord {
    worker: usize,
    abort: AbortSignal,
    phase: Phase,
    completion: Sender<TaskOutcome>,
}

pub struct Dispatcher {
    workers: Vec<WorkerHandle>,
    loads: Vec<AtomicUsize>,
    tasks: DashMap<TaskId, TaskRecord>,
    next_id: AtomicU64,
    replies: Receiver<WorkerReply>,
    terminated: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        threads: usize,
        processor: Arc<dyn TaskProcessor>,
        chunk_bytes: usize,
    ) -> Result<Self, SetupError> {
        if threads == 0 {
            return Err(SetupError::NoThreads);
        }
        let (reply_tx, replies) = flume::unbounded();

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            match spawn_worker(index, Arc::clone(&processor), chunk_bytes, reply_tx.clone()) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for mut worker in workers {
                        worker.send(WorkerCommand::Shutdown);
                        worker.join();
                    }
                    return Err(SetupError::Spawn(e));
                }
            }
        }
        info!(threads, chunk_bytes, "worker pool started");

        Ok(Self {
            workers,
            loads: (0..threads).map(|_| AtomicUsize::new(0)).collect(),
            tasks: DashMap::new(),
            next_id: AtomicU64::new(0),
            replies,
            terminated: AtomicBool::new(false),
        })
    }

    /// Hand `job` to the least loaded worker (lowest index on ties)
    pub fn start_task(&self, job: TileJob) -> Result<TaskTicket, DispatchError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(DispatchError);
        }

        let worker = self
            .loads
            .iter()
            .enumerate()
            .min_by_key(|(index, load)| (load.load(Ordering::Relaxed), *index))
            .map(|(index, _)| index)
            .ok_or(DispatchError)?;
        self.loads[worker].fetch_add(1, Ordering::Relaxed);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let abort = AbortSignal::new();
        let (completion, outcome) = flume::bounded(1);
        self.tasks.insert(
            id,
            TaskRecord {
                worker,
                abort: abort.clone(),
                phase: Phase::Requested,
                completion,
            },
        );

        debug!(id, worker, coords = %job.coords, "task started");
        self.workers[worker].send(WorkerCommand::Start { id, job, abort });
        Ok(TaskTicket { id, outcome })
    }

    /// Drop a live task. Its outcome is never sent. No-op for unknown ids.
    pub fn cancel_task(&self, id: TaskId) {
        let Some((_, record)) = self.tasks.remove(&id) else {
            return;
        };
        record.abort.abort();
        self.workers[record.worker].send(WorkerCommand::Cancel { id });
        self.release(record.worker);
        debug!(id, worker = record.worker, "task canceled");
    }

    /// Sum of per-worker loads
    pub fn active_tasks(&self) -> usize {
        self.loads.iter().map(|l| l.load(Ordering::Relaxed)).sum()
    }

    pub fn worker_loads(&self) -> Vec<usize> {
        self.loads.iter().map(|l| l.load(Ordering::Relaxed)).collect()
    }

    /// Handle every reply already waiting. Returns how many were handled.
    pub fn pump(&self) -> usize {
        let mut handled = 0;
        while let Ok(reply) = self.replies.try_recv() {
            self.handle_reply(reply);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for a reply, then handle everything waiting
    pub fn pump_timeout(&self, timeout: Duration) -> usize {
        match self.replies.recv_timeout(timeout) {
            Ok(reply) => {
                self.handle_reply(reply);
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }

    /// Route one worker message to its task
    pub fn handle_reply(&self, reply: WorkerReply) {
        let WorkerReply {
            worker,
            id,
            message,
        } = reply;

        let Some((_, mut record)) = self.tasks.remove(&id) else {
            // Canceled or finished: make sure the worker stops too
            debug!(id, worker, kind = message.kind(), "message for unknown task dropped");
            if let Some(handle) = self.workers.get(worker) {
                handle.send(WorkerCommand::Cancel { id });
            }
            return;
        };

        let streaming = matches!(record.phase, Phase::Streaming { .. });
        match message {
            WorkerMessage::Header(header) if !streaming => {
                debug!(id, layers = header.layers.len(), "header received");
                record.phase = Phase::Streaming {
                    header,
                    received: HashMap::new(),
                };
                self.acknowledge(id, record);
            }
            WorkerMessage::Chunk { layer, data } if streaming => {
                let mut undeclared = false;
                if let Phase::Streaming { header, received } = &mut record.phase {
                    match header.layers.iter().find(|(name, _)| *name == layer) {
                        None => undeclared = true,
                        Some((_, declared)) => {
                            let target = received
                                .entry(layer.clone())
                                .or_insert_with(|| WireLayer::from_header(declared));
                            match data {
                                ChunkData::Compressed(groups) => target.compressed.extend(groups),
                                ChunkData::Features(features) => target
                                    .features
                                    .get_or_insert_with(Vec::new)
                                    .extend(features),
                            }
                        }
                    }
                }
                if undeclared {
                    let error = format!("chunk for undeclared layer '{layer}'");
                    self.fail(id, record, TileError::Protocol(error));
                } else {
                    self.acknowledge(id, record);
                }
            }
            WorkerMessage::Done if streaming => self.finish(id, record),
            WorkerMessage::Error(error) => {
                debug!(id, %error, "worker reported error");
                self.release(record.worker);
                let _ = record.completion.send(Err(error));
            }
            message => {
                let error = format!("unexpected '{}' message", message.kind());
                self.fail(id, record, TileError::Protocol(error));
            }
        }
    }

    /// Validate received counts against the header and deliver the tile
    fn finish(&self, id: TaskId, record: TaskRecord) {
        self.release(record.worker);
        let Phase::Streaming {
            header,
            mut received,
        } = record.phase
        else {
            return;
        };

        let mut layers = Vec::with_capacity(header.layers.len());
        for (name, declared) in header.layers {
            let layer = received
                .remove(&name)
                .unwrap_or_else(|| WireLayer::from_header(&declared));
            if layer.header() != declared {
                warn!(id, layer = %name, "stream failed integrity check");
                let _ = record.completion.send(Err(TileError::Integrity { layer: name }));
                return;
            }
            layers.push((name, layer));
        }
        debug!(id, layers = layers.len(), "task done");
        let _ = record.completion.send(Ok(WorkerTile {
            atlas: header.atlas,
            layers,
        }));
    }

    fn acknowledge(&self, id: TaskId, record: TaskRecord) {
        self.workers[record.worker].send(WorkerCommand::Continue { id });
        self.tasks.insert(id, record);
    }

    /// Tear down a task after a protocol violation. The worker is told to
    /// drop it but stays in service.
    fn fail(&self, id: TaskId, record: TaskRecord, error: TileError) {
        warn!(id, worker = record.worker, %error, "protocol violation");
        self.workers[record.worker].send(WorkerCommand::Cancel { id });
        self.release(record.worker);
        let _ = record.completion.send(Err(error));
    }

    fn release(&self, worker: usize) {
        let _ = self.loads[worker].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            n.checked_sub(1)
        });
    }

    /// Stop every worker. Outstanding tasks complete with
    /// [`TileError::Terminated`]; the dispatcher accepts no new work.
    pub fn terminate(&mut self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        let ids: Vec<TaskId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, record)) = self.tasks.remove(&id) {
                record.abort.abort();
                let _ = record.completion.send(Err(TileError::Terminated));
            }
        }
        for load in &self.loads {
            load.store(0, Ordering::Relaxed);
        }

        for worker in &self.workers {
            worker.send(WorkerCommand::Shutdown);
        }
        for worker in &mut self.workers {
            worker.join();
        }
        info!("worker pool terminated");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.terminate();
    }
}
