// src/node.rs
//
// Multi-node coordination.
//
// - Node: rank / world size / barrier / file removal, the only collaborator
//   the sample generator needs for cross-node work
// - SingleNode: world of one, barrier is a no-op
// - LocalNode: in-process "cluster" of threads sharing an abortable barrier,
//   used by the CLI's --nodes flag and the node-invariance tests
// - Runtime: what a distributed run needs (threads per node, node, work dir)
//
// Nodes exchange data only through files under the shared work directory.
// A node that fails calls `abort`; every barrier after that fails on all
// nodes instead of waiting for the missing one.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::{EngineError, Result};
use crate::parallel::available_threads;

pub trait Node: Send + Sync {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    /// Block until every node of the world has reached the barrier.
    fn barrier(&self) -> Result<()>;

    /// Mark this node as failed so peers stop waiting for it.
    fn abort(&self) {}

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| EngineError::io(path, e))
    }

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNode;

impl Node for SingleNode {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// Reusable barrier that can be broken by any participant.
#[derive(Debug)]
struct AbortableBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl AbortableBarrier {
    fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        // No panic point leaves the state half-updated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait(&self) -> Result<()> {
        let mut state = self.lock();
        if state.broken {
            return Err(EngineError::logic("peer node failed"));
        }
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            return Ok(());
        }
        let generation = state.generation;
        while state.generation == generation && !state.broken {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        if state.generation != generation {
            Ok(())
        } else {
            Err(EngineError::logic("peer node failed"))
        }
    }

    fn abort(&self) {
        let mut state = self.lock();
        state.broken = true;
        self.released.notify_all();
    }
}

/// One member of an in-process cluster.
///
/// A member that fails must call [`Node::abort`]; waiting peers then get an
/// error from `barrier` instead of blocking forever.
#[derive(Debug, Clone)]
pub struct LocalNode {
    rank: usize,
    world_size: usize,
    barrier: Arc<AbortableBarrier>,
}

impl LocalNode {
    /// `world_size` nodes sharing one barrier, in rank order.
    pub fn cluster(world_size: usize) -> Result<Vec<LocalNode>> {
        if world_size == 0 {
            return Err(EngineError::config("local cluster needs at least one node"));
        }
        let barrier = Arc::new(AbortableBarrier::new(world_size));
        Ok((0..world_size)
            .map(|rank| LocalNode {
                rank,
                world_size,
                barrier: barrier.clone(),
            })
            .collect())
    }
}

impl Node for LocalNode {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn barrier(&self) -> Result<()> {
        self.barrier.wait()
    }

    fn abort(&self) {
        self.barrier.abort();
    }
}

#[derive(Clone)]
pub struct Runtime {
    threads: usize,
    node: Arc<dyn Node>,
    work_dir: PathBuf,
}

impl Runtime {
    /// Single node, all available cores.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            threads: available_threads(),
            node: Arc::new(SingleNode),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(EngineError::config("runtime: threads must be positive"));
        }
        self.threads = threads;
        Ok(self)
    }

    pub fn with_node(mut self, node: Arc<dyn Node>) -> Self {
        self.node = node;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn node(&self) -> &dyn Node {
        self.node.as_ref()
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("threads", &self.threads)
            .field("rank", &self.node.rank())
            .field("world_size", &self.node.world_size())
            .field("work_dir", &self.work_dir)
            .finish()
    }
}
