//! Background reclamation of detached subtrees.
//!
//! Tearing down a subtree with millions of nodes on a search thread
//! would blow the response-time budget of the protocol loop, so every
//! bulk release (played move, position reset, tree deallocation) hands
//! its subtree to a process-wide collector thread instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::trace;

use crate::node::Node;

/// How often the collector wakes up to drain its queue.
const GC_INTERVAL: Duration = Duration::from_millis(100);

static NODE_GC: Lazy<NodeGarbageCollector> = Lazy::new(NodeGarbageCollector::new);

/// The process-wide collector used by the tree operations.
pub fn global() -> &'static NodeGarbageCollector {
    &NODE_GC
}

struct Shared {
    queue: Mutex<Vec<Box<Node>>>,
    stop: AtomicBool,
}

impl Shared {
    /// Drain the queue, releasing each subtree outside the lock so
    /// producers never wait on a running destructor.
    fn collect(&self) {
        let mut released = 0usize;
        loop {
            let subtree = self.queue.lock().unwrap().pop();
            match subtree {
                Some(node) => {
                    drop(node);
                    released += 1;
                }
                None => break,
            }
        }
        if released > 0 {
            trace!(released, "released detached subtrees");
        }
    }
}

/// Takes ownership of detached subtrees and releases them off the
/// search threads.
pub struct NodeGarbageCollector {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl NodeGarbageCollector {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("node-gc".into())
            .spawn(move || {
                while !worker_shared.stop.load(Ordering::Acquire) {
                    thread::sleep(GC_INTERVAL);
                    worker_shared.collect();
                }
                // Release whatever arrived after the last pass.
                worker_shared.collect();
            })
            .expect("failed to spawn the node-gc thread");
        NodeGarbageCollector {
            shared,
            worker: Some(worker),
        }
    }

    /// Take ownership of a detached subtree. Returns immediately; the
    /// subtree is released by the worker on its next pass. Callable from
    /// any thread.
    pub fn add_to_queue(&self, subtree: Option<Box<Node>>) {
        let Some(subtree) = subtree else { return };
        self.shared.queue.lock().unwrap().push(subtree);
    }

    /// Number of subtrees waiting to be released.
    pub fn pending_subtrees(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }
}

impl Default for NodeGarbageCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NodeGarbageCollector {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
