//! Fixed-size OS thread pools draining crossbeam queues.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Builder, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error};

use super::router::Route;
use crate::config::PoolThreads;
use crate::domain::errors::DispatchError;

/// Boxed unit of work for domain pools.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// N threads running `handler` over items from one queue.
pub struct StagePool<T> {
    name: &'static str,
    tx: Sender<T>,
    exit: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> StagePool<T> {
    /// Spawn `threads` workers over an existing channel.
    pub fn spawn<F>(
        name: &'static str,
        threads: usize,
        (tx, rx): (Sender<T>, Receiver<T>),
        handler: F,
    ) -> std::io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let exit = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(threads.max(1));

        for i in 0..threads.max(1) {
            let rx = rx.clone();
            let handler = Arc::clone(&handler);
            let exit = Arc::clone(&exit);
            let worker = Builder::new()
                .name(format!("qcP2p{name}{i}"))
                .spawn(move || Self::run(name, &rx, handler.as_ref(), &exit))?;
            workers.push(worker);
        }

        debug!(pool = name, threads = workers.len(), "pool started");
        Ok(Self {
            name,
            tx,
            exit,
            workers: Mutex::new(workers),
        })
    }

    fn run<F: Fn(T)>(name: &'static str, rx: &Receiver<T>, handler: &F, exit: &AtomicBool) {
        loop {
            if exit.load(Ordering::Relaxed) {
                break;
            }
            match rx.recv_timeout(EXIT_POLL_INTERVAL) {
                Ok(item) => handler(item),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(pool = name, "worker exited");
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    /// Enqueue without blocking.
    pub fn submit(&self, item: T) -> Result<(), DispatchError> {
        if self.exit.load(Ordering::Relaxed) {
            return Err(DispatchError::PoolClosed { pool: self.name });
        }
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => self
                .tx
                .send(item)
                .map_err(|_| DispatchError::PoolClosed { pool: self.name }),
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::PoolClosed { pool: self.name }),
        }
    }

    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Signal workers to exit and join them.
    ///
    /// A worker calling this on its own pool is not joined.
    pub fn shutdown(&self) {
        self.exit.store(true, Ordering::Relaxed);
        let current = thread::current().id();
        for worker in self.workers.lock().drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!(pool = self.name, "worker panicked");
            }
        }
    }
}

impl<T> Drop for StagePool<T> {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::Relaxed);
    }
}

/// Run a job, logging instead of unwinding through the worker.
pub fn run_job(pool: &'static str, job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(pool, "handler panicked");
    }
}

// =============================================================================
// DOMAIN POOLS
// =============================================================================

/// One job pool per [`Route`].
pub struct DomainPools {
    pools: HashMap<Route, StagePool<Job>>,
}

impl DomainPools {
    pub fn spawn(threads: &PoolThreads) -> std::io::Result<Self> {
        let mut pools = HashMap::new();
        for route in Route::ALL {
            let count = match route {
                Route::BlockSave => threads.block_save,
                Route::Broadcast => threads.broadcast,
                Route::Chain => threads.chain,
                Route::Network => threads.network,
                Route::Transaction => threads.transaction,
                Route::Sync => threads.sync,
                Route::Save => threads.save,
                Route::Work => threads.generic,
            };
            let name = route.name();
            let pool = StagePool::spawn(name, count, crossbeam_channel::unbounded(), move |job| {
                run_job(name, job)
            })?;
            pools.insert(route, pool);
        }
        Ok(Self { pools })
    }

    pub fn submit(&self, route: Route, job: Job) -> Result<(), DispatchError> {
        self.pools
            .get(&route)
            .ok_or(DispatchError::PoolClosed { pool: route.name() })?
            .submit(job)
    }

    pub fn shutdown(&self) {
        for pool in self.pools.values() {
            pool.shutdown();
        }
    }
}
