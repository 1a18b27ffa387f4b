//! Pipeline worker pool
//!
//! A fixed set of threads drains session rings. Sessions are pinned to at
//! most one worker at a time via their `in_worker` flag; a drained-but-not-
//! empty session goes back on the queue so no session can starve the rest.
//! Receive uses a timeout so shutdown stays responsive.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use cf_rt::StopToken;

use crate::session::SessionShared;

/// Idle poll interval; bounds shutdown latency
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Fixed thread pool draining session rings
pub(crate) struct WorkerPool {
    tx: Option<Sender<Arc<SessionShared>>>,
    stop: StopToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (tx, rx) = unbounded::<Arc<SessionShared>>();
        let stop = StopToken::new();

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = rx.clone();
            let tx = tx.clone();
            let stop = stop.clone();
            handles.push(std::thread::spawn(move || worker_loop(index, rx, tx, stop)));
        }
        log::debug!("worker pool started with {threads} threads");

        Self {
            tx: Some(tx),
            stop,
            handles,
        }
    }

    /// Hand a pinned session to a worker
    pub fn submit(&self, session: Arc<SessionShared>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(session);
        }
    }

    /// Stop the threads and join them
    pub fn shutdown(&mut self) {
        self.stop.stop();
        self.tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    index: usize,
    rx: Receiver<Arc<SessionShared>>,
    tx: Sender<Arc<SessionShared>>,
    stop: StopToken,
) {
    loop {
        match rx.recv_timeout(RECV_TIMEOUT) {
            Ok(session) => {
                if session.drain_for_worker() {
                    // Session re-pinned itself: more chunks are waiting.
                    let _ = tx.send(session);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if stop.is_stopped() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::trace!("worker {index} exited");
}
