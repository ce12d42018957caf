// src/enhance/pool.rs
//! Bounded worker pool: a fixed-size channel of keys consumed by N long-lived
//! workers. Each unit runs on the blocking pool and yields its own result, so
//! a failing, panicking or hung unit never stops the others. A worker whose
//! unit timed out reports it and then waits for that thread before taking the
//! next key, so at most `width` units are ever running.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("{0}")]
    Failed(String),
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug)]
pub struct UnitOutcome<K, T> {
    pub key: K,
    pub result: Result<T, UnitError>,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    width: usize,
    unit_timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(width: usize, unit_timeout: Option<Duration>) -> Self {
        Self {
            width: width.max(1),
            unit_timeout,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run `work` once per key with at most `width` units in flight.
    /// Outcomes arrive in completion order.
    pub async fn run<K, T, F>(&self, keys: Vec<K>, work: F) -> Vec<UnitOutcome<K, T>>
    where
        K: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(K) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        if keys.is_empty() {
            return Vec::new();
        }
        let work = Arc::new(work);
        let (key_tx, key_rx) = mpsc::channel::<K>(self.width);
        let key_rx = Arc::new(Mutex::new(key_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let mut workers = JoinSet::new();
        for _ in 0..self.width.min(keys.len()) {
            let key_rx = Arc::clone(&key_rx);
            let done_tx = done_tx.clone();
            let work = Arc::clone(&work);
            let timeout = self.unit_timeout;
            workers.spawn(async move {
                loop {
                    let next = key_rx.lock().await.recv().await;
                    let Some(key) = next else { break };
                    let (result, straggler) = run_unit(Arc::clone(&work), key.clone(), timeout).await;
                    let sent = done_tx.send(UnitOutcome { key, result });
                    // The slot stays taken until a timed-out unit's thread ends.
                    if let Some(h) = straggler {
                        let _ = h.await;
                    }
                    if sent.is_err() {
                        break;
                    }
                }
            });
        }
        drop(done_tx);

        for key in keys {
            if key_tx.send(key).await.is_err() {
                break;
            }
        }
        drop(key_tx);

        while workers.join_next().await.is_some() {}

        let mut outcomes = Vec::new();
        while let Some(o) = done_rx.recv().await {
            outcomes.push(o);
        }
        outcomes
    }
}

/// A timed-out unit is reported at once, but its blocking thread cannot be
/// interrupted; its handle comes back so the caller can wait it out. The
/// eventual result is discarded.
async fn run_unit<K, T, F>(
    work: Arc<F>,
    key: K,
    timeout: Option<Duration>,
) -> (Result<T, UnitError>, Option<JoinHandle<anyhow::Result<T>>>)
where
    K: Send + 'static,
    T: Send + 'static,
    F: Fn(K) -> anyhow::Result<T> + Send + Sync + 'static,
{
    let mut handle = tokio::task::spawn_blocking(move || work(key));
    let joined = match timeout {
        Some(t) => match tokio::time::timeout(t, &mut handle).await {
            Ok(j) => j,
            Err(_) => return (Err(UnitError::TimedOut(t)), Some(handle)),
        },
        None => handle.await,
    };
    let result = match joined {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(UnitError::Failed(format!("{e:#}"))),
        Err(e) if e.is_panic() => Err(UnitError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(UnitError::Failed(e.to_string())),
    };
    (result, None)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
