#![allow(dead_code)]

use kh_core::checks::{CheckDefinition, CheckExecutor, StopHandle};
use kh_core::CheckError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts live check tasks per name. The count drops when the task ends or is aborted.
#[derive(Default)]
pub struct TrackingExecutor {
    live: Arc<Mutex<HashMap<String, usize>>>,
    max_live: Arc<AtomicUsize>,
    starts: AtomicUsize,
    stop_delay: Duration,
    hung: HashSet<String>,
}

struct LiveGuard {
    name: String,
    live: Arc<Mutex<HashMap<String, usize>>>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&self.name) {
            *count -= 1;
        }
    }
}

impl TrackingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn with_hung_check(mut self, name: &str) -> Self {
        self.hung.insert(name.to_string());
        self
    }

    pub fn live(&self, name: &str) -> usize {
        self.live.lock().get(name).copied().unwrap_or(0)
    }

    pub fn total_live(&self) -> usize {
        self.live.lock().values().sum()
    }

    pub fn max_live_per_name(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CheckExecutor for TrackingExecutor {
    async fn start(&self, definition: &CheckDefinition) -> Result<StopHandle, CheckError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        {
            let mut live = self.live.lock();
            let count = live.entry(definition.name.clone()).or_insert(0);
            *count += 1;
            self.max_live.fetch_max(*count, Ordering::SeqCst);
        }

        let guard = LiveGuard {
            name: definition.name.clone(),
            live: self.live.clone(),
        };
        let hung = self.hung.contains(&definition.name);
        let stop_delay = self.stop_delay;

        Ok(StopHandle::spawn(&definition.name, move |mut stop| async move {
            let _guard = guard;
            if hung {
                std::future::pending::<()>().await;
            }
            stop.stopped().await;
            tokio::time::sleep(stop_delay).await;
        }))
    }
}

/// Token generator that hands out the given tokens in order.
pub fn scripted_tokens(tokens: &[&str]) -> impl Fn() -> String + Send + Sync + 'static {
    let queue = Mutex::new(tokens.iter().map(|t| t.to_string()).collect::<VecDeque<_>>());
    move || queue.lock().pop_front().unwrap_or_default()
}
