//! Master election collaborators

pub mod lease;

pub use lease::LeaseMasterMonitor;

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Answers whether this instance is currently the master.
#[async_trait::async_trait]
pub trait MasterMonitor: Send + Sync {
    async fn is_master(&self) -> bool;

    /// Debug override that pins this instance as master regardless of election.
    fn force_always_master(&self);

    fn enable_verbose_logging(&self);
}

/// Monitor for standalone deployments and tests; mastership is set explicitly.
#[derive(Debug, Default)]
pub struct StaticMasterMonitor {
    master: AtomicBool,
    forced: AtomicBool,
    verbose: AtomicBool,
}

impl StaticMasterMonitor {
    pub fn new(master: bool) -> Self {
        Self {
            master: AtomicBool::new(master),
            ..Default::default()
        }
    }

    pub fn set_master(&self, master: bool) {
        self.master.store(master, Ordering::SeqCst);
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MasterMonitor for StaticMasterMonitor {
    async fn is_master(&self) -> bool {
        self.forced.load(Ordering::SeqCst) || self.master.load(Ordering::SeqCst)
    }

    fn force_always_master(&self) {
        info!("Forcing this instance to always be master");
        self.forced.store(true, Ordering::SeqCst);
    }

    fn enable_verbose_logging(&self) {
        self.verbose.store(true, Ordering::SeqCst);
    }
}
