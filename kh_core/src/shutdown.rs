//! Graceful shutdown: after the first termination signal, drain running checks while racing a
//! second signal and the grace period.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every check stopped before the deadline.
    Graceful,
    /// A second signal arrived while draining.
    Forced,
    /// The grace period elapsed while draining.
    TimedOut,
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownOutcome::Graceful => 0,
            ShutdownOutcome::Forced | ShutdownOutcome::TimedOut => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownState {
    pub signal_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    pub outcome: ShutdownOutcome,
    pub state: ShutdownState,
}

pub struct ShutdownCoordinator {
    grace_period: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Waits for the first signal, then runs `drain` and returns whichever of drain completion,
    /// a second signal or the grace deadline comes first. A closed signal channel counts as a
    /// signal while idle and is ignored while draining.
    pub async fn run<F, Fut>(&self, mut signals: mpsc::Receiver<ShutdownSignal>, drain: F) -> ShutdownReport
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let first = signals.recv().await;
        info!(signal = ?first, grace_period = ?self.grace_period, "Shutdown requested; stopping all checks");

        let mut state = ShutdownState {
            signal_count: 1,
            started_at: Utc::now(),
            completed: false,
        };

        let started = tokio::time::Instant::now();
        let mut drain_task = tokio::spawn(drain());
        let deadline = tokio::time::sleep(self.grace_period);
        tokio::pin!(deadline);

        let second_signal = async {
            match signals.recv().await {
                Some(signal) => signal,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            result = &mut drain_task => {
                if let Err(e) = result {
                    warn!(error = %e, "Drain task ended abnormally");
                }
                state.completed = true;
                info!(elapsed = ?started.elapsed(), "Shutdown completed gracefully");
                ShutdownOutcome::Graceful
            }
            signal = second_signal => {
                state.signal_count += 1;
                warn!(signal = ?signal, "Second signal received; forcing shutdown without waiting for checks");
                ShutdownOutcome::Forced
            }
            _ = &mut deadline => {
                error!(grace_period = ?self.grace_period, "Shutdown timed out; forcing exit");
                ShutdownOutcome::TimedOut
            }
        };

        if !state.completed {
            drain_task.abort();
        }

        ShutdownReport { outcome, state }
    }
}

/// Forwards SIGINT and SIGTERM into a channel for [`ShutdownCoordinator::run`].
pub fn listen_for_signals() -> mpsc::Receiver<ShutdownSignal> {
    let (tx, rx) = mpsc::channel(4);

    let interrupt_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            info!("Received Ctrl+C");
            if interrupt_tx.send(ShutdownSignal::Interrupt).await.is_err() {
                return;
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                return;
            }
        };

        while terminate.recv().await.is_some() {
            info!("Received SIGTERM");
            if tx.send(ShutdownSignal::Terminate).await.is_err() {
                return;
            }
        }
    });

    #[cfg(not(unix))]
    drop(tx);

    rx
}
