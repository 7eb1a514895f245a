//! The keepalive supervisor: a ping loop that is restarted, after reconnecting, whenever it exits
//! early because of a connection failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::defaults;
use crate::error::Result;

/// Anything a [`Keepalive`] supervisor can ping and, on failure, reconnect. Implemented by
/// `Session` and `StreamSession`.
#[async_trait]
pub trait PingTarget: Send + Sync + 'static {
    /// Send one keepalive ping.
    async fn ping(&self) -> Result<()>;

    /// Re-establish the connection this target pings, including re-authentication or
    /// re-subscription as appropriate.
    async fn reconnect(&self) -> Result<()>;
}

/// Owns the supervisor task pinging a [`PingTarget`] on an interval, reconnecting and resuming
/// whenever a ping fails with a retryable error.
pub struct Keepalive {
    run: Arc<AtomicBool>,
    supervisor: JoinHandle<()>,
}

impl Keepalive {
    /// Start pinging `target` every [`defaults::ping_interval`], checked at
    /// [`defaults::thread_ticker`] granularity so shutdown is prompt.
    pub fn start<T: PingTarget>(target: Arc<T>) -> Self {
        let run = Arc::new(AtomicBool::new(true));
        let supervisor = tokio::spawn(supervise(target, run.clone()));
        Keepalive { run, supervisor }
    }

    /// Stop the supervisor task and wait for it to exit.
    pub async fn shutdown(self) {
        self.run.store(false, Ordering::SeqCst);
        let _ = self.supervisor.await;
    }
}

/// Runs the ping loop; when it exits because of a retryable error, reconnects and starts it
/// again. This is the "monitor respawns the ping task" behavior, expressed as one outer loop
/// rather than two tasks watching each other, since only one of them is ever pinging at a time.
async fn supervise<T: PingTarget>(target: Arc<T>, run: Arc<AtomicBool>) {
    loop {
        if !run.load(Ordering::SeqCst) {
            return;
        }

        match ping_loop(&*target, &run).await {
            PingLoopExit::Stopped => return,
            PingLoopExit::ConnectionLost => {
                tracing::warn!("keepalive ping failed, reconnecting before resuming");
                if let Err(error) = target.reconnect().await {
                    tracing::error!(%error, "keepalive reconnect failed, retrying shortly");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

enum PingLoopExit {
    Stopped,
    ConnectionLost,
}

async fn ping_loop<T: PingTarget>(target: &T, run: &Arc<AtomicBool>) -> PingLoopExit {
    let mut elapsed = Duration::ZERO;
    let tick = defaults::thread_ticker();
    let interval = defaults::ping_interval();

    while run.load(Ordering::SeqCst) {
        tokio::time::sleep(tick).await;
        elapsed += tick;
        if elapsed < interval {
            continue;
        }
        elapsed = Duration::ZERO;

        if let Err(error) = target.ping().await {
            tracing::warn!(%error, "keepalive ping failed");
            if error.is_retryable() {
                return PingLoopExit::ConnectionLost;
            }
        }
    }
    PingLoopExit::Stopped
}
