//! # Heartbeat Monitor
//!
//! Sends a transport ping every `period` while a session is Active. The
//! monitor runs on its own task and only looks at the link's readiness flag,
//! so it never waits on (or holds up) the read path.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::transport::OutboundHandle;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct HeartbeatMonitor {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    /// Spawns the ping loop. The first ping goes out one full `period` after
    /// start. Cancelling `parent` stops the loop as well as [`stop`](Self::stop).
    pub fn start(period: Duration, outbound: OutboundHandle, parent: &CancellationToken) -> Self {
        let token = parent.child_token();
        let child = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => {
                        log::debug!("Heartbeat stopped.");
                        break;
                    }
                    _ = ticker.tick() => {
                        // Not ready: skip this beat and wait for the next one.
                        if !outbound.is_ready() {
                            continue;
                        }
                        match outbound.ping() {
                            Ok(()) => log::debug!("Ping sent"),
                            Err(e) => log::debug!("Ping skipped: {}", e),
                        }
                    }
                }
            }
        });

        Self {
            token,
            task: Some(task),
        }
    }

    /// Cancels the ping loop. Safe to call more than once.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished()) && !self.token.is_cancelled()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::OutboundFrame;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn link(ready: bool) -> (OutboundHandle, Arc<AtomicBool>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let flag = Arc::new(AtomicBool::new(ready));
        (OutboundHandle::new(tx, flag.clone()), flag, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_once_per_period() {
        let (outbound, _flag, mut rx) = link(true);
        let mut monitor = HeartbeatMonitor::start(Duration::from_secs(30), outbound, &CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Ping);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Ping);
        assert!(rx.try_recv().is_err());

        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_while_not_ready() {
        let (outbound, flag, mut rx) = link(false);
        let mut monitor = HeartbeatMonitor::start(Duration::from_secs(30), outbound, &CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(rx.try_recv().is_err());

        flag.store(true, Ordering::Release);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Ping);

        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_ping() {
        let (outbound, _flag, mut rx) = link(true);
        let mut monitor = HeartbeatMonitor::start(Duration::from_secs(30), outbound, &CancellationToken::new());
        assert!(monitor.is_running());

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_pings() {
        let (outbound, _flag, mut rx) = link(true);
        let parent = CancellationToken::new();
        let monitor = HeartbeatMonitor::start(Duration::from_secs(30), outbound, &parent);

        parent.cancel();
        assert!(!monitor.is_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }
}
