//! Heartbeat liveness monitoring.
//!
//! Each connection runs one monitor with two timers: an interval that pings
//! idle peers and a deadline at `last_heartbeat + timeout`. The deadline
//! moves forward whenever the router records a ping, pong or heartbeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::connection::AgentConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No liveness signal within the timeout window.
    TimedOut,
    /// The monitor was cancelled externally.
    Cancelled,
}

/// Timer settings for one monitor.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSettings {
    /// Idle ping period.
    pub interval: Duration,
    /// Silence that triggers eviction.
    pub timeout: Duration,
    /// Whether to ping connections idle for a full interval.
    pub ping_idle: bool,
}

/// Watch `connection` until it times out or `cancel` fires.
pub async fn run_heartbeat(
    connection: Arc<AgentConnection>,
    settings: HeartbeatSettings,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let interval = settings.interval.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        let deadline = connection.last_heartbeat() + settings.timeout;
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            () = time::sleep_until(deadline) => {
                // The deadline may have moved while sleeping.
                if connection.heartbeat_elapsed() >= settings.timeout {
                    return HeartbeatResult::TimedOut;
                }
            }
            _ = ticker.tick() => {
                if settings.ping_idle && connection.heartbeat_elapsed() >= interval {
                    trace!(connection_id = %connection.id, "pinging idle connection");
                    let _ = connection.ping();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use crate::websocket::connection::tests::open_connection;

    fn settings(interval_ms: u64, timeout_ms: u64, ping_idle: bool) -> HeartbeatSettings {
        HeartbeatSettings {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            ping_idle,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out() {
        let (conn, _rx) = open_connection("a", 8);
        let started = time::Instant::now();
        let result = run_heartbeat(conn, settings(100, 300, false), CancellationToken::new()).await;
        assert_eq!(result, HeartbeatResult::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn cancelled_before_timeout() {
        let (conn, _rx) = open_connection("a", 8);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            run_heartbeat(conn, settings(60_000, 180_000, true), cancel2).await
        });
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn touches_extend_the_deadline() {
        let (conn, _rx) = open_connection("a", 8);
        let conn2 = conn.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            run_heartbeat(conn2, settings(100, 300, false), cancel2).await
        });

        for _ in 0..10 {
            time::sleep(Duration::from_millis(200)).await;
            conn.touch();
        }
        assert!(!handle.is_finished());
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_then_silence_times_out_later() {
        let (conn, _rx) = open_connection("a", 8);
        let conn2 = conn.clone();
        let start = time::Instant::now();
        let handle = tokio::spawn(async move {
            run_heartbeat(conn2, settings(50, 300, false), CancellationToken::new()).await
        });
        time::sleep(Duration::from_millis(250)).await;
        conn.touch();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(550));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_pinged() {
        let (conn, mut rx) = open_connection("a", 8);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let conn2 = conn.clone();
        let handle = tokio::spawn(async move {
            run_heartbeat(conn2, settings(100, 10_000, true), cancel2).await
        });
        let frame = rx.recv().await;
        assert_eq!(frame, Some(Outbound::Ping));
        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_ping_when_disabled() {
        let (conn, mut rx) = open_connection("a", 8);
        let result = run_heartbeat(conn, settings(100, 350, false), CancellationToken::new()).await;
        assert_eq!(result, HeartbeatResult::TimedOut);
        assert!(rx.try_recv().is_err());
    }
}
