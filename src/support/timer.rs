//! Periodic and one-shot timers.
//!
//! Thin wrappers around spawned tokio tasks. Every timer observes the
//! [`ShutdownSignal`] and its handle can be stopped at any time; `stop()` is
//! idempotent and no callback starts after it returns.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::shutdown::ShutdownSignal;

/// Handle to a running timer.
pub struct TimerHandle {
    name: &'static str,
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Stop the timer. Idempotent; callbacks that have not started yet will
    /// not run once this returns.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(timer = self.name, "Timer stopped");
        }
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Spawn a periodic timer firing every `period` until stopped or shut down.
///
/// The first tick fires after one full period, not immediately.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: ShutdownSignal,
    callback: F,
) -> TimerHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick of tokio's interval completes immediately; swallow it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    callback().await;
                }
                _ = shutdown.wait() => {
                    debug!(timer = name, "Timer shut down");
                    break;
                }
            }
        }
    });

    TimerHandle {
        name,
        stopped,
        task,
    }
}

/// Spawn a one-shot timer firing once after `delay` unless stopped first.
pub fn spawn_once<F, Fut>(
    name: &'static str,
    delay: Duration,
    shutdown: ShutdownSignal,
    callback: F,
) -> TimerHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();

    let task = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                if !flag.load(Ordering::SeqCst) {
                    callback().await;
                }
            }
            _ = shutdown.wait() => {
                debug!(timer = name, "Timer shut down before firing");
            }
        }
    });

    TimerHandle {
        name,
        stopped,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn one_shot_fires_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let _handle = spawn_once("test", Duration::from_millis(10), ShutdownSignal::new(), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_prevents_firing() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handle = spawn_once("test", Duration::from_millis(50), ShutdownSignal::new(), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        handle.stop();
        assert!(handle.is_stopped());
        handle.stop(); // idempotent

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn periodic_fires_repeatedly() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handle = spawn_periodic(
            "test",
            Duration::from_millis(10),
            ShutdownSignal::new(),
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn shutdown_stops_periodic_timer() {
        let shutdown = ShutdownSignal::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let _handle = spawn_periodic("test", Duration::from_millis(10), shutdown.clone(), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        shutdown.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), settled);
    }
}
