//! Detached, time-bounded execution of booking side effects.
//!
//! Calendar event creation/deletion and confirmation emails run after the booking transaction has
//! committed and the response is already on its way. They run on their own tokio tasks, so
//! dropping the originating request future never cancels them. Each task gets:
//!
//! - a permit from a shared semaphore (at most `max_concurrent` side effects execute at once),
//! - a hard deadline covering the wait for a permit plus the work itself,
//! - a log line on completion. Failures and timeouts are logged at `warn` and go nowhere else.
//!
//! All tasks are tracked so tests and graceful shutdown can wait for them with
//! [`SideEffects::wait_idle`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::config::SideEffectsConfig;

#[derive(Debug, Clone)]
pub struct SideEffects {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    timeout: Duration,
}

impl SideEffects {
    pub fn new(config: &SideEffectsConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            tracker: TaskTracker::new(),
            timeout: config.timeout,
        }
    }

    /// Run `work` in the background. Never blocks and never reports back to the caller.
    pub fn spawn<F, E>(&self, name: &'static str, work: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let deadline = self.timeout;

        self.tracker.spawn(async move {
            let bounded = tokio::time::timeout(deadline, async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!(side_effect = name, "Side effect semaphore closed, dropping work");
                        return None;
                    }
                };
                Some(work.await)
            });

            match bounded.await {
                Ok(Some(Ok(()))) => {
                    tracing::debug!(side_effect = name, "Side effect completed");
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(side_effect = name, error = %e, "Side effect failed");
                }
                Ok(None) => {}
                Err(_) => {
                    tracing::warn!(side_effect = name, timeout = ?deadline, "Side effect timed out");
                }
            }
        });
    }

    /// Number of side effects spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every side effect spawned so far has finished (or hit its deadline).
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
