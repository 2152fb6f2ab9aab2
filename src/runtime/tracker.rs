use crate::runtime::error::{RenderError, RenderResult};
use futures::channel::oneshot;
use futures::task::noop_waker;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Counts the asynchronous blocks still running in one render scope and keeps every
/// error they report, oldest first.
#[derive(Clone, Default)]
pub struct AsyncTracker {
    state: Rc<RefCell<TrackerState>>,
}

#[derive(Default)]
struct TrackerState {
    outstanding: usize,
    errors: Vec<RenderError>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl AsyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.state.borrow_mut().outstanding += 1;
    }

    pub fn end(&self) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if state.outstanding == 0 {
                tracing::error!("async tracker ended more blocks than it began");
                return;
            }
            state.outstanding -= 1;
            if state.outstanding > 0 {
                return;
            }
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    pub fn record_error(&self, error: RenderError) {
        tracing::debug!(%error, "async block failed");
        self.state.borrow_mut().errors.push(error);
    }

    pub fn outstanding(&self) -> usize {
        self.state.borrow().outstanding
    }

    pub fn first_error(&self) -> Option<RenderError> {
        self.state.borrow().errors.first().cloned()
    }

    pub fn errors(&self) -> Vec<RenderError> {
        self.state.borrow().errors.clone()
    }

    /// Completes once no tracked block is outstanding.
    pub async fn wait_all(&self) {
        loop {
            let receiver = {
                let mut state = self.state.borrow_mut();
                if state.outstanding == 0 {
                    return;
                }
                let (sender, receiver) = oneshot::channel();
                state.waiters.push(sender);
                receiver
            };
            let _ = receiver.await;
        }
    }

    /// Begins a tracked unit; `end` runs when the guard drops, on every exit path.
    pub fn guard(&self) -> TrackGuard {
        self.begin();
        TrackGuard {
            tracker: self.clone(),
        }
    }

    /// Runs `future` as a tracked block. It is polled once right away so that work which
    /// never suspends completes in line; anything still pending moves onto the local task
    /// set. A failure is recorded rather than returned.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = RenderResult<()>> + 'static,
    {
        let guard = self.guard();
        let tracker = self.clone();
        let mut task: Pin<Box<dyn Future<Output = ()>>> = Box::pin(async move {
            let _guard = guard;
            if let Err(error) = future.await {
                tracker.record_error(error);
            }
        });
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        if let Poll::Pending = task.as_mut().poll(&mut cx) {
            tokio::task::spawn_local(task);
        }
    }
}

pub struct TrackGuard {
    tracker: AsyncTracker,
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.tracker.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::task::LocalSet;

    #[test]
    fn extra_end_is_ignored() {
        let tracker = AsyncTracker::new();
        tracker.begin();
        tracker.end();
        tracker.end();
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn errors_keep_arrival_order() {
        let tracker = AsyncTracker::new();
        tracker.record_error(RenderError::custom("first"));
        tracker.record_error(RenderError::custom("second"));
        assert_eq!(tracker.first_error().unwrap().to_string(), "first");
        assert_eq!(tracker.errors().len(), 2);
    }

    #[tokio::test]
    async fn wait_all_returns_immediately_when_idle() {
        AsyncTracker::new().wait_all().await;
    }

    #[tokio::test]
    async fn synchronous_block_finishes_in_line() {
        let tracker = AsyncTracker::new();
        let hit = Rc::new(RefCell::new(false));
        let flag = hit.clone();
        tracker.spawn(async move {
            *flag.borrow_mut() = true;
            Ok(())
        });
        assert!(*hit.borrow());
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn waits_for_suspended_blocks_and_captures_errors() {
        LocalSet::new()
            .run_until(async {
                let tracker = AsyncTracker::new();
                tracker.spawn(async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(RenderError::custom("late failure"))
                });
                tracker.spawn(async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(())
                });
                assert_eq!(tracker.outstanding(), 2);
                tracker.wait_all().await;
                assert_eq!(tracker.outstanding(), 0);
                assert_eq!(tracker.first_error().unwrap().to_string(), "late failure");
            })
            .await;
    }
}
