//! One-shot task scheduling
//!
//! The manager never spawns work itself. It hands futures to a `Scheduler`
//! together with a delay and keeps the returned handle so it can cancel a
//! refresh that has not fired yet. Production code uses `TokioScheduler`;
//! tests drive a manual scheduler or tokio's paused clock.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Unit of scheduled work.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to a scheduled task.
pub trait ScheduledTask: Send + Sync {
    /// Prevent the task from starting. A task that already started runs to
    /// completion.
    fn cancel(&self);
}

pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, delay: Duration, task: Task) -> Box<dyn ScheduledTask>;
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Scheduler that spawns each task onto a tokio runtime after `tokio::time::sleep`.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

struct TokioTask {
    state: Arc<AtomicU8>,
    abort: AbortHandle,
}

impl ScheduledTask for TokioTask {
    fn cancel(&self) {
        if self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.abort.abort();
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) -> Box<dyn ScheduledTask> {
        let state = Arc::new(AtomicU8::new(PENDING));
        let gate = state.clone();
        let join = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if gate
                .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            task.await;
        });
        Box::new(TokioTask {
            state,
            abort: join.abort_handle(),
        })
    }
}
