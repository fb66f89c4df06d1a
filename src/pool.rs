//! Bounded worker pool for asynchronous command execution.
//!
//! Every submitted command runs on its own tokio task, but must hold a
//! [`Semaphore`] permit for the whole handler execution. The permit count is
//! the pool size, so at most `size` handlers run at once and the rest queue
//! on the semaphore.
//!
//! A [`CommandHandle`] tracks each submission through
//! `Submitted -> Executing -> {Completed | Failed | TimedOut}`. Transitions
//! are compare-and-swap on a shared [`AtomicU8`], so a late completion never
//! overwrites a timeout and a timeout never overwrites a completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::AbortHandle;

use crate::error::{DeviceCommError, Result};
use crate::handler::ProtocolProcessResult;

/// Lifecycle of one submitted command. No retries, so no back edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandState {
    /// Queued for a worker permit.
    Submitted = 0,
    /// Handler running.
    Executing = 1,
    /// Handler returned a result, success or business failure.
    Completed = 2,
    /// Handler returned an error, panicked, or was aborted.
    Failed = 3,
    /// Caller stopped waiting before the handler finished.
    TimedOut = 4,
}

impl CommandState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Submitted,
            1 => Self::Executing,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::TimedOut,
        }
    }

    /// True once no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// Move to a terminal state unless one was already reached.
fn settle(state: &AtomicU8, to: CommandState) -> bool {
    let mut current = state.load(Ordering::Acquire);
    loop {
        if CommandState::from_u8(current).is_terminal() {
            return false;
        }
        match state.compare_exchange_weak(current, to as u8, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
}

/// Semaphore-bounded pool of handler tasks.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool that runs at most `size` commands at once.
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configured permit count.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Commands submitted and not yet finished (queued or running).
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Permits not currently held by a running handler.
    #[inline]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawn `work` onto the current tokio runtime, gated by a pool permit.
    ///
    /// Fails with [`DeviceCommError::WorkerLost`] outside a runtime.
    pub fn submit<F>(&self, work: F) -> Result<CommandHandle>
    where
        F: Future<Output = Result<ProtocolProcessResult>> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| {
            DeviceCommError::WorkerLost(format!("no tokio runtime to run the command: {e}"))
        })?;

        let state = Arc::new(AtomicU8::new(CommandState::Submitted as u8));
        let finished = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let guard = InFlightGuard::new(self.in_flight.clone(), state.clone(), finished.clone());
        let permits = self.permits.clone();
        let task_state = state.clone();

        let task = runtime.spawn(async move {
            // Held until the task ends, including on abort or panic
            let _guard = guard;

            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    settle(&task_state, CommandState::Failed);
                    let _ = tx.send(Err(DeviceCommError::WorkerLost(
                        "worker pool closed".to_string(),
                    )));
                    return;
                }
            };

            let _ = task_state.compare_exchange(
                CommandState::Submitted as u8,
                CommandState::Executing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );

            let outcome = work.await;

            let settled = match &outcome {
                Ok(_) => settle(&task_state, CommandState::Completed),
                Err(_) => settle(&task_state, CommandState::Failed),
            };
            if !settled {
                tracing::debug!("Detached command finished after its caller gave up");
            }

            // Receiver is gone when the caller detached
            let _ = tx.send(outcome);
        });

        Ok(CommandHandle {
            rx: Some(rx),
            state,
            finished,
            abort: task.abort_handle(),
        })
    }
}

/// Tracks one pool task; settles the command as failed if the task ends
/// without reporting (abort or panic).
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    state: Arc<AtomicU8>,
    finished: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn new(in_flight: Arc<AtomicUsize>, state: Arc<AtomicU8>, finished: Arc<AtomicBool>) -> Self {
        in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            in_flight,
            state,
            finished,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        settle(&self.state, CommandState::Failed);
        self.finished.store(true, Ordering::Release);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pending result of a command submitted to the [`WorkerPool`].
///
/// Await it to get the handler outcome. Dropping the handle detaches the
/// command; it still runs to completion.
#[derive(Debug)]
pub struct CommandHandle {
    rx: Option<oneshot::Receiver<Result<ProtocolProcessResult>>>,
    state: Arc<AtomicU8>,
    finished: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl CommandHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> CommandState {
        CommandState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once the handler task has ended, whatever the outcome.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Wait at most `timeout` for the outcome.
    ///
    /// Returns `None` if the deadline passed first. The command is left
    /// running and the handle may be awaited again.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<ProtocolProcessResult>> {
        tokio::time::timeout(timeout, &mut *self).await.ok()
    }

    /// Cancel the command at its next suspension point.
    pub fn abort(&self) {
        settle(&self.state, CommandState::Failed);
        self.abort.abort();
    }

    /// Record that the caller gave up. Returns false if the command had
    /// already settled.
    pub(crate) fn mark_timed_out(&self) -> bool {
        settle(&self.state, CommandState::TimedOut)
    }
}

impl Future for CommandHandle {
    type Output = Result<ProtocolProcessResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(Err(DeviceCommError::WorkerLost(
                "command result already taken".to_string(),
            )));
        };

        match Pin::new(rx).poll(cx) {
            Poll::Ready(outcome) => {
                self.rx = None;
                Poll::Ready(outcome.unwrap_or_else(|_| {
                    Err(DeviceCommError::WorkerLost(
                        "worker ended without reporting a result".to_string(),
                    ))
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
