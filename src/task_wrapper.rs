//! Per-step orchestration unit: the state machine, predecessor counter, and
//! successor-notification logic that drives one step through the graph.
//!
//! Wrappers never own their successors or the executor: each holds a plain
//! successor index list (resolved against the shared [`ExecutableGraph`])
//! and a [`Weak`] handle back to the owning [`crate::executor::ExecutorInner`].
//! A cyclic strong-reference graph would leak on every run, and indices cost
//! nothing to hold, so weak handles are the natural fit here.

use crate::executor::ExecutorInner;
use crate::graph_core::StepIdx;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    NotReady = 0,
    Ready = 1,
    Queued = 2,
    Executing = 3,
    Succeeded = 4,
    Failed = 5,
    Cancelled = 6,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::NotReady,
            1 => TaskState::Ready,
            2 => TaskState::Queued,
            3 => TaskState::Executing,
            4 => TaskState::Succeeded,
            5 => TaskState::Failed,
            6 => TaskState::Cancelled,
            _ => unreachable!("invalid TaskState encoding"),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

pub(crate) struct TaskWrapper {
    pub(crate) step_idx: StepIdx,
    state: AtomicU8,
    predecessors_remaining: AtomicUsize,
    successors: Vec<StepIdx>,
    executor: Weak<ExecutorInner>,
    timing: Mutex<(Option<Instant>, Option<Instant>)>,
    error_message: Mutex<Option<String>>,
}

impl TaskWrapper {
    pub(crate) fn new(
        step_idx: StepIdx,
        predecessor_count: usize,
        successors: Vec<StepIdx>,
        executor: Weak<ExecutorInner>,
    ) -> Self {
        let initial = if predecessor_count == 0 {
            TaskState::Ready
        } else {
            TaskState::NotReady
        };
        Self {
            step_idx,
            state: AtomicU8::new(initial as u8),
            predecessors_remaining: AtomicUsize::new(predecessor_count),
            successors,
            executor,
            timing: Mutex::new((None, None)),
            error_message: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn error_message(&self) -> Option<String> {
        self.error_message.lock().clone()
    }

    pub(crate) fn duration(&self) -> Duration {
        let (start, end) = *self.timing.lock();
        match (start, end) {
            (Some(s), Some(e)) => e.saturating_duration_since(s),
            _ => Duration::ZERO,
        }
    }

    /// Marks the wrapper `Queued`, the transition performed by whichever
    /// actor (initial seeding, or a predecessor's notification) submits it
    /// to the ready queue. Only legal from `Ready`.
    pub(crate) fn mark_queued(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Ready as u8,
                TaskState::Queued as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Runs this step to completion (or cancellation), then notifies
    /// successors and the executor: look up the executor, bail out early on
    /// a stop request, CAS into `Executing`, run the step under
    /// `catch_unwind`, record its outcome and timing, then notify
    /// successors and signal completion.
    pub(crate) fn run(&self) {
        let Some(executor) = self.executor.upgrade() else {
            return;
        };

        if executor.stop_requested() {
            self.state.store(TaskState::Cancelled as u8, Ordering::Release);
            trace!(step = self.step_idx, "cancelled before execution");
            self.notify_successors(&executor);
            executor.notify_completion();
            return;
        }

        if self
            .state
            .compare_exchange(
                TaskState::Queued as u8,
                TaskState::Executing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Already cancelled or otherwise not in Queued; nothing to run.
            executor.notify_completion();
            return;
        }

        let collect_timing = executor.config().collect_timing;
        if collect_timing {
            self.timing.lock().0 = Some(Instant::now());
        }

        let step = executor.graph().step(self.step_idx).clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| step.execute()));

        match outcome {
            Ok(Ok(())) => {
                self.state.store(TaskState::Succeeded as u8, Ordering::Release);
            }
            Ok(Err(err)) => {
                *self.error_message.lock() = Some(err.to_string());
                self.state.store(TaskState::Failed as u8, Ordering::Release);
                error!(step = self.step_idx, error = %err, "step failed");
                if executor.config().abort_on_failure {
                    executor.request_stop();
                }
            }
            Err(panic) => {
                let message = panic_message(panic);
                *self.error_message.lock() = Some(message.clone());
                self.state.store(TaskState::Failed as u8, Ordering::Release);
                error!(step = self.step_idx, panic = %message, "step panicked");
                if executor.config().abort_on_failure {
                    executor.request_stop();
                }
            }
        }

        if collect_timing {
            self.timing.lock().1 = Some(Instant::now());
        }

        self.notify_successors(&executor);
        executor.notify_completion();
    }

    /// Decrements every successor's predecessor counter; any that reach
    /// zero are marked `Ready` then `Queued` and handed to the executor.
    /// Runs identically whether this wrapper succeeded, failed, or was
    /// cancelled, so a cancellation propagates to successors through the
    /// same notification path as an ordinary completion.
    fn notify_successors(&self, executor: &ExecutorInner) {
        for &succ_idx in &self.successors {
            let succ = executor.wrapper(succ_idx);
            let remaining = succ.predecessors_remaining.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(remaining >= 1, "predecessor counter underflow");
            if remaining == 1 {
                succ.state.store(TaskState::Ready as u8, Ordering::Release);
                if succ.mark_queued() {
                    executor.enqueue(succ_idx);
                } else {
                    warn!(
                        step = succ_idx,
                        "successor became ready but was not in Ready state"
                    );
                }
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked with a non-string payload".to_string()
    }
}
