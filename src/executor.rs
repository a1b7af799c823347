//! Single-threaded and multi-worker execution of an [`ExecutableGraph`].
//!
//! The single-threaded and worker-pool variants share one implementation: a
//! pool of `thread_count` workers (the calling thread itself when
//! `thread_count == 1`, to avoid spawning a thread just to immediately join
//! it) drains a single MPMC ready queue built on `crossbeam-channel`. Workers
//! block on the channel; the last [`TaskWrapper`] to reach a terminal state
//! broadcasts one shutdown message per worker so nobody blocks forever.

use crate::executable_graph::ExecutableGraph;
use crate::graph_core::StepIdx;
use crate::task_wrapper::{TaskState, TaskWrapper};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Configuration for an [`Executor`]. The crate's entire configuration
/// surface: there is no config file or environment variable to load.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// `0` resolves to hardware parallelism at execution time; `1` runs
    /// strictly sequentially on the calling thread.
    pub thread_count: usize,
    pub collect_timing: bool,
    pub abort_on_failure: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_count: 0,
            collect_timing: false,
            abort_on_failure: false,
        }
    }
}

/// Aggregated outcome of one [`Executor::execute`] call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub stopped: bool,
    pub completed_steps: Vec<StepIdx>,
    pub failed_steps: Vec<StepIdx>,
    /// Aligned with `failed_steps`.
    pub error_messages: Vec<String>,
    pub cancelled_steps: Vec<StepIdx>,
    pub total_duration: Duration,
    /// Present only when `collect_timing` was set; aligned with all steps.
    pub step_durations: Option<Vec<Duration>>,
}

enum QueueMsg {
    Run(StepIdx),
    Shutdown,
}

/// Shared state every [`TaskWrapper`] and worker thread reads and mutates.
/// Lives behind an `Arc`; wrappers hold only a [`Weak`] handle to it so the
/// executor and its wrappers can never leak each other.
pub(crate) struct ExecutorInner {
    graph: Arc<ExecutableGraph>,
    wrappers: Vec<TaskWrapper>,
    tx: Sender<QueueMsg>,
    rx: Receiver<QueueMsg>,
    stop: AtomicBool,
    completed_count: AtomicUsize,
    num_workers: usize,
    config: ExecutorConfig,
}

impl ExecutorInner {
    pub(crate) fn graph(&self) -> &ExecutableGraph {
        &self.graph
    }

    pub(crate) fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub(crate) fn wrapper(&self, idx: StepIdx) -> &TaskWrapper {
        &self.wrappers[idx]
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            info!("request_stop asserted");
        }
    }

    pub(crate) fn enqueue(&self, idx: StepIdx) {
        let _ = self.tx.send(QueueMsg::Run(idx));
    }

    /// Called exactly once per wrapper, at the end of its `run()`. When
    /// every step has reached a terminal state, broadcasts one shutdown
    /// message per worker so nobody blocks on the now-permanently-empty
    /// queue.
    pub(crate) fn notify_completion(&self) {
        let done = self.completed_count.fetch_add(1, Ordering::AcqRel) + 1;
        if done == self.graph.step_count() {
            for _ in 0..self.num_workers.max(1) {
                let _ = self.tx.send(QueueMsg::Shutdown);
            }
        }
    }
}

/// Drives one [`ExecutableGraph`] to completion.
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn resolved_thread_count(&self) -> usize {
        match self.config.thread_count {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    /// Runs `graph` to completion, blocking the calling thread until every
    /// step has reached a terminal state (or been cancelled following a
    /// stop request).
    pub fn execute(&self, graph: Arc<ExecutableGraph>) -> ExecutionResult {
        let start = Instant::now();
        let step_count = graph.step_count();
        if step_count == 0 {
            return ExecutionResult {
                success: true,
                stopped: false,
                completed_steps: Vec::new(),
                failed_steps: Vec::new(),
                error_messages: Vec::new(),
                cancelled_steps: Vec::new(),
                total_duration: start.elapsed(),
                step_durations: self.config.collect_timing.then(Vec::new),
            };
        }

        let num_workers = self.resolved_thread_count();
        let (tx, rx) = unbounded();
        let graph_for_inner = graph.clone();
        let config = self.config;

        let inner = Arc::new_cyclic(move |weak: &Weak<ExecutorInner>| {
            let wrappers = (0..step_count)
                .map(|idx| {
                    TaskWrapper::new(
                        idx,
                        graph_for_inner.predecessor_count(idx),
                        graph_for_inner.successors(idx).to_vec(),
                        weak.clone(),
                    )
                })
                .collect();
            ExecutorInner {
                graph: graph_for_inner,
                wrappers,
                tx,
                rx,
                stop: AtomicBool::new(false),
                completed_count: AtomicUsize::new(0),
                num_workers,
                config,
            }
        });

        for idx in graph.get_initial_ready_steps() {
            // Freshly built wrappers with zero predecessors start Ready;
            // this is the one queue submission not driven by a
            // predecessor's notification.
            debug_assert_eq!(inner.wrapper(idx).state(), TaskState::Ready);
            if inner.wrapper(idx).mark_queued() {
                inner.enqueue(idx);
            }
        }

        if num_workers <= 1 {
            worker_loop(&inner);
        } else {
            let handles: Vec<_> = (0..num_workers)
                .map(|_| {
                    let inner = inner.clone();
                    std::thread::spawn(move || worker_loop(&inner))
                })
                .collect();
            for h in handles {
                let _ = h.join();
            }
        }

        build_result(&inner, start.elapsed())
    }
}

fn worker_loop(inner: &Arc<ExecutorInner>) {
    loop {
        match inner.rx.recv() {
            Ok(QueueMsg::Run(idx)) => inner.wrapper(idx).run(),
            Ok(QueueMsg::Shutdown) => break,
            Err(_) => break,
        }
    }
}

fn build_result(inner: &ExecutorInner, total_duration: Duration) -> ExecutionResult {
    let step_count = inner.graph.step_count();
    let mut completed_steps = Vec::new();
    let mut failed_steps = Vec::new();
    let mut error_messages = Vec::new();
    let mut cancelled_steps = Vec::new();
    let mut step_durations = inner.config.collect_timing.then(Vec::new);

    for idx in 0..step_count {
        let wrapper = inner.wrapper(idx);
        match wrapper.state() {
            TaskState::Succeeded => completed_steps.push(idx),
            TaskState::Failed => {
                failed_steps.push(idx);
                error_messages.push(wrapper.error_message().unwrap_or_default());
            }
            TaskState::Cancelled => cancelled_steps.push(idx),
            other => {
                // Should not happen: every wrapper calls notify_completion
                // exactly once at the end of run(). Treated as cancelled
                // defensively so completion accounting (P9) still holds.
                warn!(step = idx, state = ?other, "step left non-terminal at teardown");
                cancelled_steps.push(idx);
            }
        }
        if let Some(durations) = step_durations.as_mut() {
            durations.push(wrapper.duration());
        }
    }

    let stopped = inner.stop_requested();
    let success = failed_steps.is_empty() && cancelled_steps.is_empty() && !stopped;

    ExecutionResult {
        success,
        stopped,
        completed_steps,
        failed_steps,
        error_messages,
        cancelled_steps,
        total_duration,
        step_durations,
    }
}
