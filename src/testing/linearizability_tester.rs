use rayon::prelude::*;
use rayon::{ThreadPoolBuildError, ThreadPoolBuilder};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::automaton;
use super::specification::Specification;
use super::time_stamped::{Event, TimeStamped};

/// Runs a worker on several threads against a concurrent object, then checks the recorded
/// history against a sequential specification.
pub struct LinearizabilityTester<C, S: Specification> {
    num_threads: usize,
    concurrent: C,
    sequential: S,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LinearizabilityResult {
    Success,
    /// The offending history, one event per line in timestamp order.
    Failure(String),
}

impl<C: Sync, S: Specification> LinearizabilityTester<C, S>
where
    S::Op: Send,
    S::Ret: Send,
{
    pub fn new(num_threads: usize, concurrent: C, sequential: S) -> Self {
        LinearizabilityTester {
            num_threads,
            concurrent,
            sequential,
        }
    }

    /// Run `worker` once on each of the tester's threads, passing each its thread number and
    /// its log. Every operation a worker wants checked must go through `ThreadLog::log`.
    pub fn run<F>(&self, worker: F) -> Result<LinearizabilityResult, ThreadPoolBuildError>
    where
        F: Fn(usize, &mut ThreadLog<'_, C, S>) + Sync,
    {
        let num_threads = self.num_threads;
        let pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;

        let clock = AtomicU64::new(0);
        let op_counter = AtomicUsize::new(0);
        let concurrent = &self.concurrent;
        let worker = &worker;

        let logs: Vec<Vec<TimeStamped<S::Op, S::Ret>>> = pool.install(|| {
            (0..num_threads)
                .into_par_iter()
                .map(|id| {
                    let mut log = ThreadLog {
                        id,
                        concurrent,
                        clock: &clock,
                        op_counter: &op_counter,
                        events: Vec::new(),
                    };
                    worker(id, &mut log);
                    log.events
                })
                .collect()
        });

        let mut history: Vec<TimeStamped<S::Op, S::Ret>> = logs.into_iter().flatten().collect();
        history.sort();

        if automaton::is_linearizable(&self.sequential, &history) {
            Ok(LinearizabilityResult::Success)
        } else {
            Ok(LinearizabilityResult::Failure(render(&history)))
        }
    }
}

fn render<Op: std::fmt::Debug, Ret: std::fmt::Debug>(history: &[TimeStamped<Op, Ret>]) -> String {
    let mut out = String::new();
    for stamped in history {
        // Writing to a String cannot fail.
        let _ = match stamped.event {
            Event::Invoke(ref invoke) => writeln!(
                out,
                "{:>6} thread {} invoke #{} {:?}",
                stamped.stamp, invoke.thread, invoke.id, invoke.op
            ),
            Event::Return(ref ret) => writeln!(
                out,
                "{:>6} thread {} return #{} {:?}",
                stamped.stamp, ret.thread, ret.id, ret.result
            ),
        };
    }
    out
}

/// The per-thread log of a linearizability run.
pub struct ThreadLog<'a, C, S: Specification> {
    id: usize,
    concurrent: &'a C,
    clock: &'a AtomicU64,
    op_counter: &'a AtomicUsize,
    events: Vec<TimeStamped<S::Op, S::Ret>>,
}

impl<'a, C, S: Specification> ThreadLog<'a, C, S> {
    /// Perform `f` on the concurrent object, recording it as the sequential operation `op`.
    ///
    /// The invocation is stamped before `f` starts and the response after it returns, so the
    /// recorded interval contains the real one.
    pub fn log<F>(&mut self, op: S::Op, f: F)
    where
        F: FnOnce(&C) -> S::Ret,
    {
        let op_id = self.op_counter.fetch_add(1, Ordering::Relaxed);

        let invoked = self.clock.fetch_add(1, Ordering::SeqCst);
        let result = f(self.concurrent);
        let returned = self.clock.fetch_add(1, Ordering::SeqCst);

        self.events
            .push(TimeStamped::new_invoke(invoked, self.id, op_id, op));
        self.events
            .push(TimeStamped::new_return(returned, self.id, op_id, result));
    }

    pub fn thread_id(&self) -> usize {
        self.id
    }
}
