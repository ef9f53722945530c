//! Scheduled (timer-driven) work, separate from the event-driven agent duty
//! cycles: periodic housekeeping like cache eviction or a heartbeat source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Something a [`Scheduler`] can run repeatedly. Kept distinct from
/// [`crate::processor::Processor`] since scheduled work has no queue to
/// drain and runs on its own timer thread rather than an agent's duty
/// cycle.
pub trait ScheduledTask: Send + Sync {
    fn run(&self);
}

pub trait Scheduler: Send + Sync {
    /// Schedules `task` to run every `interval`, starting after the first
    /// interval elapses. Returns a handle that cancels the schedule when
    /// dropped or explicitly stopped.
    fn schedule_at_fixed_rate(
        &self,
        name: &str,
        interval: Duration,
        task: Arc<dyn ScheduledTask>,
    ) -> Box<dyn ScheduleHandle>;
}

pub trait ScheduleHandle: Send {
    fn cancel(self: Box<Self>);
}

/// Default scheduler: one OS thread per scheduled task, parked on a sleep
/// between runs. Adequate for the handful of periodic housekeeping tasks a
/// typical server registers; an embedding application can supply its own
/// [`Scheduler`] (backed by a shared timer wheel, say) via the server
/// builder instead.
#[derive(Default)]
pub struct ThreadPerTaskScheduler;

impl ThreadPerTaskScheduler {
    pub fn new() -> Self {
        Self
    }
}

struct ThreadScheduleHandle {
    cancelled: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl ScheduleHandle for ThreadScheduleHandle {
    fn cancel(mut self: Box<Self>) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ThreadScheduleHandle {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Scheduler for ThreadPerTaskScheduler {
    fn schedule_at_fixed_rate(
        &self,
        name: &str,
        interval: Duration,
        task: Arc<dyn ScheduledTask>,
    ) -> Box<dyn ScheduleHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread_cancelled = cancelled.clone();
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !thread_cancelled.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    if thread_cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    task.run();
                }
            })
            .expect("failed to spawn scheduler thread");

        Box::new(ThreadScheduleHandle {
            cancelled,
            join: Some(join),
        })
    }
}
