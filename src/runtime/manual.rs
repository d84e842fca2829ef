use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use super::{RuntimeConfig, Scheduler, Task, run_task};

/// A scheduler whose queue only drains when [`ManualScheduler::run_pending`]
/// is called. The thread that created it counts as the display thread.
///
/// Delays are not honoured: a delayed task becomes runnable on the next drain,
/// in posting order.
pub struct ManualScheduler {
    queue: Mutex<VecDeque<Task>>,
    owner: ThreadId,
    config: RuntimeConfig,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            owner: thread::current().id(),
            config,
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Run queued tasks, including ones they post, until the queue is empty.
    /// Returns how many tasks ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = match self.queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(_) => None,
            };
            let Some(task) = next else {
                break;
            };
            run_task(&self.config, task);
            ran += 1;
        }
        ran
    }

    /// Keep draining until `done` holds or `timeout` passes. Used when another
    /// thread is expected to post work.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Scheduler for ManualScheduler {
    fn post(&self, task: Task) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(task);
        }
    }

    fn post_delayed(&self, _delay: Duration, task: Task) {
        self.post(task);
    }

    fn is_display_thread(&self) -> bool {
        thread::current().id() == self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsoleError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_nothing_until_drained() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            scheduler.post(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 3);
        assert_eq!(scheduler.run_pending(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failing_task_does_not_block_the_rest() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.post(Box::new(|| Err(ConsoleError::render("invalid range"))));
        let counter = Arc::clone(&count);
        scheduler.post_delayed(
            Duration::from_secs(60),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        assert_eq!(scheduler.run_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn owner_thread_is_the_display_thread() {
        let scheduler = Arc::new(ManualScheduler::new());
        assert!(scheduler.is_display_thread());
        let remote = Arc::clone(&scheduler);
        let off_thread = thread::spawn(move || remote.is_display_thread())
            .join()
            .unwrap();
        assert!(!off_thread);
    }
}
