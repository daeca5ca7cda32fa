use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(250);

/// Trailing-edge save debouncer. Every `mark()` pushes the deadline out;
/// one worker task runs the save when the deadline passes. `trigger()`
/// fires a pending save immediately and resolves when the run finishes.
///
/// States: idle (no deadline, not running), pending (deadline set),
/// running (save closure executing).
pub struct Debouncer {
    delay: Duration,
    shared: Arc<Shared>,
}

struct Shared {
    cell: Mutex<Cell>,
    wake: Notify,
    done: watch::Sender<u64>,
    save: Box<dyn Fn() + Send + Sync>,
}

#[derive(Default)]
struct Cell {
    deadline: Option<Instant>,
    fire_now: bool,
    running: bool,
    worker_alive: bool,
}

impl Debouncer {
    pub fn new(delay: Duration, save: impl Fn() + Send + Sync + 'static) -> Self {
        let (done, _) = watch::channel(0u64);
        Self {
            delay,
            shared: Arc::new(Shared {
                cell: Mutex::new(Cell::default()),
                wake: Notify::new(),
                done,
                save: Box::new(save),
            }),
        }
    }

    /// Note a change: schedule a save `delay` from now, extending any
    /// pending deadline. Must be called from within a tokio runtime.
    pub fn mark(&self) {
        let spawn_worker = {
            let mut cell = self.shared.cell.lock();
            cell.deadline = Some(Instant::now() + self.delay);
            if cell.worker_alive {
                false
            } else {
                cell.worker_alive = true;
                true
            }
        };
        if spawn_worker {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { worker(shared).await });
        } else {
            self.shared.wake.notify_one();
        }
    }

    /// Fire any pending save immediately and wait for it (and for an
    /// in-flight run) to finish. A no-op when idle.
    pub async fn trigger(&self) {
        let mut rx = self.shared.done.subscribe();
        {
            let mut cell = self.shared.cell.lock();
            if cell.deadline.is_none() && !cell.running {
                return;
            }
            if cell.deadline.is_some() {
                cell.fire_now = true;
            }
        }
        self.shared.wake.notify_one();
        // The worker bumps the generation after every completed run.
        let _ = rx.changed().await;
    }

    /// True when a save is scheduled or executing.
    pub fn is_dirty(&self) -> bool {
        let cell = self.shared.cell.lock();
        cell.deadline.is_some() || cell.running
    }
}

async fn worker(shared: Arc<Shared>) {
    loop {
        let (deadline, fire_now) = {
            let mut cell = shared.cell.lock();
            match cell.deadline {
                Some(deadline) => (deadline, cell.fire_now),
                None => {
                    cell.worker_alive = false;
                    return;
                }
            }
        };

        if !fire_now {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = shared.wake.notified() => continue,
            }
            // The deadline may have been pushed out while sleeping.
            let cell = shared.cell.lock();
            if cell.deadline != Some(deadline) && !cell.fire_now {
                continue;
            }
        }

        {
            let mut cell = shared.cell.lock();
            cell.deadline = None;
            cell.fire_now = false;
            cell.running = true;
        }
        (shared.save)();
        shared.cell.lock().running = false;
        shared.done.send_modify(|generation| *generation += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn coalesces_marks_into_one_save() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let debouncer = Debouncer::new(Duration::from_millis(20), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            debouncer.mark();
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_dirty());
    }

    #[tokio::test]
    async fn trigger_fires_pending_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let debouncer = Debouncer::new(Duration::from_secs(60), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        debouncer.mark();
        debouncer.trigger().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_dirty());
    }

    #[tokio::test]
    async fn trigger_without_pending_is_a_no_op() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let debouncer = Debouncer::new(Duration::from_millis(10), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        debouncer.trigger().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn marks_after_a_save_schedule_another() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let debouncer = Debouncer::new(Duration::from_millis(10), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        debouncer.mark();
        debouncer.trigger().await;
        debouncer.mark();
        debouncer.trigger().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
