use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
};

use parking_lot::{Condvar, Mutex};

type Callback = Box<dyn Fn(u8) + Send + Sync>;

/// Percentage based progress shared between a worker thread and whoever is
/// watching it. The reported percentage never decreases.
#[derive(Clone)]
pub struct Progress(Arc<ProgressInner>);

struct ProgressInner {
    percent: AtomicU8,
    finished: AtomicBool,
    callback: Option<Callback>,

    notify: Condvar,
    lock: Mutex<()>,
}

impl Progress {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a progress tracker that also invokes `callback` on every
    /// increase. The callback runs on the thread calling [`Progress::set`], so
    /// it must not block (forward the value over a channel instead).
    pub fn with_callback(callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self::build(Some(Box::new(callback)))
    }

    fn build(callback: Option<Callback>) -> Self {
        Self(Arc::new(ProgressInner {
            percent: AtomicU8::new(0),
            finished: AtomicBool::new(false),
            callback,
            notify: Condvar::new(),
            lock: Mutex::new(()),
        }))
    }

    /// Raises the percentage to `percent`. Values lower than the current one
    /// are ignored and values above 100 are clamped.
    pub fn set(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.0.percent.fetch_max(percent, Ordering::AcqRel);
        if percent <= previous {
            return;
        }

        if let Some(callback) = &self.0.callback {
            callback(percent);
        }

        let _guard = self.0.lock.lock();
        self.0.notify.notify_all();
    }

    /// Current percentage, 0-100.
    pub fn percent(&self) -> u8 {
        self.0.percent.load(Ordering::Acquire)
    }

    pub fn complete(&self) -> bool {
        self.percent() >= 100
    }

    /// Marks the tracked operation as over, whether or not it reached 100%.
    /// Wakes every waiter.
    pub fn set_finished(&self) {
        self.0.finished.store(true, Ordering::Release);
        let _guard = self.0.lock.lock();
        self.0.notify.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.0.finished.load(Ordering::Acquire)
    }

    /// Blocks until the percentage rises above `seen` or the operation
    /// finishes, returning the current percentage.
    pub fn wait(&self, seen: u8) -> u8 {
        let mut guard = self.0.lock.lock();
        while self.percent() <= seen && !self.is_finished() {
            self.0.notify.wait(&mut guard);
        }

        self.percent()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("percent", &self.percent())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread};

    use super::*;

    #[test]
    fn never_decreases() {
        let progress = Progress::new();
        progress.set(20);
        progress.set(5);
        assert_eq!(progress.percent(), 20);
        progress.set(250);
        assert_eq!(progress.percent(), 100);
        assert!(progress.complete());
    }

    #[test]
    fn callback_sees_only_increases() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let progress = Progress::with_callback(move |p| {
            tx.lock().send(p).unwrap();
        });

        for p in [5, 20, 20, 10, 70, 90, 100] {
            progress.set(p);
        }
        drop(progress);

        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![5, 20, 70, 90, 100]);
    }

    #[test]
    fn wait_wakes_on_progress_and_finish() {
        let progress = Progress::new();

        let worker = thread::spawn({
            let progress = progress.clone();
            move || {
                progress.set(50);
                progress.set_finished();
            }
        });

        let mut seen = 0;
        while !progress.is_finished() || seen < progress.percent() {
            seen = progress.wait(seen);
        }

        worker.join().unwrap();
        assert_eq!(progress.percent(), 50);
    }
}
