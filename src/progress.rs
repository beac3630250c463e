//! Progress reporting.
//!
//! Long-running phases (download, archive rewrite) report to any number of
//! [`ProgressListener`]s through a [`ProgressListeners`] broadcaster. The
//! callbacks run synchronously on the task doing the work.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Observer for progress events.
pub trait ProgressListener: Send + Sync {
    /// Reset to indeterminate mode with the given message.
    fn init(&self, message: &str);

    /// Reset to determinate mode covering `min..=max`.
    fn init_range(&self, message: &str, min: u64, max: u64);

    /// Report the current progress value. Values are non-decreasing
    /// within one phase.
    fn update(&self, value: u64);

    /// Label the current task.
    fn label(&self, text: &str);

    /// Latest value passed to [`update`](Self::update).
    fn progress(&self) -> u64;

    /// The tracked operation is done.
    fn finish(&self);
}

/// Fans progress events out to every registered listener.
#[derive(Default)]
pub struct ProgressListeners {
    listeners: Vec<Arc<dyn ProgressListener>>,
    current: AtomicU64,
}

impl ProgressListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn ProgressListener>) {
        self.listeners.push(listener);
    }

    /// Remove a listener previously added (compared by identity).
    pub fn remove(&mut self, listener: &Arc<dyn ProgressListener>) {
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProgressListener>> {
        self.listeners.iter()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Advance the current value by one.
    pub fn step(&self) {
        self.update(self.progress() + 1);
    }
}

impl Clone for ProgressListeners {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
            current: AtomicU64::new(self.progress()),
        }
    }
}

impl ProgressListener for ProgressListeners {
    fn init(&self, message: &str) {
        self.current.store(0, Ordering::Relaxed);
        for listener in &self.listeners {
            listener.init(message);
        }
    }

    fn init_range(&self, message: &str, min: u64, max: u64) {
        self.current.store(min, Ordering::Relaxed);
        for listener in &self.listeners {
            listener.init_range(message, min, max);
        }
    }

    fn update(&self, value: u64) {
        self.current.store(value, Ordering::Relaxed);
        for listener in &self.listeners {
            listener.update(value);
        }
    }

    fn label(&self, text: &str) {
        for listener in &self.listeners {
            listener.label(text);
        }
    }

    fn progress(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    fn finish(&self) {
        for listener in &self.listeners {
            listener.finish();
        }
    }
}

/// Listener that forwards progress to `tracing`.
///
/// Updates are logged at most once per `step` percent of the range to keep
/// per-buffer download updates from flooding the log.
pub struct LogProgress {
    name: String,
    step: u64,
    max: AtomicU64,
    current: AtomicU64,
    last_logged: AtomicU64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step: 10,
            max: AtomicU64::new(0),
            current: AtomicU64::new(0),
            last_logged: AtomicU64::new(0),
        }
    }
}

impl ProgressListener for LogProgress {
    fn init(&self, message: &str) {
        self.max.store(0, Ordering::Relaxed);
        self.current.store(0, Ordering::Relaxed);
        self.last_logged.store(0, Ordering::Relaxed);
        tracing::info!("[{}] {}", self.name, message);
    }

    fn init_range(&self, message: &str, min: u64, max: u64) {
        self.max.store(max.saturating_sub(min), Ordering::Relaxed);
        self.current.store(min, Ordering::Relaxed);
        self.last_logged.store(0, Ordering::Relaxed);
        tracing::info!("[{}] {}", self.name, message);
    }

    fn update(&self, value: u64) {
        self.current.store(value, Ordering::Relaxed);
        let max = self.max.load(Ordering::Relaxed);
        if max == 0 {
            return;
        }
        let percent = (value.min(max) * 100) / max;
        let last = self.last_logged.load(Ordering::Relaxed);
        if percent >= last + self.step {
            self.last_logged.store(percent, Ordering::Relaxed);
            tracing::debug!("[{}] {}%", self.name, percent);
        }
    }

    fn label(&self, text: &str) {
        tracing::info!("[{}] {}", self.name, text);
    }

    fn progress(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    fn finish(&self) {
        tracing::debug!("[{}] done", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProgressListener for Recorder {
        fn init(&self, message: &str) {
            self.events.lock().unwrap().push(format!("init {message}"));
        }
        fn init_range(&self, message: &str, min: u64, max: u64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("init {message} {min}..{max}"));
        }
        fn update(&self, value: u64) {
            self.events.lock().unwrap().push(format!("update {value}"));
        }
        fn label(&self, text: &str) {
            self.events.lock().unwrap().push(format!("label {text}"));
        }
        fn progress(&self) -> u64 {
            0
        }
        fn finish(&self) {
            self.events.lock().unwrap().push("finish".to_string());
        }
    }

    #[test]
    fn broadcasts_to_every_listener() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());

        let mut listeners = ProgressListeners::new();
        listeners.add(a.clone());
        listeners.add(b.clone());

        listeners.init_range("Patching...", 0, 3);
        listeners.step();
        listeners.step();
        listeners.label("core.jar");
        listeners.finish();

        let expected = vec![
            "init Patching... 0..3",
            "update 1",
            "update 2",
            "label core.jar",
            "finish",
        ];
        assert_eq!(*a.events.lock().unwrap(), expected);
        assert_eq!(*b.events.lock().unwrap(), expected);
        assert_eq!(listeners.progress(), 2);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let a: Arc<dyn ProgressListener> = Arc::new(Recorder::default());
        let mut listeners = ProgressListeners::new();
        listeners.add(a.clone());
        listeners.remove(&a);
        assert!(listeners.is_empty());
    }
}
