// Batch progress: a shared monotonic counter plus pluggable rendering
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Receives `(completed, total)` after every step.
pub trait ProgressSink: Send + Sync {
    fn update(&self, completed: usize, total: usize, suffix: Option<&str>);
}

pub struct Progress {
    completed: AtomicUsize,
    total: usize,
    sink: Arc<dyn ProgressSink>,
}

impl Progress {
    pub fn new(total: usize, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
            sink,
        }
    }

    /// Count one finished unit of work. Never exceeds `total`.
    pub fn step(&self, suffix: Option<&str>) -> usize {
        let total = self.total;
        let previous = self
            .completed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| (c < total).then_some(c + 1));
        let completed = match previous {
            Ok(c) => c + 1,
            Err(c) => {
                warn!(completed = c, total, "Progress stepped past its total");
                c
            }
        };
        self.sink.update(completed, total, suffix);
        completed
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Renders `title [#####     ] 50.0% suffix` on one stderr line.
pub struct ConsoleProgress {
    title: String,
    width: usize,
    // serializes writes from concurrent workers
    out: Mutex<()>,
}

impl ConsoleProgress {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            width: 40,
            out: Mutex::new(()),
        }
    }

    pub fn render(&self, completed: usize, total: usize, suffix: Option<&str>) -> String {
        let ratio = if total == 0 { 1.0 } else { completed as f64 / total as f64 };
        let filled = ((ratio * self.width as f64).round() as usize).min(self.width);
        format!(
            "{} [{}{}] {:5.1}% {}",
            self.title,
            "#".repeat(filled),
            " ".repeat(self.width - filled),
            ratio * 100.0,
            suffix.unwrap_or("")
        )
    }
}

impl ProgressSink for ConsoleProgress {
    fn update(&self, completed: usize, total: usize, suffix: Option<&str>) {
        let _guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let line = self.render(completed, total, suffix);
        let mut stderr = io::stderr().lock();
        let _ = write!(stderr, "\r{}\x1b[K", line);
        if completed >= total {
            let _ = writeln!(stderr);
        }
        let _ = stderr.flush();
    }
}

/// Emits progress as tracing events instead of drawing a bar.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn update(&self, completed: usize, total: usize, suffix: Option<&str>) {
        info!(completed, total, submission = suffix.unwrap_or(""), "Progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(usize, usize)>>);

    impl ProgressSink for Recorder {
        fn update(&self, completed: usize, total: usize, _suffix: Option<&str>) {
            self.0.lock().unwrap().push((completed, total));
        }
    }

    #[test]
    fn test_step_is_monotonic_and_capped() {
        let recorder = Arc::new(Recorder::default());
        let progress = Progress::new(2, recorder.clone());
        assert_eq!(progress.step(None), 1);
        assert_eq!(progress.step(Some("bob")), 2);
        assert_eq!(progress.step(None), 2);
        assert_eq!(progress.completed(), 2);
        assert_eq!(*recorder.0.lock().unwrap(), vec![(1, 2), (2, 2), (2, 2)]);
    }

    #[test]
    fn test_concurrent_steps() {
        let progress = Arc::new(Progress::new(100, Arc::new(TracingProgress)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let progress = progress.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        progress.step(None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(progress.completed(), 100);
    }

    #[test]
    fn test_console_render() {
        let console = ConsoleProgress::new("Grading");
        let line = console.render(1, 4, Some("alice"));
        assert!(line.starts_with("Grading [##########                              ]"));
        assert!(line.contains(" 25.0% alice"));
        assert!(console.render(0, 0, None).contains("100.0%"));
    }
}
