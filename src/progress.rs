//! Progress events, one per completed slide.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

pub type ProgressObserver = Arc<dyn Fn(Progress) + Send + Sync>;

/// Emits strictly increasing `(current, total)` events, never above `total`
pub struct ProgressReporter {
    total: usize,
    current: AtomicUsize,
    observer: Option<ProgressObserver>,
}

impl ProgressReporter {
    pub fn new(total: usize, observer: Option<ProgressObserver>) -> Self {
        Self {
            total,
            current: AtomicUsize::new(0),
            observer,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Record one completed slide. Returns the event, or `None` once the
    /// total has been reached.
    pub fn advance(&self) -> Option<Progress> {
        let total = self.total;
        let prev = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| (c < total).then_some(c + 1))
            .ok()?;
        let event = Progress { current: prev + 1, total };
        log::debug!("progress {}/{}", event.current, event.total);
        if let Some(observer) = &self.observer {
            observer(event);
        }
        Some(event)
    }
}

/// Observer that forwards events into an unbounded channel. The stream ends
/// when the run drops its reporter.
pub fn progress_channel() -> (ProgressObserver, mpsc::UnboundedReceiver<Progress>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let observer: ProgressObserver = Arc::new(move |p: Progress| {
        // receiver gone: nobody is listening any more
        let _ = tx.send(p);
    });
    (observer, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn events_are_strictly_increasing_and_bounded() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(2, Some(Arc::new(move |p| sink.lock().unwrap().push(p))));

        assert_eq!(reporter.advance(), Some(Progress { current: 1, total: 2 }));
        assert_eq!(reporter.advance(), Some(Progress { current: 2, total: 2 }));
        assert_eq!(reporter.advance(), None);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn channel_ends_with_the_reporter() {
        let (observer, mut rx) = progress_channel();
        {
            let reporter = ProgressReporter::new(3, Some(observer));
            for _ in 0..3 {
                reporter.advance();
            }
        }
        let mut events = Vec::new();
        while let Some(p) = rx.recv().await {
            events.push(p.current);
        }
        assert_eq!(events, vec![1, 2, 3]);
    }
}
