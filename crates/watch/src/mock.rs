//! Scriptable event source for tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{EventCallback, EventSource, FsEvent, WatchError};

/// In-memory backend fulfilling the [`EventSource`] contract.
///
/// Tests push events with [`MockEventSource::push`] and the code under test
/// drains them exactly as it would drain the real watcher.
#[derive(Default)]
pub struct MockEventSource {
    queue: Mutex<VecDeque<FsEvent>>,
    callback: Mutex<Option<EventCallback>>,
    watches: Mutex<Vec<PathBuf>>,
    stopped: bool,
}

impl MockEventSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an event, invoking the callback like the real backend does.
    pub fn push(&self, event: FsEvent) {
        if let Some(callback) = self
            .callback
            .lock()
            .expect("mock callback lock poisoned")
            .as_ref()
        {
            callback(&event);
        }
        self.queue
            .lock()
            .expect("mock queue lock poisoned")
            .push_back(event);
    }

    /// Paths currently registered through [`EventSource::add_watch`].
    #[must_use]
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watches
            .lock()
            .expect("mock watches lock poisoned")
            .clone()
    }
}

impl EventSource for MockEventSource {
    fn add_watch(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.stopped {
            return Err(WatchError::Stopped);
        }
        self.watches
            .lock()
            .expect("mock watches lock poisoned")
            .push(path.to_path_buf());
        Ok(())
    }

    fn remove_watch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watches
            .lock()
            .expect("mock watches lock poisoned")
            .retain(|watched| watched != path);
        Ok(())
    }

    fn next_event(&self) -> Option<FsEvent> {
        self.queue
            .lock()
            .expect("mock queue lock poisoned")
            .pop_front()
    }

    fn empty(&self) -> bool {
        self.queue
            .lock()
            .expect("mock queue lock poisoned")
            .is_empty()
    }

    fn set_callback(&mut self, callback: EventCallback) {
        *self
            .callback
            .lock()
            .expect("mock callback lock poisoned") = Some(callback);
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventAction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn events_drain_in_fifo_order() {
        let source = MockEventSource::new();
        source.push(FsEvent::new(PathBuf::from("/w/a"), EventAction::Create));
        source.push(FsEvent::new(PathBuf::from("/w/b"), EventAction::Modify));

        assert!(!source.empty());
        assert_eq!(source.next_event().expect("first").path, PathBuf::from("/w/a"));
        assert_eq!(source.next_event().expect("second").path, PathBuf::from("/w/b"));
        assert!(source.next_event().is_none());
        assert!(source.empty());
    }

    #[test]
    fn callback_sees_every_pushed_event() {
        let mut source = MockEventSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        source.set_callback(Box::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        source.push(FsEvent::new(PathBuf::from("/w/a"), EventAction::Create));
        source.push(FsEvent::new(PathBuf::from("/w/a"), EventAction::Delete));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn watch_bookkeeping_tracks_add_and_remove() {
        let mut source = MockEventSource::new();
        source.add_watch(Path::new("/w")).expect("add");
        source.add_watch(Path::new("/x")).expect("add");
        source.remove_watch(Path::new("/w")).expect("remove");

        assert_eq!(source.watched_paths(), vec![PathBuf::from("/x")]);

        source.stop();
        assert!(matches!(
            source.add_watch(Path::new("/y")),
            Err(WatchError::Stopped)
        ));
    }
}
