//! `notify`-backed event source.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use fsmirror_walk::Walker;

use crate::{EventAction, EventCallback, EventSource, FsEvent, WatchError};

struct SharedState {
    queue: Mutex<VecDeque<FsEvent>>,
    callback: Mutex<Option<EventCallback>>,
    roots: Mutex<Vec<PathBuf>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            callback: Mutex::new(None),
            roots: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, event: FsEvent) {
        if let Some(callback) = self
            .callback
            .lock()
            .expect("watch callback lock poisoned")
            .as_ref()
        {
            callback(&event);
        }
        self.queue
            .lock()
            .expect("watch queue lock poisoned")
            .push_back(event);
    }

    fn handle(&self, outcome: Result<Event, notify::Error>) {
        match outcome {
            Ok(event) => self.translate(event),
            Err(error) => warn!(%error, "filesystem watcher reported an error"),
        }
    }

    fn translate(&self, event: Event) {
        if event.need_rescan() {
            // The kernel dropped events; the backlog is unknowable, so ask
            // the consumer to rescan the whole watched subtree.
            let root = self
                .roots
                .lock()
                .expect("watch roots lock poisoned")
                .first()
                .cloned()
                .unwrap_or_default();
            self.push(FsEvent::new(root, EventAction::Resync));
            return;
        }

        match event.kind {
            EventKind::Create(_) => {
                for path in event.paths {
                    let is_dir = path.is_dir();
                    self.push(FsEvent::new(path.clone(), EventAction::Create));
                    if is_dir {
                        self.backfill(&path);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.translate_rename(mode, event.paths),
            EventKind::Modify(_) => {
                for path in event.paths {
                    self.push(FsEvent::new(path, EventAction::Modify));
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    self.push(FsEvent::new(path, EventAction::Delete));
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
    }

    fn translate_rename(&self, mode: RenameMode, paths: Vec<PathBuf>) {
        match mode {
            RenameMode::From => {
                for path in paths {
                    self.push(FsEvent::new(path, EventAction::MovedFrom));
                }
            }
            RenameMode::To => {
                for path in paths {
                    self.push_moved_to(path);
                }
            }
            RenameMode::Both => {
                let mut paths = paths.into_iter();
                if let Some(from) = paths.next() {
                    self.push(FsEvent::new(from, EventAction::MovedFrom));
                }
                if let Some(to) = paths.next() {
                    self.push_moved_to(to);
                }
            }
            RenameMode::Any | RenameMode::Other => {
                // The platform could not tell which side of the rename this
                // is; existence decides.
                for path in paths {
                    if path.exists() {
                        self.push_moved_to(path);
                    } else {
                        self.push(FsEvent::new(path, EventAction::MovedFrom));
                    }
                }
            }
        }
    }

    fn push_moved_to(&self, path: PathBuf) {
        let is_dir = path.is_dir();
        self.push(FsEvent::new(path.clone(), EventAction::MovedTo));
        if is_dir {
            self.backfill(&path);
        }
    }

    /// Synthesizes `Modify` events for files already present under a
    /// directory that just appeared. Files written between the mkdir (or
    /// move-in) and the kernel watch taking effect would otherwise never be
    /// reported.
    fn backfill(&self, dir: &Path) {
        let walker = match Walker::new(dir) {
            Ok(walker) => walker,
            Err(error) => {
                warn!(%error, dir = %dir.display(), "cannot backfill new directory");
                return;
            }
        };
        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.is_file() {
                        self.push(FsEvent::new(
                            entry.full_path().to_path_buf(),
                            EventAction::Modify,
                        ));
                    }
                }
                Err(error) => {
                    warn!(%error, dir = %dir.display(), "backfill walk failed");
                    return;
                }
            }
        }
    }
}

/// Recursive filesystem watcher backed by the platform notification API
/// (inotify on Linux).
pub struct NotifyEventSource {
    watcher: Option<RecommendedWatcher>,
    shared: Arc<SharedState>,
}

impl NotifyEventSource {
    /// Creates an idle source; watches are added with
    /// [`EventSource::add_watch`].
    pub fn new() -> Result<Self, WatchError> {
        let shared = Arc::new(SharedState::new());
        let handler_state = Arc::clone(&shared);
        let watcher = RecommendedWatcher::new(
            move |outcome| handler_state.handle(outcome),
            Config::default(),
        )?;
        Ok(Self {
            watcher: Some(watcher),
            shared,
        })
    }
}

impl EventSource for NotifyEventSource {
    fn add_watch(&mut self, path: &Path) -> Result<(), WatchError> {
        let watcher = self.watcher.as_mut().ok_or(WatchError::Stopped)?;
        watcher.watch(path, RecursiveMode::Recursive)?;
        self.shared
            .roots
            .lock()
            .expect("watch roots lock poisoned")
            .push(path.to_path_buf());
        Ok(())
    }

    fn remove_watch(&mut self, path: &Path) -> Result<(), WatchError> {
        let watcher = self.watcher.as_mut().ok_or(WatchError::Stopped)?;
        watcher.unwatch(path)?;
        self.shared
            .roots
            .lock()
            .expect("watch roots lock poisoned")
            .retain(|root| root != path);
        Ok(())
    }

    fn next_event(&self) -> Option<FsEvent> {
        self.shared
            .queue
            .lock()
            .expect("watch queue lock poisoned")
            .pop_front()
    }

    fn empty(&self) -> bool {
        self.shared
            .queue
            .lock()
            .expect("watch queue lock poisoned")
            .is_empty()
    }

    fn set_callback(&mut self, callback: EventCallback) {
        *self
            .shared
            .callback
            .lock()
            .expect("watch callback lock poisoned") = Some(callback);
    }

    fn stop(&mut self) {
        self.watcher = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn drain(state: &SharedState) -> Vec<FsEvent> {
        let mut events = Vec::new();
        let mut queue = state.queue.lock().expect("queue");
        while let Some(event) = queue.pop_front() {
            events.push(event);
        }
        events
    }

    #[test]
    fn create_and_remove_kinds_translate_directly() {
        let state = SharedState::new();

        state.translate(
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/w/new.txt")),
        );
        state.translate(
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/w/old.txt")),
        );

        let events = drain(&state);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EventAction::Create);
        assert_eq!(events[0].path, PathBuf::from("/w/new.txt"));
        assert_eq!(events[1].action, EventAction::Delete);
    }

    #[test]
    fn rename_sides_map_to_moved_from_and_moved_to() {
        let state = SharedState::new();

        state.translate(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
                .add_path(PathBuf::from("/w/before.txt")),
        );
        state.translate(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
                .add_path(PathBuf::from("/w/after.txt")),
        );

        let events = drain(&state);
        assert_eq!(events[0].action, EventAction::MovedFrom);
        assert_eq!(events[1].action, EventAction::MovedTo);
        assert_eq!(events[1].path, PathBuf::from("/w/after.txt"));
    }

    #[test]
    fn rescan_flag_becomes_a_single_resync_for_the_root() {
        let state = SharedState::new();
        state
            .roots
            .lock()
            .expect("roots")
            .push(PathBuf::from("/watched/root"));

        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/watched/root/deep/file"))
            .set_flag(notify::event::Flag::Rescan);
        state.translate(event);

        let events = drain(&state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::Resync);
        assert_eq!(events[0].path, PathBuf::from("/watched/root"));
    }

    #[test]
    fn directory_create_backfills_existing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let new_dir = temp.path().join("incoming");
        fs::create_dir(&new_dir).expect("dir");
        fs::write(new_dir.join("preexisting.txt"), b"already here").expect("write");

        let state = SharedState::new();
        state.translate(
            Event::new(EventKind::Create(CreateKind::Folder)).add_path(new_dir.clone()),
        );

        let events = drain(&state);
        assert_eq!(events[0].action, EventAction::Create);
        assert!(events.iter().any(|event| {
            event.action == EventAction::Modify
                && event.path == new_dir.join("preexisting.txt")
        }));
    }

    fn wait_for_event(
        source: &NotifyEventSource,
        timeout: Duration,
        predicate: impl Fn(&FsEvent) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            while let Some(event) = source.next_event() {
                if predicate(&event) {
                    return true;
                }
            }
            thread::sleep(Duration::from_millis(25));
        }
        false
    }

    #[test]
    fn live_watcher_reports_file_creation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut source = NotifyEventSource::new().expect("create source");
        source.add_watch(temp.path()).expect("watch");

        thread::sleep(Duration::from_millis(100));
        fs::write(temp.path().join("fresh.txt"), b"hello watcher").expect("write");

        assert!(
            wait_for_event(&source, Duration::from_secs(5), |event| event
                .path
                .ends_with("fresh.txt")),
            "no event observed for the new file"
        );
        source.stop();
    }

    #[test]
    fn live_watcher_invokes_callback() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut source = NotifyEventSource::new().expect("create source");
        source.add_watch(temp.path()).expect("watch");

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        source.set_callback(Box::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        thread::sleep(Duration::from_millis(100));
        fs::write(temp.path().join("counted.txt"), b"tick").expect("write");

        let deadline = Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(25));
        }
        assert!(hits.load(Ordering::SeqCst) > 0, "callback never fired");
        source.stop();
    }

    #[test]
    fn stopped_source_refuses_new_watches_but_drains_queue() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut source = NotifyEventSource::new().expect("create source");
        source.add_watch(temp.path()).expect("watch");
        source.stop();

        assert!(matches!(
            source.add_watch(temp.path()),
            Err(WatchError::Stopped)
        ));
        assert!(source.empty());
    }
}
