#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `fsmirror_watch` turns kernel filesystem notifications into the events the
//! sync engine consumes. The [`EventSource`] trait is the contract; the
//! [`NotifyEventSource`] backend wraps the `notify` crate (inotify on Linux)
//! with recursive watches, and [`MockEventSource`] lets tests inject events
//! without touching a real filesystem watcher.
//!
//! # Design
//!
//! Events carry a path, an [`EventAction`], a synthetic mask bit, and a
//! timestamp. Two situations receive special treatment:
//!
//! - **Kernel queue overflow.** When the kernel reports that events were
//!   dropped, the backlog is unknowable, so the source emits one synthetic
//!   [`EventAction::Resync`] event for the watch root. Consumers treat it as
//!   "rescan this subtree".
//! - **Directory creation.** Files can land inside a new directory before the
//!   kernel watch covers it. On a directory create the source walks the new
//!   subtree and synthesizes [`EventAction::Modify`] events for the files
//!   already present.
//!
//! Both implementations are thread-safe; [`EventSource::next_event`] is a
//! non-blocking pop usable from any thread, and
//! [`EventSource::empty`] is advisory.

mod mock;
mod source;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

pub use mock::MockEventSource;
pub use source::NotifyEventSource;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    /// A file or directory appeared.
    Create,
    /// File contents or metadata changed.
    Modify,
    /// A file or directory was removed.
    Delete,
    /// A rename moved the path away.
    MovedFrom,
    /// A rename moved something to this path.
    MovedTo,
    /// The kernel queue overflowed; the subtree at this path must be
    /// rescanned.
    Resync,
}

impl EventAction {
    /// Synthetic bitmask for the action, kept for parity with the numeric
    /// mask kernel interfaces expose.
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Create => 1 << 0,
            Self::Modify => 1 << 1,
            Self::Delete => 1 << 2,
            Self::MovedFrom => 1 << 3,
            Self::MovedTo => 1 << 4,
            Self::Resync => 1 << 5,
        }
    }
}

/// One filesystem event, owned by the source until pulled.
#[derive(Debug, Clone)]
pub struct FsEvent {
    /// Affected path.
    pub path: PathBuf,
    /// What happened.
    pub action: EventAction,
    /// Bitmask form of the action.
    pub mask: u32,
    /// Wall-clock time the event was observed.
    pub timestamp: SystemTime,
}

impl FsEvent {
    /// Creates an event observed now.
    #[must_use]
    pub fn new(path: PathBuf, action: EventAction) -> Self {
        Self {
            path,
            action,
            mask: action.mask(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Callback invoked for every event as it is queued.
pub type EventCallback = Box<dyn Fn(&FsEvent) + Send + Sync>;

/// Errors surfaced by event sources.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The underlying watcher rejected the operation.
    #[error("filesystem watcher error: {0}")]
    Backend(#[from] notify::Error),
    /// The source has been stopped and accepts no new watches.
    #[error("event source is stopped")]
    Stopped,
}

/// Contract every event backend fulfils.
pub trait EventSource: Send {
    /// Starts watching `path` recursively.
    fn add_watch(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Stops watching `path`.
    fn remove_watch(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Pops the oldest queued event, if any. Never blocks.
    fn next_event(&self) -> Option<FsEvent>;

    /// Advisory snapshot of queue emptiness.
    fn empty(&self) -> bool;

    /// Installs a callback invoked for each event as it is queued.
    fn set_callback(&mut self, callback: EventCallback);

    /// Stops watching; queued events remain drainable.
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_are_distinct_bits() {
        let actions = [
            EventAction::Create,
            EventAction::Modify,
            EventAction::Delete,
            EventAction::MovedFrom,
            EventAction::MovedTo,
            EventAction::Resync,
        ];
        let mut combined = 0u32;
        for action in actions {
            assert_eq!(combined & action.mask(), 0);
            combined |= action.mask();
        }
    }

    #[test]
    fn event_mask_tracks_action() {
        let event = FsEvent::new(PathBuf::from("/watched/a"), EventAction::MovedTo);
        assert_eq!(event.mask, EventAction::MovedTo.mask());
    }
}
