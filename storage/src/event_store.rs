// Copyright (c) Moira Project
// SPDX-License-Identifier: Apache-2.0

//! In-memory event keeper.

use dashmap::DashMap;

use moira_types::{Event, EventHash, EventSource};

/// Dashmap-backed event storage; safe for concurrent readers.
///
/// Events are stored under their hash and handed out by value, with the
/// consensus annotations (frame, root flag) they carried when added.
#[derive(Default)]
pub struct EventStore {
    events: DashMap<EventHash, Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep an accepted event. Re-adding under the same hash overwrites,
    /// which refreshes annotations after a local build.
    pub fn add_event(&self, e: Event) {
        self.events.insert(e.id(), e);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSource for EventStore {
    fn has_event(&self, id: &EventHash) -> bool {
        self.events.contains_key(id)
    }

    fn get_event(&self, id: &EventHash) -> Option<Event> {
        self.events.get(id).map(|e| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moira_types::test_utils::build_event;

    #[test]
    fn test_roundtrip() {
        let store = EventStore::new();
        let e = build_event(1, 1, 1, vec![]);
        assert!(!store.has_event(&e.id()));

        store.add_event(e.clone());
        assert!(store.has_event(&e.id()));
        assert_eq!(store.get_event(&e.id()), Some(e));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_absent_is_none() {
        let store = EventStore::new();
        assert_eq!(store.get_event(&EventHash::new([9; 32])), None);
    }
}
