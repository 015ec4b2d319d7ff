//! Session store with per-session message buffers and the shared message-id counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use signal_common::IdGenerator;
use tokio::time::Instant;

use super::session::{Backoff, Delivery, Session, SessionMetadata};

/// Read-only view of a session, detached from the registry lock.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub client_id: String,
    pub last_activity: Instant,
    pub cursor: u64,
    pub poll_delay: Duration,
    pub metadata: SessionMetadata,
    pub buffered_ids: Vec<u64>,
}

/// Outcome of [`SessionRegistry::create_or_touch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Touched {
    pub client_id: String,
    pub created: bool,
}

/// Shared registry of all long-poll sessions.
///
/// Uses `DashMap` for shard-level concurrency and `parking_lot::Mutex` per
/// entry so buffer appends, polls, and sweeps never see a half-applied update.
pub struct SessionRegistry {
    sessions: DashMap<String, Mutex<Session>>,
    next_message_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_message_id: AtomicU64::new(0),
        }
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }

    /// The id the next appended message will receive.
    pub fn current_message_id(&self) -> u64 {
        self.next_message_id.load(Ordering::SeqCst)
    }

    pub fn resolve(&self, client_id: &str) -> Option<SessionInfo> {
        let entry = self.sessions.get(client_id)?;
        let s = entry.lock();
        Some(SessionInfo {
            client_id: s.client_id.clone(),
            last_activity: s.last_activity,
            cursor: s.cursor,
            poll_delay: s.poll_delay,
            metadata: s.metadata.clone(),
            buffered_ids: s.buffered().map(|m| m.id).collect(),
        })
    }

    /// Look up the session for `client_id`, creating it when the id is absent
    /// or unknown. Existing sessions get their activity time and metadata
    /// refreshed; their id never changes.
    pub fn create_or_touch(
        &self,
        client_id: Option<&str>,
        metadata: SessionMetadata,
        ids: &dyn IdGenerator,
        now: Instant,
    ) -> Touched {
        let client_id = match client_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => ids.new_id(),
        };

        match self.sessions.entry(client_id.clone()) {
            Entry::Occupied(entry) => {
                let mut s = entry.get().lock();
                s.touch(now);
                s.metadata = metadata;
                Touched {
                    client_id,
                    created: false,
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Mutex::new(Session::new(client_id.clone(), metadata, now)));
                Touched {
                    client_id,
                    created: true,
                }
            }
        }
    }

    /// Refresh a session's activity time. Returns `false` if it doesn't exist.
    pub fn touch(&self, client_id: &str, now: Instant) -> bool {
        match self.sessions.get(client_id) {
            Some(entry) => {
                entry.lock().touch(now);
                true
            }
            None => false,
        }
    }

    /// Poll a session's buffer from `cursor`, updating its backoff.
    pub fn deliver(&self, client_id: &str, cursor: u64, backoff: &Backoff) -> Option<Delivery> {
        let entry = self.sessions.get(client_id)?;
        let mut s = entry.lock();
        Some(s.deliver(cursor, backoff))
    }

    /// Append a message to a session's buffer. Returns the assigned id, or
    /// `None` (and consumes no id) if the session doesn't exist.
    pub fn append(&self, client_id: &str, payload: Value, now: Instant) -> Option<u64> {
        let entry = self.sessions.get(client_id)?;
        let mut s = entry.lock();
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        s.push(id, payload, now);
        Some(id)
    }

    /// Snapshot of every live session id.
    pub fn client_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop buffered messages older than `max_age` from every session.
    /// Returns the number of messages removed.
    pub fn expire_messages(&self, now: Instant, max_age: Duration) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.lock().expire_messages(now, max_age))
            .sum()
    }

    /// Remove sessions idle for longer than `timeout` and return their ids.
    ///
    /// Idleness is re-checked under the entry lock, so a session touched after
    /// the scan is kept.
    pub fn remove_idle(&self, now: Instant, timeout: Duration) -> Vec<String> {
        self.idle_candidates(now, timeout)
            .into_iter()
            .filter(|client_id| self.remove_if_idle(client_id, now, timeout))
            .collect()
    }

    fn idle_candidates(&self, now: Instant, timeout: Duration) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.lock().is_idle(now, timeout))
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn remove_if_idle(&self, client_id: &str, now: Instant, timeout: Duration) -> bool {
        self.sessions
            .remove_if(client_id, |_, s| s.lock().is_idle(now, timeout))
            .is_some()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    /// Deterministic ids: `c0`, `c1`, ...
    struct SequentialIds(AtomicUsize);

    impl IdGenerator for SequentialIds {
        fn new_id(&self) -> String {
            format!("c{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn ids() -> SequentialIds {
        SequentialIds(AtomicUsize::new(0))
    }

    const BACKOFF: Backoff = Backoff {
        step: Duration::from_millis(1000),
        max: Duration::from_millis(5000),
    };

    #[test]
    fn create_without_id_uses_generator() {
        let registry = SessionRegistry::new();
        let touched =
            registry.create_or_touch(None, SessionMetadata::default(), &ids(), Instant::now());

        assert_eq!(touched.client_id, "c0");
        assert!(touched.created);
        assert_eq!(registry.count(), 1);

        let info = registry.resolve("c0").unwrap();
        assert_eq!(info.cursor, 0);
        assert_eq!(info.poll_delay, Duration::ZERO);
    }

    #[test]
    fn empty_id_is_treated_as_absent() {
        let registry = SessionRegistry::new();
        let touched =
            registry.create_or_touch(Some(""), SessionMetadata::default(), &ids(), Instant::now());
        assert_eq!(touched.client_id, "c0");
    }

    #[test]
    fn unknown_id_creates_session_under_that_id() {
        let registry = SessionRegistry::new();
        let touched = registry.create_or_touch(
            Some("negotiated"),
            SessionMetadata::default(),
            &ids(),
            Instant::now(),
        );

        assert_eq!(touched.client_id, "negotiated");
        assert!(touched.created);
        assert!(registry.contains("negotiated"));
    }

    #[test]
    fn touch_existing_updates_activity_and_metadata() {
        let registry = SessionRegistry::new();
        let gen = ids();
        let start = Instant::now();
        registry.create_or_touch(Some("s1"), SessionMetadata::default(), &gen, start);

        let later = start + Duration::from_secs(5);
        let metadata = SessionMetadata {
            transport: Some("longPolling".to_string()),
            connection_data: None,
            groups: vec!["g1".to_string()],
        };
        let touched = registry.create_or_touch(Some("s1"), metadata.clone(), &gen, later);

        assert!(!touched.created);
        assert_eq!(registry.count(), 1);
        let info = registry.resolve("s1").unwrap();
        assert_eq!(info.client_id, "s1");
        assert_eq!(info.last_activity, later);
        assert_eq!(info.metadata, metadata);
    }

    #[test]
    fn resolve_returns_none_for_unknown() {
        let registry = SessionRegistry::new();
        assert!(registry.resolve("bogus").is_none());
    }

    #[test]
    fn append_to_missing_session_is_noop_and_consumes_no_id() {
        let registry = SessionRegistry::new();
        assert!(registry.append("ghost", json!("x"), Instant::now()).is_none());
        assert_eq!(registry.current_message_id(), 0);
    }

    #[test]
    fn message_ids_increase_across_sessions() {
        let registry = SessionRegistry::new();
        let gen = ids();
        let now = Instant::now();
        registry.create_or_touch(Some("a"), SessionMetadata::default(), &gen, now);
        registry.create_or_touch(Some("b"), SessionMetadata::default(), &gen, now);

        let assigned: Vec<u64> = ["a", "b", "a", "b", "b"]
            .iter()
            .map(|id| registry.append(id, json!("m"), now).unwrap())
            .collect();
        assert_eq!(assigned, vec![0, 1, 2, 3, 4]);
        assert_eq!(registry.current_message_id(), 5);
        assert_eq!(registry.resolve("a").unwrap().buffered_ids, vec![0, 2]);
        assert_eq!(registry.resolve("b").unwrap().buffered_ids, vec![1, 3, 4]);
    }

    #[test]
    fn deliver_uses_session_buffer() {
        let registry = SessionRegistry::new();
        let now = Instant::now();
        registry.create_or_touch(Some("a"), SessionMetadata::default(), &ids(), now);
        registry.append("a", json!("hello"), now);

        let delivery = registry.deliver("a", 0, &BACKOFF).unwrap();
        assert_eq!(delivery.messages, vec![json!("hello")]);
        assert!(registry.deliver("ghost", 0, &BACKOFF).is_none());
    }

    #[test]
    fn expire_messages_sweeps_every_session() {
        let registry = SessionRegistry::new();
        let gen = ids();
        let start = Instant::now();
        registry.create_or_touch(Some("a"), SessionMetadata::default(), &gen, start);
        registry.create_or_touch(Some("b"), SessionMetadata::default(), &gen, start);
        registry.append("a", json!(1), start);
        registry.append("b", json!(2), start);
        registry.append("b", json!(3), start + Duration::from_secs(10));

        let removed =
            registry.expire_messages(start + Duration::from_secs(16), Duration::from_secs(15));
        assert_eq!(removed, 2);
        assert!(registry.resolve("a").unwrap().buffered_ids.is_empty());
        assert_eq!(registry.resolve("b").unwrap().buffered_ids, vec![2]);
    }

    #[test]
    fn remove_idle_evicts_only_stale_sessions() {
        let registry = SessionRegistry::new();
        let gen = ids();
        let start = Instant::now();
        registry.create_or_touch(Some("stale"), SessionMetadata::default(), &gen, start);
        registry.create_or_touch(Some("fresh"), SessionMetadata::default(), &gen, start);
        registry.touch("fresh", start + Duration::from_secs(30));

        let removed =
            registry.remove_idle(start + Duration::from_secs(61), Duration::from_secs(60));
        assert_eq!(removed, vec!["stale".to_string()]);
        assert_eq!(registry.count(), 1);
        assert!(registry.contains("fresh"));

        // A second pass finds nothing new.
        assert!(registry
            .remove_idle(start + Duration::from_secs(61), Duration::from_secs(60))
            .is_empty());
    }

    #[test]
    fn concurrent_creates_of_same_id_make_one_session() {
        let registry = SessionRegistry::new();
        let gen = ids();
        let now = Instant::now();
        let barrier = std::sync::Barrier::new(8);

        let created = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry
                            .create_or_touch(Some("shared"), SessionMetadata::default(), &gen, now)
                            .created
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|created| *created)
                .count()
        });

        assert_eq!(created, 1);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn session_touched_after_scan_is_not_removed() {
        let registry = SessionRegistry::new();
        let start = Instant::now();
        registry.create_or_touch(Some("a"), SessionMetadata::default(), &ids(), start);
        let now = start + Duration::from_secs(61);
        let timeout = Duration::from_secs(60);

        assert_eq!(registry.idle_candidates(now, timeout), vec!["a".to_string()]);

        // Activity lands between the scan and the removal.
        registry.touch("a", now);

        assert!(!registry.remove_if_idle("a", now, timeout));
        assert!(registry.contains("a"));
    }

    #[test]
    fn touch_reports_missing_session() {
        let registry = SessionRegistry::new();
        assert!(!registry.touch("ghost", Instant::now()));
    }
}
