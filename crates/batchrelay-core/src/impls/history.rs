//! InMemoryHistoryStore - session history kept in process memory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{ConfigError, SessionId};
use crate::ports::{Clock, HISTORY_LIMIT, HistoryEntry, HistorySession, HistoryStore, IdGenerator};

#[derive(Default)]
struct Sessions {
    by_id: HashMap<SessionId, HistorySession>,
    current: Option<SessionId>,
}

pub struct InMemoryHistoryStore {
    sessions: Mutex<Sessions>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl InMemoryHistoryStore {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(Sessions::default()),
            ids,
            clock,
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn current_session(&self) -> Result<Option<SessionId>, ConfigError> {
        Ok(self.sessions.lock().await.current)
    }

    async fn create_session(&self) -> Result<SessionId, ConfigError> {
        let id = self.ids.generate_session_id();
        let session = HistorySession {
            id,
            created_at: self.clock.now(),
            entries: Vec::new(),
        };
        let mut sessions = self.sessions.lock().await;
        sessions.by_id.insert(id, session);
        sessions.current = Some(id);
        debug!(session = %id, "history session created");
        Ok(id)
    }

    async fn load(&self, id: SessionId) -> Result<Option<HistorySession>, ConfigError> {
        Ok(self.sessions.lock().await.by_id.get(&id).cloned())
    }

    async fn save(&self, id: SessionId, mut entries: Vec<HistoryEntry>) -> Result<(), ConfigError> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.by_id.get_mut(&id) else {
            debug!(session = %id, "save for unknown session ignored");
            return Ok(());
        };
        if entries.len() > HISTORY_LIMIT {
            entries.drain(..entries.len() - HISTORY_LIMIT);
        }
        session.entries = entries;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(SessionId, DateTime<Utc>)>, ConfigError> {
        let sessions = self.sessions.lock().await;
        let mut listed: Vec<_> = sessions
            .by_id
            .values()
            .map(|s| (s.id, s.created_at))
            .collect();
        listed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        Ok(listed)
    }

    async fn delete(&self, id: SessionId) -> Result<(), ConfigError> {
        let mut sessions = self.sessions.lock().await;
        sessions.by_id.remove(&id);
        if sessions.current == Some(id) {
            sessions.current = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, HistoryEntryKind, SystemClock, UlidGenerator};
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    fn store() -> InMemoryHistoryStore {
        InMemoryHistoryStore::new(
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }

    fn entry(i: usize) -> HistoryEntry {
        HistoryEntry::new(HistoryEntryKind::User, format!("entry {i}"), Utc::now())
    }

    #[tokio::test]
    async fn save_keeps_the_newest_entries() {
        let store = store();
        let id = store.create_session().await.unwrap();
        store
            .save(id, (0..HISTORY_LIMIT + 20).map(entry).collect())
            .await
            .unwrap();

        let session = store.load(id).await.unwrap().unwrap();
        assert_eq!(session.entries.len(), HISTORY_LIMIT);
        assert_eq!(session.entries[0].content, "entry 20");
    }

    #[tokio::test]
    async fn save_to_unknown_session_is_ignored() {
        let store = store();
        store.save(SessionId::generate(), vec![entry(0)]).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    struct SteppingClock(StdMutex<DateTime<Utc>>);

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut now = self.0.lock().unwrap();
            let current = *now;
            *now += chrono::Duration::hours(1);
            current
        }
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let store = InMemoryHistoryStore::new(
            Arc::new(UlidGenerator::new(FixedClock::new(start))),
            Arc::new(SteppingClock(StdMutex::new(start))),
        );
        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();
        let c = store.create_session().await.unwrap();

        let listed: Vec<SessionId> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(listed, vec![c, b, a]);
    }

    #[tokio::test]
    async fn deleting_current_session_clears_pointer() {
        let store = store();
        let old = store.create_session().await.unwrap();
        let current = store.create_session().await.unwrap();

        store.delete(old).await.unwrap();
        assert_eq!(store.current_session().await.unwrap(), Some(current));

        store.delete(current).await.unwrap();
        assert_eq!(store.current_session().await.unwrap(), None);
        assert!(store.load(current).await.unwrap().is_none());
    }
}
