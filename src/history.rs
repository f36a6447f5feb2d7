//! Search history bookkeeping.
//!
//! Every completed search leaves two traces: an entry in the viewer's recent
//! list (durable per user, or held in the anonymous session) and a row in the
//! statistics log that feeds the most-searched-cities endpoint.

use async_trait::async_trait;
use tracing::debug;

use crate::Result;
use crate::models::{CityCount, HistoryEntry, SearchCriteria};

/// Length of every recent list
pub const RECENT_LIMIT: usize = 5;

/// Durable history rows
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one row to the statistics log
    async fn append(&self, entry: HistoryEntry) -> anyhow::Result<()>;

    /// Store `criteria` for `owner` unless an identical row exists; true when created.
    /// A created row also counts towards statistics.
    async fn get_or_create(&self, owner: &str, criteria: &SearchCriteria) -> anyhow::Result<bool>;

    /// Newest first
    async fn recent_for_user(&self, owner: &str, limit: usize)
    -> anyhow::Result<Vec<SearchCriteria>>;

    /// Most searched first
    async fn count_by_city(&self) -> anyhow::Result<Vec<CityCount>>;
}

/// Per-client state of an anonymous visitor
pub trait SessionHandle: Send {
    fn history_list(&self) -> Vec<SearchCriteria>;
    fn set_history_list(&mut self, list: Vec<SearchCriteria>);
}

/// Who is searching
pub enum Viewer<'a> {
    Authenticated(&'a str),
    Anonymous(&'a mut dyn SessionHandle),
}

/// Append `criteria` unless already listed, keeping the last [`RECENT_LIMIT`] entries.
pub fn push_recent(list: &mut Vec<SearchCriteria>, criteria: SearchCriteria) -> bool {
    let inserted = !list.contains(&criteria);
    if inserted {
        list.push(criteria);
    }
    if list.len() > RECENT_LIMIT {
        list.drain(..list.len() - RECENT_LIMIT);
    }
    inserted
}

pub struct HistoryLedger<S> {
    store: S,
}

impl<S: HistoryStore> HistoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Log one search for statistics.
    ///
    /// Rows carry no owner so they never show up in a user's recent list.
    pub async fn record_for_statistics(&self, criteria: &SearchCriteria) -> Result<()> {
        self.store
            .append(HistoryEntry::new(criteria.clone(), None))
            .await?;
        Ok(())
    }

    /// Remember `criteria` in the viewer's recent list; false when it was already there.
    pub async fn record_recent(
        &self,
        criteria: &SearchCriteria,
        viewer: &mut Viewer<'_>,
    ) -> Result<bool> {
        match viewer {
            Viewer::Authenticated(user) => Ok(self.store.get_or_create(user, criteria).await?),
            Viewer::Anonymous(session) => {
                let mut list = session.history_list();
                let inserted = push_recent(&mut list, criteria.clone());
                session.set_history_list(list);
                Ok(inserted)
            }
        }
    }

    /// Both history effects of a completed search.
    ///
    /// The statistics log grows by exactly one row per call.
    pub async fn record(&self, criteria: &SearchCriteria, viewer: &mut Viewer<'_>) -> Result<()> {
        let fresh = self.record_recent(criteria, viewer).await?;
        match viewer {
            Viewer::Anonymous(_) => self.record_for_statistics(criteria).await?,
            Viewer::Authenticated(_) if !fresh => self.record_for_statistics(criteria).await?,
            Viewer::Authenticated(_) => {}
        }
        debug!("Recorded search for {} (new recent entry: {})", criteria.city, fresh);
        Ok(())
    }

    /// Recent searches to show next to the form
    pub async fn attach_history(&self, viewer: &mut Viewer<'_>) -> Result<Vec<SearchCriteria>> {
        match viewer {
            Viewer::Authenticated(user) => {
                Ok(self.store.recent_for_user(user, RECENT_LIMIT).await?)
            }
            Viewer::Anonymous(session) => Ok(session.history_list()),
        }
    }

    /// Search counts per city
    pub async fn statistics(&self) -> Result<Vec<CityCount>> {
        Ok(self.store.count_by_city().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FjallHistoryStore;
    use rstest::rstest;

    #[derive(Default)]
    struct MemorySession {
        list: Vec<SearchCriteria>,
    }

    impl SessionHandle for MemorySession {
        fn history_list(&self) -> Vec<SearchCriteria> {
            self.list.clone()
        }

        fn set_history_list(&mut self, list: Vec<SearchCriteria>) {
            self.list = list;
        }
    }

    fn criteria(city: &str, days: u8) -> SearchCriteria {
        SearchCriteria::new(city, Some("Россия".to_string()), Some("RU".to_string()), None, days)
    }

    fn ledger() -> (tempfile::TempDir, HistoryLedger<FjallHistoryStore>) {
        let dir = tempfile::tempdir().unwrap();
        let db = fjall::Database::builder(dir.path()).open().unwrap();
        let store = FjallHistoryStore::open(&db).unwrap();
        (dir, HistoryLedger::new(store))
    }

    async fn total(ledger: &HistoryLedger<FjallHistoryStore>) -> u64 {
        ledger.statistics().await.unwrap().iter().map(|c| c.count).sum()
    }

    #[rstest]
    #[case(3, 3)]
    #[case(5, 5)]
    #[case(9, 5)]
    fn test_push_recent_bounded(#[case] pushes: usize, #[case] expected: usize) {
        let mut list = Vec::new();
        for i in 0..pushes {
            push_recent(&mut list, criteria(&format!("city-{i}"), 3));
        }
        assert_eq!(list.len(), expected);
        assert_eq!(list.last().unwrap().city, format!("city-{}", pushes - 1));
    }

    #[test]
    fn test_push_recent_deduplicates_without_reordering() {
        let mut list = vec![criteria("Москва", 3), criteria("Тула", 3)];
        assert!(!push_recent(&mut list, criteria("Москва", 3)));
        assert_eq!(list, vec![criteria("Москва", 3), criteria("Тула", 3)]);

        // a different day count is a different search
        assert!(push_recent(&mut list, criteria("Москва", 5)));
        assert_eq!(list.len(), 3);
    }

    #[tokio::test]
    async fn test_anonymous_search_always_counts() {
        let (_dir, ledger) = ledger();
        let mut session = MemorySession::default();

        for _ in 0..3 {
            let mut viewer = Viewer::Anonymous(&mut session);
            ledger.record(&criteria("Москва", 3), &mut viewer).await.unwrap();
        }

        assert_eq!(session.list, vec![criteria("Москва", 3)]);
        assert_eq!(total(&ledger).await, 3);
    }

    #[tokio::test]
    async fn test_authenticated_search_counts_once_per_search() {
        let (_dir, ledger) = ledger();

        for _ in 0..4 {
            let mut viewer = Viewer::Authenticated("alice");
            ledger.record(&criteria("Казань", 2), &mut viewer).await.unwrap();
        }

        assert_eq!(total(&ledger).await, 4);
        let mut viewer = Viewer::Authenticated("alice");
        let recent = ledger.attach_history(&mut viewer).await.unwrap();
        assert_eq!(recent, vec![criteria("Казань", 2)]);
    }

    #[tokio::test]
    async fn test_anonymous_history_never_exceeds_limit() {
        let (_dir, ledger) = ledger();
        let mut session = MemorySession::default();

        for i in 0..8 {
            let mut viewer = Viewer::Anonymous(&mut session);
            ledger.record(&criteria(&format!("city-{i}"), 1), &mut viewer).await.unwrap();
        }

        let mut viewer = Viewer::Anonymous(&mut session);
        let attached = ledger.attach_history(&mut viewer).await.unwrap();
        assert_eq!(attached.len(), RECENT_LIMIT);
        assert_eq!(attached[0].city, "city-3");
        assert_eq!(attached[4].city, "city-7");
    }

    #[tokio::test]
    async fn test_users_do_not_see_each_other() {
        let (_dir, ledger) = ledger();
        let mut alice = Viewer::Authenticated("alice");
        ledger.record(&criteria("Омск", 3), &mut alice).await.unwrap();

        let mut bob = Viewer::Authenticated("bob");
        assert!(ledger.attach_history(&mut bob).await.unwrap().is_empty());
    }
}
