use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use fjall::{Database, Keyspace, OwnedWriteBatch};
use serde::{Serialize, de::DeserializeOwned};
use tokio::task;

use crate::history::HistoryStore;
use crate::models::{CityCount, HistoryEntry, SearchCriteria};

const HISTORY_KEYSPACE: &str = "history";
const SEQUENCE_KEY: &str = "meta/sequence";
const CITY_COUNTS_KEY: &str = "stats/city";
const LOG_PREFIX: &str = "log/";

fn log_key(sequence: u64) -> String {
    format!("{LOG_PREFIX}{sequence:020}")
}

fn user_key(owner: &str) -> String {
    format!("user/{owner}")
}

fn read<T: DeserializeOwned>(rows: &Keyspace, key: &str) -> Result<Option<T>> {
    let Some(bytes) = rows.get(key.as_bytes())?.map(|v| v.to_vec()) else {
        return Ok(None);
    };
    Ok(Some(postcard::from_bytes(&bytes)?))
}

fn stage<T: Serialize>(batch: &mut OwnedWriteBatch, rows: &Keyspace, key: &str, value: &T) -> Result<()> {
    let bytes = postcard::to_stdvec(value)?;
    batch.insert(rows, key.as_bytes().to_vec(), bytes);
    Ok(())
}

/// Stage the log row, the next sequence number and the city counter.
fn stage_log_row(batch: &mut OwnedWriteBatch, rows: &Keyspace, entry: &HistoryEntry) -> Result<()> {
    let sequence: u64 = read(rows, SEQUENCE_KEY)?.unwrap_or(0);
    stage(batch, rows, &log_key(sequence), entry)?;
    stage(batch, rows, SEQUENCE_KEY, &(sequence + 1))?;

    let mut counts: BTreeMap<String, u64> = read(rows, CITY_COUNTS_KEY)?.unwrap_or_default();
    *counts.entry(entry.criteria.city.clone()).or_default() += 1;
    stage(batch, rows, CITY_COUNTS_KEY, &counts)
}

fn recent_rows(rows: &Keyspace, owner: &str, limit: usize) -> Result<Vec<SearchCriteria>> {
    let mut owned: Vec<HistoryEntry> = read(rows, &user_key(owner))?.unwrap_or_default();
    // later rows win timestamp ties
    owned.reverse();
    owned.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(owned.into_iter().take(limit).map(|row| row.criteria).collect())
}

fn city_counts(rows: &Keyspace) -> Result<Vec<CityCount>> {
    let counts: BTreeMap<String, u64> = read(rows, CITY_COUNTS_KEY)?.unwrap_or_default();
    let mut counts: Vec<CityCount> = counts
        .into_iter()
        .map(|(city, count)| CityCount { city, count })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.city.cmp(&b.city)));
    Ok(counts)
}

/// History rows persisted in a fjall keyspace.
///
/// Every write runs on the blocking pool under `write_lock` and lands as a
/// single batch, so it completes whole even when the calling request is
/// dropped.
#[derive(Clone)]
pub struct FjallHistoryStore {
    db: Database,
    rows: Keyspace,
    write_lock: Arc<Mutex<()>>,
}

impl FjallHistoryStore {
    pub fn open(db: &Database) -> Result<Self> {
        let rows = db.keyspace(HISTORY_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        Ok(Self {
            db: db.clone(),
            rows,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn append_row(&self, entry: &HistoryEntry) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("History write lock poisoned"))?;
        let mut batch = self.db.batch();
        stage_log_row(&mut batch, &self.rows, entry)?;
        batch.commit()?;
        Ok(())
    }

    fn get_or_create_row(&self, owner: &str, criteria: &SearchCriteria) -> Result<bool> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("History write lock poisoned"))?;
        let key = user_key(owner);
        let mut owned: Vec<HistoryEntry> = read(&self.rows, &key)?.unwrap_or_default();
        if owned.iter().any(|row| row.criteria == *criteria) {
            return Ok(false);
        }

        let entry = HistoryEntry::new(criteria.clone(), Some(owner.to_string()));
        let mut batch = self.db.batch();
        stage_log_row(&mut batch, &self.rows, &entry)?;
        owned.push(entry);
        stage(&mut batch, &self.rows, &key, &owned)?;
        batch.commit()?;
        Ok(true)
    }
}

#[async_trait]
impl HistoryStore for FjallHistoryStore {
    #[tracing::instrument(name = "history_append", level = "debug", skip(self))]
    async fn append(&self, entry: HistoryEntry) -> Result<()> {
        let store = self.clone();
        task::spawn_blocking(move || store.append_row(&entry)).await?
    }

    #[tracing::instrument(name = "history_get_or_create", level = "debug", skip(self))]
    async fn get_or_create(&self, owner: &str, criteria: &SearchCriteria) -> Result<bool> {
        let store = self.clone();
        let owner = owner.to_string();
        let criteria = criteria.clone();
        task::spawn_blocking(move || store.get_or_create_row(&owner, &criteria)).await?
    }

    async fn recent_for_user(&self, owner: &str, limit: usize) -> Result<Vec<SearchCriteria>> {
        let rows = self.rows.clone();
        let owner = owner.to_string();
        task::spawn_blocking(move || recent_rows(&rows, &owner, limit)).await?
    }

    async fn count_by_city(&self) -> Result<Vec<CityCount>> {
        let rows = self.rows.clone();
        task::spawn_blocking(move || city_counts(&rows)).await?
    }
}
