use anyhow::{Result, anyhow};
use fjall::{Database, Keyspace};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::{self, JoinHandle};
use tracing::{info, warn};

use crate::history::SessionHandle;
use crate::models::SearchCriteria;

const SESSION_KEYSPACE: &str = "sessions";

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "meteo_session";

/// Everything kept for an anonymous visitor
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub city_history: Vec<SearchCriteria>,
}

#[derive(Serialize, Deserialize)]
struct StoredSession {
    data: SessionData,
    expires_at: u64, // Unix timestamp (seconds)
}

/// Session loaded for the duration of one request
#[derive(Debug)]
pub struct Session {
    id: String,
    data: SessionData,
    modified: bool,
}

impl Session {
    fn fresh() -> Self {
        let id: u128 = rand::rng().random();
        Self {
            id: format!("{id:032x}"),
            data: SessionData::default(),
            modified: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

impl SessionHandle for Session {
    fn history_list(&self) -> Vec<SearchCriteria> {
        self.data.city_history.clone()
    }

    fn set_history_list(&mut self, list: Vec<SearchCriteria>) {
        self.data.city_history = list;
        self.modified = true;
    }
}

fn is_session_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

fn get_from_store(store: Keyspace, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
    Ok(store.get(key)?.map(|v| v.to_vec()))
}

/// Anonymous sessions persisted with a time-to-live
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    store: Keyspace,
    ttl: Duration,
}

impl SessionStore {
    pub fn open(db: &Database, ttl: Duration) -> Result<Self> {
        let store = db.keyspace(SESSION_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        Ok(Self {
            db: db.clone(),
            store,
            ttl,
        })
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Loads the session named by the cookie value, or starts a new one when
    /// the id is missing, unknown or expired.
    #[tracing::instrument(name = "load_session", level = "debug", skip(self))]
    pub async fn load(&self, id: Option<&str>) -> Result<Session> {
        let Some(id) = id.filter(|id| is_session_id(id)) else {
            return Ok(Session::fresh());
        };

        let store = self.store.clone();
        let key = id.as_bytes().to_vec();
        let maybe_bytes = task::spawn_blocking(move || get_from_store(store, key)).await??;

        let Some(bytes) = maybe_bytes else {
            tracing::debug!("Session not found");
            return Ok(Session::fresh());
        };

        let stored: StoredSession = postcard::from_bytes(&bytes)?;
        if unix_now()? >= stored.expires_at {
            tracing::debug!("Session found but expired");
            self.remove(id).await?;
            return Ok(Session::fresh());
        }

        Ok(Session {
            id: id.to_string(),
            data: stored.data,
            modified: false,
        })
    }

    /// Persists the session and renews its expiry.
    #[tracing::instrument(name = "save_session", level = "debug", skip(self, session), fields(id = session.id()))]
    pub async fn save(&self, session: &Session) -> Result<()> {
        let expires_at = SystemTime::now()
            .checked_add(self.ttl)
            .ok_or(anyhow!("TTL overflow"))?
            .duration_since(UNIX_EPOCH)?
            .as_secs();
        let entry = StoredSession {
            data: session.data.clone(),
            expires_at,
        };
        let bytes = postcard::to_stdvec(&entry)?;

        let store = self.store.clone();
        let key = session.id.as_bytes().to_vec();
        task::spawn_blocking(move || store.insert(key, bytes)).await??;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let key = id.as_bytes().to_vec();
        let store = self.store.clone();
        task::spawn_blocking(move || store.remove(key)).await??;
        Ok(())
    }

    /// Deletes every expired or undecodable session, returning how many went.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = unix_now()?;
        let db = self.db.clone();
        let store = self.store.clone();
        let removed = task::spawn_blocking(move || remove_expired(&db, &store, now)).await??;
        if removed > 0 {
            info!("Removed {} expired sessions", removed);
        }
        Ok(removed)
    }

    /// Sweeps now and then once per `every` until the runtime shuts down.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = sessions.sweep_expired().await {
                    warn!("Session sweep failed: {:#}", e);
                }
            }
        })
    }
}

fn remove_expired(db: &Database, store: &Keyspace, now: u64) -> Result<usize> {
    let mut batch = db.batch();
    let mut removed = 0;
    for guard in store.iter() {
        let (key, value) = guard.into_inner()?;
        let expired = postcard::from_bytes::<StoredSession>(&value)
            .map(|stored| now >= stored.expires_at)
            .unwrap_or(true);
        if expired {
            batch.remove(store, key);
            removed += 1;
        }
    }
    batch.commit()?;
    Ok(removed)
}
