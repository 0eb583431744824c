//! Sharded session map with secondary indexes.
//!
//! # Design
//!
//! - Sessions live in `N` shards (power of two), selected by id hash, each
//!   behind its own `parking_lot::Mutex`. Writers on disjoint shards never
//!   contend.
//! - Two global secondary indexes (`user_id -> ids`, `token_hash -> id`)
//!   are guarded by a single index mutex so the per-user quota check is
//!   atomic with the insert.
//! - Lock order is always index mutex first, then shard mutex. Plain reads
//!   by id take only the shard lock.
//!
//! # Expiry
//!
//! Expired sessions are logically absent: reads report `NotFound`, listings
//! skip them. Physical removal happens through `delete_expired`, driven by
//! the engine's sweep task.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use tokmesh_core::limits::DEFAULT_MAX_SESSIONS_PER_USER;
use tokmesh_core::{now_ms, Error, Result, Session};

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of shards; rounded up to the next power of two.
    pub shard_count: usize,
    /// Cap on live sessions per user id.
    pub max_sessions_per_user: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            shard_count: DEFAULT_SHARD_COUNT,
            max_sessions_per_user: DEFAULT_MAX_SESSIONS_PER_USER,
        }
    }
}

/// Paged listing filter.
///
/// Pages are 1-based; `page_size` defaults to 20 and is capped at 100.
/// Ordering is deterministic by session id.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Restrict to one user id.
    pub user_id: Option<String>,
    /// 1-based page number; zero is treated as page 1.
    pub page: usize,
    /// Page size; zero means the default of 20.
    pub page_size: usize,
}

impl SessionFilter {
    /// Default page size when none is given.
    pub const DEFAULT_PAGE_SIZE: usize = 20;
    /// Largest accepted page size.
    pub const MAX_PAGE_SIZE: usize = 100;

    fn effective_page(&self) -> usize {
        self.page.max(1)
    }

    fn effective_page_size(&self) -> usize {
        match self.page_size {
            0 => Self::DEFAULT_PAGE_SIZE,
            n => n.min(Self::MAX_PAGE_SIZE),
        }
    }
}

/// Secondary indexes, updated together with the shard maps.
#[derive(Default)]
struct Indexes {
    /// user id -> sorted set of session ids.
    by_user: FxHashMap<String, BTreeSet<String>>,
    /// token hash -> session id.
    by_token: FxHashMap<String, String>,
}

type Shard = Mutex<FxHashMap<String, Session>>;

/// Sharded in-memory session store.
///
/// All mutating operations keep the shard map and both indexes consistent:
/// either all three structures are updated or none.
pub struct SessionStore {
    shards: Vec<Shard>,
    indexes: Mutex<Indexes>,
    shard_mask: usize,
    max_sessions_per_user: usize,
}

impl SessionStore {
    /// Create a store from configuration.
    pub fn new(config: StoreConfig) -> Self {
        let shard_count = config.shard_count.max(1).next_power_of_two();
        let shards = (0..shard_count)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect();
        SessionStore {
            shards,
            indexes: Mutex::new(Indexes::default()),
            shard_mask: shard_count - 1,
            max_sessions_per_user: config.max_sessions_per_user.max(1),
        }
    }

    fn shard_for(&self, id: &str) -> &Shard {
        let mut hasher = FxHasher::default();
        id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize & self.shard_mask]
    }

    /// Number of shards (power of two).
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Insert a new session.
    ///
    /// Fails with `Conflict` when the id is present and with
    /// `QuotaExceeded` when the user already holds the configured maximum.
    /// A zero version is normalized to 1.
    pub fn create(&self, mut session: Session) -> Result<()> {
        if session.version == 0 {
            session.version = 1;
        }

        let mut indexes = self.indexes.lock();
        let mut shard = self.shard_for(&session.id).lock();

        let expired_occupant = match shard.get(&session.id) {
            Some(existing) if !existing.is_expired(now_ms()) => {
                return Err(Error::Conflict(session.id));
            }
            Some(_) => true,
            None => false,
        };
        if expired_occupant {
            // An expired occupant is logically absent; evict it.
            if let Some(evicted) = shard.remove(&session.id) {
                Self::unindex(&mut indexes, &evicted);
            }
        }
        let user_sessions = indexes.by_user.entry(session.user_id.clone()).or_default();
        if user_sessions.len() >= self.max_sessions_per_user {
            return Err(Error::QuotaExceeded {
                user_id: session.user_id,
                limit: self.max_sessions_per_user,
            });
        }

        user_sessions.insert(session.id.clone());
        indexes
            .by_token
            .insert(session.token_hash.clone(), session.id.clone());
        shard.insert(session.id.clone(), session);
        Ok(())
    }

    /// Fetch a session by id. Expired sessions read as absent.
    pub fn get(&self, id: &str) -> Result<Session> {
        let shard = self.shard_for(id).lock();
        match shard.get(id) {
            Some(s) if !s.is_expired(now_ms()) => Ok(s.clone()),
            _ => Err(Error::NotFound(id.to_string())),
        }
    }

    /// Fetch a session by token hash, with the same expiry rules as `get`.
    pub fn get_by_token(&self, token_hash: &str) -> Result<Session> {
        let id = {
            let indexes = self.indexes.lock();
            indexes.by_token.get(token_hash).cloned()
        };
        match id {
            Some(id) => self.get(&id),
            None => Err(Error::NotFound(format!(
                "token {}",
                token_hash.get(..8).unwrap_or(token_hash)
            ))),
        }
    }

    /// Compare-and-set replace.
    ///
    /// Fails with `NotFound` when the id is absent and `VersionConflict`
    /// when the stored version differs from `expected_version`. The caller
    /// passes a session whose version is already bumped past the stored one.
    pub fn update(&self, session: Session, expected_version: u64) -> Result<()> {
        let mut indexes = self.indexes.lock();
        let mut shard = self.shard_for(&session.id).lock();

        let stored = shard
            .get(&session.id)
            .ok_or_else(|| Error::NotFound(session.id.clone()))?;
        if stored.version != expected_version {
            return Err(Error::VersionConflict {
                id: session.id.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        Self::reindex(&mut indexes, stored, &session);
        shard.insert(session.id.clone(), session);
        Ok(())
    }

    /// Versionless overwrite used by access-touch paths.
    ///
    /// Still requires the id to exist.
    pub fn update_session(&self, session: Session) -> Result<()> {
        let mut indexes = self.indexes.lock();
        let mut shard = self.shard_for(&session.id).lock();

        let stored = shard
            .get(&session.id)
            .ok_or_else(|| Error::NotFound(session.id.clone()))?;
        Self::reindex(&mut indexes, stored, &session);
        shard.insert(session.id.clone(), session);
        Ok(())
    }

    /// Remove a session from the map and both indexes.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut indexes = self.indexes.lock();
        let mut shard = self.shard_for(id).lock();

        let removed = shard.remove(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        Self::unindex(&mut indexes, &removed);
        Ok(())
    }

    /// Count live (unexpired) sessions for a user.
    pub fn count_by_user(&self, user_id: &str) -> usize {
        self.list_by_user(user_id).len()
    }

    /// All unexpired sessions of a user, ordered by id.
    pub fn list_by_user(&self, user_id: &str) -> Vec<Session> {
        let ids = self.ids_by_user(user_id);
        let now = now_ms();
        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            let shard = self.shard_for(&id).lock();
            if let Some(s) = shard.get(&id) {
                if !s.is_expired(now) {
                    sessions.push(s.clone());
                }
            }
        }
        sessions
    }

    /// All indexed session ids of a user, expired included, ordered by id.
    pub fn ids_by_user(&self, user_id: &str) -> Vec<String> {
        let indexes = self.indexes.lock();
        indexes
            .by_user
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every session of a user. Returns the number removed.
    pub fn delete_by_user(&self, user_id: &str) -> usize {
        let ids = self.ids_by_user(user_id);
        let mut removed = 0;
        for id in ids {
            if self.delete(&id).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Remove all sessions whose expiry has passed. Returns the count.
    pub fn delete_expired(&self, now_ms: u64) -> usize {
        let mut expired = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            for (id, session) in shard.iter() {
                if session.expires_at_ms > 0 && session.expires_at_ms < now_ms {
                    expired.push(id.clone());
                }
            }
        }
        let mut removed = 0;
        for id in expired {
            if self.delete(&id).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(target: "tokmesh::storage", removed, "removed expired sessions");
        }
        removed
    }

    /// Paged, deterministically ordered listing.
    pub fn list(&self, filter: &SessionFilter) -> Vec<Session> {
        let mut ids: Vec<String> = match &filter.user_id {
            Some(user_id) => self.ids_by_user(user_id),
            None => {
                let mut all = Vec::new();
                for shard in &self.shards {
                    let shard = shard.lock();
                    all.extend(shard.keys().cloned());
                }
                all.sort();
                all
            }
        };
        ids.dedup();

        let now = now_ms();
        let page_size = filter.effective_page_size();
        let start = (filter.effective_page() - 1).saturating_mul(page_size);

        // Filter expiry after paging would under-fill pages; filter first.
        let mut live = Vec::new();
        for id in ids {
            let shard = self.shard_for(&id).lock();
            if let Some(s) = shard.get(&id) {
                if !s.is_expired(now) {
                    live.push(s.clone());
                }
            }
        }
        live.into_iter().skip(start).take(page_size).collect()
    }

    /// Visit every session; the callback returns `false` to stop early.
    pub fn scan(&self, mut f: impl FnMut(&Session) -> bool) {
        for shard in &self.shards {
            let shard = shard.lock();
            for session in shard.values() {
                if !f(session) {
                    return;
                }
            }
        }
    }

    /// Shard-by-shard copy of every session, for snapshotting.
    ///
    /// The copy is weakly consistent: writes racing the copy may or may not
    /// be included, which replay-after-snapshot tolerates.
    pub fn all(&self) -> Vec<Session> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            out.extend(shard.values().cloned());
        }
        out
    }

    /// Number of stored sessions, expired included.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// True when no sessions are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reindex(indexes: &mut Indexes, old: &Session, new: &Session) {
        if old.token_hash != new.token_hash {
            indexes.by_token.remove(&old.token_hash);
            indexes
                .by_token
                .insert(new.token_hash.clone(), new.id.clone());
        }
        if old.user_id != new.user_id {
            if let Some(ids) = indexes.by_user.get_mut(&old.user_id) {
                ids.remove(&old.id);
                if ids.is_empty() {
                    indexes.by_user.remove(&old.user_id);
                }
            }
            indexes
                .by_user
                .entry(new.user_id.clone())
                .or_default()
                .insert(new.id.clone());
        }
    }

    fn unindex(indexes: &mut Indexes, removed: &Session) {
        if let Some(ids) = indexes.by_user.get_mut(&removed.user_id) {
            ids.remove(&removed.id);
            if ids.is_empty() {
                indexes.by_user.remove(&removed.user_id);
            }
        }
        indexes.by_token.remove(&removed.token_hash);
    }
}
