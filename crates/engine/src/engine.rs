//! The session engine.
//!
//! Write path: WAL append first, memory apply second, both under one write
//! lock, so acknowledged order equals recovered order and nothing is
//! acknowledged before it is durable (per the configured sync mode).

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use tokmesh_core::limits::DEFAULT_SESSION_TTL_SECS;
use tokmesh_core::session_id::{is_valid_session_id, normalize_session_id};
use tokmesh_core::token::{generate_token, hash_token, is_valid_token};
use tokmesh_core::{now_ms, Error, Result, Session};
use tokmesh_durability::{
    AesGcmCipher, SegmentCipher, SnapshotInfo, SnapshotManager, WalCompactor, WalEntry, WalOp,
    WalReader, WalWriter,
};
use tokmesh_storage::{SessionFilter, SessionStore};

use crate::background::Ticker;
use crate::config::EngineConfig;

/// Snapshot passes slower than this are reported.
const SNAPSHOT_WARN_AFTER: Duration = Duration::from_secs(30);

/// Recovery passes slower than this are reported.
const RECOVERY_WARN_AFTER: Duration = Duration::from_secs(5);

/// Inputs for creating a session.
#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    /// Caller-chosen session id; generated when absent.
    pub session_id: Option<String>,
    /// Owning user (required).
    pub user_id: String,
    /// Lifetime; defaults to 24 hours.
    pub ttl: Option<Duration>,
    /// Originating IP.
    pub ip_address: String,
    /// Originating user agent.
    pub user_agent: String,
    /// Client device id.
    pub device_id: String,
    /// Client-defined attributes.
    pub data: BTreeMap<String, String>,
    /// Key id or subsystem creating the session.
    pub created_by: String,
}

impl CreateParams {
    /// Params for `user_id` with everything else defaulted.
    pub fn new(user_id: impl Into<String>) -> Self {
        CreateParams {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// What recovery found and did.
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    /// Sessions restored from the snapshot.
    pub snapshot_sessions: usize,
    /// WAL entries replayed.
    pub replayed: usize,
    /// Replay errors swallowed (snapshot/WAL overlap).
    pub swallowed: usize,
    /// Wall-clock duration of the whole pass.
    pub elapsed: Duration,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Sessions in memory, expired included.
    pub sessions: usize,
    /// WAL segment files on disk.
    pub wal_segments: usize,
    /// Total WAL bytes on disk.
    pub wal_bytes: u64,
    /// Composite offset of the WAL write position.
    pub last_wal_offset: u64,
}

/// Durable session engine.
///
/// Call [`SessionEngine::recover`] after construction and
/// [`SessionEngine::close`] before shutdown; a closed engine fails writes
/// with `writer_closed`.
pub struct SessionEngine {
    config: EngineConfig,
    store: Arc<SessionStore>,
    wal: Arc<WalWriter>,
    snapshots: SnapshotManager,
    compactor: WalCompactor,
    cipher: Option<Arc<dyn SegmentCipher>>,
    /// Serializes WAL append + memory apply; also guards offset reads for
    /// snapshot consistency.
    write_lock: Mutex<()>,
    last_wal_offset: AtomicU64,
    tickers: Mutex<Vec<Ticker>>,
    closed: AtomicBool,
}

impl SessionEngine {
    /// Build the engine and start its background tasks.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        let cipher: Option<Arc<dyn SegmentCipher>> = config
            .cipher_key
            .as_ref()
            .map(|key| Arc::new(AesGcmCipher::new(key)) as Arc<dyn SegmentCipher>);

        let store = Arc::new(SessionStore::new(tokmesh_storage::StoreConfig {
            shard_count: config.shard_count,
            max_sessions_per_user: config.max_sessions_per_user,
        }));
        let wal = Arc::new(WalWriter::open(config.wal_config(), cipher.clone())?);
        let snapshots = SnapshotManager::new(config.snapshot_config(cipher.clone()))?;
        let compactor = WalCompactor::new(config.wal_dir(), config.wal_retain_count);
        let last_wal_offset = AtomicU64::new(wal.current_offset());

        let engine = Arc::new(SessionEngine {
            config,
            store,
            wal,
            snapshots,
            compactor,
            cipher,
            write_lock: Mutex::new(()),
            last_wal_offset,
            tickers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        engine.spawn_background();
        Ok(engine)
    }

    /// Convenience: construct and immediately recover.
    pub fn open(config: EngineConfig) -> Result<Arc<Self>> {
        let engine = Self::new(config)?;
        engine.recover()?;
        Ok(engine)
    }

    fn spawn_background(self: &Arc<Self>) {
        let mut tickers = self.tickers.lock();

        let weak: Weak<SessionEngine> = Arc::downgrade(self);
        tickers.push(Ticker::spawn(
            "tokmesh-snapshot",
            self.config.snapshot_interval,
            move || {
                if let Some(engine) = weak.upgrade() {
                    if let Err(e) = engine.trigger_snapshot() {
                        warn!(target: "tokmesh::engine", error = %e, "periodic snapshot failed");
                    }
                }
            },
        ));

        let weak: Weak<SessionEngine> = Arc::downgrade(self);
        tickers.push(Ticker::spawn(
            "tokmesh-expiry-sweep",
            self.config.expiry_sweep_interval,
            move || {
                if let Some(engine) = weak.upgrade() {
                    let removed = engine.delete_expired();
                    if removed > 0 {
                        debug!(target: "tokmesh::engine", removed, "swept expired sessions");
                    }
                }
            },
        ));
    }

    /// Create a session with a server-generated token.
    ///
    /// Returns the session and the plaintext token; the plaintext is
    /// surfaced exactly once and only its hash is stored.
    pub fn create(&self, params: CreateParams) -> Result<(Session, String)> {
        let (plaintext, hash) = generate_token();
        let session = self.build_session(params, hash)?;
        self.commit(WalEntry::create(&session, now_ms()), || {
            self.store.create(session.clone())
        })?;
        Ok((session, plaintext))
    }

    /// Create a session from a client-supplied plaintext token (the SET
    /// path); the engine computes the hash.
    pub fn create_with_token(&self, params: CreateParams, token: &str) -> Result<Session> {
        if !is_valid_token(token) {
            return Err(Error::TokenInvalid);
        }
        let session = self.build_session(params, hash_token(token))?;
        self.commit(WalEntry::create(&session, now_ms()), || {
            self.store.create(session.clone())
        })?;
        Ok(session)
    }

    /// Fetch by id; expired sessions read as absent.
    pub fn get(&self, id: &str) -> Result<Session> {
        self.store.get(&normalize_session_id(id))
    }

    /// Fetch by token hash.
    pub fn get_by_token(&self, token_hash: &str) -> Result<Session> {
        self.store.get_by_token(token_hash)
    }

    /// Compare-and-set update. The caller passes the new state with its
    /// version already bumped past `expected_version`.
    pub fn update(&self, session: Session, expected_version: u64) -> Result<()> {
        session.validate()?;
        self.commit(WalEntry::update(&session, now_ms()), || {
            self.store.update(session.clone(), expected_version)
        })
    }

    /// Versionless overwrite used by access-touch paths.
    pub fn update_session(&self, session: Session) -> Result<()> {
        session.validate()?;
        self.commit(WalEntry::update(&session, now_ms()), || {
            self.store.update_session(session.clone())
        })
    }

    /// Delete by id.
    pub fn delete(&self, id: &str) -> Result<()> {
        let id = normalize_session_id(id);
        self.commit(WalEntry::delete(id.clone(), now_ms()), || {
            self.store.delete(&id)
        })
    }

    /// Delete every session of a user, returning the count removed.
    ///
    /// Per-id WAL failures are logged and skipped so one bad append cannot
    /// strand the rest of the revocation.
    pub fn delete_by_user(&self, user_id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::WriterClosed);
        }

        let ids = self.store.ids_by_user(user_id);
        for id in &ids {
            match self.wal.append(&WalEntry::delete(id.clone(), now_ms())) {
                Ok(offset) => self.last_wal_offset.store(offset, Ordering::SeqCst),
                Err(e) => {
                    warn!(target: "tokmesh::engine", session = %id, error = %e, "wal append failed during revoke")
                }
            }
        }
        Ok(self.store.delete_by_user(user_id))
    }

    /// Paged listing.
    pub fn list(&self, filter: &SessionFilter) -> Vec<Session> {
        self.store.list(filter)
    }

    /// Live session count for a user.
    pub fn count_by_user(&self, user_id: &str) -> usize {
        self.store.count_by_user(user_id)
    }

    /// All live sessions of a user.
    pub fn list_by_user(&self, user_id: &str) -> Vec<Session> {
        self.store.list_by_user(user_id)
    }

    /// Drop expired sessions from memory. Expiry is a property of the
    /// session itself, so removal needs no WAL entry: replay re-skips them.
    pub fn delete_expired(&self) -> usize {
        self.store.delete_expired(now_ms())
    }

    /// Write a snapshot of the current store and prune/compact behind it.
    pub fn trigger_snapshot(&self) -> Result<SnapshotInfo> {
        let started = Instant::now();

        // Offset first, copy second: every mutation missing from the copy
        // then sits at an offset >= the recorded one and gets replayed.
        let wal_offset = {
            let _guard = self.write_lock.lock();
            self.last_wal_offset.load(Ordering::SeqCst)
        };
        let sessions = self.store.all();
        let info = self.snapshots.create(&sessions, wal_offset)?;

        if let Err(e) = self.snapshots.prune() {
            warn!(target: "tokmesh::snapshot", error = %e, "snapshot prune failed");
        }
        if let Err(e) = self.compactor.compact(info.wal_last_offset) {
            warn!(target: "tokmesh::compaction", error = %e, "wal compaction failed");
        }

        if started.elapsed() > SNAPSHOT_WARN_AFTER {
            warn!(
                target: "tokmesh::snapshot",
                elapsed_ms = started.elapsed().as_millis() as u64,
                "slow snapshot pass"
            );
        }
        Ok(info)
    }

    /// Rebuild the store from the newest snapshot plus the WAL tail.
    ///
    /// Replay is idempotent: conflict, not-found, and version-conflict
    /// errors only indicate snapshot/WAL overlap and are logged at debug. A
    /// corrupted frame stops replay with a warning; everything recovered up
    /// to that point stands.
    pub fn recover(&self) -> Result<RecoveryStats> {
        let started = Instant::now();
        let mut stats = RecoveryStats::default();

        let snapshot = match self.snapshots.load() {
            Ok(loaded) => Some(loaded),
            Err(Error::NoSnapshots) => None,
            Err(e) => {
                warn!(target: "tokmesh::recovery", error = %e, "snapshot load failed, replaying full wal");
                None
            }
        };

        let mut reader = WalReader::open(self.config.wal_dir(), self.cipher.clone())?;
        if let Some((sessions, info)) = snapshot {
            stats.snapshot_sessions = sessions.len();
            for session in sessions {
                match self.store.create(session) {
                    Ok(()) => {}
                    Err(e) => {
                        stats.swallowed += 1;
                        debug!(target: "tokmesh::recovery", error = %e, "snapshot insert skipped");
                    }
                }
            }
            reader.seek(info.wal_last_offset)?;
        }

        let now = now_ms();
        loop {
            match reader.read() {
                Ok(Some(entry)) => {
                    stats.replayed += 1;
                    self.replay_entry(entry, now, &mut stats);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(target: "tokmesh::recovery", error = %e, "wal replay stopped early");
                    break;
                }
            }
        }

        self.last_wal_offset
            .store(self.wal.current_offset(), Ordering::SeqCst);

        stats.elapsed = started.elapsed();
        if stats.elapsed > RECOVERY_WARN_AFTER {
            warn!(
                target: "tokmesh::recovery",
                elapsed_ms = stats.elapsed.as_millis() as u64,
                "slow recovery"
            );
        }
        info!(
            target: "tokmesh::recovery",
            snapshot_sessions = stats.snapshot_sessions,
            replayed = stats.replayed,
            swallowed = stats.swallowed,
            sessions = self.store.len(),
            "recovery complete"
        );
        Ok(stats)
    }

    /// Stop background tasks and close the WAL. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for ticker in self.tickers.lock().drain(..) {
            ticker.stop();
        }
        self.wal.close()
    }

    /// Current counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            sessions: self.store.len(),
            wal_segments: self.compactor.file_count(),
            wal_bytes: self.compactor.total_size(),
            last_wal_offset: self.last_wal_offset.load(Ordering::SeqCst),
        }
    }

    /// The node id this engine writes into snapshot headers.
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    fn build_session(&self, params: CreateParams, token_hash: String) -> Result<Session> {
        let mut session = Session::new(params.user_id);
        if let Some(id) = params.session_id {
            if !is_valid_session_id(&id) {
                return Err(Error::Validation(format!("invalid session id '{}'", id)));
            }
            session.id = normalize_session_id(&id);
        }
        session.token_hash = token_hash;
        session.ip_address = params.ip_address;
        session.user_agent = params.user_agent;
        session.device_id = params.device_id;
        session.data = params.data;
        session.created_by = params.created_by;
        let ttl = params
            .ttl
            .unwrap_or(Duration::from_secs(DEFAULT_SESSION_TTL_SECS));
        session.set_expiration(ttl, session.created_at_ms);
        session.validate()?;
        Ok(session)
    }

    /// Append then apply, both under the write lock.
    fn commit(&self, entry: WalEntry, apply: impl FnOnce() -> Result<()>) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::WriterClosed);
        }
        let offset = self.wal.append(&entry)?;
        self.last_wal_offset.store(offset, Ordering::SeqCst);
        apply()
    }

    fn replay_entry(&self, entry: WalEntry, now: u64, stats: &mut RecoveryStats) {
        let result = match entry.op {
            WalOp::Create => match entry.session {
                Some(session) if session.is_expired(now) => {
                    debug!(target: "tokmesh::recovery", session = %session.id, "skipping expired create");
                    Ok(())
                }
                Some(session) => self.store.create(session),
                None => Err(Error::InvalidEntry(entry.session_id.clone())),
            },
            WalOp::Update => match entry.session {
                Some(session) => {
                    let expected = session.version.saturating_sub(1);
                    self.store.update(session, expected)
                }
                None => Err(Error::InvalidEntry(entry.session_id.clone())),
            },
            WalOp::Delete => self.store.delete(&entry.session_id),
        };

        if let Err(e) = result {
            stats.swallowed += 1;
            if e.is_replay_benign() {
                debug!(target: "tokmesh::recovery", error = %e, "replay overlap swallowed");
            } else {
                warn!(target: "tokmesh::recovery", error = %e, "replay entry rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokmesh_durability::wal::SyncMode;

    fn engine_at(dir: &std::path::Path) -> Arc<SessionEngine> {
        SessionEngine::new(EngineConfig::for_testing(dir)).unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path());

        let (session, token) = engine.create(CreateParams::new("u1")).unwrap();
        assert!(token.starts_with("tmtk_"));
        assert_eq!(session.version, 1);
        assert!(session.expires_at_ms > 0);

        let got = engine.get(&session.id).unwrap();
        assert_eq!(got, session);
        assert_eq!(engine.get_by_token(&session.token_hash).unwrap().id, session.id);
        engine.close().unwrap();
    }

    #[test]
    fn test_create_with_token_paths() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path());

        let (token, _) = tokmesh_core::token::generate_token();
        let session = engine
            .create_with_token(CreateParams::new("u1"), &token)
            .unwrap();
        assert_eq!(session.token_hash, hash_token(&token));

        assert!(matches!(
            engine.create_with_token(CreateParams::new("u1"), "not-a-token"),
            Err(Error::TokenInvalid)
        ));
        engine.close().unwrap();
    }

    #[test]
    fn test_create_with_explicit_id() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path());

        let mut params = CreateParams::new("u1");
        params.session_id = Some("TMSS-01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string());
        let (session, _) = engine.create(params).unwrap();
        assert_eq!(session.id, "tmss-01arz3ndektsv4rrffq69g5fav");

        let mut bad = CreateParams::new("u1");
        bad.session_id = Some("nope".to_string());
        assert!(matches!(engine.create(bad), Err(Error::Validation(_))));
        engine.close().unwrap();
    }

    #[test]
    fn test_update_and_version_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path());

        let (session, _) = engine.create(CreateParams::new("u1")).unwrap();
        let mut v2 = session.clone();
        v2.incr_version();
        v2.data.insert("k".to_string(), "v".to_string());
        engine.update(v2, 1).unwrap();

        let got = engine.get(&session.id).unwrap();
        assert_eq!(got.version, 2);
        assert_eq!(got.data["k"], "v");

        let mut stale = session.clone();
        stale.incr_version();
        assert!(matches!(
            engine.update(stale, 1),
            Err(Error::VersionConflict { .. })
        ));
        engine.close().unwrap();
    }

    #[test]
    fn test_delete_and_revoke_user() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path());

        let (a, _) = engine.create(CreateParams::new("u1")).unwrap();
        engine.create(CreateParams::new("u1")).unwrap();
        engine.create(CreateParams::new("u2")).unwrap();

        engine.delete(&a.id).unwrap();
        assert!(matches!(engine.delete(&a.id), Err(Error::NotFound(_))));

        assert_eq!(engine.delete_by_user("u1").unwrap(), 1);
        assert_eq!(engine.count_by_user("u1"), 0);
        assert_eq!(engine.count_by_user("u2"), 1);
        engine.close().unwrap();
    }

    #[test]
    fn test_close_then_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path());
        engine.close().unwrap();
        assert!(matches!(
            engine.create(CreateParams::new("u1")),
            Err(Error::WriterClosed)
        ));
        // Idempotent.
        engine.close().unwrap();
    }

    #[test]
    fn test_recover_from_wal_only() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b);
        {
            let engine = engine_at(dir.path());
            a = engine.create(CreateParams::new("u1")).unwrap().0;
            b = engine.create(CreateParams::new("u2")).unwrap().0;
            engine.delete(&b.id).unwrap();
            engine.close().unwrap();
        }

        let engine = engine_at(dir.path());
        let stats = engine.recover().unwrap();
        assert_eq!(stats.snapshot_sessions, 0);
        assert_eq!(stats.replayed, 3);
        assert_eq!(engine.get(&a.id).unwrap().id, a.id);
        assert!(engine.get(&b.id).is_err());
        engine.close().unwrap();
    }

    #[test]
    fn test_recover_with_snapshot_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b);
        {
            let engine = engine_at(dir.path());
            a = engine.create(CreateParams::new("u1")).unwrap().0;
            engine.trigger_snapshot().unwrap();
            // Mutations after the snapshot land in the WAL tail.
            b = engine.create(CreateParams::new("u2")).unwrap().0;
            let mut v2 = a.clone();
            v2.incr_version();
            v2.device_id = "laptop".to_string();
            engine.update(v2, 1).unwrap();
            engine.close().unwrap();
        }

        let engine = engine_at(dir.path());
        let stats = engine.recover().unwrap();
        assert_eq!(stats.snapshot_sessions, 1);
        assert_eq!(stats.replayed, 2);
        assert_eq!(engine.get(&a.id).unwrap().device_id, "laptop");
        assert_eq!(engine.get(&a.id).unwrap().version, 2);
        assert_eq!(engine.get(&b.id).unwrap().id, b.id);
        engine.close().unwrap();
    }

    #[test]
    fn test_recover_is_idempotent_over_overlap() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = engine_at(dir.path());
            engine.create(CreateParams::new("u1")).unwrap();
            engine.trigger_snapshot().unwrap();
            engine.close().unwrap();
        }

        let engine = engine_at(dir.path());
        engine.recover().unwrap();
        assert_eq!(engine.stats().sessions, 1);

        // Running recovery again makes every snapshot insert overlap; the
        // conflicts are swallowed, never duplicated.
        let again = engine.recover().unwrap();
        assert_eq!(again.snapshot_sessions, 1);
        assert!(again.swallowed >= 1);
        assert_eq!(engine.stats().sessions, 1);
        engine.close().unwrap();
    }

    #[test]
    fn test_sync_mode_survives_simulated_kill() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let config =
                EngineConfig::for_testing(dir.path()).with_sync_mode(SyncMode::Sync);
            let engine = SessionEngine::new(config).unwrap();
            id = engine.create(CreateParams::new("u1")).unwrap().0.id;
            // Kill: no close, no drop, nothing flushed beyond what sync
            // mode already forced down.
            std::mem::forget(engine);
        }

        let engine = engine_at(dir.path());
        engine.recover().unwrap();
        assert_eq!(engine.get(&id).unwrap().id, id);
        engine.close().unwrap();
    }

    #[test]
    fn test_expired_create_skipped_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let engine = engine_at(dir.path());
            let mut params = CreateParams::new("u1");
            params.ttl = Some(Duration::from_millis(10));
            id = engine.create(params).unwrap().0.id;
            engine.close().unwrap();
        }
        std::thread::sleep(Duration::from_millis(30));

        let engine = engine_at(dir.path());
        engine.recover().unwrap();
        assert!(engine.get(&id).is_err());
        assert_eq!(engine.stats().sessions, 0);
        engine.close().unwrap();
    }

    #[test]
    fn test_snapshot_offset_excludes_replayed_writes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = engine_at(dir.path());
            for i in 0..5 {
                engine.create(CreateParams::new(format!("user-{}", i))).unwrap();
            }
            engine.trigger_snapshot().unwrap();
            engine.close().unwrap();
        }

        let engine = engine_at(dir.path());
        let stats = engine.recover().unwrap();
        assert_eq!(stats.snapshot_sessions, 5);
        // Everything was covered by the snapshot; only the close-time
        // segment boundary is left to read.
        assert_eq!(stats.replayed, 0);
        assert_eq!(engine.stats().sessions, 5);
        engine.close().unwrap();
    }

    #[test]
    fn test_quota_enforced_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::for_testing(dir.path()).with_max_sessions_per_user(2);
        let engine = SessionEngine::new(config).unwrap();

        engine.create(CreateParams::new("u1")).unwrap();
        engine.create(CreateParams::new("u1")).unwrap();
        assert!(matches!(
            engine.create(CreateParams::new("u1")),
            Err(Error::QuotaExceeded { .. })
        ));
        engine.close().unwrap();
    }

    #[test]
    fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path());
        engine.create(CreateParams::new("u1")).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.sessions, 1);
        assert!(stats.wal_segments >= 1);
        assert!(stats.wal_bytes > 0);
        assert!(stats.last_wal_offset > 0);
        engine.close().unwrap();
    }
}
