//! Command dispatcher: auth, permissions, arg parsing, and the verb
//! handlers that map Redis-compatible commands onto engine operations.
//!
//! Dispatch order: empty command, pre-auth verbs (`PING`/`AUTH`/`QUIT`),
//! the NOAUTH gate, the per-IP rate limiter, the role gate, then the
//! handler. Domain errors reply as `ERR <TM-XXX-NNNN> <message>`; protocol
//! violations stay free-form `ERR <text>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use tokmesh_core::time::format_rfc3339_ms;
use tokmesh_core::token::{hash_token, is_valid_token, mask_token};
use tokmesh_core::{now_ms, Error, Session};
use tokmesh_engine::{CreateParams, SessionEngine};
use tokmesh_storage::SessionFilter;

use crate::auth::Keyring;
use crate::codec::RespWriter;
use crate::conn::ConnState;
use crate::glob::match_glob;
use crate::limiter::RateLimiter;

/// Maximum keys accepted by one DEL.
pub const MAX_DEL_KEYS: usize = 1000;

/// Default page size for SCAN.
const DEFAULT_SCAN_COUNT: usize = 10;

/// What the connection should do after a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep reading commands.
    Continue,
    /// Flush and close the connection.
    Close,
}

/// Maps parsed commands onto the engine.
pub struct Dispatcher {
    engine: Arc<SessionEngine>,
    keyring: Arc<Keyring>,
    limiter: RateLimiter,
}

/// The JSON body accepted by SET.
#[derive(Debug, Default, Deserialize)]
struct SetPayload {
    user_id: Option<String>,
    token: Option<String>,
    device_id: Option<String>,
    data: Option<BTreeMap<String, String>>,
}

/// The JSON body accepted by TM.CREATE.
#[derive(Debug, Default, Deserialize)]
struct CreatePayload {
    user_id: Option<String>,
    device_id: Option<String>,
    data: Option<BTreeMap<String, String>>,
}

/// The JSON reply of TM.CREATE; the plaintext token appears exactly here
/// and nowhere else.
#[derive(Debug, Serialize)]
struct CreatedView {
    session_id: String,
    token: String,
    expires_at: String,
}

/// Externalized session view returned by GET. Internal fields and the
/// token hash are never emitted.
#[derive(Debug, Serialize)]
struct SessionView {
    id: String,
    user_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    device_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    ip_address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    user_agent: String,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    last_active: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    last_access_ip: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    data: BTreeMap<String, String>,
}

impl SessionView {
    fn from_session(s: &Session) -> Self {
        SessionView {
            id: s.id.clone(),
            user_id: s.user_id.clone(),
            device_id: s.device_id.clone(),
            ip_address: s.ip_address.clone(),
            user_agent: s.user_agent.clone(),
            created_at: format_rfc3339_ms(s.created_at_ms),
            expires_at: (s.expires_at_ms > 0).then(|| format_rfc3339_ms(s.expires_at_ms)),
            last_active: format_rfc3339_ms(s.last_active_ms),
            last_access_ip: s.last_access_ip.clone(),
            data: s.data.clone(),
        }
    }
}

impl Dispatcher {
    /// Build a dispatcher over a shared engine and keyring.
    pub fn new(engine: Arc<SessionEngine>, keyring: Arc<Keyring>, rate_limit: u64) -> Self {
        Dispatcher {
            engine,
            keyring,
            limiter: RateLimiter::new(rate_limit),
        }
    }

    /// Handle one command, writing the reply into `out`.
    pub fn dispatch(&self, conn: &mut ConnState, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.is_empty() {
            out.error("ERR no command");
            return Action::Continue;
        }
        let cmd = String::from_utf8_lossy(&argv[0]).to_ascii_uppercase();

        // Pre-auth verbs bypass every other gate.
        match cmd.as_str() {
            "PING" => return self.cmd_ping(argv, out),
            "AUTH" => return self.cmd_auth(conn, argv, out),
            "QUIT" => {
                out.simple("OK");
                return Action::Close;
            }
            _ => {}
        }

        if !conn.authenticated {
            out.error("NOAUTH Authentication required");
            return Action::Continue;
        }
        if !self.limiter.allow(&conn.remote_ip) {
            write_domain_error(out, &Error::RateLimited);
            return Action::Continue;
        }
        let role = match conn.principal.as_ref() {
            Some(p) => p.role,
            None => {
                out.error("NOAUTH Authentication required");
                return Action::Continue;
            }
        };
        if !role.allows(&cmd) {
            write_domain_error(out, &Error::PermissionDenied { command: cmd });
            return Action::Continue;
        }

        match cmd.as_str() {
            "GET" => self.cmd_get(argv, out),
            "SET" => self.cmd_set(conn, argv, out),
            "DEL" => self.cmd_del(argv, out),
            "EXPIRE" => self.cmd_expire(argv, out),
            "TTL" => self.cmd_ttl(argv, out),
            "EXISTS" => self.cmd_exists(argv, out),
            "SCAN" => self.cmd_scan(argv, out),
            "TM.CREATE" => self.cmd_tm_create(conn, argv, out),
            "TM.VALIDATE" => self.cmd_tm_validate(argv, out),
            "TM.REVOKE_USER" => self.cmd_tm_revoke_user(argv, out),
            _ => {
                out.error(&format!("ERR unknown command '{}'", cmd));
                Action::Continue
            }
        }
    }

    fn cmd_ping(&self, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        match argv.len() {
            1 => out.simple("PONG"),
            2 => out.bulk(&argv[1]),
            _ => write_arity_error(out, "ping"),
        }
        Action::Continue
    }

    fn cmd_auth(&self, conn: &mut ConnState, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        // AUTH <key_id> <secret> or AUTH <key_id>:<secret>
        let (key_id, secret) = match argv.len() {
            2 => {
                let joined = String::from_utf8_lossy(&argv[1]).to_string();
                match joined.split_once(':') {
                    Some((id, secret)) => (id.to_string(), secret.to_string()),
                    None => {
                        write_domain_error(out, &Error::InvalidCredentials);
                        return Action::Continue;
                    }
                }
            }
            3 => (
                String::from_utf8_lossy(&argv[1]).to_string(),
                String::from_utf8_lossy(&argv[2]).to_string(),
            ),
            _ => {
                write_arity_error(out, "auth");
                return Action::Continue;
            }
        };

        match self.keyring.verify(&key_id, &secret) {
            Some(principal) => {
                info!(
                    target: "tokmesh::server",
                    key_id = %principal.key_id,
                    role = principal.role.name(),
                    ip = %conn.remote_ip,
                    "authenticated"
                );
                conn.authenticate(principal);
                out.simple("OK");
            }
            None => {
                debug!(target: "tokmesh::server", key_id = %key_id, ip = %conn.remote_ip, "auth rejected");
                write_domain_error(out, &Error::InvalidCredentials);
            }
        }
        Action::Continue
    }

    fn cmd_get(&self, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() != 2 {
            write_arity_error(out, "get");
            return Action::Continue;
        }
        let key = String::from_utf8_lossy(&argv[1]);
        match self.engine.get(&key) {
            Ok(session) => match serde_json::to_vec(&SessionView::from_session(&session)) {
                Ok(json) => out.bulk(&json),
                Err(e) => out.error(&format!("ERR storage error: {}", e)),
            },
            Err(e) if e.is_absent() => out.null_bulk(),
            Err(e) => write_domain_error(out, &e),
        }
        Action::Continue
    }

    fn cmd_set(&self, conn: &ConnState, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() != 3 && argv.len() != 5 {
            write_arity_error(out, "set");
            return Action::Continue;
        }
        let key = String::from_utf8_lossy(&argv[1]).to_string();

        let ttl = if argv.len() == 5 {
            if !argv[3].eq_ignore_ascii_case(b"EX") {
                out.error("ERR syntax error");
                return Action::Continue;
            }
            match parse_seconds(&argv[4]) {
                Some(secs) => Some(Duration::from_secs(secs)),
                None => {
                    out.error("ERR value is not an integer or out of range");
                    return Action::Continue;
                }
            }
        } else {
            None
        };

        let payload: SetPayload = match serde_json::from_slice(&argv[2]) {
            Ok(p) => p,
            Err(e) => {
                out.error(&format!("ERR invalid JSON payload: {}", e));
                return Action::Continue;
            }
        };

        let result = match self.engine.get(&key) {
            Ok(existing) => self.set_update(existing, payload, ttl),
            Err(e) if e.is_absent() => self.set_create(conn, key, payload, ttl),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => out.simple("OK"),
            Err(e) => write_domain_error(out, &e),
        }
        Action::Continue
    }

    /// SET on an existing session: token rotation is refused here, at the
    /// dispatcher, so the engine keeps its create-with-token primitive.
    fn set_update(
        &self,
        existing: Session,
        payload: SetPayload,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        if payload.token.is_some() {
            return Err(Error::TokenRotation);
        }
        let expected = existing.version;
        let mut updated = existing;
        if let Some(device_id) = payload.device_id {
            updated.device_id = device_id;
        }
        if let Some(data) = payload.data {
            updated.data = data;
        }
        if let Some(ttl) = ttl {
            updated.set_expiration(ttl, now_ms());
        }
        updated.incr_version();
        self.engine.update(updated, expected)
    }

    fn set_create(
        &self,
        conn: &ConnState,
        key: String,
        payload: SetPayload,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        let token = payload.token.ok_or(Error::TokenRequired)?;
        let params = CreateParams {
            session_id: Some(key),
            user_id: payload.user_id.unwrap_or_default(),
            ttl,
            device_id: payload.device_id.unwrap_or_default(),
            data: payload.data.unwrap_or_default(),
            created_by: conn
                .principal
                .as_ref()
                .map(|p| p.key_id.clone())
                .unwrap_or_default(),
            ..Default::default()
        };
        debug!(
            target: "tokmesh::server",
            token = %mask_token(&token),
            "creating session via SET"
        );
        self.engine.create_with_token(params, &token).map(|_| ())
    }

    fn cmd_del(&self, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() < 2 {
            write_arity_error(out, "del");
            return Action::Continue;
        }
        if argv.len() - 1 > MAX_DEL_KEYS {
            write_domain_error(
                out,
                &Error::TooManyKeys {
                    command: "DEL",
                    max: MAX_DEL_KEYS,
                },
            );
            return Action::Continue;
        }

        let mut removed = 0i64;
        for key in &argv[1..] {
            let key = String::from_utf8_lossy(key);
            match self.engine.delete(&key) {
                // DEL is idempotent: absent counts as deleted.
                Ok(()) | Err(Error::NotFound(_)) | Err(Error::Expired(_)) => removed += 1,
                Err(e) => {
                    write_domain_error(out, &e);
                    return Action::Continue;
                }
            }
        }
        out.integer(removed);
        Action::Continue
    }

    fn cmd_expire(&self, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() != 3 {
            write_arity_error(out, "expire");
            return Action::Continue;
        }
        let key = String::from_utf8_lossy(&argv[1]);
        let secs = match parse_seconds(&argv[2]) {
            Some(secs) => secs,
            None => {
                out.error("ERR value is not an integer or out of range");
                return Action::Continue;
            }
        };

        match self.engine.get(&key) {
            Ok(mut session) => {
                session.set_expiration(Duration::from_secs(secs), now_ms());
                session.incr_version();
                match self.engine.update_session(session) {
                    Ok(()) => out.integer(1),
                    Err(e) if e.is_absent() => out.integer(0),
                    Err(e) => write_domain_error(out, &e),
                }
            }
            Err(e) if e.is_absent() => out.integer(0),
            Err(e) => write_domain_error(out, &e),
        }
        Action::Continue
    }

    fn cmd_ttl(&self, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() != 2 {
            write_arity_error(out, "ttl");
            return Action::Continue;
        }
        let key = String::from_utf8_lossy(&argv[1]);
        match self.engine.get(&key) {
            Ok(session) => match session.ttl_remaining(now_ms()) {
                // Whole seconds, rounded up.
                Some(ms) => out.integer(((ms + 999) / 1000) as i64),
                None => out.integer(-1),
            },
            Err(e) if e.is_absent() => out.integer(-2),
            Err(e) => write_domain_error(out, &e),
        }
        Action::Continue
    }

    fn cmd_exists(&self, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() < 2 {
            write_arity_error(out, "exists");
            return Action::Continue;
        }
        let mut found = 0i64;
        for key in &argv[1..] {
            let key = String::from_utf8_lossy(key);
            if self.engine.get(&key).is_ok() {
                found += 1;
            }
        }
        out.integer(found);
        Action::Continue
    }

    /// SCAN is page-based: the cursor is a page index, not a stable
    /// position, so concurrent mutations may emit or omit recently moved
    /// sessions across iterations.
    fn cmd_scan(&self, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() < 2 {
            write_arity_error(out, "scan");
            return Action::Continue;
        }
        let cursor: u64 = match std::str::from_utf8(&argv[1]).ok().and_then(|s| s.parse().ok()) {
            Some(c) => c,
            None => {
                out.error("ERR invalid cursor");
                return Action::Continue;
            }
        };

        let mut pattern: Option<String> = None;
        let mut count = DEFAULT_SCAN_COUNT;
        let mut rest = argv[2..].iter();
        while let Some(option) = rest.next() {
            if option.eq_ignore_ascii_case(b"MATCH") {
                match rest.next() {
                    Some(p) => pattern = Some(String::from_utf8_lossy(p).to_string()),
                    None => {
                        out.error("ERR syntax error");
                        return Action::Continue;
                    }
                }
            } else if option.eq_ignore_ascii_case(b"COUNT") {
                match rest.next().and_then(|c| std::str::from_utf8(c).ok()).and_then(|c| c.parse::<usize>().ok()) {
                    Some(n) if n > 0 => count = n.min(SessionFilter::MAX_PAGE_SIZE),
                    _ => {
                        out.error("ERR value is not an integer or out of range");
                        return Action::Continue;
                    }
                }
            } else {
                out.error("ERR syntax error");
                return Action::Continue;
            }
        }

        let page = self.engine.list(&SessionFilter {
            user_id: None,
            page: cursor as usize + 1,
            page_size: count,
        });
        let fetched = page.len();
        let ids: Vec<String> = page
            .into_iter()
            .map(|s| s.id)
            .filter(|id| pattern.as_deref().map_or(true, |p| match_glob(p, id)))
            .collect();

        let next_cursor = if fetched < count {
            "0".to_string()
        } else {
            (cursor + 1).to_string()
        };

        out.array_header(2);
        out.bulk(next_cursor.as_bytes());
        out.array_header(ids.len());
        for id in &ids {
            out.bulk(id.as_bytes());
        }
        Action::Continue
    }

    fn cmd_tm_create(&self, conn: &ConnState, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() != 3 && argv.len() != 5 {
            write_arity_error(out, "tm.create");
            return Action::Continue;
        }
        let key = String::from_utf8_lossy(&argv[1]).to_string();

        let ttl = if argv.len() == 5 {
            if !argv[3].eq_ignore_ascii_case(b"TTL") {
                out.error("ERR syntax error");
                return Action::Continue;
            }
            match parse_seconds(&argv[4]) {
                Some(secs) => Some(Duration::from_secs(secs)),
                None => {
                    out.error("ERR value is not an integer or out of range");
                    return Action::Continue;
                }
            }
        } else {
            None
        };

        let payload: CreatePayload = match serde_json::from_slice(&argv[2]) {
            Ok(p) => p,
            Err(e) => {
                out.error(&format!("ERR invalid JSON payload: {}", e));
                return Action::Continue;
            }
        };

        let params = CreateParams {
            session_id: Some(key),
            user_id: payload.user_id.unwrap_or_default(),
            ttl,
            device_id: payload.device_id.unwrap_or_default(),
            data: payload.data.unwrap_or_default(),
            created_by: conn
                .principal
                .as_ref()
                .map(|p| p.key_id.clone())
                .unwrap_or_default(),
            ..Default::default()
        };

        match self.engine.create(params) {
            Ok((session, token)) => {
                let view = CreatedView {
                    session_id: session.id,
                    token,
                    expires_at: format_rfc3339_ms(session.expires_at_ms),
                };
                match serde_json::to_vec(&view) {
                    Ok(json) => out.bulk(&json),
                    Err(e) => out.error(&format!("ERR storage error: {}", e)),
                }
            }
            Err(e) => write_domain_error(out, &e),
        }
        Action::Continue
    }

    fn cmd_tm_validate(&self, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() != 2 {
            write_arity_error(out, "tm.validate");
            return Action::Continue;
        }
        let token = String::from_utf8_lossy(&argv[1]);
        if !is_valid_token(&token) {
            write_domain_error(out, &Error::TokenInvalid);
            return Action::Continue;
        }
        match self.engine.get_by_token(&hash_token(&token)) {
            Ok(_) => out.simple("OK"),
            Err(e) if e.is_absent() => write_domain_error(out, &Error::TokenInvalid),
            Err(e) => write_domain_error(out, &e),
        }
        Action::Continue
    }

    fn cmd_tm_revoke_user(&self, argv: &[Vec<u8>], out: &mut RespWriter) -> Action {
        if argv.len() != 2 {
            write_arity_error(out, "tm.revoke_user");
            return Action::Continue;
        }
        let user_id = String::from_utf8_lossy(&argv[1]);
        match self.engine.delete_by_user(&user_id) {
            Ok(removed) => out.integer(removed as i64),
            Err(e) => write_domain_error(out, &e),
        }
        Action::Continue
    }
}

/// Render a domain error: `ERR <code> <message>` when the error carries a
/// wire taxon, free-form `ERR` otherwise.
fn write_domain_error(out: &mut RespWriter, err: &Error) {
    match err.wire_code() {
        Some(code) => out.error(&format!("ERR {} {}", code, err)),
        None => out.error(&format!("ERR storage error: {}", err)),
    }
}

fn write_arity_error(out: &mut RespWriter, cmd: &str) {
    out.error(&format!(
        "ERR wrong number of arguments for '{}' command",
        cmd
    ));
}

fn parse_seconds(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.parse::<u64>().ok()
}
