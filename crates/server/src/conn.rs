//! Per-connection state and the role model.

/// Permission bundle attached to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No session verbs at all.
    Metrics,
    /// Read-only session verbs.
    Validator,
    /// Read and write session verbs, including the `TM.*` family.
    Issuer,
    /// Everything.
    Admin,
}

/// Read-only verbs a validator may run.
const READ_COMMANDS: &[&str] = &["GET", "TTL", "EXISTS", "SCAN", "TM.VALIDATE"];

/// Mutating verbs; issuer and above.
const WRITE_COMMANDS: &[&str] = &["SET", "DEL", "EXPIRE", "TM.CREATE", "TM.REVOKE_USER"];

impl Role {
    /// Parse a role name (case-insensitive).
    pub fn parse(name: &str) -> Option<Role> {
        match name.to_ascii_lowercase().as_str() {
            "metrics" => Some(Role::Metrics),
            "validator" => Some(Role::Validator),
            "issuer" => Some(Role::Issuer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Whether this role may run the (upper-cased) command.
    pub fn allows(&self, command: &str) -> bool {
        match self {
            Role::Admin => true,
            Role::Issuer => {
                READ_COMMANDS.contains(&command) || WRITE_COMMANDS.contains(&command)
            }
            Role::Validator => READ_COMMANDS.contains(&command),
            Role::Metrics => false,
        }
    }

    /// Lower-case name as configured.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Metrics => "metrics",
            Role::Validator => "validator",
            Role::Issuer => "issuer",
            Role::Admin => "admin",
        }
    }
}

/// The identity a connection authenticated as.
#[derive(Debug, Clone)]
pub struct Principal {
    /// API key id presented by AUTH.
    pub key_id: String,
    /// Role attached to the key.
    pub role: Role,
    /// Human-readable key name.
    pub name: String,
}

/// Mutable per-connection state: created on accept, transitions on AUTH,
/// destroyed on close.
#[derive(Debug, Clone)]
pub struct ConnState {
    /// Whether AUTH has succeeded.
    pub authenticated: bool,
    /// Principal after a successful AUTH.
    pub principal: Option<Principal>,
    /// Remote IP without the port, for rate limiting.
    pub remote_ip: String,
}

impl ConnState {
    /// Fresh unauthenticated state for a peer.
    pub fn new(remote_ip: impl Into<String>) -> Self {
        ConnState {
            authenticated: false,
            principal: None,
            remote_ip: remote_ip.into(),
        }
    }

    /// Record a successful AUTH.
    pub fn authenticate(&mut self, principal: Principal) {
        self.authenticated = true;
        self.principal = Some(principal);
    }
}

/// Strip a trailing `:port` from a peer address string.
pub fn strip_port(addr: &str) -> &str {
    match addr.rfind(':') {
        Some(idx) if addr[idx + 1..].bytes().all(|b| b.is_ascii_digit()) => &addr[..idx],
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("ISSUER"), Some(Role::Issuer));
        assert_eq!(Role::parse("Validator"), Some(Role::Validator));
        assert_eq!(Role::parse("metrics"), Some(Role::Metrics));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn test_permission_matrix() {
        let all = [
            "GET", "SET", "DEL", "EXPIRE", "TTL", "EXISTS", "SCAN", "TM.CREATE", "TM.VALIDATE",
            "TM.REVOKE_USER",
        ];
        for cmd in all {
            assert!(Role::Admin.allows(cmd), "admin denied {}", cmd);
            assert!(Role::Issuer.allows(cmd), "issuer denied {}", cmd);
            assert!(!Role::Metrics.allows(cmd), "metrics allowed {}", cmd);
        }
        for cmd in ["GET", "TTL", "EXISTS", "SCAN", "TM.VALIDATE"] {
            assert!(Role::Validator.allows(cmd), "validator denied {}", cmd);
        }
        for cmd in ["SET", "DEL", "EXPIRE", "TM.CREATE", "TM.REVOKE_USER"] {
            assert!(!Role::Validator.allows(cmd), "validator allowed {}", cmd);
        }
    }

    #[test]
    fn test_conn_state_transitions() {
        let mut conn = ConnState::new("10.0.0.1");
        assert!(!conn.authenticated);
        conn.authenticate(Principal {
            key_id: "k1".to_string(),
            role: Role::Admin,
            name: "ops".to_string(),
        });
        assert!(conn.authenticated);
        assert_eq!(conn.principal.as_ref().unwrap().role, Role::Admin);
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("10.0.0.1:6379"), "10.0.0.1");
        assert_eq!(strip_port("[::1]:6379"), "[::1]");
        assert_eq!(strip_port("10.0.0.1"), "10.0.0.1");
        assert_eq!(strip_port("host:name"), "host:name");
    }
}
