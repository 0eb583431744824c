//! End-to-end tests: a real engine behind a real TCP listener, spoken to
//! in raw RESP.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tokmesh::{
    ApiKey, CreateParams, EngineConfig, Keyring, RespServer, Role, ServerConfig, ServerHandle,
    SessionEngine,
};

const VALID_ID: &str = "tmss-01arz3ndektsv4rrffq69g5fav";

struct Harness {
    engine: Arc<SessionEngine>,
    handle: ServerHandle,
}

async fn start() -> (Harness, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_at(dir.path()).await;
    (harness, dir)
}

async fn start_at(dir: &std::path::Path) -> Harness {
    let engine = SessionEngine::open(EngineConfig::for_testing(dir)).unwrap();
    let keyring = Arc::new(Keyring::new([
        ApiKey::new("ops", "secret", Role::Admin, "operations"),
        ApiKey::new("checker", "check", Role::Validator, "validator"),
    ]));
    let server = RespServer::new(ServerConfig::for_testing(), Arc::clone(&engine), keyring);
    let handle = server.start().await.unwrap();
    Harness { engine, handle }
}

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(harness: &Harness) -> Client {
        let stream = TcpStream::connect(harness.handle.plain_addr().unwrap())
            .await
            .unwrap();
        let (read, writer) = stream.into_split();
        Client {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn connect_admin(harness: &Harness) -> Client {
        let mut client = Client::connect(harness).await;
        let reply = client.command(&["AUTH", "ops", "secret"]).await;
        assert_eq!(reply, "+OK\r\n");
        client
    }

    /// Send an array command and read one complete reply, raw.
    async fn command(&mut self, parts: &[&str]) -> String {
        let mut wire = format!("*{}\r\n", parts.len());
        for part in parts {
            wire.push_str(&format!("${}\r\n{}\r\n", part.len(), part));
        }
        self.writer.write_all(wire.as_bytes()).await.unwrap();
        String::from_utf8(self.read_reply().await).unwrap()
    }

    async fn read_reply(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        // Count of reply elements still owed; arrays add their length.
        let mut pending = 1u64;
        while pending > 0 {
            pending -= 1;
            let mut kind = [0u8; 1];
            self.reader.read_exact(&mut kind).await.unwrap();
            out.push(kind[0]);
            let line = self.read_line(&mut out).await;
            match kind[0] {
                b'+' | b'-' | b':' => {}
                b'$' => {
                    let len: i64 = line.trim().parse().unwrap();
                    if len >= 0 {
                        let mut payload = vec![0u8; len as usize + 2];
                        self.reader.read_exact(&mut payload).await.unwrap();
                        out.extend_from_slice(&payload);
                    }
                }
                b'*' => {
                    let n: i64 = line.trim().parse().unwrap();
                    pending += n.max(0) as u64;
                }
                other => panic!("unexpected reply type {}", other as char),
            }
        }
        out
    }

    async fn read_line(&mut self, out: &mut Vec<u8>) -> String {
        let mut line = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            self.reader.read_exact(&mut byte).await.unwrap();
            out.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
            if byte[0] != b'\r' {
                line.push(byte[0]);
            }
        }
        String::from_utf8(line).unwrap()
    }
}

fn bulk_json(reply: &str) -> serde_json::Value {
    assert!(reply.starts_with('$'), "not a bulk reply: {}", reply);
    let body_start = reply.find("\r\n").unwrap() + 2;
    serde_json::from_str(reply[body_start..].trim_end()).unwrap()
}

#[tokio::test]
async fn test_scenario_ping() {
    let (harness, _dir) = start().await;
    let mut client = Client::connect(&harness).await;

    assert_eq!(client.command(&["PING"]).await, "+PONG\r\n");
    assert_eq!(client.command(&["PING", "hello"]).await, "$5\r\nhello\r\n");

    harness.handle.shutdown().await.unwrap();
    harness.engine.close().unwrap();
}

#[tokio::test]
async fn test_scenario_auth_rejection() {
    let (harness, _dir) = start().await;
    let mut client = Client::connect(&harness).await;

    let reply = client.command(&["AUTH", "K", "S"]).await;
    assert_eq!(reply, "-ERR TM-AUTH-4010 invalid credentials\r\n");

    let reply = client.command(&["GET", VALID_ID]).await;
    assert_eq!(reply, "-NOAUTH Authentication required\r\n");

    harness.handle.shutdown().await.unwrap();
    harness.engine.close().unwrap();
}

#[tokio::test]
async fn test_scenario_create_and_validate() {
    let (harness, _dir) = start().await;
    let mut client = Client::connect_admin(&harness).await;

    let reply = client
        .command(&["TM.CREATE", VALID_ID, r#"{"user_id":"u1"}"#])
        .await;
    let body = bulk_json(&reply);
    assert_eq!(body["session_id"], VALID_ID);
    let token = body["token"].as_str().unwrap().to_string();
    assert!(token.starts_with("tmtk_"));

    // expires_at is ~24h out.
    let expires = chrono::DateTime::parse_from_rfc3339(body["expires_at"].as_str().unwrap())
        .unwrap()
        .timestamp();
    let expected = chrono::Utc::now().timestamp() + 24 * 3600;
    assert!((expires - expected).abs() < 60, "expires_at {}", expires);

    assert_eq!(client.command(&["TM.VALIDATE", &token]).await, "+OK\r\n");

    harness.handle.shutdown().await.unwrap();
    harness.engine.close().unwrap();
}

#[tokio::test]
async fn test_scenario_set_without_token() {
    let (harness, _dir) = start().await;
    let mut client = Client::connect_admin(&harness).await;

    let reply = client
        .command(&["SET", "tmss-01arz3ndektsv4rrffq69g5fax", r#"{"user_id":"u2"}"#])
        .await;
    assert_eq!(
        reply,
        "-ERR TM-ARG-4001 token is required when creating new session with SET\r\n"
    );

    harness.handle.shutdown().await.unwrap();
    harness.engine.close().unwrap();
}

#[tokio::test]
async fn test_scenario_del_idempotent_and_bounded() {
    let (harness, _dir) = start().await;
    let mut client = Client::connect_admin(&harness).await;

    assert_eq!(client.command(&["DEL", "nonexistent"]).await, ":1\r\n");

    let keys: Vec<String> = (0..1001).map(|i| format!("k{}", i)).collect();
    let mut parts: Vec<&str> = vec!["DEL"];
    parts.extend(keys.iter().map(|k| k.as_str()));
    let reply = client.command(&parts).await;
    assert_eq!(reply, "-ERR TM-ARG-4002 maximum 1000 keys per DEL command\r\n");

    harness.handle.shutdown().await.unwrap();
    harness.engine.close().unwrap();
}

#[tokio::test]
async fn test_scenario_expire_ttl() {
    let (harness, _dir) = start().await;
    let mut client = Client::connect_admin(&harness).await;

    let reply = client.command(&["EXPIRE", "tmss-01arz3ndektsv4rrffq69g5fax", "60"]).await;
    assert_eq!(reply, ":0\r\n");

    client
        .command(&["TM.CREATE", VALID_ID, r#"{"user_id":"u1"}"#])
        .await;
    assert_eq!(client.command(&["EXPIRE", VALID_ID, "7200"]).await, ":1\r\n");

    let reply = client.command(&["TTL", VALID_ID]).await;
    let ttl: i64 = reply[1..reply.len() - 2].parse().unwrap();
    assert!((7199..=7200).contains(&ttl), "ttl {}", ttl);

    harness.handle.shutdown().await.unwrap();
    harness.engine.close().unwrap();
}

#[tokio::test]
async fn test_validator_role_over_wire() {
    let (harness, _dir) = start().await;
    let mut admin = Client::connect_admin(&harness).await;
    admin
        .command(&["TM.CREATE", VALID_ID, r#"{"user_id":"u1"}"#])
        .await;

    let mut checker = Client::connect(&harness).await;
    assert_eq!(
        checker.command(&["AUTH", "checker", "check"]).await,
        "+OK\r\n"
    );
    assert_eq!(
        checker.command(&["EXISTS", VALID_ID]).await,
        ":1\r\n"
    );
    let reply = checker.command(&["DEL", VALID_ID]).await;
    assert_eq!(
        reply,
        "-ERR TM-AUTH-4030 permission denied for command 'DEL'\r\n"
    );

    harness.handle.shutdown().await.unwrap();
    harness.engine.close().unwrap();
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();

    let (id, token) = {
        let harness = start_at(dir.path()).await;
        let mut client = Client::connect_admin(&harness).await;
        let reply = client
            .command(&["TM.CREATE", VALID_ID, r#"{"user_id":"u1","data":{"k":"v"}}"#])
            .await;
        let body = bulk_json(&reply);
        let token = body["token"].as_str().unwrap().to_string();

        harness.handle.shutdown().await.unwrap();
        harness.engine.close().unwrap();
        (VALID_ID.to_string(), token)
    };

    // A fresh engine over the same data directory sees the session.
    let engine = SessionEngine::open(EngineConfig::for_testing(&dir_path)).unwrap();
    let session = engine.get(&id).unwrap();
    assert_eq!(session.user_id, "u1");
    assert_eq!(session.data["k"], "v");
    assert_eq!(
        engine
            .get_by_token(&tokmesh::token::hash_token(&token))
            .unwrap()
            .id,
        id
    );
    engine.close().unwrap();
}

#[tokio::test]
async fn test_scan_over_wire() {
    let (harness, _dir) = start().await;
    for i in 0..7 {
        harness
            .engine
            .create(CreateParams::new(format!("user-{}", i)))
            .unwrap();
    }
    let mut client = Client::connect_admin(&harness).await;

    let reply = client.command(&["SCAN", "0", "COUNT", "5"]).await;
    assert!(reply.starts_with("*2\r\n$1\r\n1\r\n*5\r\n"), "{}", reply);

    let reply = client.command(&["SCAN", "1", "COUNT", "5"]).await;
    assert!(reply.starts_with("*2\r\n$1\r\n0\r\n*2\r\n"), "{}", reply);

    harness.handle.shutdown().await.unwrap();
    harness.engine.close().unwrap();
}

#[tokio::test]
async fn test_get_view_shape() {
    let (harness, _dir) = start().await;
    let mut client = Client::connect_admin(&harness).await;
    client
        .command(&["TM.CREATE", VALID_ID, r#"{"user_id":"u1","device_id":"phone"}"#])
        .await;

    let reply = client.command(&["GET", VALID_ID]).await;
    let body = bulk_json(&reply);
    assert_eq!(body["id"], VALID_ID);
    assert_eq!(body["user_id"], "u1");
    assert_eq!(body["device_id"], "phone");
    assert!(body["created_at"].as_str().unwrap().ends_with('Z'));
    assert!(body.get("token_hash").is_none());

    // Unknown key reads as null bulk.
    let reply = client
        .command(&["GET", "tmss-01arz3ndektsv4rrffq69g5fax"])
        .await;
    assert_eq!(reply, "$-1\r\n");

    harness.handle.shutdown().await.unwrap();
    harness.engine.close().unwrap();
}

#[tokio::test]
async fn test_close_stops_writes_but_not_reads() {
    let (harness, _dir) = start().await;
    harness
        .engine
        .create(CreateParams::new("u1"))
        .unwrap();
    harness.engine.close().unwrap();

    assert!(matches!(
        harness.engine.create(CreateParams::new("u2")),
        Err(tokmesh::Error::WriterClosed)
    ));
    // Reads keep working from memory.
    assert_eq!(harness.engine.count_by_user("u1"), 1);

    harness.handle.shutdown().await.unwrap();
    let _ = harness.engine.close();
}

#[tokio::test]
async fn test_batch_mode_close_persists() {
    use tokmesh::durability::SyncMode;
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::for_testing(dir.path()).with_sync_mode(SyncMode::Batch);
    let engine = SessionEngine::open(config).unwrap();
    let id = engine.create(CreateParams::new("u1")).unwrap().0.id;
    engine.close().unwrap();

    let engine = SessionEngine::open(EngineConfig::for_testing(dir.path())).unwrap();
    assert_eq!(engine.get(&id).unwrap().id, id);
    engine.close().unwrap();
}
