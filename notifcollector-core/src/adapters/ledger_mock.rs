//! Mock ledger API server for testing
//!
//! Minimal stateful HTTP server speaking the ledger routes so the real
//! `HttpLedgerClient` can be exercised end to end:
//! - POST /events (deduplicated by `Idempotency-Key`)
//! - POST /assignments, DELETE /assignments/{userId}/{provider},
//!   GET /assignments/device/{deviceId}
//! - GET /users returns { users: [...], total: N }

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::domain::User;

/// Mock ledger server for testing
pub struct MockLedgerServer {
    port: u16,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<MockState>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

/// Behaviour switches
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Bearer token the server accepts
    pub token: String,
    /// Answer every event submission with HTTP 500
    pub fail_events: bool,
    /// Delay in milliseconds before responding
    pub delay_ms: u64,
    /// User directory contents
    pub users: Vec<User>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            token: "test_token".to_string(),
            fail_events: false,
            delay_ms: 0,
            users: vec![
                User::new("user-1", "ana@example.com", "Ana"),
                User::new("user-2", "beto@example.com", "Beto"),
            ],
        }
    }
}

/// What the server has observed
#[derive(Debug, Default)]
pub struct MockState {
    /// Accepted events by idempotency key
    pub events: HashMap<String, JsonValue>,
    /// Total POST /events calls, including replays
    pub event_posts: usize,
    /// (userId, provider, deviceId)
    pub assignments: Vec<(String, String, Option<String>)>,
    fail_events: bool,
}

#[derive(Serialize)]
struct UsersResponse<'a> {
    users: &'a [User],
    total: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentBody<'a> {
    user_id: &'a str,
    provider: &'a str,
    device_id: Option<&'a str>,
}

struct Request {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: String,
}

impl MockLedgerServer {
    /// Start a new mock server on a random available port
    pub fn start(config: MockConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let state = Arc::new(Mutex::new(MockState {
            fail_events: config.fail_events,
            ..Default::default()
        }));
        let state_clone = state.clone();

        // Non-blocking accept so stop() can end the loop
        listener.set_nonblocking(true)?;

        let thread_handle = thread::spawn(move || {
            while running_clone.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let cfg = config.clone();
                        let state = state_clone.clone();
                        thread::spawn(move || {
                            handle_connection(stream, &cfg, &state);
                        });
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(std::time::Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            port,
            running,
            state,
            thread_handle: Some(thread_handle),
        })
    }

    /// Get the base URL for this mock server
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Toggle event submission failures at runtime
    pub fn set_fail_events(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_events = fail;
        }
    }

    /// Inspect recorded state
    pub fn with_state<T>(&self, f: impl FnOnce(&MockState) -> T) -> T {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockLedgerServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_request(stream: &TcpStream) -> Option<Request> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).ok()?;

    Some(Request {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn handle_connection(mut stream: TcpStream, config: &MockConfig, state: &Mutex<MockState>) {
    // Accepted sockets may inherit non-blocking mode on some platforms
    let _ = stream.set_nonblocking(false);

    let Some(request) = read_request(&stream) else {
        send_response(&mut stream, 400, "Bad Request", r#"{"error": "Invalid request"}"#);
        return;
    };

    if config.delay_ms > 0 {
        thread::sleep(std::time::Duration::from_millis(config.delay_ms));
    }

    let expected = format!("Bearer {}", config.token);
    if request.headers.get("authorization") != Some(&expected) {
        send_response(&mut stream, 401, "Unauthorized", r#"{"error": "Invalid token"}"#);
        return;
    }

    let path = request.path.split('?').next().unwrap_or("").to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());

    match (request.method.as_str(), segments.as_slice()) {
        ("POST", ["events"]) => {
            state.event_posts += 1;
            if state.fail_events {
                send_response(&mut stream, 500, "Internal Server Error", r#"{"error": "boom"}"#);
                return;
            }
            let Some(key) = request.headers.get("idempotency-key").cloned() else {
                send_response(&mut stream, 400, "Bad Request", r#"{"error": "Missing Idempotency-Key"}"#);
                return;
            };
            let Ok(body) = serde_json::from_str::<JsonValue>(&request.body) else {
                send_response(&mut stream, 400, "Bad Request", r#"{"error": "Invalid JSON"}"#);
                return;
            };
            // Replays return the original result
            let status = if state.events.contains_key(&key) { 200 } else { 201 };
            state.events.entry(key).or_insert(body);
            send_response(&mut stream, status, "OK", r#"{"ok": true}"#);
        }
        ("GET", ["users"]) => {
            let json = serde_json::to_string(&UsersResponse {
                users: &config.users,
                total: config.users.len(),
            })
            .unwrap_or_default();
            send_response(&mut stream, 200, "OK", &json);
        }
        ("POST", ["assignments"]) => {
            let body: JsonValue = serde_json::from_str(&request.body).unwrap_or_default();
            let field = |name: &str| body.get(name).and_then(|v| v.as_str()).map(str::to_string);
            match (field("userId"), field("provider")) {
                (Some(user_id), Some(provider)) => {
                    let device_id = field("deviceId");
                    state
                        .assignments
                        .retain(|(_, p, d)| !(p == &provider && d == &device_id));
                    state.assignments.push((user_id, provider, device_id));
                    send_response(&mut stream, 201, "Created", r#"{"ok": true}"#);
                }
                _ => send_response(&mut stream, 400, "Bad Request", r#"{"error": "Missing fields"}"#),
            }
        }
        ("DELETE", ["assignments", user_id, provider]) => {
            let before = state.assignments.len();
            state
                .assignments
                .retain(|(u, p, _)| !(u == user_id && p == provider));
            if state.assignments.len() < before {
                send_response(&mut stream, 204, "No Content", "");
            } else {
                send_response(&mut stream, 404, "Not Found", r#"{"error": "Assignment not found"}"#);
            }
        }
        ("GET", ["assignments", "device", device_id]) => {
            let list: Vec<AssignmentBody> = state
                .assignments
                .iter()
                .filter(|(_, _, d)| d.as_deref() == Some(*device_id))
                .map(|(u, p, d)| AssignmentBody {
                    user_id: u,
                    provider: p,
                    device_id: d.as_deref(),
                })
                .collect();
            let json = serde_json::json!({ "assignments": list }).to_string();
            send_response(&mut stream, 200, "OK", &json);
        }
        _ => send_response(&mut stream, 404, "Not Found", r#"{"error": "Endpoint not found"}"#),
    }
}

fn send_response(stream: &mut TcpStream, status: u16, status_text: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http_ledger::HttpLedgerClient;
    use crate::domain::{NormalizedEvent, Provider, RawNotification};
    use crate::ports::{CreateAssignmentRequest, Credential, LedgerApi};
    use crate::services::ParsingEngine;
    use crate::Error;

    fn sample_event() -> NormalizedEvent {
        ParsingEngine::new()
            .parse(
                &RawNotification::new("com.applemoncash", 1_700_000_000_000)
                    .with_text("Recibiste 1 ARS de Ramiro Brugnoli"),
            )
            .unwrap()
    }

    fn credential() -> Credential {
        Credential::new("test_token")
    }

    #[tokio::test]
    async fn test_submit_event_is_idempotent() {
        let server = MockLedgerServer::start(MockConfig::default()).unwrap();
        let client = HttpLedgerClient::new(&server.base_url()).unwrap();
        let event = sample_event();
        let payload = event.to_payload("user-1");

        client
            .submit_event(&payload, &event.dedup_key, &credential())
            .await
            .unwrap();
        client
            .submit_event(&payload, &event.dedup_key, &credential())
            .await
            .unwrap();

        server.with_state(|s| {
            assert_eq!(s.event_posts, 2);
            assert_eq!(s.events.len(), 1);
            let body = &s.events[&event.dedup_key];
            assert_eq!(body["userId"], "user-1");
            assert_eq!(body["provider"], "lemon");
            assert_eq!(body["type"], "transfer_in");
            assert_eq!(body["amount"], 1.0);
            assert_eq!(body["raw"]["package"], "com.applemoncash");
        });
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthenticated() {
        let server = MockLedgerServer::start(MockConfig::default()).unwrap();
        let client = HttpLedgerClient::new(&server.base_url()).unwrap();
        let event = sample_event();

        let err = client
            .submit_event(&event.to_payload("user-1"), &event.dedup_key, &Credential::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let server = MockLedgerServer::start(MockConfig {
            fail_events: true,
            ..Default::default()
        })
        .unwrap();
        let client = HttpLedgerClient::new(&server.base_url()).unwrap();
        let event = sample_event();

        let err = client
            .submit_event(&event.to_payload("user-1"), &event.dedup_key, &credential())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        server.with_state(|s| assert!(s.events.is_empty()));
    }

    #[tokio::test]
    async fn test_assignment_endpoints() {
        let server = MockLedgerServer::start(MockConfig::default()).unwrap();
        let client = HttpLedgerClient::new(&server.base_url()).unwrap();

        client
            .create_assignment(
                &CreateAssignmentRequest {
                    user_id: "user-1".into(),
                    provider: Provider::Lemon.to_string(),
                    device_id: Some("dev-1".into()),
                },
                &credential(),
            )
            .await
            .unwrap();

        let remote = client
            .list_device_assignments("dev-1", &credential())
            .await
            .unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].user_id, "user-1");
        assert_eq!(remote[0].provider, "lemon");

        client
            .delete_assignment("user-1", "lemon", &credential())
            .await
            .unwrap();
        assert!(client
            .list_device_assignments("dev-1", &credential())
            .await
            .unwrap()
            .is_empty());

        // Deleting again is a 404 -> transport error
        let err = client
            .delete_assignment("user-1", "lemon", &credential())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_list_users() {
        let server = MockLedgerServer::start(MockConfig::default()).unwrap();
        let client = HttpLedgerClient::new(&server.base_url()).unwrap();

        let users = client.list_users(&credential()).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, "user-1");
        assert_eq!(users[1].email, "beto@example.com");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport() {
        let mut server = MockLedgerServer::start(MockConfig::default()).unwrap();
        let url = server.base_url();
        server.stop();
        drop(server);

        let client = HttpLedgerClient::new(&url).unwrap();
        let err = client.list_users(&credential()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
