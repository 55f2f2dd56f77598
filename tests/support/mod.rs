#![allow(dead_code)]

use qrtrace::auth::hash_api_key;
use qrtrace::config::Config;
use qrtrace::memory::MemoryStore;
use qrtrace::store::QrStore;
use qrtrace::{create_router, AppState};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

pub const GATEWAY_KEY: &str = "gateway-secret";
pub const IPHONE: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148";
pub const DESKTOP: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/126.0 Safari/537.36";

pub struct Reply {
    pub status: u16,
    pub head: String,
    pub body: String,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("json body")
    }
}

pub fn test_config() -> Config {
    Config {
        encrypted_api_key: Some(hash_api_key(GATEWAY_KEY)),
        request_timeout_ms: 2000,
        recording_timeout_ms: 2000,
        ..Config::default()
    }
}

pub async fn spawn_app(store: Arc<MemoryStore>, config: Config) -> SocketAddr {
    let app = create_router(AppState::new(store, config));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
    addr
}

pub async fn send(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&str>,
) -> Reply {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    for (k, v) in headers {
        req.push_str(&format!("{k}: {v}\r\n"));
    }
    if let Some(body) = body {
        req.push_str("Content-Type: application/json\r\n");
        req.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    req.push_str("\r\n");
    if let Some(body) = body {
        req.push_str(body);
    }
    stream
        .write_all(req.as_bytes())
        .await
        .expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("http response must have separator");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("http status");
    let chunked = head
        .to_ascii_lowercase()
        .contains("transfer-encoding: chunked");
    Reply {
        status,
        head: head.to_string(),
        body: if chunked { dechunk(body) } else { body.to_string() },
    }
}

fn dechunk(mut raw: &str) -> String {
    let mut body = String::new();
    while let Some((size, rest)) = raw.split_once("\r\n") {
        let size = usize::from_str_radix(size.trim(), 16).expect("chunk size");
        if size == 0 {
            break;
        }
        body.push_str(&rest[..size]);
        raw = rest[size..].trim_start_matches("\r\n");
    }
    body
}

pub fn anonymous(token: &str) -> [(&'static str, &str); 1] {
    [("x-anonymous-token", token)]
}

pub fn user(user_id: &str) -> [(&'static str, &str); 2] {
    [("x-user-id", user_id), ("x-api-key", GATEWAY_KEY)]
}

/// Creates a QR code for `token` and returns the response JSON.
pub async fn create_anonymous(addr: SocketAddr, token: &str, destination_url: &str) -> Value {
    let body = format!(r#"{{"destination_url":"{destination_url}"}}"#);
    let reply = send(addr, "POST", "/api/qr", &anonymous(token), Some(&body)).await;
    assert_eq!(reply.status, 201, "create failed: {}", reply.body);
    reply.json()
}

pub fn id_of(qr_code: &Value) -> Uuid {
    qr_code["id"]
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok())
        .expect("qr id")
}

/// Recording is detached from the redirect, so poll until it lands.
pub async fn wait_for_scan_count(store: &MemoryStore, qr_id: Uuid, expected: i64) {
    for _ in 0..100 {
        if store.scan_count(qr_id).await.expect("scan count") == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "scan count never reached {expected}, got {:?}",
        store.scan_count(qr_id).await
    );
}
