mod support;

use qrtrace::config::Config;
use qrtrace::memory::MemoryStore;
use qrtrace::store::QrStore;
use std::sync::Arc;
use std::time::Duration;
use support::{
    create_anonymous, id_of, send, spawn_app, test_config, wait_for_scan_count, IPHONE,
};

#[tokio::test]
async fn create_scan_deactivate_scenario() {
    let store = Arc::new(MemoryStore::new());
    let addr = spawn_app(store.clone(), test_config()).await;

    let qr_code = create_anonymous(addr, "anon_scenario", "https://example.com").await;
    let short_code = qr_code["short_code"].as_str().expect("short code").to_string();
    assert_eq!(short_code.len(), 8);
    assert!(short_code.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(qr_code["is_active"], true);
    assert_eq!(qr_code["scan_count"], 0);
    assert!(qr_code["title"].is_null());
    assert_eq!(qr_code["fg_color"], "#000000");
    assert_eq!(qr_code["bg_color"], "#FFFFFF");
    let qr_id = id_of(&qr_code);

    let reply = send(
        addr,
        "GET",
        &format!("/r/{short_code}"),
        &[
            ("user-agent", IPHONE),
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("cf-ipcountry", "NL"),
        ],
        None,
    )
    .await;
    assert_eq!(reply.status, 302);
    assert_eq!(reply.header("location").as_deref(), Some("https://example.com"));
    assert_eq!(
        reply.header("cache-control").as_deref(),
        Some("private, no-cache, no-store")
    );

    wait_for_scan_count(&store, qr_id, 1).await;
    let scans = store.scan_records(qr_id).await;
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].device_type.as_deref(), Some("Mobile"));
    assert_eq!(scans[0].ip.as_deref(), Some("203.0.113.7"));
    assert_eq!(scans[0].country.as_deref(), Some("NL"));
    assert_eq!(scans[0].city, None);

    let reply = send(
        addr,
        "PATCH",
        &format!("/api/qr/{qr_id}"),
        &[("x-anonymous-token", "anon_scenario")],
        Some(r#"{"is_active":false}"#),
    )
    .await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json()["is_active"], false);

    let reply = send(addr, "GET", &format!("/r/{short_code}"), &[], None).await;
    assert_eq!(reply.status, 302);
    assert_eq!(reply.header("location").as_deref(), Some("/?error=inactive"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.scan_count(qr_id).await.unwrap(), Some(1));
    assert_eq!(store.scan_records(qr_id).await.len(), 1);
}

#[tokio::test]
async fn unknown_code_lands_softly_without_logging() {
    let store = Arc::new(MemoryStore::new());
    let addr = spawn_app(store.clone(), test_config()).await;
    create_anonymous(addr, "anon_unknown", "https://example.com").await;

    let reply = send(addr, "GET", "/r/zzzzzzzz", &[("user-agent", IPHONE)], None).await;
    assert_eq!(reply.status, 302);
    assert_eq!(reply.header("location").as_deref(), Some("/?error=not_found"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.total_scan_records().await, 0);
}

#[tokio::test]
async fn landing_url_is_configurable() {
    let store = Arc::new(MemoryStore::new());
    let config = Config {
        landing_url: "https://qr.example/".into(),
        ..test_config()
    };
    let addr = spawn_app(store, config).await;
    let reply = send(addr, "GET", "/r/missing1", &[], None).await;
    assert_eq!(
        reply.header("location").as_deref(),
        Some("https://qr.example/?error=not_found")
    );
}

#[tokio::test]
async fn concurrent_scans_count_exactly() {
    let store = Arc::new(MemoryStore::new());
    let addr = spawn_app(store.clone(), test_config()).await;
    let qr_code = create_anonymous(addr, "anon_concurrent", "https://example.com/c").await;
    let path = format!("/r/{}", qr_code["short_code"].as_str().unwrap());
    let qr_id = id_of(&qr_code);

    let (first, second) = tokio::join!(
        send(addr, "GET", &path, &[], None),
        send(addr, "GET", &path, &[], None)
    );
    assert_eq!(first.status, 302);
    assert_eq!(second.status, 302);

    wait_for_scan_count(&store, qr_id, 2).await;
    assert_eq!(store.scan_records(qr_id).await.len(), 2);
}

#[tokio::test]
async fn recording_failure_never_reaches_caller() {
    let store = Arc::new(MemoryStore::new());
    let addr = spawn_app(store.clone(), test_config()).await;
    let qr_code = create_anonymous(addr, "anon_failing", "https://example.com/f").await;
    let qr_id = id_of(&qr_code);
    store.fail_scan_inserts(true);

    let reply = send(
        addr,
        "GET",
        &format!("/r/{}", qr_code["short_code"].as_str().unwrap()),
        &[],
        None,
    )
    .await;
    assert_eq!(reply.status, 302);
    assert_eq!(reply.header("location").as_deref(), Some("https://example.com/f"));

    wait_for_scan_count(&store, qr_id, 1).await;
    assert_eq!(store.total_scan_records().await, 0);
}

#[tokio::test]
async fn destination_change_applies_to_next_scan() {
    let store = Arc::new(MemoryStore::new());
    let addr = spawn_app(store, test_config()).await;
    let qr_code = create_anonymous(addr, "anon_moving", "https://example.com/old").await;
    let path = format!("/r/{}", qr_code["short_code"].as_str().unwrap());

    let reply = send(
        addr,
        "PATCH",
        &format!("/api/qr/{}", id_of(&qr_code)),
        &[("x-anonymous-token", "anon_moving")],
        Some(r#"{"destination_url":"https://example.com/new"}"#),
    )
    .await;
    assert_eq!(reply.status, 200);

    let reply = send(addr, "GET", &path, &[], None).await;
    assert_eq!(reply.header("location").as_deref(), Some("https://example.com/new"));
}
