//! Integration tests for sessionization
//!
//! Incremental tracking during ingestion must agree with the full rebuild
//! whenever page views arrive in timestamp order.

use logpulse::analytics::{day_bucket, hour_bucket, SESSION_GAP_SECONDS};
use logpulse::models::LogRecord;
use logpulse::storage::{LogStore, SqliteStore};

async fn setup_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store.init(&["blog".to_string()]).await.unwrap();
    store
}

fn base() -> i64 {
    hour_bucket(1_700_000_000)
}

fn view(ip: &str, browser: &str, timestamp: i64, url: &str) -> LogRecord {
    LogRecord {
        ip: ip.to_string(),
        pageview: true,
        timestamp,
        method: "GET".to_string(),
        url: url.to_string(),
        status: 200,
        bytes_sent: 512,
        browser: browser.to_string(),
        os: "Windows".to_string(),
        device: "Desktop".to_string(),
        global_location: "Germany".to_string(),
        ..Default::default()
    }
}

async fn url_id(store: &SqliteStore, url: &str) -> i64 {
    sqlx::query_scalar("SELECT id FROM \"blog_dim_url\" WHERE url = ?")
        .bind(url)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

/// Deterministic traffic for several visitors, sorted by timestamp
fn generated_traffic() -> Vec<LogRecord> {
    let mut seed: u64 = 0x5eed;
    let mut next = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) as i64
    };

    let mut records = Vec::new();
    for visitor in 0..6 {
        let ip = format!("192.168.0.{visitor}");
        let browser = if visitor % 2 == 0 { "Chrome" } else { "Safari" };
        let mut ts = base() + next() % 3600;
        for _ in 0..25 {
            // Mostly short gaps, sometimes long enough to split a session
            ts += match next() % 10 {
                0 => 1801 + next() % 7200,
                1 => SESSION_GAP_SECONDS,
                _ => next() % 600,
            };
            let url = format!("/page/{}", next() % 6);
            records.push(LogRecord {
                pageview: next() % 5 != 0,
                ..view(&ip, browser, ts, &url)
            });
        }
    }
    records.sort_by_key(|r| r.timestamp);
    records
}

#[tokio::test]
async fn test_gap_splits_sessions() {
    let store = setup_store().await;
    let t = base();

    store
        .ingest(
            "blog",
            &[
                view("10.0.0.1", "Chrome", t, "/"),
                view("10.0.0.1", "Chrome", t + 1000, "/about"),
                view("10.0.0.1", "Chrome", t + 3000, "/contact"),
            ],
        )
        .await
        .unwrap();

    let snapshot = store.snapshot("blog").await.unwrap();
    assert_eq!(snapshot.sessions.len(), 2, "a 2000s gap starts a new session");

    let first = &snapshot.sessions[0];
    assert_eq!((first.start_ts, first.end_ts, first.page_count), (t, t + 1000, 2));
    assert_eq!(first.entry_url_id, url_id(&store, "/").await);
    assert_eq!(first.exit_url_id, url_id(&store, "/about").await);

    let second = &snapshot.sessions[1];
    assert_eq!((second.start_ts, second.end_ts, second.page_count), (t + 3000, t + 3000, 1));
    assert_eq!(second.entry_url_id, second.exit_url_id);

    assert_eq!(snapshot.session_state.len(), 1);
    assert_eq!(snapshot.session_state[0].2, t + 3000);

    let total: i64 = snapshot.session_daily.iter().map(|d| d.sessions).sum();
    assert_eq!(total, 2);
    let entries: i64 = snapshot.entry_daily.iter().map(|d| d.count).sum();
    assert_eq!(entries, 2);
}

#[tokio::test]
async fn test_gap_boundary_is_inclusive() {
    let store = setup_store().await;
    let t = base();

    store
        .ingest(
            "blog",
            &[
                view("10.0.0.1", "Chrome", t, "/"),
                view("10.0.0.1", "Chrome", t + SESSION_GAP_SECONDS, "/"),
                view("10.0.0.2", "Chrome", t, "/"),
                view("10.0.0.2", "Chrome", t + SESSION_GAP_SECONDS + 1, "/"),
            ],
        )
        .await
        .unwrap();

    let snapshot = store.snapshot("blog").await.unwrap();
    let per_ip = |ip_id: i64| snapshot.sessions.iter().filter(|s| s.ip_id == ip_id).count();
    let ip_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM \"blog_dim_ip\" ORDER BY ip")
        .fetch_all(store.pool())
        .await
        .unwrap();

    assert_eq!(per_ip(ip_ids[0]), 1, "exactly the gap keeps the session open");
    assert_eq!(per_ip(ip_ids[1]), 2, "one second more closes it");
}

#[tokio::test]
async fn test_sessions_continue_across_batches() {
    let store = setup_store().await;
    let t = base();

    store
        .ingest("blog", &[view("10.0.0.1", "Chrome", t, "/")])
        .await
        .unwrap();
    store
        .ingest("blog", &[view("10.0.0.1", "Chrome", t + 600, "/next")])
        .await
        .unwrap();

    let snapshot = store.snapshot("blog").await.unwrap();
    assert_eq!(snapshot.sessions.len(), 1);
    assert_eq!(snapshot.sessions[0].page_count, 2);
    assert_eq!(snapshot.sessions[0].exit_url_id, url_id(&store, "/next").await);
    assert_eq!(snapshot.session_daily[0].sessions, 1, "extending is not a new start");
}

#[tokio::test]
async fn test_user_agents_are_separate_sessions() {
    let store = setup_store().await;
    let t = base();

    store
        .ingest(
            "blog",
            &[
                view("10.0.0.1", "Chrome", t, "/"),
                view("10.0.0.1", "Firefox", t + 5, "/"),
                LogRecord {
                    pageview: false,
                    ..view("10.0.0.1", "Edge", t + 10, "/logo.svg")
                },
            ],
        )
        .await
        .unwrap();

    let snapshot = store.snapshot("blog").await.unwrap();
    assert_eq!(snapshot.sessions.len(), 2, "non-page-view events never open sessions");
    assert_eq!(snapshot.session_state.len(), 2);
    assert_eq!(snapshot.first_seen.len(), 1, "first-seen is keyed by address only");
}

#[tokio::test]
async fn test_out_of_order_view_is_ignored() {
    let store = setup_store().await;
    let t = base();

    store
        .ingest("blog", &[view("10.0.0.1", "Chrome", t + 5000, "/late")])
        .await
        .unwrap();
    store
        .ingest("blog", &[view("10.0.0.1", "Chrome", t + 100, "/early")])
        .await
        .unwrap();

    let snapshot = store.snapshot("blog").await.unwrap();
    assert_eq!(snapshot.sessions.len(), 1);
    let session = &snapshot.sessions[0];
    assert_eq!((session.start_ts, session.end_ts, session.page_count), (t + 5000, t + 5000, 1));
    assert_eq!(snapshot.session_state[0].2, t + 5000);

    // Everything else still sees the event
    assert_eq!(snapshot.total_pageviews(), 2);
    assert_eq!(snapshot.first_seen[0].first_ts, t + 100);
}

#[tokio::test]
async fn test_incremental_matches_rebuild() {
    let store = setup_store().await;
    let records = generated_traffic();
    for chunk in records.chunks(13) {
        store.ingest("blog", chunk).await.unwrap();
    }

    let incremental = store.snapshot("blog").await.unwrap().without_session_ids();
    assert!(incremental.sessions.len() > 6, "generated traffic splits some sessions");

    store.rebuild_site("blog").await.unwrap();
    let rebuilt = store.snapshot("blog").await.unwrap().without_session_ids();

    assert_eq!(incremental.sessions, rebuilt.sessions);
    assert_eq!(incremental.session_state, rebuilt.session_state);
    assert_eq!(incremental.session_daily, rebuilt.session_daily);
    assert_eq!(incremental.entry_daily, rebuilt.entry_daily);
    assert_eq!(incremental, rebuilt);
}

#[tokio::test]
async fn test_rebuild_continues_incrementally() {
    let store = setup_store().await;
    let t = base();

    store
        .ingest("blog", &[view("10.0.0.1", "Chrome", t, "/")])
        .await
        .unwrap();
    store.rebuild_site("blog").await.unwrap();
    store
        .ingest("blog", &[view("10.0.0.1", "Chrome", t + 60, "/b")])
        .await
        .unwrap();

    let snapshot = store.snapshot("blog").await.unwrap();
    assert_eq!(snapshot.sessions.len(), 1, "rebuilt state points at the live session");
    assert_eq!(snapshot.sessions[0].page_count, 2);
    assert_eq!(snapshot.session_daily.len(), 1);
    assert_eq!(snapshot.session_daily[0].day, day_bucket(t));
    assert_eq!(snapshot.session_daily[0].sessions, 1);
}
