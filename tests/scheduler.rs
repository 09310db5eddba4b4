//! Integration tests for the polling loop: due selection across cycles,
//! stuck feeds, and shutdown.
//!
//! Feeds come from an in-memory `FeedSource` so timing is under test control.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use suprss::feed::{
    select_due, select_due_at, FeedRefresher, FeedSource, FetchError, ParsedFeed, PollScheduler,
    RawEntry, RefreshOutcome, SchedulerConfig,
};
use suprss::storage::{Database, NewFeed};

/// Hangs on URLs containing "stuck", serves one entry otherwise.
#[derive(Default)]
struct ScriptedSource {
    calls: AtomicUsize,
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("stuck") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(ParsedFeed {
            title: Some(format!("Feed at {}", url)),
            description: None,
            items: vec![RawEntry {
                link: Some(format!("{}/post", url)),
                title: Some("Post".to_string()),
                ..RawEntry::default()
            }],
        })
    }
}

async fn setup(urls: &[&str]) -> (Database, Vec<i64>) {
    let db = Database::open(":memory:").await.unwrap();
    let collection = db.create_collection("Team").await.unwrap();
    let mut ids = Vec::new();
    for url in urls {
        ids.push(db.insert_feed(collection, &NewFeed::new(*url)).await.unwrap());
    }
    (db, ids)
}

// ============================================================================
// Due Selection
// ============================================================================

#[tokio::test]
async fn test_budget_rolls_over_to_next_cycle() {
    let (db, ids) = setup(&[
        "https://a/feed",
        "https://b/feed",
        "https://c/feed",
        "https://d/feed",
    ])
    .await;
    let refresher = FeedRefresher::new(
        db.clone(),
        Arc::new(ScriptedSource::default()),
        Duration::from_secs(5),
    );
    let scheduler = PollScheduler::new(
        refresher,
        SchedulerConfig {
            feeds_per_cycle: 3,
            ..SchedulerConfig::default()
        },
    );

    let first = scheduler.tick().await;
    assert_eq!(first.feed_ids(), ids[..3].to_vec());
    first.join().await;

    assert_eq!(select_due(&db, 10).await.unwrap(), vec![ids[3]]);

    let second = scheduler.tick().await;
    assert_eq!(second.feed_ids(), vec![ids[3]]);
    second.join().await;

    assert!(select_due(&db, 10).await.unwrap().is_empty());

    // An hour and a minute later everything is due again; the feed from the
    // second cycle was stamped last so it comes last
    let later = Utc::now() + chrono::Duration::minutes(61);
    let mut due = select_due_at(&db, 10, later).await.unwrap();
    assert_eq!(due.last(), Some(&ids[3]));
    due.sort_unstable();
    assert_eq!(due, ids);
}

#[tokio::test]
async fn test_link_used_as_dedup_key() {
    let (db, ids) = setup(&["https://a/feed"]).await;
    let refresher = FeedRefresher::new(
        db.clone(),
        Arc::new(ScriptedSource::default()),
        Duration::from_secs(5),
    );

    refresher.refresh(ids[0]).await;
    refresher.refresh(ids[0]).await;

    let article = db
        .get_article(ids[0], "https://a/feed/post")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(article.seen_count, 2);
    assert_eq!(db.count_articles_for_feed(ids[0]).await.unwrap(), 1);
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test]
async fn test_stuck_feed_does_not_block_others() {
    let (db, ids) = setup(&["https://stuck/feed", "https://ok/feed"]).await;
    let refresher = FeedRefresher::new(
        db.clone(),
        Arc::new(ScriptedSource::default()),
        Duration::from_millis(200),
    );
    let scheduler = PollScheduler::new(refresher, SchedulerConfig::default());

    let results = scheduler.tick().await.join().await;
    let outcome = |id: i64| {
        results
            .iter()
            .find(|(feed_id, _)| *feed_id == id)
            .and_then(|(_, r)| r.as_ref().ok())
            .unwrap()
    };

    assert!(matches!(outcome(ids[0]), RefreshOutcome::Failed(_)));
    assert!(outcome(ids[1]).is_completed());
    for id in &ids {
        assert!(db.get_feed(*id).await.unwrap().unwrap().last_fetched_at.is_some());
    }
}

#[tokio::test]
async fn test_overlapping_ticks_do_not_double_refresh() {
    let (db, ids) = setup(&["https://stuck/feed"]).await;
    let source = Arc::new(ScriptedSource::default());
    let refresher = FeedRefresher::new(db.clone(), source.clone(), Duration::from_millis(300));
    let scheduler = PollScheduler::new(refresher.clone(), SchedulerConfig::default());

    // The first refresh is still in flight when the second tick selects the
    // same never-stamped feed
    let first = scheduler.tick().await;
    assert_eq!(first.feed_ids(), ids);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(select_due(&db, 10).await.unwrap(), ids);
    assert!(scheduler.tick().await.is_empty());

    // A direct refresh is turned away too
    assert!(matches!(
        refresher.refresh(ids[0]).await,
        RefreshOutcome::AlreadyRunning
    ));

    first.join().await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_queued_refreshes_not_dispatched_twice() {
    let (db, ids) = setup(&["https://stuck/one", "https://stuck/two"]).await;
    let source = Arc::new(ScriptedSource::default());
    let refresher = FeedRefresher::new(db.clone(), source.clone(), Duration::from_millis(200));
    let scheduler = PollScheduler::new(
        refresher,
        SchedulerConfig {
            max_concurrent_refreshes: 1,
            ..SchedulerConfig::default()
        },
    );

    let first = scheduler.tick().await;
    assert_eq!(first.feed_ids(), ids);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.tick().await.is_empty());

    first.join().await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_spawned_scheduler_polls_and_stops() {
    let (db, ids) = setup(&["https://a/feed", "https://b/feed"]).await;
    let refresher = FeedRefresher::new(
        db.clone(),
        Arc::new(ScriptedSource::default()),
        Duration::from_secs(5),
    );
    let handle = PollScheduler::new(
        refresher,
        SchedulerConfig {
            interval: Duration::from_millis(25),
            ..SchedulerConfig::default()
        },
    )
    .spawn();

    let mut done = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut stamped = 0;
        for id in &ids {
            if db.get_feed(*id).await.unwrap().unwrap().last_fetched_at.is_some() {
                stamped += 1;
            }
        }
        if stamped == ids.len() {
            done = true;
            break;
        }
    }
    assert!(done, "scheduler never refreshed all feeds");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_drains_before_database_close() {
    let (db, ids) = setup(&["https://stuck/feed"]).await;
    let source = Arc::new(ScriptedSource::default());
    let refresher = FeedRefresher::new(db.clone(), source.clone(), Duration::from_millis(200));
    let handle = PollScheduler::new(
        refresher,
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            ..SchedulerConfig::default()
        },
    )
    .spawn();

    while source.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.stop().await.unwrap();

    // The refresh ran to its deadline and stamped before stop returned
    let feed = db.get_feed(ids[0]).await.unwrap().unwrap();
    assert!(feed.last_fetched_at.is_some());
    db.close().await;
}
