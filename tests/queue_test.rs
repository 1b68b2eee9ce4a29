//! Integration tests for the durable queue.

use std::time::{Duration, Instant};

use serde_json::{Value, json};
use syncqueue::{QueueOptions, SqliteQueue};

fn fast_options() -> QueueOptions {
    QueueOptions {
        busy_timeout: Duration::from_secs(10),
        initial_wait: Duration::from_millis(5),
        max_wait: Duration::from_millis(50),
    }
}

fn test_queue(dir: &tempfile::TempDir) -> SqliteQueue {
    SqliteQueue::open_with(dir.path().join("queue.db"), fast_options())
        .expect("failed to open queue")
}

// ---------------------------------------------------------------------------
// Ordering and counts
// ---------------------------------------------------------------------------

#[test]
fn gets_return_appends_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);

    let payloads: Vec<Value> = (0..10)
        .map(|i| json!({"action": "watched", "episode": i}))
        .collect();
    for payload in &payloads {
        queue.append(payload).unwrap();
    }

    let mut received = Vec::new();
    while let Some(value) = queue.get(false).unwrap() {
        received.push(value);
    }
    assert_eq!(received, payloads);
}

#[test]
fn append_returns_increasing_ids() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);

    let first = queue.append(&json!({"n": 1})).unwrap();
    let second = queue.append(&json!({"n": 2})).unwrap();
    assert!(second > first);
}

#[test]
fn size_tracks_appends_and_gets() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);
    assert!(queue.is_empty().unwrap());

    for i in 0..5 {
        queue.append(&json!({"n": i})).unwrap();
    }
    assert_eq!(queue.size().unwrap(), 5);

    queue.get(true).unwrap().expect("entry");
    assert_eq!(queue.size().unwrap(), 4);
}

// ---------------------------------------------------------------------------
// Non-blocking and bounded waits
// ---------------------------------------------------------------------------

#[test]
fn non_blocking_get_on_empty_queue_returns_immediately() {
    let dir = tempfile::tempdir().unwrap();
    // Default backoff: a single sleep would already take 100ms.
    let queue = SqliteQueue::open(dir.path().join("queue.db")).unwrap();

    let start = Instant::now();
    assert_eq!(queue.get(false).unwrap(), None);
    assert!(start.elapsed() < Duration::from_millis(20));
}

#[test]
fn get_timeout_gives_up_after_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);

    let start = Instant::now();
    assert_eq!(queue.get_timeout(Duration::from_millis(120)).unwrap(), None);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(120));
    assert!(elapsed < Duration::from_secs(2));
}

#[test]
fn get_timeout_returns_available_entry() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);
    queue.append(&json!({"action": "rate", "rating": 8})).unwrap();

    assert_eq!(
        queue.get_timeout(Duration::from_secs(1)).unwrap(),
        Some(json!({"action": "rate", "rating": 8}))
    );
}

#[test]
fn blocking_get_waits_for_late_append() {
    let dir = tempfile::tempdir().unwrap();
    let queue = std::sync::Arc::new(test_queue(&dir));

    let producer = {
        let queue = std::sync::Arc::clone(&queue);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            queue.append(&json!({"late": true})).unwrap();
        })
    };

    assert_eq!(queue.get(true).unwrap(), Some(json!({"late": true})));
    producer.join().unwrap();
}

// ---------------------------------------------------------------------------
// Peek, iterate, purge
// ---------------------------------------------------------------------------

#[test]
fn peek_does_not_remove() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);
    assert_eq!(queue.peek().unwrap(), None);

    queue.append(&json!({"first": 1})).unwrap();
    queue.append(&json!({"second": 2})).unwrap();

    for _ in 0..3 {
        assert_eq!(queue.peek().unwrap(), Some(json!({"first": 1})));
    }
    assert_eq!(queue.size().unwrap(), 2);
    assert_eq!(queue.get(false).unwrap(), Some(json!({"first": 1})));
    assert_eq!(queue.peek().unwrap(), Some(json!({"second": 2})));
}

#[test]
fn iter_visits_in_order_without_removing() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);

    // More than one page worth of rows.
    for i in 0..150 {
        queue.append(&json!({"n": i})).unwrap();
    }
    queue.get(false).unwrap();

    let seen: Vec<Value> = queue
        .iter()
        .unwrap()
        .collect::<syncqueue::error::Result<_>>()
        .unwrap();
    let expected: Vec<Value> = (1..150).map(|i| json!({"n": i})).collect();
    assert_eq!(seen, expected);
    assert_eq!(queue.size().unwrap(), 149);

    // Restartable: a second traversal sees the same entries.
    assert_eq!(queue.iter().unwrap().count(), 149);
}

#[test]
fn iter_ignores_entries_appended_after_start() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);
    queue.append(&json!({"n": 0})).unwrap();
    queue.append(&json!({"n": 1})).unwrap();

    let mut visited = 0;
    for entry in queue.iter().unwrap() {
        entry.unwrap();
        queue.append(&json!({"n": "extra"})).unwrap();
        visited += 1;
    }
    assert_eq!(visited, 2);
    assert_eq!(queue.size().unwrap(), 4);
}

#[test]
fn iter_on_empty_queue_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);
    assert_eq!(queue.iter().unwrap().count(), 0);
}

#[test]
fn purge_clears_everything() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);
    for i in 0..4 {
        queue.append(&json!({"n": i})).unwrap();
    }

    assert_eq!(queue.purge().unwrap(), 4);
    assert_eq!(queue.size().unwrap(), 0);
    assert_eq!(queue.iter().unwrap().count(), 0);
    assert_eq!(queue.get(false).unwrap(), None);

    // Ids keep growing after a purge.
    queue.append(&json!({"after": "purge"})).unwrap();
    assert_eq!(queue.get(false).unwrap(), Some(json!({"after": "purge"})));
}

// ---------------------------------------------------------------------------
// Payload fidelity and persistence
// ---------------------------------------------------------------------------

#[test]
fn payloads_survive_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);

    let payload = json!({
        "show": {"title": "Ça va très bien 日本語 🎬", "ids": {"tvdb": 81189, "imdb": "tt0903747"}},
        "seasons": [{"number": 1, "episodes": [1, 2, 3]}, {"number": 0, "episodes": []}],
        "zero": 0,
        "negative": -42,
        "float": 8.75,
        "tiny": -1.5e-7,
        "big": i64::MAX,
        "flags": [true, false, null],
    });
    queue.append(&payload).unwrap();

    assert_eq!(queue.get(false).unwrap(), Some(payload));
}

#[test]
fn typed_payloads_serialize() {
    #[derive(serde::Serialize)]
    struct Scrobble<'a> {
        action: &'a str,
        progress: f64,
    }

    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue(&dir);
    queue
        .append(&Scrobble {
            action: "stop",
            progress: 97.5,
        })
        .unwrap();

    assert_eq!(
        queue.get(false).unwrap(),
        Some(json!({"action": "stop", "progress": 97.5}))
    );
}

#[test]
fn entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let queue = test_queue(&dir);
        queue.append(&json!({"pending": "sync"})).unwrap();
    }

    let queue = test_queue(&dir);
    assert_eq!(queue.get(false).unwrap(), Some(json!({"pending": "sync"})));
}

#[test]
fn open_in_dir_creates_missing_profile_directory() {
    let dir = tempfile::tempdir().unwrap();
    let profile = dir.path().join("addon_data").join("script.trakt");

    let queue = SqliteQueue::open_in_dir(&profile).unwrap();
    assert!(profile.is_dir());
    assert_eq!(queue.path(), profile.join("queue.db"));
    assert!(queue.path().exists());
}

#[test]
fn reads_rows_written_with_legacy_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE queue (id INTEGER PRIMARY KEY AUTOINCREMENT, item BLOB);
             INSERT INTO queue (item) VALUES ('{\"legacy\": [1, 2]}');",
        )
        .unwrap();
    }

    let queue = SqliteQueue::open_with(&path, fast_options()).unwrap();
    assert_eq!(queue.peek().unwrap(), Some(json!({"legacy": [1, 2]})));
}
