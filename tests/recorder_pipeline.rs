use std::io::Cursor;
use std::sync::Arc;

use activity_tracker_lib::clock::{datetime_from_epoch_secs, ManualClock};
use activity_tracker_lib::db::{ActivityCounters, Database};
use activity_tracker_lib::history::{HistoryQuery, HistorySummary};
use activity_tracker_lib::input::{EventSource, InputEvent, JsonLinesSource, MouseButton};
use activity_tracker_lib::recorder::{Recorder, RecorderError, RecorderSettings};
use activity_tracker_lib::store::{BucketStore, MemoryStore};
use chrono::{DateTime, Duration, Utc};
use tempfile::tempdir;

fn at(secs: f64) -> DateTime<Utc> {
    datetime_from_epoch_secs(secs).unwrap()
}

/// Only explicit `flush()` calls write closed buckets.
fn manual_settings() -> RecorderSettings {
    RecorderSettings {
        flush_interval: Duration::hours(1),
        timer_flush: false,
        ..RecorderSettings::default()
    }
}

fn key(secs: f64) -> InputEvent {
    InputEvent::KeyPress { at: at(secs) }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_are_counted_exactly_once() {
    const PRODUCERS: usize = 6;
    const PRESSES: usize = 500;

    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::at_secs(1_000.0);
    let (recorder, sender) =
        Recorder::start(store.clone(), Arc::new(clock.clone()), manual_settings());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let sender = sender.clone();
            std::thread::spawn(move || {
                for _ in 0..PRESSES {
                    sender.key_press().unwrap();
                }
            })
        })
        .collect();
    drop(sender);

    for _ in 0..25 {
        clock.advance(Duration::milliseconds(700));
        match recorder.flush().await {
            Ok(_) | Err(RecorderError::Closed) => {}
            Err(err) => panic!("unexpected flush error: {err}"),
        }
        tokio::task::yield_now().await;
    }

    tokio::task::spawn_blocking(move || {
        for producer in producers {
            producer.join().unwrap();
        }
    })
    .await
    .unwrap();

    let report = recorder.stop().await.unwrap();
    let expected = (PRODUCERS * PRESSES) as u64;
    let stored: u64 = store.snapshot().values().map(|c| c.keypresses).sum();

    assert_eq!(stored, expected);
    assert_eq!(report.events_recorded, expected);
    assert_eq!(report.totals.keypresses, expected);
}

#[tokio::test]
async fn end_to_end_scenario_reaches_the_store() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at_secs(10.0));
    let (recorder, sender) = Recorder::start(store.clone(), clock, manual_settings());

    for event in [
        InputEvent::PointerMove { x: 0.0, y: 0.0, at: at(0.0) },
        InputEvent::PointerMove { x: 10.0, y: 0.0, at: at(0.2) },
        InputEvent::PointerMove { x: 10.0, y: 0.0, at: at(0.6) },
        InputEvent::PointerButton {
            button: MouseButton::Left,
            pressed: true,
            at: at(1.1),
        },
    ] {
        sender.send(event).await.unwrap();
    }

    let report = recorder.stop().await.unwrap();
    let rows = store.snapshot();

    assert_eq!(
        rows[&0],
        ActivityCounters {
            mouse_move_samples: 1,
            mouse_move_distance: 10.0,
            ..Default::default()
        }
    );
    assert_eq!(
        rows[&1],
        ActivityCounters {
            left_clicks: 1,
            ..Default::default()
        }
    );
    assert_eq!(report.events_recorded, 4);
    assert_eq!(report.moves_debounced, 1);
}

#[tokio::test]
async fn failed_write_keeps_data_for_the_next_flush() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::at_secs(100.0);
    let (recorder, sender) =
        Recorder::start(store.clone(), Arc::new(clock.clone()), manual_settings());

    store.set_unavailable(true);
    for secs in [100.2, 100.4, 100.6] {
        sender.send(key(secs)).await.unwrap();
    }
    clock.set(at(103.0));

    let err = recorder.flush().await.unwrap_err();
    assert!(matches!(err, RecorderError::StoreUnavailable(_)));
    assert!(store.snapshot().is_empty());

    store.set_unavailable(false);
    assert_eq!(recorder.flush().await.unwrap(), 1);
    assert_eq!(store.snapshot()[&100].keypresses, 3);

    drop(sender);
    let report = recorder.stop().await.unwrap();
    assert_eq!(report.failed_flushes, 1);
    assert_eq!(report.buckets_written, 1);
}

#[tokio::test]
async fn scheduled_flushes_only_write_closed_buckets() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::at_secs(200.0);
    let (recorder, sender) =
        Recorder::start(store.clone(), Arc::new(clock.clone()), manual_settings());

    for secs in [200.1, 201.5, 202.3] {
        sender.send(key(secs)).await.unwrap();
    }
    clock.set(at(202.9));
    recorder.flush().await.unwrap();
    assert_eq!(store.snapshot().keys().copied().collect::<Vec<_>>(), vec![200]);

    // Arrives after bucket 200 was written; must not overwrite it.
    sender.send(key(200.5)).await.unwrap();
    clock.set(at(205.0));
    recorder.flush().await.unwrap();

    let rows = store.snapshot();
    assert_eq!(rows[&200].keypresses, 1);
    assert_eq!(rows[&201].keypresses, 2);
    assert_eq!(rows[&202].keypresses, 1);

    drop(sender);
    let report = recorder.stop().await.unwrap();
    assert_eq!(report.totals.keypresses, 4);
}

#[tokio::test]
async fn replayed_events_for_unwritten_seconds_keep_their_own_bucket() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::at_secs(1_000.0);
    let (recorder, sender) =
        Recorder::start(store.clone(), Arc::new(clock.clone()), manual_settings());

    sender.send(key(5.0)).await.unwrap();
    assert_eq!(recorder.flush().await.unwrap(), 1);

    // Older than the flush cutoff, but second 6 was never written.
    sender.send(key(6.2)).await.unwrap();
    // Second 5 was written, so this one moves to the next unwritten second.
    sender.send(key(5.9)).await.unwrap();

    drop(sender);
    recorder.stop().await.unwrap();

    let rows: Vec<_> = store
        .snapshot()
        .into_iter()
        .map(|(bucket, counters)| (bucket, counters.keypresses))
        .collect();
    assert_eq!(rows, vec![(5, 1), (6, 2)]);
}

#[tokio::test]
async fn failed_final_flush_hands_back_unpersisted_buckets() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at_secs(700.0));
    let (recorder, sender) = Recorder::start(store.clone(), clock, manual_settings());

    store.set_unavailable(true);
    sender.send(key(700.1)).await.unwrap();
    sender.send(key(700.7)).await.unwrap();

    match recorder.stop().await {
        Err(RecorderError::FinalFlushFailed {
            unpersisted,
            report,
            ..
        }) => {
            assert_eq!(unpersisted[&700].keypresses, 2);
            assert_eq!(report.events_recorded, 2);
            assert_eq!(report.failed_flushes, 2);
        }
        other => panic!("expected a failed final flush, got {other:?}"),
    }
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn subscribers_receive_each_flushed_batch() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::at_secs(300.0);
    let (recorder, sender) =
        Recorder::start(store.clone(), Arc::new(clock.clone()), manual_settings());
    let mut notifications = recorder.subscribe();

    sender
        .send(InputEvent::PointerButton {
            button: MouseButton::Middle,
            pressed: true,
            at: at(300.2),
        })
        .await
        .unwrap();
    clock.set(at(302.0));
    assert_eq!(recorder.flush().await.unwrap(), 1);

    let notification = notifications.recv().await.unwrap();
    assert_eq!(notification.flushed_at, at(302.0));
    assert_eq!(notification.buckets[&300].middle_clicks, 1);

    // Nothing new buffered: a flush is a no-op and publishes nothing.
    assert_eq!(recorder.flush().await.unwrap(), 0);
    assert!(notifications.try_recv().is_err());

    drop(sender);
    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn stop_flushes_open_bucket_and_rejects_later_events() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at_secs(400.0));
    let (recorder, sender) = Recorder::start(store.clone(), clock, manual_settings());

    sender.send(key(400.1)).await.unwrap();
    let report = recorder.stop().await.unwrap();

    assert_eq!(report.events_recorded, 1);
    assert_eq!(store.snapshot()[&400].keypresses, 1);
    assert!(matches!(
        sender.send(key(400.2)).await,
        Err(RecorderError::Closed)
    ));
    assert!(sender.is_closed());
}

#[tokio::test]
async fn recorder_finishes_when_every_sender_is_gone() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at_secs(500.0));
    let (mut recorder, sender) = Recorder::start(store.clone(), clock, manual_settings());

    sender.send(key(500.5)).await.unwrap();
    drop(sender);

    recorder.wait().await;
    assert!(recorder.is_finished());
    let report = recorder.stop().await.unwrap();
    assert_eq!(report.buckets_written, 1);
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn event_path_flushes_when_interval_elapsed() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::at_secs(600.0);
    let settings = RecorderSettings {
        timer_flush: false,
        ..RecorderSettings::default()
    };
    let (recorder, sender) = Recorder::start(store.clone(), Arc::new(clock.clone()), settings);
    let mut notifications = recorder.subscribe();

    sender.send(key(600.3)).await.unwrap();
    clock.set(at(602.5));
    sender.send(key(602.5)).await.unwrap();

    // No explicit flush: recording the events is what triggers the write.
    let notification = tokio::time::timeout(std::time::Duration::from_secs(5), notifications.recv())
        .await
        .expect("event path never flushed")
        .unwrap();
    assert_eq!(notification.buckets.keys().copied().collect::<Vec<_>>(), vec![600]);
    assert!(!store.snapshot().contains_key(&602));

    drop(sender);
    recorder.stop().await.unwrap();
    assert_eq!(store.snapshot()[&602].keypresses, 1);
}

#[tokio::test]
async fn json_lines_source_feeds_the_recorder() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at_secs(50.0));
    let (mut recorder, sender) = Recorder::start(store.clone(), clock, manual_settings());

    let lines = [
        r#"{"type":"pointerMove","x":0,"y":0,"t":0.0}"#,
        r#"{"type":"pointerMove","x":10,"y":0,"t":0.2}"#,
        r#"{"type":"pointerMove","x":10,"y":0,"t":0.6}"#,
        r#"{"type":"pointerButton","button":"left","pressed":true,"t":1.1}"#,
        r#"{"type":"pointerButton","button":"left","pressed":false,"t":1.2}"#,
        r#"{"type":"pointerButton","button":"back","pressed":true,"t":1.3}"#,
        "",
        "not json",
        r#"{"type":"keyPress"}"#,
    ]
    .join("\n");

    let mut source = JsonLinesSource::reader("fixture", Cursor::new(lines.into_bytes()));
    assert_eq!(source.name(), "fixture");
    source.start(sender).unwrap();

    recorder.wait().await;
    source.stop().unwrap();
    let report = recorder.stop().await.unwrap();

    let rows = store.snapshot();
    assert_eq!(rows[&0].mouse_move_samples, 1);
    assert_eq!(rows[&0].mouse_move_distance, 10.0);
    assert_eq!(rows[&1].left_clicks, 1);
    // No timestamp on the line: stamped with the clock at delivery.
    assert_eq!(rows[&50].keypresses, 1);
    assert_eq!(source.malformed_count(), 2);
    assert_eq!(report.events_recorded, 6);
}

#[tokio::test]
async fn sqlite_store_round_trip_through_history() {
    let dir = tempdir().unwrap();
    let database = Database::new(dir.path().join("activity.sqlite3")).unwrap();
    let store: Arc<dyn BucketStore> = Arc::new(database);
    let clock = ManualClock::at_secs(10_000.0);
    let (recorder, sender) =
        Recorder::start(Arc::clone(&store), Arc::new(clock.clone()), manual_settings());

    for secs in [10_000.1, 10_000.2, 10_001.7] {
        sender.send(key(secs)).await.unwrap();
    }
    sender
        .send(InputEvent::PointerButton {
            button: MouseButton::Right,
            pressed: true,
            at: at(10_001.9),
        })
        .await
        .unwrap();
    drop(sender);
    recorder.stop().await.unwrap();

    clock.set(at(10_030.0));
    let history = HistoryQuery::new(store, Arc::new(clock));
    let buckets = history.recent(Duration::seconds(60)).await.unwrap();
    assert_eq!(
        buckets.iter().map(|b| b.bucket_ts).collect::<Vec<_>>(),
        vec![10_000, 10_001]
    );

    let summary = HistorySummary::from_buckets(&buckets);
    assert_eq!(summary.totals.keypresses, 3);
    assert_eq!(summary.totals.right_clicks, 1);
    assert!(history.recent(Duration::seconds(5)).await.unwrap().is_empty());
}
