mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::StreamExt;

use common::{body, MemorySink, POST_42, POST_43, STALL_WARNING};
use tweetsink::demux::{Demux, DemuxStats, PersistPosts};
use tweetsink::lifecycle::{self, RunOutcome};
use tweetsink::normalize::NormalizedPost;
use tweetsink::stream::Session;

fn expected_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 15, 4, 5).unwrap()
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let sink = Arc::new(MemorySink::default());
    let demux = Demux::new().on_post(PersistPosts::new(Arc::clone(&sink)));
    let mut session = Session::from_byte_stream(body(&[STALL_WARNING, POST_42, POST_43]));

    let stats = demux.run(session.messages()).await;

    assert_eq!(
        stats,
        DemuxStats {
            posts: 2,
            dropped: 1,
            malformed: 0
        }
    );
    assert_eq!(
        sink.stored(),
        vec![
            NormalizedPost {
                id: 42,
                created_at: expected_time(),
                text: "hello".into(),
                screen_name: "alice".into(),
            },
            NormalizedPost {
                id: 43,
                created_at: expected_time(),
                text: "full expanded text".into(),
                screen_name: "bob".into(),
            },
        ]
    );
}

#[tokio::test]
async fn test_failed_insert_does_not_stop_pipeline() {
    let sink = Arc::new(MemorySink::failing(&[42]));
    let demux = Demux::new().on_post(PersistPosts::new(Arc::clone(&sink)));
    let mut session = Session::from_byte_stream(body(&[STALL_WARNING, POST_42, POST_43]));

    let stats = demux.run(session.messages()).await;

    assert_eq!(stats.posts, 2);
    assert_eq!(sink.attempts(), vec![42, 43]);
    let stored: Vec<i64> = sink.stored().iter().map(|p| p.id).collect();
    assert_eq!(stored, vec![43]);
}

#[tokio::test]
async fn test_inserts_follow_post_order() {
    let mut lines = Vec::new();
    let mut expected = Vec::new();
    for i in 0..50i64 {
        match i % 4 {
            0 => lines.push(STALL_WARNING.to_string()),
            1 => lines.push(r#"{"limit":{"track":10}}"#.to_string()),
            2 => lines.push("garbage line".to_string()),
            _ => {}
        }
        let id = 1000 + i;
        lines.push(format!(
            r#"{{"id":{id},"created_at":"Tue Jan 02 15:04:05 +0000 2024","text":"post {id}","user":{{"screen_name":"u{id}"}}}}"#
        ));
        expected.push(id);
    }
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();

    let sink = Arc::new(MemorySink::default());
    let demux = Demux::new().on_post(PersistPosts::new(Arc::clone(&sink)));
    let mut session = Session::from_byte_stream(body(&refs));
    let stats = demux.run(session.messages()).await;

    assert_eq!(sink.attempts(), expected);
    assert_eq!(stats.posts, 50);
    assert_eq!(stats.malformed, 12);
    assert_eq!(stats.dropped, 26);
}

#[tokio::test]
async fn test_unparseable_time_still_persisted() {
    let line = r#"{"id":7,"created_at":"sometime last week","text":"t","user":{"screen_name":"carol"}}"#;
    let sink = Arc::new(MemorySink::default());
    let demux = Demux::new().on_post(PersistPosts::new(Arc::clone(&sink)));
    let mut session = Session::from_byte_stream(body(&[line]));
    demux.run(session.messages()).await;

    let stored = sink.stored();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].has_created_at());
    assert_eq!(stored[0].screen_name, "carol");
}

#[tokio::test]
async fn test_shutdown_after_posts_consumed() {
    // Stream stays open after the three messages, like a live connection
    let live = body(&[STALL_WARNING, POST_42, POST_43]).chain(futures::stream::pending());
    let session = Session::from_byte_stream(live);

    let sink = Arc::new(MemorySink::default());
    let demux = Demux::new().on_post(PersistPosts::new(Arc::clone(&sink)));

    let watched = Arc::clone(&sink);
    let shutdown = async move {
        while watched.attempts().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        lifecycle::run(session, demux, shutdown),
    )
    .await
    .expect("shutdown should complete promptly");

    assert_eq!(
        outcome,
        RunOutcome::Shutdown(DemuxStats {
            posts: 2,
            dropped: 1,
            malformed: 0
        })
    );
    assert_eq!(sink.attempts(), vec![42, 43]);
}
