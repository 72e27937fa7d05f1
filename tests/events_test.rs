//! Integration tests for the event channel and the SSE endpoint.

mod common;

use std::time::Duration;

use common::{completed, wait_for_terminal, Script, TestHarness};
use mediashelf::events::{ConversionEvent, EventEnvelope, EVENT_SCHEMA_VERSION};
use mediashelf::mirror::{ClientMirror, MirrorUpdate};
use mediashelf_db::models::ConversionStatus;

#[tokio::test]
async fn sse_stream_connects() {
    let (_h, addr) = TestHarness::with_server(Script::Stall).await;

    let resp = reqwest::get(format!("http://{addr}/api/events"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let ct = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(ct.contains("text/event-stream"), "expected SSE content-type, got: {ct}");
}

#[tokio::test]
async fn sse_streams_envelopes_with_seq_ids() {
    let (h, addr) = TestHarness::with_server(Script::Stall).await;
    let mut resp = reqwest::get(format!("http://{addr}/api/events"))
        .await
        .unwrap();

    let source = h.source("clip.mkv");
    h.queue.enqueue(&source).unwrap();

    let mut body = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !body.contains("conversion_started") {
            let chunk = resp.chunk().await.unwrap().expect("stream ended");
            body.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .expect("timed out waiting for SSE data");

    assert!(body.contains("id: 1"), "missing id line in {body}");

    // Heartbeats share the stream; pick out the first envelope.
    let envelope = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .find_map(|data| serde_json::from_str::<EventEnvelope>(data).ok())
        .unwrap();
    assert_eq!(envelope.seq, 1);
    assert_eq!(envelope.version, EVENT_SCHEMA_VERSION);
    assert!(matches!(
        envelope.event,
        ConversionEvent::ConversionQueued { ref job } if job.source_path == source
    ));
}

#[tokio::test]
async fn sse_replays_missed_events_after_last_event_id() {
    let (h, addr) = TestHarness::with_server(Script::Stall).await;
    let source = h.source("resume.mkv");
    h.queue.enqueue(&source).unwrap();
    assert_eq!(h.queue.snapshot().seq, 2);

    let mut resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/events"))
        .header("Last-Event-ID", "1")
        .send()
        .await
        .unwrap();

    let mut body = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !body.contains("conversion_started") {
            let chunk = resp.chunk().await.unwrap().expect("stream ended");
            body.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .expect("timed out waiting for replay");

    let seqs: Vec<u64> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str::<EventEnvelope>(data).ok())
        .map(|envelope| envelope.seq)
        .collect();
    assert_eq!(seqs, [2]);
}

#[tokio::test]
async fn events_follow_the_job_lifecycle() {
    let h = TestHarness::new();
    let source = h.source("film.mkv");
    let mut rx = h.queue.subscribe();

    h.queue.enqueue(&source).unwrap();
    let events = wait_for_terminal(&mut rx, &source).await;

    let kinds: Vec<_> = events
        .iter()
        .map(|e| match e.event {
            ConversionEvent::ConversionQueued { .. } => "queued",
            ConversionEvent::ConversionStarted { .. } => "started",
            ConversionEvent::ProgressUpdate { .. } => "progress",
            ConversionEvent::ConversionCompleted { .. } => "completed",
            ConversionEvent::ConversionFailed { .. } => "failed",
            ConversionEvent::ConversionCancelled { .. } => "cancelled",
        })
        .collect();
    assert_eq!(kinds, ["queued", "started", "progress", "completed"]);
    assert!(completed(&events, &source));

    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "gap in {seqs:?}");

    assert!(source.with_extension("mp4").exists());
    assert_eq!(h.queue.recent_history(1)[0].status, ConversionStatus::Completed);
}

#[tokio::test]
async fn mirror_tracks_the_queue() {
    let h = TestHarness::with_script(Script::Stall);
    let mut rx = h.queue.subscribe();
    let mut mirror = ClientMirror::from_snapshot(h.queue.snapshot());

    let a = h.source("a.mkv");
    let b = h.source("b.mkv");
    h.queue.enqueue(&a).unwrap();
    h.queue.enqueue(&b).unwrap();
    h.queue.cancel(&a).unwrap();

    let target = h.queue.snapshot();
    while mirror.seq() < target.seq {
        let received = rx.recv().await;
        assert_eq!(mirror.handle(received), MirrorUpdate::Applied);
    }

    let summary = |jobs: &[mediashelf_db::models::ConversionJob]| {
        jobs.iter()
            .map(|j| (j.id, j.source_path.clone(), j.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(summary(mirror.jobs()), summary(&target.jobs));
    assert_eq!(mirror.last_outcome(&a), Some(ConversionStatus::Cancelled));
    assert_eq!(mirror.get(&b).unwrap().status, ConversionStatus::Running);
}

#[tokio::test]
async fn late_mirror_ignores_replayed_events() {
    let h = TestHarness::with_script(Script::Stall);
    let mut rx = h.queue.subscribe();

    h.queue.enqueue(h.source("early.mkv")).unwrap();

    // Built after the events were published but before they were received.
    let mut mirror = ClientMirror::from_snapshot(h.queue.snapshot());
    let seq = mirror.seq();

    let replayed = rx.recv().await;
    assert_eq!(mirror.handle(replayed), MirrorUpdate::Ignored);
    assert_eq!(mirror.seq(), seq);
    assert_eq!(mirror.jobs().len(), 1);
}
