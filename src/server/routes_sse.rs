use crate::events::EventEnvelope;
use crate::server::AppContext;
use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::StreamExt;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/events", get(events_handler))
}

/// Stream every [`EventEnvelope`] as an unnamed SSE message with `id` set to
/// its sequence number. A receiver that falls behind gets a `resync` event and
/// should fetch a fresh snapshot.
///
/// A reconnecting client that sends `Last-Event-ID` first gets the buffered
/// envelopes it missed. If the buffer no longer reaches back that far the
/// client sees a gap in `id` and resyncs.
pub async fn events_handler(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading the buffer so nothing falls between them.
    let rx = ctx.queue.subscribe();
    let last_seen = last_event_id(&headers);

    let mut replay: Vec<EventEnvelope> = match last_seen {
        Some(last) => ctx
            .queue
            .events()
            .recent_events(usize::MAX)
            .into_iter()
            .filter(|e| e.seq > last)
            .collect(),
        None => Vec::new(),
    };
    replay.reverse();
    if !replay.is_empty() {
        tracing::debug!("Replaying {} event(s) to reconnecting client", replay.len());
    }

    let floor = replay.last().map(|e| e.seq).or(last_seen).unwrap_or(0);
    let replayed =
        tokio_stream::iter(replay).map(|envelope| Ok::<_, Infallible>(envelope_event(&envelope)));

    let live = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(envelope) if envelope.seq <= floor => return None,
            Ok(envelope) => envelope_event(&envelope),
            Err(BroadcastStreamRecvError::Lagged(missed)) => Event::default()
                .event("resync")
                .data(format!(r#"{{"missed":{}}}"#, missed)),
        };
        Some(Ok::<_, Infallible>(event))
    });

    let heartbeat = IntervalStream::new(tokio::time::interval(Duration::from_secs(30)))
        .map(|_| Ok::<_, Infallible>(Event::default().event("heartbeat").data("{}")));

    Sse::new(replayed.chain(live).merge(heartbeat)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn envelope_event(envelope: &EventEnvelope) -> Event {
    let data = serde_json::to_string(envelope)
        .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {}"}}"#, e));

    Event::default().id(envelope.seq.to_string()).data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_last_event_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers), None);

        headers.insert("last-event-id", HeaderValue::from_static("42"));
        assert_eq!(last_event_id(&headers), Some(42));

        headers.insert("last-event-id", HeaderValue::from_static("abc"));
        assert_eq!(last_event_id(&headers), None);
    }
}
