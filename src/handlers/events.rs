// src/handlers/events.rs

use std::convert::Infallible;

use axum::{
    Extension,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use crate::{core::events::{DomainEvent, EventHub}, utils::jwt::Claims};

fn to_sse_event(event: DomainEvent) -> Result<Event, Infallible> {
    Ok(Event::default()
        .event(event.event_type())
        .data(serde_json::to_string(&event).unwrap_or_default()))
}

/// SSE stream of the caller's own student room.
///
/// Events are hints: a listener reacting to one re-fetches the
/// authoritative state, tolerating the small window where the write is
/// not yet visible.
pub async fn student_stream(
    State(events): State<EventHub>,
    Extension(claims): Extension<Claims>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = events.subscribe_student(claims.user_id()).await;

    let stream = BroadcastStream::new(rx)
        .filter_map(|event| event.ok())
        .map(to_sse_event);

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// SSE stream of the shared teacher room (all domain events).
pub async fn teacher_stream(
    State(events): State<EventHub>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = events.subscribe_teachers();

    let stream = BroadcastStream::new(rx)
        .filter_map(|event| event.ok())
        .map(to_sse_event);

    Sse::new(stream).keep_alive(KeepAlive::default())
}
