// src/core/events.rs

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

/// Domain events fanned out to listener rooms.
///
/// Delivery is best-effort and at-least-once from the listener's point of
/// view: an event is a hint to re-fetch authoritative state, never the
/// state itself. A listener may observe the event before the write it
/// describes is visible via a direct query and must tolerate that race.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DomainEvent {
    #[serde(rename = "exam-submitted")]
    ExamSubmitted {
        student_id: i64,
        exam_id: i64,
        percentage: f64,
    },

    #[serde(rename = "student-added")]
    StudentAdded { student_id: i64 },

    #[serde(rename = "student-removed")]
    StudentRemoved { student_id: i64 },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::ExamSubmitted { .. } => "exam-submitted",
            DomainEvent::StudentAdded { .. } => "student-added",
            DomainEvent::StudentRemoved { .. } => "student-removed",
        }
    }

    /// The student room this event also belongs to, if any.
    fn student_room(&self) -> Option<i64> {
        match self {
            DomainEvent::ExamSubmitted { student_id, .. } => Some(*student_id),
            DomainEvent::StudentAdded { .. } | DomainEvent::StudentRemoved { .. } => None,
        }
    }
}

/// In-process fan-out of domain events.
///
/// One shared room for all teacher listeners, plus a lazily-created room
/// per student. Channels are bounded; a lagging receiver drops old events,
/// which is acceptable because listeners re-poll on every event anyway.
#[derive(Clone)]
pub struct EventHub {
    teacher_tx: broadcast::Sender<DomainEvent>,
    student_rooms: Arc<RwLock<HashMap<i64, broadcast::Sender<DomainEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (teacher_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventHub {
            teacher_tx,
            student_rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publishes an event to the teacher room and, where applicable, the
    /// owning student's room. Infallible: delivery failures (no listeners,
    /// lagging listeners) are logged and swallowed, never rolled back into
    /// the state transition that produced the event.
    pub async fn publish(&self, event: DomainEvent) {
        if self.teacher_tx.send(event.clone()).is_err() {
            debug!(event = event.event_type(), "No teacher listeners for event");
        }

        if let Some(student_id) = event.student_room() {
            let rooms = self.student_rooms.read().await;
            if let Some(tx) = rooms.get(&student_id) {
                if tx.send(event.clone()).is_err() {
                    debug!(
                        event = event.event_type(),
                        student_id, "No student listeners for event"
                    );
                }
            }
        }
    }

    pub fn subscribe_teachers(&self) -> broadcast::Receiver<DomainEvent> {
        self.teacher_tx.subscribe()
    }

    pub async fn subscribe_student(&self, student_id: i64) -> broadcast::Receiver<DomainEvent> {
        let mut rooms = self.student_rooms.write().await;
        rooms
            .entry(student_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
