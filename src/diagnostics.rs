//! Per-request phase timeline.
//!
//! [`RequestHandler`](crate::RequestHandler) records one event per phase as
//! the request moves through it and flushes the buffer during shutdown, so the
//! timeline is emitted even when the dispatcher fails.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::RequestContext;

/// Request phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Init,
    Execute,
    Respond,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Init => "init",
            Phase::Execute => "execute",
            Phase::Respond => "respond",
            Phase::Error => "error",
        })
    }
}

/// One recorded phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub phase: Phase,
    /// Offset from the start of the request
    pub offset: Duration,
    pub detail: Option<String>,
}

/// Buffered phase events for one request.
#[derive(Debug)]
pub struct Diagnostics {
    request_id: Uuid,
    started_at: Instant,
    events: Vec<PhaseEvent>,
}

impl Diagnostics {
    pub fn new(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.id(),
            started_at: ctx.started_at(),
            events: Vec::with_capacity(4),
        }
    }

    pub fn record(&mut self, phase: Phase) {
        self.push(phase, None);
    }

    pub fn record_with(&mut self, phase: Phase, detail: impl Into<String>) {
        self.push(phase, Some(detail.into()));
    }

    fn push(&mut self, phase: Phase, detail: Option<String>) {
        self.events.push(PhaseEvent {
            phase,
            offset: self.started_at.elapsed(),
            detail,
        });
    }

    pub fn events(&self) -> &[PhaseEvent] {
        &self.events
    }

    pub fn has_errors(&self) -> bool {
        self.events.iter().any(|e| e.phase == Phase::Error)
    }

    /// Emits every buffered event at `trace` and hands the buffer back.
    pub fn flush(&mut self) -> Vec<PhaseEvent> {
        let events = std::mem::take(&mut self.events);
        for event in &events {
            tracing::trace!(
                request_id = %self.request_id,
                phase = %event.phase,
                offset_us = event.offset.as_micros() as u64,
                detail = event.detail.as_deref().unwrap_or(""),
                "request phase"
            );
        }
        events
    }
}
