//! Ring buffer of recent log lines.
//!
//! A `tracing` layer that retains the last N formatted events in
//! memory so operators can pull them over the bus with
//! `service.get_logs` without shell access to the host.

use std::collections::VecDeque;
use std::fmt;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Default number of retained log lines.
pub const DEFAULT_CAPACITY: usize = 100;

/// Shared handle to the retained log lines.
#[derive(Clone, Debug)]
pub struct LogBuffer {
    entries: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogBuffer {
    /// Creates a buffer retaining up to `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, line: String) {
        let mut entries = self.entries.lock().expect("log buffer lock");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(line);
    }

    /// Returns the retained lines, oldest first.
    #[must_use]
    pub fn peek(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("log buffer lock")
            .iter()
            .cloned()
            .collect()
    }
}

/// The `tracing` layer feeding a [`LogBuffer`].
pub struct RingBufferLayer {
    buffer: LogBuffer,
}

impl RingBufferLayer {
    /// Creates a layer writing into `buffer`.
    #[must_use]
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for RingBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        self.buffer
            .push(format!("[{}] {}: {}", meta.level(), meta.target(), visitor.line));
    }
}

#[derive(Default)]
struct LineVisitor {
    line: String,
}

impl LineVisitor {
    fn pad(&mut self) {
        if !self.line.is_empty() {
            self.line.push(' ');
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.pad();
        if field.name() == "message" {
            self.line.push_str(value);
        } else {
            let _ = write!(self.line, "{}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.pad();
        if field.name() == "message" {
            let _ = write!(self.line, "{value:?}");
        } else {
            let _ = write!(self.line, "{}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn events_land_in_buffer() {
        let buffer = LogBuffer::new(10);
        let subscriber =
            tracing_subscriber::registry().with(RingBufferLayer::new(buffer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(port = 22021, "listening");
        });

        let lines = buffer.peek();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("listening"));
        assert!(lines[0].contains("port=22021"));
        assert!(lines[0].contains("INFO"));
    }

    #[test]
    fn buffer_drops_oldest_beyond_capacity() {
        let buffer = LogBuffer::new(3);
        let subscriber =
            tracing_subscriber::registry().with(RingBufferLayer::new(buffer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..5 {
                tracing::warn!("event {i}");
            }
        });

        let lines = buffer.peek();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("event 2"));
        assert!(lines[2].contains("event 4"));
    }
}
