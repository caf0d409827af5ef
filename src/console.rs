//! In-window diagnostic console.
//!
//! A [`ConsoleLayer`] sits next to the fmt layer and copies this crate's
//! `info`, `warn` and `error` events into a short shared buffer the UI draws.

use std::{
    collections::VecDeque,
    fmt::{self, Write as _},
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{layer::Context, Layer};

pub const DEFAULT_CAPACITY: usize = 6;

const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleLine {
    pub failed: bool,
    pub text: String,
}

/// Newest-last ring of console lines, shared between the layer and the UI.
#[derive(Clone, Debug)]
pub struct ConsoleBuffer {
    lines: Arc<Mutex<VecDeque<ConsoleLine>>>,
    capacity: usize,
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ConsoleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: ConsoleLine) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<ConsoleLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn layer(&self) -> ConsoleLayer {
        ConsoleLayer {
            buffer: self.clone(),
        }
    }
}

pub struct ConsoleLayer {
    buffer: ConsoleBuffer,
}

impl<S: Subscriber> Layer<S> for ConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::INFO || !meta.target().starts_with(CRATE_TARGET) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        self.buffer.push(ConsoleLine {
            failed: *meta.level() <= Level::WARN,
            text: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
