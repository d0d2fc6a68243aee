//! Collects tracing events emitted under one target.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Subscriber, dispatcher};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone)]
pub struct LogLine {
    pub message: String,
    fields: BTreeMap<String, String>,
}

impl LogLine {
    pub fn field(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(|v| v.trim_matches('"').to_string())
    }
}

pub type LogLines = Arc<Mutex<Vec<LogLine>>>;

struct TargetLayer {
    target: &'static str,
    lines: LogLines,
}

impl Visit for LogLine {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = value.clone();
        }
        self.fields.insert(field.name().to_string(), value);
    }
}

impl<S: Subscriber> Layer<S> for TargetLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != self.target {
            return;
        }
        let mut line = LogLine {
            message: String::new(),
            fields: BTreeMap::new(),
        };
        event.record(&mut line);
        self.lines.lock().unwrap().push(line);
    }
}

/// Captures events with `target` on this thread until the guard is dropped.
/// Pair with a current-thread tokio runtime.
pub fn capture_target(target: &'static str) -> (LogLines, dispatcher::DefaultGuard) {
    let lines: LogLines = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(TargetLayer {
        target,
        lines: lines.clone(),
    });
    let guard = dispatcher::set_default(&Dispatch::new(subscriber));
    (lines, guard)
}
