//! Bridge from `tracing` into a [`LogSink`].
//!
//! Span fields are carried as key/value pairs on every event recorded inside
//! the span, root span first, so a correlation key set on an outer span
//! routes every nested event. Span names form the sink's name chain.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::passthrough::PASSTHROUGH_TARGET;
use crate::traits::LogSink;

/// Target of the engine's own diagnostics, which the layer never buffers.
/// Events forwarded under [`PASSTHROUGH_TARGET`] are skipped as well.
pub const INTERNAL_TARGET: &str = "claw_tracr";

/// Field whose value becomes the error text of `ERROR` events.
pub const ERROR_FIELD: &str = "error";

/// A tracing layer feeding events into a [`LogSink`].
pub struct TracrLayer {
    sink: Arc<dyn LogSink>,
}

impl TracrLayer {
    /// Creates a layer writing into `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Returns the sink events are written into.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }
}

impl fmt::Debug for TracrLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracrLayer").finish_non_exhaustive()
    }
}

/// Maps a tracing level onto sink verbosity. `None` means error.
#[must_use]
pub fn verbosity(level: Level) -> Option<u8> {
    match level {
        Level::ERROR => None,
        Level::WARN | Level::INFO => Some(0),
        Level::DEBUG => Some(1),
        // TRACE
        _ => Some(2),
    }
}

/// Key/value pairs recorded on a span.
#[derive(Debug, Default)]
struct SpanFields(Vec<Value>);

impl<S> Layer<S> for TracrLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.kv));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFields>() {
            Some(fields) => fields.0.extend(visitor.kv),
            None => extensions.insert(SpanFields(visitor.kv)),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() == INTERNAL_TARGET || metadata.target() == PASSTHROUGH_TARGET {
            return;
        }

        let level = verbosity(*metadata.level());
        if let Some(level) = level {
            if !self.sink.enabled(level) {
                return;
            }
        }

        let mut sink = Arc::clone(&self.sink);
        let mut kv = Vec::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                sink = sink.with_name(span.name());
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    kv.extend(fields.0.iter().cloned());
                }
            }
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        kv.extend(visitor.kv);
        let msg = visitor.message.unwrap_or_default();

        match level {
            Some(level) => sink.info(level, &msg, &kv),
            None => {
                let err = take_field(&mut kv, ERROR_FIELD).map(EventError);
                sink.error(err.as_ref().map(|e| e as &(dyn StdError + 'static)), &msg, &kv);
            }
        }
    }
}

/// Removes the last pair named `name` from `kv`, returning its value.
fn take_field(kv: &mut Vec<Value>, name: &str) -> Option<String> {
    let pos = kv
        .chunks_exact(2)
        .rposition(|pair| pair[0].as_str() == Some(name))?;
    let mut pair = kv.drain(pos * 2..pos * 2 + 2);
    pair.next();
    match pair.next() {
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
        None => None,
    }
}

/// Error text lifted from an event's `error` field.
#[derive(Debug)]
struct EventError(String);

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for EventError {}

/// Collects fields as alternating string keys and values.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    kv: Vec<Value>,
}

impl FieldVisitor {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.kv.push(Value::String(field.name().to_string()));
            self.kv.push(Value::String(value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn StdError + 'static)) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }
}
