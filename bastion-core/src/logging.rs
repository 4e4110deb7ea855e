//! Tracing layer that mirrors WARN/ERROR events into the catalog's audit
//! log, grounded in this codebase's `logging::make_database_logger_layer`
//! (a tracing `Layer` that writes into the operational store rather than
//! stdout).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::catalog::Catalog;

static FATAL_LOGGED: AtomicBool = AtomicBool::new(false);

/// Whether a `fatal = true` event has been logged since process start.
/// `main` consults this after a command returns `Ok` to still exit
/// non-zero when a component logged a fatal condition but recovered
/// enough to return cleanly.
pub fn fatal_logged() -> bool {
    FATAL_LOGGED.load(Ordering::SeqCst)
}

/// Watches every event for a `fatal = true` field and latches
/// [`fatal_logged`] so a FATAL-level condition (spec.md §4.12) drives the
/// process exit code even when the call site that observed it only
/// logs and keeps going.
pub struct FatalFlagLayer;

#[derive(Default)]
struct FatalVisitor(bool);

impl Visit for FatalVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "fatal" && format!("{value:?}") == "true" {
            self.0 = true;
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "fatal" && value {
            self.0 = true;
        }
    }
}

impl<S: Subscriber> Layer<S> for FatalFlagLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FatalVisitor::default();
        event.record(&mut visitor);
        if visitor.0 {
            FATAL_LOGGED.store(true, Ordering::SeqCst);
        }
    }
}

pub struct DatabaseLoggerLayer {
    catalog: Arc<dyn Catalog>,
    runtime: tokio::runtime::Handle,
}

impl DatabaseLoggerLayer {
    /// Must be constructed from inside a running tokio runtime.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            runtime: tokio::runtime::Handle::current(),
        }
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for DatabaseLoggerLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() > Level::WARN {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let catalog = self.catalog.clone();
        let kind = event.metadata().level().to_string().to_lowercase();
        let target = event.metadata().target().to_string();
        let message = visitor.0;
        self.runtime.spawn(async move {
            let _ = catalog.append_audit_log(&kind, &target, &message).await;
        });
    }
}
