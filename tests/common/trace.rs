//! Records the `parser.trace_point` events emitted on the current thread.

use std::sync::{Arc, Mutex};

use tracing::{
    Event, Subscriber,
    dispatcher::DefaultGuard,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, Registry, layer::Context, prelude::*};

#[derive(Clone, Default)]
struct Paths(Arc<Mutex<Vec<String>>>);

impl<S: Subscriber> Layer<S> for Paths {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != "parser.trace_point" {
            return;
        }
        let mut visitor = PathField(None);
        event.record(&mut visitor);
        if let (Some(path), Ok(mut paths)) = (visitor.0, self.0.lock()) {
            paths.push(path);
        }
    }
}

struct PathField(Option<String>);

impl Visit for PathField {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "path" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

/// Keep alive while the code under test runs.
pub struct TraceGuard {
    _guard: DefaultGuard,
    paths: Paths,
}

impl TraceGuard {
    pub fn hit(&self, path: &str) -> bool {
        self.paths
            .0
            .lock()
            .map(|paths| paths.iter().any(|p| p == path))
            .unwrap_or(false)
    }
}

pub fn capture() -> TraceGuard {
    let paths = Paths::default();
    let guard = tracing::subscriber::set_default(Registry::default().with(paths.clone()));
    TraceGuard {
        _guard: guard,
        paths,
    }
}
