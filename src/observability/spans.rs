//! Structured span definitions for tracing.

use std::time::Instant;

use tracing::{Level, Span, field, span};

use crate::api::PluginKind;
use crate::identity::PluginIdentity;

/// Span around one plugin construction: host load plus factory call.
pub struct LoadSpan {
    span: Span,
    start: Instant,
}

impl LoadSpan {
    pub fn new(kind: PluginKind, entry_point: &str, identity: &PluginIdentity) -> Self {
        let span = span!(
            Level::INFO,
            "plugin.load",
            kind = %kind,
            entry_point = entry_point,
            digest = identity.short(),
            import_path = field::Empty,
            outcome = field::Empty,
            latency_ms = field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn record_import_path(&self, import_path: &str) {
        self.span.record("import_path", import_path);
    }

    /// Records outcome and latency, returning the latency in milliseconds.
    pub fn finish(self, success: bool) -> f64 {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.span.record("outcome", if success { "ok" } else { "error" });
        self.span.record("latency_ms", latency_ms as u64);
        latency_ms
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_span() {
        let identity = PluginIdentity::from_repository_identity("abc", "{}", "NewResourcePlugin");
        let span = LoadSpan::new(PluginKind::Resource, "NewResourcePlugin", &identity);
        span.record_import_path("./plugin");
        let latency = span.finish(true);
        assert!(latency >= 0.0);
    }

    #[test]
    fn test_load_span_with_subscriber() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        tracing::subscriber::with_default(subscriber, || {
            let identity = PluginIdentity::from_repository_identity("abc", "", "E");
            let span = LoadSpan::new(PluginKind::DataSource, "E", &identity);
            let _entered = span.span().clone().entered();
            tracing::info!("inside load span");
            drop(_entered);
            span.finish(false);
        });
    }
}
