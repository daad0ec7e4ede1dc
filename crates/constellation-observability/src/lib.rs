//! Structured logging for the Constellation Runtime (spec §6.2), grounded on
//! `tandem-observability`'s `ObservabilityEvent`/`emit_event` shape. That
//! crate's multi-process (`engine`/`desktop`/`tui`) file-rotation scaffolding
//! doesn't apply here — the runtime is an embedded library with a single log
//! sink, not a process that owns its own log directory — so only the field
//! shape and the tracing layering survive; see `DESIGN.md` for the drop.

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// One structured log line. Fields mirror the Constellation domain
/// (`run_id`, `node_id`, `star_id`, `status`) rather than the original's
/// chat-session fields (spec §6.2: "rather than interpolating them into
/// the message string").
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub run_id: Option<&'a str>,
    pub node_id: Option<&'a str>,
    pub star_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

pub fn emit_event(level: Level, event: ObservabilityEvent<'_>) {
    match level {
        Level::ERROR => tracing::error!(
            target: "constellation.obs",
            component = event.component,
            event = event.event,
            run_id = event.run_id.unwrap_or(""),
            node_id = event.node_id.unwrap_or(""),
            star_id = event.star_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            error_code = event.error_code.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
        Level::WARN => tracing::warn!(
            target: "constellation.obs",
            component = event.component,
            event = event.event,
            run_id = event.run_id.unwrap_or(""),
            node_id = event.node_id.unwrap_or(""),
            star_id = event.star_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            error_code = event.error_code.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
        Level::DEBUG => tracing::debug!(
            target: "constellation.obs",
            component = event.component,
            event = event.event,
            run_id = event.run_id.unwrap_or(""),
            node_id = event.node_id.unwrap_or(""),
            star_id = event.star_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            error_code = event.error_code.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
        _ => tracing::info!(
            target: "constellation.obs",
            component = event.component,
            event = event.event,
            run_id = event.run_id.unwrap_or(""),
            node_id = event.node_id.unwrap_or(""),
            star_id = event.star_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            error_code = event.error_code.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
    }
}

/// Installs a compact stdout subscriber honoring `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once (e.g. from several integration test
/// binaries) since a failed `try_init` is ignored rather than panicking.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_event_does_not_panic_without_a_subscriber_installed() {
        emit_event(
            Level::INFO,
            ObservabilityEvent {
                event: "run_started",
                component: "runner",
                run_id: Some("run_x"),
                node_id: None,
                star_id: None,
                status: Some("running"),
                error_code: None,
                detail: None,
            },
        );
    }
}
