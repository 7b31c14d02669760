//! Tracing/logging setup.
//!
//! Every public store/queue method is already `#[tracing::instrument]`'d at
//! its call site; this module just wires up a subscriber so those spans and
//! events actually go somewhere, using the standard `EnvFilter` + `fmt`
//! layering.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber reading `RUST_LOG` (falling back to
/// `error,chainloom=info`), with ANSI-colored output and span open/close
/// events so instrumented async boundaries (RPC dispatch, store writes) are
/// visible. Safe to call more than once per process; later calls are no-ops
/// (the global subscriber can only be installed once).
pub fn init() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error,chainloom=info"));

    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}
