//! Console logging setup, grounded in this codebase's `logging.rs`, pared
//! down to the `tracing-subscriber` layers this workspace actually takes a
//! dependency on (`ansi` + `env-filter`, no `tracing-log`/`time` offset
//! handling). `run` additionally installs `bastion_core::logging`'s
//! database-backed audit layer once the store is open; every other
//! command only ever gets the console layer.

use std::sync::Arc;

use bastion_core::logging::{DatabaseLoggerLayer, FatalFlagLayer};
use bastion_core::Catalog;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

fn set_default_rust_log(verbosity: u8) {
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "bastion=info,bastion_core=info,bastion_ssh=info",
            1 => "bastion=debug,bastion_core=debug,bastion_ssh=debug",
            _ => "debug",
        };
        std::env::set_var("RUST_LOG", level);
    }
}

pub fn init(verbosity: u8) {
    set_default_rust_log(verbosity);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(console::user_attended())
        .with_target(true)
        .with_filter(EnvFilter::from_default_env());

    tracing_subscriber::registry().with(fmt_layer).with(FatalFlagLayer).init();
}

/// Like [`init`], but additionally mirrors WARN/ERROR events into the
/// catalog's audit log. Must be called instead of `init`, never after it
/// (the global subscriber can only be installed once).
pub fn init_with_catalog(verbosity: u8, catalog: Arc<dyn Catalog>) {
    set_default_rust_log(verbosity);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(console::user_attended())
        .with_target(true)
        .with_filter(EnvFilter::from_default_env());
    let db_layer = DatabaseLoggerLayer::new(catalog).with_filter(tracing::level_filters::LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(db_layer)
        .with(FatalFlagLayer)
        .init();
}
