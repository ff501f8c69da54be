//! Observability - tracing subscriber の初期化
//!
//! `RUST_LOG` があればそれを優先し、なければ `default_filter` を使います。
//! 2 回目以降の呼び出し（テストや埋め込み先で既に subscriber がある場合）は何もしません。

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// `info` for this crate's spans and events, `warn` for everything else.
pub const DEFAULT_FILTER: &str = "warn,baton_core=info";

pub fn init_tracing(default_filter: &str) {
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true));

        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already set; keeping it");
        }
    });
}
