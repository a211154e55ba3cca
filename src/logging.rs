//! 日志初始化：`UPLOAD_GATE_LOG` 优先，其次 `RUST_LOG`，默认 `info,ldap3=warn`。

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV: &str = "UPLOAD_GATE_LOG";
const DEFAULT_FILTER: &str = "info,ldap3=warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// 初始化 tracing 日志订阅。
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
