use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use super::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "gateway.log";

/// Install the global subscriber: console output plus an optional daily
/// rolling file. Keep the returned guard alive or buffered lines are lost.
pub fn init_logger(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", config.level)));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_timer(UtcTime::rfc_3339());

    let registry = tracing_subscriber::registry().with(filter).with(console_layer);

    let Some(dir) = config.dir.as_ref() else {
        // 重复初始化 (如测试中) 时忽略错误
        let _ = registry.try_init();
        return None;
    };

    if let Err(e) = fs::create_dir_all(dir) {
        eprintln!("failed_to_create_log_dir {}: {}", dir.display(), e);
        let _ = registry.try_init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(UtcTime::rfc_3339());

    let _ = registry.with(file_layer).try_init();
    tracing::info!("Logging to {}", dir.display());
    Some(guard)
}
