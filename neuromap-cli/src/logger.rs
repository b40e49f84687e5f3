use chrono::Local;
use log::LevelFilter;
use std::io::Write;

/// `--log-level` wins over `RUST_LOG`; both fall back to info.
pub fn init_logging(level: Option<&str>) {
    let log_level = level
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .or_else(|| std::env::var("RUST_LOG").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:5} {}] {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                std::thread::current().name().unwrap_or("-"),
                record.args()
            )
        })
        .init();
    log::debug!("logger initialized (level: {log_level})");
}
