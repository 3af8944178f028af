//! Logging setup and display helpers

use tracing_subscriber::EnvFilter;

/// Initialize console logging.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sidepool={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Re-open the log destination (SIGUSR1).
///
/// Console output needs no rotation; this exists so a file-backed writer
/// can hook in without touching the signal plumbing.
pub fn reopen_log() {
    tracing::info!("log reopen requested");
}

/// Format a hashrate with binary-friendly SI suffixes
pub fn format_hashrate(hashes_per_second: u64) -> String {
    const UNITS: [&str; 5] = ["H/s", "KH/s", "MH/s", "GH/s", "TH/s"];
    let mut value = hashes_per_second as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", hashes_per_second, UNITS[0])
    } else {
        format!("{:.3} {}", value, UNITS[unit])
    }
}

/// Format an atomic-unit amount as coins (12 decimal places, trimmed)
pub fn format_amount(atomic: u64) -> String {
    let whole = atomic / 1_000_000_000_000;
    let frac = atomic % 1_000_000_000_000;
    if frac == 0 {
        format!("{}", whole)
    } else {
        let s = format!("{}.{:012}", whole, frac);
        s.trim_end_matches('0').to_string()
    }
}
