//! Human-readable output helpers.

use std::time::Instant;

use tracing::info;

/// Formats a byte count the way the summaries print it: plain bytes below
/// 1 KiB, otherwise two decimals of the largest binary unit up to GiB.
pub fn human_size(size: u64) -> String {
    const KIB: u64 = 1 << 10;
    const MIB: u64 = 1 << 20;
    const GIB: u64 = 1 << 30;

    if size < KIB {
        return format!("{size} bytes");
    }
    let (value, unit) = if size < MIB {
        (size as f64 / KIB as f64, "KiB")
    } else if size < GIB {
        (size as f64 / MIB as f64, "MiB")
    } else {
        (size as f64 / GIB as f64, "GiB")
    };
    format!("{value:.2} {unit}")
}

/// Runs `f`, logging how long the named step took.
pub fn timed<T>(step: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    info!(step, elapsed_ms = start.elapsed().as_millis() as u64, "done");
    out
}
