//! Human-readable formatting for status lines

use std::time::Duration;

/// Format a byte count with a binary unit suffix
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// Format a bandwidth figure given in kbps
pub fn format_bandwidth(kbps: f64) -> String {
    if kbps >= 1_000.0 {
        format!("{:.2} Mbps", kbps / 1_000.0)
    } else {
        format!("{:.0} kbps", kbps)
    }
}

/// Format an RTT in milliseconds
pub fn format_rtt(rtt_ms: f64) -> String {
    if rtt_ms < 1.0 {
        format!("{:.0}us", rtt_ms * 1_000.0)
    } else {
        format!("{:.1}ms", rtt_ms)
    }
}

/// Format a duration as h/m/s
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MiB");
    }

    #[test]
    fn test_format_bandwidth() {
        assert_eq!(format_bandwidth(500.0), "500 kbps");
        assert_eq!(format_bandwidth(2_500.0), "2.50 Mbps");
    }

    #[test]
    fn test_format_rtt() {
        assert_eq!(format_rtt(0.5), "500us");
        assert_eq!(format_rtt(42.25), "42.2ms");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h02m05s");
    }
}
