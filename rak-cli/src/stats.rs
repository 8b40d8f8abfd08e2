//! Statistics display and formatting

use rak_server::ServerStats;
use std::io::Write;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;

    if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Render the server counters as a boxed table
pub fn render_server_stats(stats: &ServerStats, uptime: Duration) -> String {
    let dropped = stats.malformed_dropped + stats.unroutable_dropped + stats.unknown_dropped;
    let rows = [
        ("Uptime", format_duration(uptime)),
        ("Connections", stats.connections.to_string()),
        (
            "Datagrams",
            format!(
                "{} sent / {} received",
                stats.datagrams_sent, stats.datagrams_received
            ),
        ),
        (
            "Bytes",
            format!(
                "{} sent / {} received",
                format_bytes(stats.bytes_sent),
                format_bytes(stats.bytes_received)
            ),
        ),
        ("Payloads", stats.payloads_delivered.to_string()),
        (
            "Handshakes",
            format!(
                "{} completed / {} refused / {} bad version",
                stats.handshakes_completed, stats.connections_rejected, stats.version_mismatches
            ),
        ),
        ("Timeouts", stats.timeouts.to_string()),
        (
            "Dropped",
            format!(
                "{} ({} malformed, {} unroutable, {} unknown)",
                dropped, stats.malformed_dropped, stats.unroutable_dropped, stats.unknown_dropped
            ),
        ),
    ];

    let mut out = String::new();
    out.push_str("┌─────────────────────────────────────────────────────────────┐\n");
    out.push_str("│ SERVER STATISTICS                                           │\n");
    out.push_str("├─────────────────────────────────────────────────────────────┤\n");
    for (label, value) in rows {
        out.push_str(&format!("│ {:<12} {:<46} │\n", label, value));
    }
    out.push_str("└─────────────────────────────────────────────────────────────┘");
    out
}

/// Display server statistics
pub fn display_server_stats(stats: &ServerStats, uptime: Duration) {
    println!("\n{}", render_server_stats(stats, uptime));
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(stats: &ServerStats, elapsed: Duration) {
    let throughput_bps = if elapsed.as_secs() > 0 {
        (stats.bytes_received * 8) / elapsed.as_secs()
    } else {
        0
    };

    print!(
        "\r[{:8}] Connections: {} | Received: {} | Rate: {} | Payloads: {}         ",
        format_duration(elapsed),
        stats.connections,
        format_bytes(stats.bytes_received),
        format_bandwidth(throughput_bps),
        stats.payloads_delivered
    );
    let _ = std::io::stdout().flush();
}
