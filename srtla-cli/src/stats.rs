//! Statistics display and formatting

use srtla_bonding::{EngineStats, PathStats};
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
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format RTT in human-readable form
pub fn format_rtt(rtt_us: u64) -> String {
    if rtt_us >= 1_000_000 {
        format!("{:.2}s", rtt_us as f64 / 1_000_000.0)
    } else if rtt_us >= 1_000 {
        format!("{:.2}ms", rtt_us as f64 / 1_000.0)
    } else {
        format!("{}µs", rtt_us)
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

/// Score column; unconnected paths have no meaningful score
fn format_score(score: i64) -> String {
    if score == i64::MIN {
        "-".to_string()
    } else {
        score.to_string()
    }
}

/// Display engine statistics
pub fn display_engine_stats(stats: &EngineStats) {
    let relay = stats
        .relay
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    let port = stats
        .listener_port
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());

    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ BONDING STATISTICS                                          │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Relay: {}  Listener port: {}", relay, port);
    println!(
        "│ Paths: {} connected / {} total",
        stats.connected_paths(),
        stats.paths.len()
    );
    println!("│ Uptime: {}", format_duration(stats.uptime));
    println!(
        "│ Packets:  {} sent / {} received",
        stats.packets_sent, stats.packets_received
    );
    println!(
        "│ Bytes:    {} sent / {} received",
        format_bytes(stats.bytes_sent),
        format_bytes(stats.bytes_received)
    );
    println!(
        "│ Dropped:  {} no path / {} send failed / {} malformed",
        stats.dropped_no_path, stats.dropped_send_failed, stats.dropped_malformed
    );
    println!("└─────────────────────────────────────────────────────────────┘");

    if !stats.paths.is_empty() {
        println!("┌───────────────┬─────────────┬────────────┬────────┬──────────┬──────────┬──────────┬──────┐");
        println!("│ Path          │ Status      │ Score      │ Flight │ Sent     │ Received │ RTT      │ Lost │");
        println!("├───────────────┼─────────────┼────────────┼────────┼──────────┼──────────┼──────────┼──────┤");

        for path in &stats.paths {
            display_path_stats_row(path);
        }

        println!("└───────────────┴─────────────┴────────────┴────────┴──────────┴──────────┴──────────┴──────┘");
    }
}

fn display_path_stats_row(stats: &PathStats) {
    let rtt = stats
        .rtt_us
        .map(format_rtt)
        .unwrap_or_else(|| "N/A".to_string());

    println!(
        "│ {:13} │ {:11} │ {:>10} │ {:>6} │ {:8} │ {:8} │ {:8} │ {:>4} │",
        stats.affinity.as_str(),
        stats.status.as_str(),
        format_score(stats.score),
        stats.in_flight,
        format_bytes(stats.bytes_sent),
        format_bytes(stats.bytes_received),
        rtt,
        stats.packets_lost
    );
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(stats: &EngineStats) {
    let secs = stats.uptime.as_secs();
    let throughput_bps = if secs > 0 {
        (stats.bytes_sent * 8) / secs
    } else {
        0
    };

    print!(
        "\r[{:8}] Paths: {}/{} | Sent: {} | Rate: {} | Dropped: {}         ",
        format_duration(stats.uptime),
        stats.connected_paths(),
        stats.paths.len(),
        format_bytes(stats.bytes_sent),
        format_bandwidth(throughput_bps),
        stats.dropped_no_path + stats.dropped_send_failed
    );

    let _ = std::io::stdout().flush();
}
