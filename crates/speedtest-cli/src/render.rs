//! Terminal rendering of a live run and of server stats.

use std::fmt::Write as _;

use speedtest_common::models::{StatsResponse, TestPhase};
use speedtest_orchestrator::{Measurement, TestRun};

const BAR_WIDTH: usize = 20;

/// One status line for the current state of a run.
pub fn status_line(run: &TestRun) -> String {
    let mut line = format!("{:<8}", run.phase.to_string());
    match run.phase {
        TestPhase::Idle | TestPhase::Starting => {}
        TestPhase::Aborted => line.push_str(" test aborted"),
        _ => {
            let _ = write!(
                line,
                " down {} up {} ping {:>5} ms jitter {:>5} ms",
                rate(&run.download),
                rate(&run.upload),
                run.ping.value,
                run.jitter,
            );
        }
    }
    line
}

fn rate(m: &Measurement) -> String {
    format!("{:>8} Mbps {}", m.value, bar(m.progress))
}

fn bar(progress: f64) -> String {
    let filled = (progress.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

/// Final report for a finished run.
pub fn summary(run: &TestRun) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Download: {} Mbps", run.download.value);
    let _ = writeln!(out, "Upload:   {} Mbps", run.upload.value);
    let _ = writeln!(out, "Ping:     {} ms", run.ping.value);
    let _ = writeln!(out, "Jitter:   {} ms", run.jitter);
    if !run.client_ip.is_empty() {
        let _ = writeln!(out, "Client:   {}", run.client_ip);
    }
    if let Some(id) = &run.test_id {
        let _ = writeln!(out, "Test ID:  {id}");
    }
    let _ = write!(out, "Samples:  {}", run.history.len());
    out
}

pub fn stats_report(stats: &StatsResponse) -> String {
    let s = &stats.summary;
    let mut out = String::new();
    let _ = writeln!(out, "Total tests:      {}", s.total_tests);
    let _ = writeln!(out, "Average download: {:.2} Mbps", s.avg_download);
    let _ = writeln!(out, "Average upload:   {:.2} Mbps", s.avg_upload);
    let _ = writeln!(out, "Average ping:     {:.1} ms", s.avg_ping);

    if stats.results.is_empty() {
        let _ = write!(out, "\nNo results yet.");
        return out;
    }

    let _ = writeln!(
        out,
        "\n{:>6}  {:<20}  {:<39}  {:>9}  {:>9}  {:>6}  {:>6}",
        "id", "when", "ip", "down", "up", "ping", "jitter"
    );
    for r in &stats.results {
        let _ = writeln!(
            out,
            "{:>6}  {:<20}  {:<39}  {:>9}  {:>9}  {:>6}  {:>6}",
            r.id,
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            r.ip.as_deref().unwrap_or("-"),
            r.dl.as_deref().unwrap_or("-"),
            r.ul.as_deref().unwrap_or("-"),
            r.ping.as_deref().unwrap_or("-"),
            r.jitter.as_deref().unwrap_or("-"),
        );
    }
    out.truncate(out.trim_end().len());
    out
}
