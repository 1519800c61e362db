//! Text output formatting with progress bars and colors.

use chrono::Local;
use fundwatch_core::{FetchSource, ProjectRecord, RewardTier};
use fundwatch_fetch::{CacheStats, GatewayStats, RecoveryStats};
use fundwatch_modian::{BatchReport, SignedRequest};
use fundwatch_telemetry::{PerformanceReport, TuningReport};

// ============================================================================
// ANSI Colors
// ============================================================================

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

// Progress bar characters
const BAR_FULL: char = '█';
const BAR_EMPTY: char = '░';

/// Text formatter with optional colors.
pub struct TextFormatter {
    use_colors: bool,
    bar_width: usize,
}

impl TextFormatter {
    /// Creates a new text formatter.
    pub fn new(use_colors: bool) -> Self {
        Self {
            use_colors,
            bar_width: 10,
        }
    }

    /// Formats one project record.
    pub fn format_record(&self, record: &ProjectRecord, show_tiers: bool) -> String {
        let mut lines = Vec::new();

        let name = if record.name.is_empty() {
            "(unnamed)"
        } else {
            record.name.as_str()
        };
        lines.push(format!(
            "{} #{} ({})",
            self.bold(name),
            record.id,
            self.format_source(record.source)
        ));

        if record.is_default() {
            lines.push(self.red("No data could be fetched"));
            return lines.join("\n");
        }

        lines.push(format!("Status:   {}", record.status));
        lines.push(format!(
            "Funding:  {} {} / {} ({:.1}%)",
            self.progress_bar(record.completion_rate),
            self.format_amount(record.raised_amount),
            self.format_amount(record.target_amount),
            record.completion_rate
        ));
        lines.push(format!(
            "Backers:  {}   Likes: {}   Comments: {}",
            record.backer_count, record.like_count, record.comment_count
        ));

        match (&record.start_time, &record.end_time) {
            (Some(start), Some(end)) => lines.push(format!("Period:   {start} → {end}")),
            (Some(start), None) => lines.push(format!("Started:  {start}")),
            (None, Some(end)) => lines.push(format!("Ends:     {end}")),
            (None, None) => {}
        }

        if show_tiers && !record.reward_tiers.is_empty() {
            lines.push(self.dim("Reward tiers:"));
            for tier in &record.reward_tiers {
                lines.push(format!("  {}", self.format_tier(tier)));
            }
        }

        lines.push(self.dim(&format!(
            "Fetched {}",
            record.fetched_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        )));

        lines.join("\n")
    }

    fn format_tier(&self, tier: &RewardTier) -> String {
        let availability = match (tier.cap, tier.remaining) {
            (Some(cap), Some(_)) if tier.is_sold_out() => self.red(&format!("sold out ({cap})")),
            (Some(cap), Some(remaining)) => format!("{remaining}/{cap} left"),
            _ => "unlimited".to_string(),
        };
        format!(
            "{:>10}  {}  {} sold, {}",
            self.format_amount(tier.price),
            tier.title,
            tier.sold,
            availability
        )
    }

    /// Formats a progress bar for a completion percentage.
    pub fn progress_bar(&self, percent: f64) -> String {
        let clamped = percent.clamp(0.0, 100.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let filled = ((clamped / 100.0) * self.bar_width as f64).round() as usize;
        let empty = self.bar_width.saturating_sub(filled);

        let bar = format!(
            "{}{}",
            BAR_FULL.to_string().repeat(filled),
            BAR_EMPTY.to_string().repeat(empty)
        );

        self.color_for_percent(percent, &bar)
    }

    /// Formats a batch summary.
    pub fn format_batch_report(&self, report: &BatchReport) -> String {
        let mut lines = Vec::new();
        let title = if report.stopped {
            self.yellow("Batch stopped early")
        } else {
            self.bold("Batch complete")
        };
        lines.push(title);
        lines.push("─".repeat(40));
        lines.push(format!("Processed:      {}", report.processed));
        lines.push(format!("Succeeded:      {}", self.green(&report.succeeded.to_string())));
        lines.push(format!("Browser counts: {}", report.fallback_used));
        let defaulted = report.defaulted.to_string();
        let defaulted = if report.defaulted > 0 {
            self.red(&defaulted)
        } else {
            defaulted
        };
        lines.push(format!("Defaulted:      {defaulted}"));
        lines.push(format!("Elapsed:        {:.1}s", report.elapsed.as_secs_f64()));
        lines.join("\n")
    }

    /// Formats gateway and recovery counters.
    pub fn format_request_stats(&self, gateway: &GatewayStats, recovery: &RecoveryStats) -> String {
        let mut lines = Vec::new();
        lines.push(self.bold("Requests"));
        lines.push(format!(
            "  {} total, {} from cache ({:.0}%), {:.0}% success",
            gateway.total_requests,
            gateway.cached_requests,
            gateway.cache_hit_rate() * 100.0,
            gateway.success_rate() * 100.0
        ));
        lines.push(format!("  Avg response: {:.2}s", gateway.avg_response_time));
        lines.push(format!(
            "  Errors: {} ({} recovered, {} gave up)",
            recovery.total_errors, recovery.recovered_errors, recovery.failed_recoveries
        ));
        for (category, count) in &recovery.by_category {
            lines.push(self.dim(&format!("    {category}: {count}")));
        }
        lines.join("\n")
    }

    /// Formats the monitor's report.
    pub fn format_performance(&self, report: &PerformanceReport) -> String {
        let mut lines = Vec::new();
        lines.push(self.bold("Performance"));

        let Some(current) = &report.current else {
            lines.push(self.dim("  No samples taken"));
            return lines.join("\n");
        };

        lines.push(format!(
            "  CPU {:.1}%  Memory {:.1}%  Process {:.0} MB  Threads {}",
            current.cpu_percent, current.memory_percent, current.process_memory_mb, current.thread_count
        ));
        if let Some(averages) = &report.averages {
            lines.push(format!(
                "  Recent avg: CPU {:.1}%  Memory {:.1}%  Response {:.2}s",
                averages.cpu_percent, averages.memory_percent, averages.avg_response_time
            ));
        }
        if let Some(baseline) = &report.baseline {
            lines.push(self.dim(&format!(
                "  Baseline:   CPU {:.1}%  Memory {:.1}%  Response {:.2}s",
                baseline.cpu_percent, baseline.memory_percent, baseline.avg_response_time
            )));
        }
        lines.push(self.dim(&format!("  {} samples", report.samples)));

        for alert in &report.recent_alerts {
            lines.push(self.yellow(&format!(
                "  ! {} {:.2} (threshold {:.2})",
                alert.kind, alert.value, alert.threshold
            )));
        }

        lines.join("\n")
    }

    /// Formats the tuner's report.
    pub fn format_tuning(&self, report: &TuningReport) -> String {
        let mut lines = Vec::new();
        let state = if report.enabled {
            self.green("enabled")
        } else {
            self.dim("disabled")
        };
        lines.push(format!("{} ({state}, {} actions)", self.bold("Tuning"), report.total_actions));
        for action in &report.recent_actions {
            lines.push(format!(
                "  {} {}: workers {} → {}, delay {:.1}-{:.1}s → {:.1}-{:.1}s",
                action.timestamp.with_timezone(&Local).format("%H:%M:%S"),
                action.rule,
                action.before.max_concurrent_requests,
                action.after.max_concurrent_requests,
                action.before.request_delay.0,
                action.before.request_delay.1,
                action.after.request_delay.0,
                action.after.request_delay.1,
            ));
        }
        lines.join("\n")
    }

    /// Formats the parts of a signed request.
    pub fn format_signed(&self, signed: &SignedRequest) -> String {
        [
            format!("URL:        {}", self.cyan(&signed.request_url)),
            format!("Host:       {}", signed.hosts),
            format!("mt:         {}", signed.mt),
            format!("Query:      {}", signed.query),
            format!("Body:       {}", signed.body),
            format!("Inner hash: {}", self.dim(&signed.inner_hash)),
            format!("Sign:       {}", self.bold(&signed.sign)),
        ]
        .join("\n")
    }

    /// Formats response cache usage.
    pub fn format_cache_stats(&self, stats: &CacheStats) -> String {
        #[allow(clippy::cast_precision_loss)]
        let percent = if stats.max_bytes == 0 {
            0.0
        } else {
            stats.total_bytes as f64 / stats.max_bytes as f64 * 100.0
        };
        [
            format!("Entries: {}", stats.entries),
            format!(
                "Size:    {} / {} ({percent:.1}%)",
                Self::format_bytes(stats.total_bytes),
                Self::format_bytes(stats.max_bytes)
            ),
        ]
        .join("\n")
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn format_source(&self, source: FetchSource) -> String {
        match source {
            FetchSource::Api => self.green(source.label()),
            FetchSource::Browser => self.cyan(source.label()),
            FetchSource::Default => self.red(source.label()),
        }
    }

    /// Formats an amount with thousands separators and two decimals.
    pub fn format_amount(&self, amount: f64) -> String {
        let formatted = format!("{:.2}", amount.abs());
        let (whole, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, ch) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        let sign = if amount < 0.0 { "-" } else { "" };
        format!("¥{sign}{grouped}.{fraction}")
    }

    /// Formats a byte count with a binary unit.
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
        #[allow(clippy::cast_precision_loss)]
        let mut value = bytes as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{bytes} B")
        } else {
            format!("{value:.1} {}", UNITS[unit])
        }
    }

    fn color_for_percent(&self, percent: f64, text: &str) -> String {
        if !self.use_colors {
            return text.to_string();
        }
        let color = if percent >= 100.0 {
            GREEN
        } else if percent >= 50.0 {
            YELLOW
        } else {
            RED
        };
        format!("{color}{text}{RESET}")
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.use_colors {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: &str) -> String {
        self.paint(BOLD, text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint(DIM, text)
    }

    fn green(&self, text: &str) -> String {
        self.paint(GREEN, text)
    }

    fn yellow(&self, text: &str) -> String {
        self.paint(YELLOW, text)
    }

    fn red(&self, text: &str) -> String {
        self.paint(RED, text)
    }

    fn cyan(&self, text: &str) -> String {
        self.paint(CYAN, text)
    }
}
