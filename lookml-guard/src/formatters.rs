//! Rendering of run results for consoles, CI logs and pull-request comments.
//!
//! Every formatter separates fields the service *confirmed invalid* from
//! fields that *could not be validated* (fatal errors, exhausted retries).
//!
//! ```rust
//! use lookml_guard::formatters::{FormatterConfig, HumanFormatter, ReportFormatter};
//! # use lookml_guard::core::RunResult;
//! # fn show(result: &RunResult) -> lookml_guard::error::Result<()> {
//! let formatter = HumanFormatter::with_config(FormatterConfig::ci());
//! println!("{}", formatter.format(result)?);
//! # Ok(())
//! # }
//! ```

use std::fmt::{self, Write};

use serde::Serialize;

use crate::core::{
    Completeness, FailureCause, Outcome, ReportKey, ReportSummary, RunResult, RunStats, SlowQuery,
    ValidationReport,
};
use crate::differ::DiffReport;
use crate::error::{GuardError, Result};

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Options shared by all formatters.
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    /// Include run statistics
    pub include_stats: bool,
    /// List every failing entry, not just the counts
    pub include_issues: bool,
    /// Include passing entries in structured output
    pub include_passed: bool,
    /// Include the slow-query profile
    pub include_profile: bool,
    /// Maximum number of failing entries to list; `None` lists all
    pub max_issues: Option<usize>,
    /// Colorize human output with ANSI escapes
    pub use_colors: bool,
    /// Include the run start time
    pub include_timestamps: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            include_stats: true,
            include_issues: true,
            include_passed: false,
            include_profile: true,
            max_issues: None,
            use_colors: true,
            include_timestamps: true,
        }
    }
}

impl FormatterConfig {
    /// Summary counts only.
    pub fn minimal() -> Self {
        Self {
            include_stats: false,
            include_issues: false,
            include_passed: false,
            include_profile: false,
            max_issues: Some(0),
            use_colors: false,
            include_timestamps: false,
        }
    }

    /// Everything, passing entries included.
    pub fn detailed() -> Self {
        Self {
            include_passed: true,
            ..Self::default()
        }
    }

    /// Plain output with a bounded issue list.
    pub fn ci() -> Self {
        Self {
            include_stats: true,
            include_issues: true,
            include_passed: false,
            include_profile: true,
            max_issues: Some(50),
            use_colors: false,
            include_timestamps: true,
        }
    }

    /// Sets whether run statistics are included.
    pub fn with_stats(mut self, include: bool) -> Self {
        self.include_stats = include;
        self
    }

    /// Sets whether failing entries are listed.
    pub fn with_issues(mut self, include: bool) -> Self {
        self.include_issues = include;
        self
    }

    /// Sets whether passing entries are included in structured output.
    pub fn with_passed(mut self, include: bool) -> Self {
        self.include_passed = include;
        self
    }

    /// Sets whether the slow-query profile is included.
    pub fn with_profile(mut self, include: bool) -> Self {
        self.include_profile = include;
        self
    }

    /// Caps the number of listed failing entries.
    pub fn with_max_issues(mut self, max: Option<usize>) -> Self {
        self.max_issues = max;
        self
    }

    /// Sets whether ANSI colors are used.
    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    fn paint(&self, color: &str, text: impl fmt::Display) -> String {
        if self.use_colors {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn limit<T>(&self, items: Vec<T>) -> (Vec<T>, usize) {
        match self.max_issues {
            Some(max) if items.len() > max => {
                let hidden = items.len() - max;
                let mut items = items;
                items.truncate(max);
                (items, hidden)
            }
            _ => (items, 0),
        }
    }
}

/// Converts run results into a textual representation.
pub trait ReportFormatter {
    /// Formats a finished run.
    fn format(&self, result: &RunResult) -> Result<String>;

    /// Formats a finished run with explicit options.
    fn format_with_config(&self, result: &RunResult, _config: &FormatterConfig) -> Result<String> {
        self.format(result)
    }

    /// Formats the outcome of an incremental comparison.
    fn format_diff(&self, diff: &DiffReport) -> Result<String>;
}

fn render<F>(body: F) -> Result<String>
where
    F: FnOnce(&mut String) -> fmt::Result,
{
    let mut output = String::new();
    body(&mut output)
        .map_err(|e| GuardError::Internal(format!("failed to render output: {e}")))?;
    Ok(output)
}

/// Failing entries split by whether the service gave a verdict.
struct Issues<'a> {
    invalid: Vec<(&'a ReportKey, &'a Outcome)>,
    unvalidated: Vec<(&'a ReportKey, &'a Outcome)>,
}

impl<'a> Issues<'a> {
    fn of(report: &'a ValidationReport) -> Self {
        let mut issues = Self {
            invalid: Vec::new(),
            unvalidated: Vec::new(),
        };
        for (key, outcome) in report.entries() {
            if outcome.is_confirmed_invalid() {
                issues.invalid.push((key, outcome));
            } else if outcome.is_unvalidated() {
                issues.unvalidated.push((key, outcome));
            }
        }
        issues
    }
}

fn cause_note(outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::Failed {
            cause: FailureCause::Unattributed,
            ..
        } => Some("no single field could be blamed".to_string()),
        Outcome::Failed {
            cause: FailureCause::TransientExhausted(kind),
            ..
        } => Some(format!("gave up after repeated {kind}")),
        _ => None,
    }
}

/// Structured JSON output.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    config: FormatterConfig,
    pretty: bool,
}

#[derive(Serialize)]
struct JsonRun<'a> {
    passed: bool,
    summary: ReportSummary,
    report: ValidationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a RunStats>,
}

#[derive(Serialize)]
struct JsonDiff<'a> {
    passed: bool,
    new_failures: &'a ValidationReport,
    suppressed: usize,
    unvalidated: &'a ValidationReport,
}

impl JsonFormatter {
    /// A pretty-printing formatter with default options.
    pub fn new() -> Self {
        Self {
            config: FormatterConfig::default(),
            pretty: true,
        }
    }

    /// A pretty-printing formatter with the given options.
    pub fn with_config(config: FormatterConfig) -> Self {
        Self {
            config,
            pretty: true,
        }
    }

    /// Sets whether the JSON is pretty-printed.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    fn to_string<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        json.map_err(|e| GuardError::Serialization(format!("failed to serialize to JSON: {e}")))
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, result: &RunResult) -> Result<String> {
        self.format_with_config(result, &self.config)
    }

    fn format_with_config(&self, result: &RunResult, config: &FormatterConfig) -> Result<String> {
        let mut report = result.report.clone();
        if !config.include_passed {
            report.retain(|_, outcome| !outcome.is_passed());
        }
        let run = JsonRun {
            passed: !result.has_failures() && result.report.is_complete(),
            summary: result.report.summary(),
            report,
            stats: config.include_stats.then_some(&result.stats),
        };
        self.to_string(&run)
    }

    fn format_diff(&self, diff: &DiffReport) -> Result<String> {
        self.to_string(&JsonDiff {
            passed: !diff.has_new_failures(),
            new_failures: &diff.new_failures,
            suppressed: diff.suppressed,
            unvalidated: &diff.unvalidated,
        })
    }
}

/// Console output.
#[derive(Debug, Clone, Default)]
pub struct HumanFormatter {
    config: FormatterConfig,
}

impl HumanFormatter {
    /// A formatter with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// A formatter with the given options.
    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }

    fn write_issues(
        &self,
        out: &mut String,
        config: &FormatterConfig,
        title: &str,
        color: &str,
        issues: Vec<(&ReportKey, &Outcome)>,
    ) -> fmt::Result {
        if issues.is_empty() {
            return Ok(());
        }
        writeln!(out)?;
        writeln!(out, "{} ({}):", config.paint(color, title), issues.len())?;
        let (shown, hidden) = config.limit(issues);
        for (key, outcome) in shown {
            writeln!(out, "   {key}")?;
            if let Some(message) = outcome.message() {
                writeln!(out, "      {message}")?;
            }
            if let Outcome::Failed {
                location: Some(location),
                ..
            } = outcome
            {
                writeln!(out, "      at {location}")?;
            }
            if let Some(note) = cause_note(outcome) {
                writeln!(out, "      ({note})")?;
            }
        }
        if hidden > 0 {
            writeln!(out, "   ... and {hidden} more")?;
        }
        Ok(())
    }

    fn write_profile(&self, out: &mut String, slow: &[SlowQuery]) -> fmt::Result {
        if slow.is_empty() {
            return Ok(());
        }
        writeln!(out)?;
        writeln!(out, "Slow queries:")?;
        for query in slow {
            writeln!(
                out,
                "   {:>8.1}s  {} ({} fields)",
                query.runtime_secs, query.batch, query.fields
            )?;
        }
        Ok(())
    }
}

impl ReportFormatter for HumanFormatter {
    fn format(&self, result: &RunResult) -> Result<String> {
        self.format_with_config(result, &self.config)
    }

    fn format_with_config(&self, result: &RunResult, config: &FormatterConfig) -> Result<String> {
        let report = &result.report;
        let summary = report.summary();
        render(|out| {
            writeln!(out)?;
            if !report.has_failures() && report.is_complete() {
                writeln!(out, "{}", config.paint(GREEN, "SQL validation PASSED"))?;
            } else {
                writeln!(out, "{}", config.paint(RED, "SQL validation FAILED"))?;
            }
            if let Completeness::Partial { unresolved } = report.completeness() {
                writeln!(
                    out,
                    "{}",
                    config.paint(
                        YELLOW,
                        format!("Run stopped early; {} units unresolved", unresolved.len())
                    )
                )?;
            }
            if config.include_timestamps {
                writeln!(out, "Started: {}", result.stats.started_at.to_rfc3339())?;
            }

            writeln!(out)?;
            writeln!(out, "Summary:")?;
            writeln!(out, "   Passed fields:         {}", summary.passed_fields)?;
            writeln!(out, "   Invalid fields:        {}", summary.failed_fields)?;
            writeln!(out, "   Unattributed failures: {}", summary.unattributed_failures)?;
            writeln!(out, "   Not validated:         {}", summary.unvalidated)?;
            writeln!(out, "   Skipped units:         {}", summary.skipped_units)?;

            if config.include_stats {
                let stats = &result.stats;
                writeln!(out)?;
                writeln!(out, "Run:")?;
                writeln!(out, "   Units: {} ({} cached)", stats.units, stats.cached_units)?;
                writeln!(
                    out,
                    "   Remote calls: {} ({} retries, {} isolating)",
                    stats.remote_calls, stats.retries, stats.isolation_calls
                )?;
                if stats.resplits > 0 {
                    writeln!(out, "   Re-splits: {}", stats.resplits)?;
                }
                writeln!(out, "   Elapsed: {:.1}s", stats.elapsed.as_secs_f64())?;
            }

            if config.include_issues {
                let issues = Issues::of(report);
                self.write_issues(out, config, "Invalid SQL", RED, issues.invalid)?;
                self.write_issues(out, config, "Could not be validated", YELLOW, issues.unvalidated)?;
            }
            if config.include_profile {
                self.write_profile(out, &result.stats.slow_queries)?;
            }
            writeln!(out)
        })
    }

    fn format_diff(&self, diff: &DiffReport) -> Result<String> {
        let config = &self.config;
        render(|out| {
            writeln!(out)?;
            if diff.has_new_failures() {
                writeln!(
                    out,
                    "{}",
                    config.paint(
                        RED,
                        format!("{} new SQL failures", diff.new_failures.len())
                    )
                )?;
            } else {
                writeln!(out, "{}", config.paint(GREEN, "No new SQL failures"))?;
            }
            writeln!(out, "Pre-existing failures suppressed: {}", diff.suppressed)?;
            let invalid = Issues::of(&diff.new_failures);
            self.write_issues(out, config, "New invalid SQL", RED, invalid.invalid)?;
            self.write_issues(
                out,
                config,
                "New failures without a verdict",
                YELLOW,
                invalid.unvalidated,
            )?;
            let unvalidated: Vec<_> = diff.unvalidated.entries().collect();
            self.write_issues(out, config, "Could not be validated", YELLOW, unvalidated)?;
            writeln!(out)
        })
    }
}

/// Markdown output, for pull-request comments.
#[derive(Debug, Clone, Default)]
pub struct MarkdownFormatter {
    config: FormatterConfig,
}

impl MarkdownFormatter {
    /// A formatter with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// A formatter with the given options.
    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }

    fn write_table(
        &self,
        out: &mut String,
        config: &FormatterConfig,
        title: &str,
        issues: Vec<(&ReportKey, &Outcome)>,
    ) -> fmt::Result {
        if issues.is_empty() {
            return Ok(());
        }
        writeln!(out, "### {title}")?;
        writeln!(out)?;
        writeln!(out, "| Location | Message |")?;
        writeln!(out, "|---|---|")?;
        let (shown, hidden) = config.limit(issues);
        for (key, outcome) in shown {
            let message = outcome.message().unwrap_or_default().replace('|', "\\|");
            writeln!(out, "| `{key}` | {message} |")?;
        }
        if hidden > 0 {
            writeln!(out)?;
            writeln!(out, "_{hidden} more not shown._")?;
        }
        writeln!(out)
    }
}

impl ReportFormatter for MarkdownFormatter {
    fn format(&self, result: &RunResult) -> Result<String> {
        self.format_with_config(result, &self.config)
    }

    fn format_with_config(&self, result: &RunResult, config: &FormatterConfig) -> Result<String> {
        let report = &result.report;
        let summary = report.summary();
        render(|out| {
            let status = if !report.has_failures() && report.is_complete() {
                "passed"
            } else {
                "failed"
            };
            writeln!(out, "## SQL validation {status}")?;
            writeln!(out)?;
            writeln!(out, "| Passed | Invalid | Unattributed | Not validated | Skipped |")?;
            writeln!(out, "|---|---|---|---|---|")?;
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                summary.passed_fields,
                summary.failed_fields,
                summary.unattributed_failures,
                summary.unvalidated,
                summary.skipped_units
            )?;
            writeln!(out)?;
            if let Completeness::Partial { unresolved } = report.completeness() {
                writeln!(out, "> Run stopped early; {} units unresolved.", unresolved.len())?;
                writeln!(out)?;
            }
            if config.include_issues {
                let issues = Issues::of(report);
                self.write_table(out, config, "Invalid SQL", issues.invalid)?;
                self.write_table(out, config, "Could not be validated", issues.unvalidated)?;
            }
            Ok(())
        })
    }

    fn format_diff(&self, diff: &DiffReport) -> Result<String> {
        render(|out| {
            let status = if diff.has_new_failures() { "failed" } else { "passed" };
            writeln!(out, "## Incremental SQL validation {status}")?;
            writeln!(out)?;
            writeln!(
                out,
                "{} new failures, {} pre-existing suppressed.",
                diff.new_failures.len(),
                diff.suppressed
            )?;
            writeln!(out)?;
            let new_failures: Vec<_> = diff.new_failures.entries().collect();
            self.write_table(out, &self.config, "New failures", new_failures)?;
            let unvalidated: Vec<_> = diff.unvalidated.entries().collect();
            self.write_table(out, &self.config, "Could not be validated", unvalidated)?;
            Ok(())
        })
    }
}
