//! Serializable analysis reports.

use std::fmt;

use serde::Serialize;
use sleuth_trace::window::TraceStats;

use crate::violation::{Category, PotentialViolation, Violation};

/// Outcome of one window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowSummary {
    pub window: usize,
    pub first_gid: Option<u64>,
    pub last_gid: Option<u64>,
    pub stats: TraceStats,
    pub confirmed: usize,
    pub potential: usize,
    pub queries: usize,
    pub degraded_reads: usize,
}

/// A window whose detection was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWindow {
    pub window: usize,
    pub reason: String,
}

/// Counters summed over the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub events: usize,
    pub critical_events: usize,
    pub threads: usize,
    pub shared_addresses: usize,
    pub read_writes: usize,
    pub synchronizations: usize,
    pub branches: usize,
    pub local_accesses: usize,
    pub potential_violations: usize,
    pub real_violations: usize,
    pub windows: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub violations: Vec<Violation>,
    pub potentials: Vec<PotentialViolation>,
    pub windows: Vec<WindowSummary>,
    pub failed_windows: Vec<FailedWindow>,
    pub totals: Totals,
}

impl AnalysisReport {
    pub fn count(&self, category: Category) -> usize {
        self.violations
            .iter()
            .filter(|v| v.category() == category)
            .count()
    }

    pub fn of_category(&self, category: Category) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(move |v| v.category() == category)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Totals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Windows: {}", self.windows)?;
        writeln!(f, "Total events: {}", self.events)?;
        writeln!(f, "Critical events: {}", self.critical_events)?;
        writeln!(f, "Threads: {}", self.threads)?;
        writeln!(f, "Shared addresses: {}", self.shared_addresses)?;
        writeln!(f, "Read/write events: {}", self.read_writes)?;
        writeln!(f, "Local accesses: {}", self.local_accesses)?;
        writeln!(f, "Synchronizations: {}", self.synchronizations)?;
        writeln!(f, "Branches: {}", self.branches)?;
        writeln!(f, "Potential violations: {}", self.potential_violations)?;
        writeln!(f, "Real violations: {}", self.real_violations)?;
        write!(f, "Elapsed: {} ms", self.elapsed_ms)
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for violation in &self.violations {
            writeln!(f, "{} (window {})", violation.description, violation.window)?;
            for (i, schedule) in violation.schedules.iter().enumerate() {
                writeln!(f, "Schedule {}:", i + 1)?;
                for line in schedule.to_string().lines() {
                    writeln!(f, "  {line}")?;
                }
            }
        }
        for potential in &self.potentials {
            writeln!(f, "Potential {} (window {})", potential.description, potential.window)?;
        }
        for failed in &self.failed_windows {
            writeln!(f, "Window {} abandoned: {}", failed.window, failed.reason)?;
        }
        if !self.violations.is_empty() || !self.potentials.is_empty() || !self.failed_windows.is_empty() {
            writeln!(f)?;
        }
        write!(f, "{}", self.totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Schedule, ScheduleStep};
    use crate::violation::{Signature, Unconfirmed};
    use sleuth_trace::event::{LocationId, ThreadId};

    fn report() -> AnalysisReport {
        let step = |gid: u64, site: &str| ScheduleStep {
            gid,
            thread: ThreadId(gid),
            thread_name: format!("T{gid}"),
            site: site.to_string(),
            action: "write 1.0 <- 1".to_string(),
        };
        AnalysisReport {
            violations: vec![Violation {
                signature: Signature::race(LocationId(1), LocationId(2)),
                description: "Race: a <-> b".to_string(),
                window: 0,
                gids: vec![1, 2],
                threads: vec![ThreadId(1), ThreadId(2)],
                schedules: vec![Schedule {
                    elided: 3,
                    steps: vec![step(1, "a"), step(2, "b")],
                }],
            }],
            potentials: vec![PotentialViolation {
                signature: Signature::race(LocationId(3), LocationId(4)),
                description: "Race: c <-> d".to_string(),
                window: 1,
                outcome: Unconfirmed::Refuted,
            }],
            totals: Totals {
                real_violations: 1,
                potential_violations: 1,
                ..Totals::default()
            },
            ..AnalysisReport::default()
        }
    }

    #[test]
    fn text_report_lists_violations_then_summary() {
        let text = report().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Race: a <-> b (window 0)");
        assert_eq!(lines[1], "Schedule 1:");
        assert_eq!(lines[2], "  ...");
        assert_eq!(lines[3], "  T1 @ a: write 1.0 <- 1");
        assert_eq!(lines[5], "Potential Race: c <-> d (window 1)");
        assert!(text.contains("Real violations: 1"));
    }

    #[test]
    fn json_report_tags_signatures() -> Result<(), Box<dyn std::error::Error>> {
        let value: serde_json::Value = serde_json::from_str(&report().to_json()?)?;
        assert_eq!(value["violations"][0]["signature"]["category"], "race");
        assert_eq!(value["violations"][0]["schedules"][0]["elided"], 3);
        assert_eq!(value["potentials"][0]["outcome"]["reason"], "refuted");
        assert_eq!(report().count(Category::Race), 1);
        assert_eq!(report().count(Category::Deadlock), 0);
        Ok(())
    }
}
