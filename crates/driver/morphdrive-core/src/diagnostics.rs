//! Non-fatal conditions collected during a pass and reported once, grouped by category.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::DiagnosticsCfg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    /// Expression text over its limit; the channel kept its prior driver.
    CapacityExceeded,
    /// Missing bone or property, or a driver that would depend on itself.
    UnresolvedReference,
    /// Existing driver text that could not be read back into terms.
    RecoveryParse,
    /// No term could be bound; the driver was removed.
    EmptyDriver,
    /// Spline calibration data that cannot describe a curve.
    DegenerateSpline,
}

impl DiagnosticCategory {
    pub fn title(&self) -> &'static str {
        match self {
            DiagnosticCategory::CapacityExceeded => "Expression too long",
            DiagnosticCategory::UnresolvedReference => "Unresolved reference",
            DiagnosticCategory::RecoveryParse => "Could not recover driver term",
            DiagnosticCategory::EmptyDriver => "Driver removed (no terms)",
            DiagnosticCategory::DegenerateSpline => "Degenerate spline",
        }
    }

    /// 0 is informational.
    pub fn severity(&self) -> u8 {
        match self {
            DiagnosticCategory::RecoveryParse => 0,
            DiagnosticCategory::EmptyDriver | DiagnosticCategory::DegenerateSpline => 1,
            DiagnosticCategory::CapacityExceeded | DiagnosticCategory::UnresolvedReference => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub category: DiagnosticCategory,
    /// Output channel, property or bone the condition is about.
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticGroup {
    pub category: DiagnosticCategory,
    pub subjects: Vec<String>,
    pub occurrences: usize,
}

#[derive(Debug, Default)]
pub struct DiagnosticLog {
    cfg: DiagnosticsCfg,
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    pub fn new(cfg: DiagnosticsCfg) -> Self {
        Self {
            cfg,
            entries: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        category: DiagnosticCategory,
        subject: impl Into<String>,
        detail: impl Into<String>,
    ) {
        let subject = subject.into();
        let detail = detail.into();
        if category.severity() == 0 {
            log::debug!("{}: {subject}: {detail}", category.title());
        } else {
            log::warn!("{}: {subject}: {detail}", category.title());
        }
        if self.cfg.enabled {
            self.entries.push(Diagnostic {
                category,
                subject,
                detail,
            });
        }
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, category: DiagnosticCategory) -> usize {
        self.entries
            .iter()
            .filter(|d| d.category == category)
            .count()
    }

    /// One group per category in first-seen order, each listing distinct subjects.
    pub fn groups(&self) -> Vec<DiagnosticGroup> {
        let mut by_category: IndexMap<DiagnosticCategory, DiagnosticGroup> = IndexMap::new();
        for d in &self.entries {
            let group = by_category
                .entry(d.category)
                .or_insert_with(|| DiagnosticGroup {
                    category: d.category,
                    subjects: Vec::new(),
                    occurrences: 0,
                });
            group.occurrences += 1;
            if !group.subjects.contains(&d.subject) {
                group.subjects.push(d.subject.clone());
            }
        }
        by_category.into_values().collect()
    }
}

/// Per-outcome counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub built: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub rejected: usize,
    pub queued: usize,
}

/// End-of-pass summary handed back to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub summary: PassSummary,
    pub sum_drivers: usize,
    pub scale_corrections: usize,
    pub groups: Vec<DiagnosticGroup>,
    #[serde(skip)]
    pub max_subjects: usize,
}

impl PassReport {
    pub fn has_errors(&self) -> bool {
        self.groups.iter().any(|g| g.category.severity() > 0)
    }

    pub fn group(&self, category: DiagnosticCategory) -> Option<&DiagnosticGroup> {
        self.groups.iter().find(|g| g.category == category)
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(
            f,
            "drivers: {} built, {} unchanged, {} removed, {} rejected, {} queued",
            s.built, s.unchanged, s.removed, s.rejected, s.queued
        )?;
        for g in &self.groups {
            writeln!(f, "{} ({}):", g.category.title(), g.occurrences)?;
            let limit = if self.max_subjects == 0 {
                g.subjects.len()
            } else {
                self.max_subjects
            };
            for subject in g.subjects.iter().take(limit) {
                writeln!(f, "    {subject}")?;
            }
            if g.subjects.len() > limit {
                writeln!(f, "    ... and {} more", g.subjects.len() - limit)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_category_with_distinct_subjects() {
        let mut log = DiagnosticLog::new(DiagnosticsCfg::default());
        log.record(DiagnosticCategory::UnresolvedReference, "lHand", "missing bone");
        log.record(DiagnosticCategory::CapacityExceeded, "Smile", "too long");
        log.record(DiagnosticCategory::UnresolvedReference, "lHand", "missing bone");
        log.record(DiagnosticCategory::UnresolvedReference, "rHand", "missing bone");

        let groups = log.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].category, DiagnosticCategory::UnresolvedReference);
        assert_eq!(groups[0].subjects, vec!["lHand", "rHand"]);
        assert_eq!(groups[0].occurrences, 3);
        assert_eq!(groups[1].subjects, vec!["Smile"]);
    }

    #[test]
    fn disabled_log_keeps_nothing() {
        let mut log = DiagnosticLog::new(DiagnosticsCfg {
            enabled: false,
            max_subjects: 0,
        });
        log.record(DiagnosticCategory::EmptyDriver, "Smile", "no terms");
        assert!(log.is_empty());
    }

    #[test]
    fn report_display_truncates_subjects() {
        let report = PassReport {
            groups: vec![DiagnosticGroup {
                category: DiagnosticCategory::UnresolvedReference,
                subjects: vec!["a".into(), "b".into(), "c".into()],
                occurrences: 3,
            }],
            max_subjects: 2,
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.contains("Unresolved reference (3):"));
        assert!(text.contains("... and 1 more"));
        assert!(report.has_errors());
    }
}
