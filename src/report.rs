//! Run results: per-page outcomes and the aggregate execution report.
//!
//! The original scripts passed status *strings* ("Saved page_3.jpg") up the
//! call chain and parsed them at the end. Here the outcome is a tagged
//! [`PageStatus`] so callers can branch programmatically; the human-readable
//! line is derived from it, not the other way round.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tagged outcome for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PageStatus {
    /// The transformed page was encoded and written to `path`.
    Saved { path: PathBuf },
    /// The page failed at some stage; the run continued without it.
    Failed { reason: String },
}

impl PageStatus {
    pub fn is_saved(&self) -> bool {
        matches!(self, PageStatus::Saved { .. })
    }
}

impl From<PageError> for PageStatus {
    fn from(e: PageError) -> Self {
        PageStatus::Failed {
            reason: e.to_string(),
        }
    }
}

/// Outcome of one page, as collected by the dispatcher.
///
/// Serialisable because process-pool workers stream these to the controller
/// as JSON lines on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-indexed page number.
    pub page_num: usize,
    pub status: PageStatus,
    /// Wall-clock time spent on this page's render + transform + write.
    pub duration_ms: u64,
}

impl PageOutcome {
    /// The status line printed by the CLI, matching the original scripts'
    /// output ("Saved page_3.png" / "Failed page_3: ...").
    pub fn status_line(&self) -> String {
        match &self.status {
            PageStatus::Saved { path } => format!("Saved {}", path.display()),
            PageStatus::Failed { reason } => {
                format!("Failed page {}: {}", self.page_num, reason)
            }
        }
    }
}

/// Aggregate counters and timings for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Pages in the document.
    pub total_pages: usize,
    /// Pages selected for processing.
    pub selected_pages: usize,
    /// Pages written successfully.
    pub saved_pages: usize,
    /// Pages that failed at any stage.
    pub failed_pages: usize,
    /// Work units dispatched.
    pub units: usize,
    /// Wall-clock duration of the whole run.
    pub total_duration_ms: u64,
}

impl RunStats {
    /// Average wall-clock seconds per selected page.
    pub fn avg_secs_per_page(&self) -> f64 {
        if self.selected_pages == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / 1000.0 / self.selected_pages as f64
    }

    /// Total wall-clock seconds.
    pub fn total_secs(&self) -> f64 {
        self.total_duration_ms as f64 / 1000.0
    }
}

/// Everything a run produces besides the image files themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Per-page outcomes. Page order for sequential dispatch, arrival order
    /// for pooled strategies — call [`ExecutionReport::sort_by_page`] if
    /// order matters.
    pub outcomes: Vec<PageOutcome>,
    pub stats: RunStats,
}

impl ExecutionReport {
    /// Assemble a report from collected outcomes.
    pub fn from_outcomes(
        outcomes: Vec<PageOutcome>,
        total_pages: usize,
        units: usize,
        total_duration_ms: u64,
    ) -> Self {
        let saved = outcomes.iter().filter(|o| o.status.is_saved()).count();
        let failed = outcomes.len() - saved;
        let stats = RunStats {
            total_pages,
            selected_pages: outcomes.len(),
            saved_pages: saved,
            failed_pages: failed,
            units,
            total_duration_ms,
        };
        Self { outcomes, stats }
    }

    /// Re-sort outcomes by page number (pooled strategies collect them in
    /// arrival order).
    pub fn sort_by_page(&mut self) {
        self.outcomes.sort_by_key(|o| o.page_num);
    }

    /// Outcome for a specific page, if it was selected.
    pub fn page(&self, page_num: usize) -> Option<&PageOutcome> {
        self.outcomes.iter().find(|o| o.page_num == page_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(page: usize) -> PageOutcome {
        PageOutcome {
            page_num: page,
            status: PageStatus::Saved {
                path: PathBuf::from(format!("page_{page}.png")),
            },
            duration_ms: 10,
        }
    }

    fn failed(page: usize) -> PageOutcome {
        PageOutcome {
            page_num: page,
            status: PageStatus::Failed {
                reason: "render glitch".into(),
            },
            duration_ms: 3,
        }
    }

    #[test]
    fn stats_count_saved_and_failed() {
        let report =
            ExecutionReport::from_outcomes(vec![saved(1), failed(2), saved(3)], 5, 3, 1200);
        assert_eq!(report.stats.total_pages, 5);
        assert_eq!(report.stats.selected_pages, 3);
        assert_eq!(report.stats.saved_pages, 2);
        assert_eq!(report.stats.failed_pages, 1);
        assert_eq!(report.stats.units, 3);
    }

    #[test]
    fn avg_per_page() {
        let report = ExecutionReport::from_outcomes(vec![saved(1), saved(2)], 2, 2, 3000);
        assert!((report.stats.avg_secs_per_page() - 1.5).abs() < 1e-9);
        assert!((report.stats.total_secs() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn avg_per_page_empty_selection() {
        let report = ExecutionReport::from_outcomes(vec![], 0, 0, 50);
        assert_eq!(report.stats.avg_secs_per_page(), 0.0);
    }

    #[test]
    fn sort_by_page_restores_order() {
        let mut report =
            ExecutionReport::from_outcomes(vec![saved(3), saved(1), failed(2)], 3, 3, 10);
        report.sort_by_page();
        let pages: Vec<usize> = report.outcomes.iter().map(|o| o.page_num).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[test]
    fn status_lines() {
        assert_eq!(saved(4).status_line(), "Saved page_4.png");
        assert!(failed(4).status_line().starts_with("Failed page 4:"));
    }

    #[test]
    fn outcome_roundtrips_as_json_line() {
        // The worker protocol is one JSON-encoded PageOutcome per line.
        let line = serde_json::to_string(&saved(7)).unwrap();
        assert!(!line.contains('\n'));
        let back: PageOutcome = serde_json::from_str(&line).unwrap();
        assert_eq!(back.page_num, 7);
        assert!(back.status.is_saved());
    }
}
