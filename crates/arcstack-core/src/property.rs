//! Outcomes of invariant checks.
//!
//! A violated invariant is a value, not an error: the checker keeps going,
//! and the caller decides whether one failure is fatal.

use std::fmt;

use crate::counterexample::Counterexample;

/// Outcome of checking one named invariant.
#[derive(Debug, Clone)]
pub struct PropertyResult {
    /// Invariant name, e.g. "NoLostElements"
    pub name: &'static str,
    pub holds: bool,
    /// What went wrong, for failing results
    pub violation: Option<String>,
    /// How the failure came about, when the checker can reconstruct it
    pub counterexample: Option<Counterexample>,
}

impl PropertyResult {
    #[must_use]
    pub fn pass(name: &'static str) -> Self {
        debug_assert!(!name.is_empty(), "property needs a name");
        Self {
            name,
            holds: true,
            violation: None,
            counterexample: None,
        }
    }

    #[must_use]
    pub fn fail(
        name: &'static str,
        violation: String,
        counterexample: Option<Counterexample>,
    ) -> Self {
        debug_assert!(!name.is_empty(), "property needs a name");
        debug_assert!(!violation.is_empty(), "{} failed without a reason", name);
        Self {
            name,
            holds: false,
            violation: Some(violation),
            counterexample,
        }
    }

    /// One status line: `[PASS] name` or `[FAIL] name: violation`.
    #[must_use]
    pub fn format_status(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PropertyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.violation, self.holds) {
            (_, true) => write!(f, "[PASS] {}", self.name),
            (Some(violation), false) => write!(f, "[FAIL] {}: {}", self.name, violation),
            (None, false) => write!(f, "[FAIL] {}", self.name),
        }
    }
}

/// A set of invariants checked together against one state.
pub trait PropertyChecker {
    /// Every invariant's outcome, passing ones included.
    fn check_all(&self) -> Vec<PropertyResult>;

    /// `Err` with the first failing invariant, in `check_all` order.
    fn verify_all(&self) -> Result<(), PropertyResult> {
        match self.check_all().into_iter().find(|r| !r.holds) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn all_hold(&self) -> bool {
        self.check_all().iter().all(|r| r.holds)
    }

    fn summary(&self) -> PropertySummary {
        PropertySummary::from_results(self.check_all())
    }
}

/// Tally of one `check_all` run.
#[derive(Debug, Clone)]
pub struct PropertySummary {
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<PropertyResult>,
}

impl PropertySummary {
    #[must_use]
    pub fn from_results(results: Vec<PropertyResult>) -> Self {
        let passed = results.iter().filter(|r| r.holds).count();
        Self {
            passed,
            failed: results.len() - passed,
            results,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PropertyResult> {
        self.results.iter().filter(|r| !r.holds)
    }

    /// Status lines for every result, then the diagram of the first
    /// failure that carries a counterexample.
    #[must_use]
    pub fn format_report(&self) -> String {
        let mut report = format!("Properties: {}/{} hold\n", self.passed, self.total());
        for result in &self.results {
            report.push_str(&result.format_status());
            report.push('\n');
        }

        if let Some(ce) = self.failures().find_map(|r| r.counterexample.as_ref()) {
            report.push_str("\nCounterexample:\n");
            report.push_str(&ce.render_diagram());
        }
        report
    }
}
