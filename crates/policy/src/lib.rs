use anyhow::Result;
use cloudsweep_core::{Report, Severity};

/// Decides whether a finished report is acceptable.
pub struct Policy {
    pub fail_on: Severity,
    /// Findings that could not be evaluated never trip the gate.
    pub allow_unknown: bool,
}

impl Policy {
    pub fn new(fail_on: Severity, allow_unknown: bool) -> Self {
        Self { fail_on, allow_unknown }
    }

    fn trips(&self, severity: Severity) -> bool {
        if severity == Severity::Unknown && self.allow_unknown {
            return false;
        }
        severity >= self.fail_on
    }

    pub fn violations(&self, report: &Report) -> usize {
        report
            .checks
            .iter()
            .flat_map(|c| c.findings.iter())
            .filter(|f| self.trips(f.severity))
            .count()
    }

    pub fn check_report(&self, report: &Report) -> Result<()> {
        let n = self.violations(report);
        if n > 0 {
            anyhow::bail!(
                "Policy: {} finding(s) at or above {} ({} FAIL, {} UNKNOWN)",
                n,
                self.fail_on,
                report.count(Severity::Fail),
                report.count(Severity::Unknown)
            );
        }
        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(Severity::Fail, false)
    }
}
