use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::{collection_order, ApiRef, Cache, Check, CheckMeta, EngineError, Findings, ReadTrace, Settings, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub check: CheckMeta,
    pub findings: Findings,
    pub trace: ReadTrace,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub checks: Vec<CheckReport>,
}

impl Report {
    pub fn count(&self, severity: Severity) -> usize {
        self.checks.iter().map(|c| c.findings.count(severity)).sum()
    }

    pub fn worst(&self) -> Option<Severity> {
        self.checks.iter().filter_map(|c| c.findings.worst()).max()
    }

    pub fn total(&self) -> usize {
        self.checks.iter().map(|c| c.findings.len()).sum()
    }
}

/// Registered checks, run one after another against a single snapshot.
#[derive(Default)]
pub struct Scanner {
    checks: Vec<Box<dyn Check>>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, check: Box<dyn Check>) {
        self.checks.push(check);
    }

    pub fn with_checks(mut self, checks: impl IntoIterator<Item = Box<dyn Check>>) -> Self {
        self.checks.extend(checks);
        self
    }

    pub fn metas(&self) -> impl Iterator<Item = &CheckMeta> {
        self.checks.iter().map(|c| c.meta())
    }

    /// Keeps only the checks named in `ids`. An empty list keeps everything.
    pub fn select(&mut self, ids: &[String]) -> Result<(), EngineError> {
        if ids.is_empty() {
            return Ok(());
        }
        if let Some(missing) = ids.iter().find(|id| !self.checks.iter().any(|c| c.meta().id == id.as_str())) {
            return Err(EngineError::UnknownCheck(missing.clone()));
        }
        self.checks.retain(|c| ids.iter().any(|id| id == c.meta().id));
        Ok(())
    }

    pub fn collection_order(&self) -> Result<Vec<ApiRef>, EngineError> {
        collection_order(self.metas())
    }

    pub async fn run(&self, cache: Arc<Cache>, settings: &Settings) -> Report {
        let mut report = Report::default();
        for check in &self.checks {
            let outcome = check.run(Arc::clone(&cache), settings).await;
            let meta = check.meta();
            info!(
                check = meta.id,
                findings = outcome.findings.len(),
                fail = outcome.findings.count(Severity::Fail),
                unknown = outcome.findings.count(Severity::Unknown),
                "check complete"
            );
            report.checks.push(CheckReport { check: meta.clone(), findings: outcome.findings, trace: outcome.trace });
        }
        report
    }
}
