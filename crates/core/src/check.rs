use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::{Cache, EngineError, Findings, ReadTrace, Settings};

/// Static description of a check. Rendered by reporters and used to order
/// the collection phase ahead of the check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckMeta {
    pub id: &'static str,
    pub title: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub more_info: &'static str,
    pub recommended_action: &'static str,
    pub link: &'static str,
    /// Collector calls this check reads, as `SERVICE:operation`, in the order they must run.
    pub apis: &'static [&'static str],
}

impl CheckMeta {
    pub fn api_refs(&self) -> Result<Vec<ApiRef>, EngineError> {
        self.apis.iter().map(|a| a.parse()).collect()
    }
}

/// One collector call, e.g. `SNS:listTopics`. The service is kept lowercase
/// since that is how the cache is keyed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ApiRef {
    pub service: String,
    pub operation: String,
}

impl FromStr for ApiRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((service, operation))
                if !service.is_empty() && !operation.is_empty() && !operation.contains(':') =>
            {
                Ok(ApiRef { service: service.to_ascii_lowercase(), operation: operation.to_string() })
            }
            _ => Err(EngineError::InvalidApi(s.to_string())),
        }
    }
}

impl fmt::Display for ApiRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service.to_ascii_uppercase(), self.operation)
    }
}

/// Everything a check run produces: its findings and the cache paths it read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub findings: Findings,
    pub trace: ReadTrace,
}

impl CheckOutcome {
    pub fn merge(&mut self, other: CheckOutcome) {
        self.findings.merge(other.findings);
        self.trace.merge(other.trace);
    }
}

/// A compliance check evaluated against a collected cache.
///
/// `run` cannot fail: every data-source problem comes back as an
/// UNKNOWN finding in the outcome.
#[async_trait]
pub trait Check: Send + Sync {
    fn meta(&self) -> &CheckMeta;
    async fn run(&self, cache: Arc<Cache>, settings: &Settings) -> CheckOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_api_refs() {
        let api: ApiRef = "SNS:getTopicAttributes".parse().unwrap();
        assert_eq!(api.service, "sns");
        assert_eq!(api.operation, "getTopicAttributes");
        assert_eq!(api.to_string(), "SNS:getTopicAttributes");
    }

    #[test]
    fn rejects_malformed_api_refs() {
        for bad in ["listTopics", "SNS:", ":listTopics", "SNS:a:b"] {
            assert!(matches!(bad.parse::<ApiRef>(), Err(EngineError::InvalidApi(_))), "{bad}");
        }
    }
}
