use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::EngineError;

/// Outcome class of a finding, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Ok,
    Warn,
    Fail,
    /// The resource could not be evaluated because its data was not collected cleanly.
    Unknown,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Ok, Severity::Warn, Severity::Fail, Severity::Unknown];

    /// Numeric status used by report consumers (0 = OK .. 3 = UNKNOWN).
    pub fn code(self) -> u8 {
        match self {
            Severity::Ok => 0,
            Severity::Warn => 1,
            Severity::Fail => 2,
            Severity::Unknown => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warn => "WARN",
            Severity::Fail => "FAIL",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Severity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sev| sev.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngineError::InvalidSeverity(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl Finding {
    /// A finding about a region as a whole (listing errors, empty listings).
    pub fn region(severity: Severity, message: impl Into<String>, region: impl Into<String>) -> Self {
        Self { severity, message: message.into(), region: region.into(), resource: None }
    }

    pub fn resource(
        severity: Severity,
        message: impl Into<String>,
        region: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            region: region.into(),
            resource: Some(resource.into()),
        }
    }
}

/// Append-only collection of findings.
///
/// Each concurrent task owns its own `Findings` and hands it back at the
/// join point, where [`Findings::merge`] folds it into the parent. Nothing
/// is ever shared between running tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Findings {
    items: Vec<Finding>,
}

impl Findings {
    pub fn append(&mut self, finding: Finding) {
        self.items.push(finding);
    }

    pub fn merge(&mut self, other: Findings) {
        self.items.extend(other.items);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Finding> {
        self.items.iter()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.items.iter().filter(|f| f.severity == severity).count()
    }

    pub fn worst(&self) -> Option<Severity> {
        self.items.iter().map(|f| f.severity).max()
    }

    pub fn in_region<'a>(&'a self, region: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.items.iter().filter(move |f| f.region == region)
    }

    /// Findings in a canonical order, for comparisons that ignore traversal order.
    pub fn sorted(&self) -> Vec<Finding> {
        let mut items = self.items.clone();
        items.sort();
        items
    }

    pub fn into_vec(self) -> Vec<Finding> {
        self.items
    }
}

impl<'a> IntoIterator for &'a Findings {
    type Item = &'a Finding;
    type IntoIter = std::slice::Iter<'a, Finding>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_codes_round_trip() {
        for sev in Severity::ALL {
            assert_eq!(Severity::from_code(sev.code()), Some(sev));
        }
        assert_eq!(Severity::from_code(4), None);
        assert_eq!(Severity::Unknown.code(), 3);
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("fail".parse::<Severity>().unwrap(), Severity::Fail);
        assert_eq!(" Unknown ".parse::<Severity>().unwrap(), Severity::Unknown);
        assert!(matches!("bad".parse::<Severity>(), Err(EngineError::InvalidSeverity(_))));
    }

    #[test]
    fn severity_order_puts_unknown_last() {
        assert!(Severity::Ok < Severity::Warn);
        assert!(Severity::Warn < Severity::Fail);
        assert!(Severity::Fail < Severity::Unknown);
    }

    #[test]
    fn findings_merge_and_count() {
        let mut a = Findings::default();
        a.append(Finding::region(Severity::Ok, "No SNS topics found", "us-east-1"));
        let mut b = Findings::default();
        b.append(Finding::resource(Severity::Fail, "not encrypted", "us-west-2", "arn:t2"));
        b.append(Finding::resource(Severity::Unknown, "lookup failed", "us-west-2", "arn:t3"));
        a.merge(b);

        assert_eq!(a.len(), 3);
        assert_eq!(a.count(Severity::Fail), 1);
        assert_eq!(a.worst(), Some(Severity::Unknown));
        assert_eq!(a.in_region("us-west-2").count(), 2);
        assert_eq!(Findings::default().worst(), None);
    }

    #[test]
    fn region_findings_serialize_without_resource() {
        let f = Finding::region(Severity::Unknown, "Unable to query", "us-east-1");
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["severity"], "UNKNOWN");
        assert!(json.get("resource").is_none());
    }
}
