use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use crate::EngineError;

/// How the region fan-out schedules its units of work. Both modes yield the
/// same findings, including the UNKNOWN findings for a region or resource
/// whose rule panicked; only the interleaving differs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOutMode {
    Sequential,
    #[default]
    Concurrent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Regions to scan, per service family (`sns`, `sqs`, ...). A family with
    /// no entry scans nothing.
    #[serde(default)]
    pub regions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub fan_out: FanOutMode,
}

// Region ids are opaque to the engine (`us-east-1`, `global`, `eastus`,
// `us-central1`); they only need to be usable as one cache key segment.
fn region_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static region pattern"))
}

impl Settings {
    pub fn regions_for(&self, family: &str) -> &[String] {
        self.regions.get(family).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn with_regions<I, S>(mut self, family: &str, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions
            .entry(family.to_string())
            .or_default()
            .extend(regions.into_iter().map(Into::into));
        self
    }

    pub fn with_fan_out(mut self, mode: FanOutMode) -> Self {
        self.fan_out = mode;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (family, regions) in &self.regions {
            let mut seen = BTreeSet::new();
            for region in regions {
                if !region_pattern().is_match(region) {
                    return Err(EngineError::InvalidRegion { family: family.clone(), region: region.clone() });
                }
                if !seen.insert(region.as_str()) {
                    return Err(EngineError::DuplicateRegion { family: family.clone(), region: region.clone() });
                }
            }
        }
        Ok(())
    }

    /// Reads YAML (or JSON) settings and validates them.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read settings {}", path.display()))?;
        let settings: Settings =
            serde_yaml::from_slice(&bytes).with_context(|| format!("parse settings {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_family_has_no_regions() {
        let s = Settings::default();
        assert!(s.regions_for("sns").is_empty());
        assert_eq!(s.fan_out, FanOutMode::Concurrent);
    }

    #[test]
    fn parses_yaml() {
        let s: Settings = serde_yaml::from_str(
            "regions:\n  sns: [us-east-1, us-gov-west-1]\nfan_out: sequential\n",
        )
        .unwrap();
        assert_eq!(s.regions_for("sns"), ["us-east-1", "us-gov-west-1"]);
        assert_eq!(s.fan_out, FanOutMode::Sequential);
        s.validate().unwrap();
    }

    #[test]
    fn accepts_opaque_region_ids_from_any_family() {
        let s = Settings::default()
            .with_regions("sns", ["us-east-1", "global"])
            .with_regions("iam", ["global"])
            .with_regions("compute", ["us-central1"])
            .with_regions("storage", ["eastus", "cn-north-1"]);
        s.validate().unwrap();
    }

    #[test]
    fn rejects_unusable_region_ids() {
        for bad in ["", " us-east-1", "us east 1", "us-east-1/a", "-leading"] {
            let s = Settings::default().with_regions("sns", ["us-east-1", bad]);
            assert!(
                matches!(s.validate(), Err(EngineError::InvalidRegion { ref region, .. }) if region == bad),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn loads_settings_file_with_foreign_families() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "regions:\n  sns: [us-east-1]\n  iam: [global]\n  compute: [us-central1]\n  network: [eastus]\n",
        )
        .unwrap();
        let s = Settings::load(&path).unwrap();
        assert_eq!(s.regions_for("sns"), ["us-east-1"]);
        assert_eq!(s.regions_for("iam"), ["global"]);
        assert_eq!(s.fan_out, FanOutMode::Concurrent);
    }

    #[test]
    fn load_validates_and_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let dup = dir.path().join("dup.yaml");
        std::fs::write(&dup, "regions:\n  sns: [us-east-1, us-east-1]\n").unwrap();
        let err = Settings::load(&dup).unwrap_err();
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::DuplicateRegion { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, r#"{"regions": {"sns": "us-east-1"}}"#).unwrap();
        assert!(Settings::load(&broken).is_err());

        assert!(Settings::load(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn rejects_duplicate_region() {
        let s = Settings::default().with_regions("sns", ["eu-west-1", "eu-west-1"]);
        assert!(matches!(s.validate(), Err(EngineError::DuplicateRegion { .. })));
    }
}
