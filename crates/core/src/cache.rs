//! Read-only access to a collected cache snapshot.
//!
//! The snapshot is a nested map `source -> operation -> region [-> resource]`
//! whose leaves are `{ "err": .., "data": .. }` records written by the
//! collector. Lookups never fail: a path resolves to [`CacheEntry::Absent`],
//! [`CacheEntry::Error`] or [`CacheEntry::Present`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Used when the collector left neither an error nor any data behind.
    pub fn unknown() -> Self {
        Self::new("Unknown error")
    }

    fn from_err(err: &Json) -> Self {
        let message = match err {
            Json::String(s) => s.clone(),
            Json::Object(o) => o
                .get("message")
                .or_else(|| o.get("code"))
                .and_then(Json::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| err.to_string()),
            other => other.to_string(),
        };
        Self { message }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Three-state result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry<'a> {
    /// Nothing was collected at this path.
    Absent,
    /// The collector ran but the remote call failed or returned nothing.
    Error(ErrorInfo),
    Present(&'a Json),
}

impl<'a> CacheEntry<'a> {
    fn from_leaf(leaf: &'a Json) -> Self {
        let Some(record) = leaf.as_object() else {
            return CacheEntry::Error(ErrorInfo::unknown());
        };
        if let Some(err) = record.get("err").filter(|e| is_truthy(e)) {
            return CacheEntry::Error(ErrorInfo::from_err(err));
        }
        match record.get("data").filter(|d| is_truthy(d)) {
            Some(data) => CacheEntry::Present(data),
            None => CacheEntry::Error(ErrorInfo::unknown()),
        }
    }
}

/// `null`, `false`, `""` and zero carry nothing, for both `err` and `data`.
/// Empty sequences and maps do.
fn is_truthy(v: &Json) -> bool {
    match v {
        Json::Null | Json::Bool(false) => false,
        Json::String(s) => !s.is_empty(),
        Json::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        _ => true,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cache {
    root: JsonMap<String, Json>,
}

impl Cache {
    pub fn new(root: Json) -> Result<Self, EngineError> {
        match root {
            Json::Object(root) => Ok(Self { root }),
            _ => Err(EngineError::CacheShape),
        }
    }

    /// Loads a snapshot from JSON, or YAML when the extension says so.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read cache snapshot {}", path.display()))?;
        let root: Json = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_slice(&bytes)
                .with_context(|| format!("parse cache snapshot {}", path.display()))?,
            _ => serde_json::from_slice(&bytes)
                .with_context(|| format!("parse cache snapshot {}", path.display()))?,
        };
        Ok(Self::new(root)?)
    }

    fn node<S: AsRef<str>>(&self, path: &[S]) -> Option<&Json> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root.get(first.as_ref())?;
        for key in rest {
            node = node.as_object()?.get(key.as_ref())?;
        }
        Some(node)
    }

    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> CacheEntry<'_> {
        match self.node(path) {
            Some(leaf) => CacheEntry::from_leaf(leaf),
            None => CacheEntry::Absent,
        }
    }

    /// Same as [`Cache::lookup`], recording the path in `trace`.
    pub fn read<S: AsRef<str>>(&self, path: &[S], trace: &mut ReadTrace) -> CacheEntry<'_> {
        trace.record(path);
        self.lookup(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CachePath(pub Vec<String>);

impl CachePath {
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CachePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Set of cache paths consulted while a check ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadTrace {
    paths: BTreeSet<CachePath>,
}

impl ReadTrace {
    pub fn record<S: AsRef<str>>(&mut self, path: &[S]) {
        self.paths
            .insert(CachePath(path.iter().map(|s| s.as_ref().to_owned()).collect()));
    }

    pub fn merge(&mut self, other: ReadTrace) {
        self.paths.extend(other.paths);
    }

    pub fn contains<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.paths.iter().any(|p| {
            p.0.len() == path.len() && p.0.iter().zip(path).all(|(a, b)| a == b.as_ref())
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachePath> {
        self.paths.iter()
    }

    /// Copies every consulted leaf that exists in `cache` into a map shaped
    /// like the snapshot itself.
    pub fn to_source(&self, cache: &Cache) -> Json {
        let mut root = JsonMap::new();
        'paths: for path in &self.paths {
            let Some(leaf) = cache.node(path.segments()) else { continue };
            let Some((last, parents)) = path.0.split_last() else { continue };
            let mut cursor = &mut root;
            for key in parents {
                let slot = cursor
                    .entry(key.clone())
                    .or_insert_with(|| Json::Object(JsonMap::new()));
                match slot {
                    Json::Object(map) => cursor = map,
                    _ => continue 'paths,
                }
            }
            cursor.insert(last.clone(), leaf.clone());
        }
        Json::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> Cache {
        Cache::new(json!({
            "sns": {
                "listTopics": {
                    "us-east-1": { "data": [{ "TopicArn": "arn:t1" }] },
                    "us-west-2": { "err": { "code": "AccessDenied" } },
                    "eu-west-1": { "err": "throttled", "data": [] },
                    "eu-central-1": { "err": null },
                    "ap-south-1": { "err": false, "data": [] }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn missing_path_is_absent() {
        let c = cache();
        assert_eq!(c.lookup(&["sns", "listTopics", "sa-east-1"]), CacheEntry::Absent);
        assert_eq!(c.lookup(&["sqs", "listQueues", "us-east-1"]), CacheEntry::Absent);
        assert_eq!(c.lookup::<&str>(&[]), CacheEntry::Absent);
    }

    #[test]
    fn present_data_is_borrowed() {
        let c = cache();
        match c.lookup(&["sns", "listTopics", "us-east-1"]) {
            CacheEntry::Present(data) => assert_eq!(data[0]["TopicArn"], "arn:t1"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(c.lookup(&["sns", "listTopics", "ap-south-1"]), CacheEntry::Present(_)));
    }

    #[test]
    fn error_wins_over_data() {
        let c = cache();
        assert_eq!(
            c.lookup(&["sns", "listTopics", "eu-west-1"]),
            CacheEntry::Error(ErrorInfo::new("throttled"))
        );
        assert_eq!(
            c.lookup(&["sns", "listTopics", "us-west-2"]),
            CacheEntry::Error(ErrorInfo::new("AccessDenied"))
        );
    }

    #[test]
    fn leaf_without_data_is_unknown_error() {
        let c = cache();
        assert_eq!(
            c.lookup(&["sns", "listTopics", "eu-central-1"]),
            CacheEntry::Error(ErrorInfo::unknown())
        );
    }

    #[test]
    fn falsy_err_and_data_follow_one_rule() {
        let c = Cache::new(json!({
            "sns": { "getTopicAttributes": { "us-east-1": {
                "a": { "data": false },
                "b": { "data": "" },
                "c": { "data": 0 },
                "d": { "err": 0, "data": { "Attributes": { "KmsMasterKeyId": "k" } } },
                "e": { "err": "", "data": [] },
                "f": { "err": 0.0, "data": {} }
            } } }
        }))
        .unwrap();
        let at = |id: &str| c.lookup(&["sns", "getTopicAttributes", "us-east-1", id]);
        for id in ["a", "b", "c"] {
            assert_eq!(at(id), CacheEntry::Error(ErrorInfo::unknown()), "{id}");
        }
        match at("d") {
            CacheEntry::Present(data) => assert_eq!(data["Attributes"]["KmsMasterKeyId"], "k"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(at("e"), CacheEntry::Present(&json!([])));
        assert_eq!(at("f"), CacheEntry::Present(&json!({})));
    }

    #[test]
    fn loads_json_and_yaml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("cache.json");
        std::fs::write(&json_path, r#"{"sns":{"listTopics":{"us-east-1":{"data":[]}}}}"#).unwrap();
        let yaml_path = dir.path().join("cache.yml");
        std::fs::write(&yaml_path, "sns:\n  listTopics:\n    us-east-1:\n      err: denied\n").unwrap();

        let from_json = Cache::load(&json_path).unwrap();
        assert_eq!(from_json.lookup(&["sns", "listTopics", "us-east-1"]), CacheEntry::Present(&json!([])));
        let from_yaml = Cache::load(&yaml_path).unwrap();
        assert_eq!(
            from_yaml.lookup(&["sns", "listTopics", "us-east-1"]),
            CacheEntry::Error(ErrorInfo::new("denied"))
        );
    }

    #[test]
    fn load_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Cache::load(&dir.path().join("missing.json")).is_err());

        let list = dir.path().join("list.json");
        std::fs::write(&list, "[1, 2]").unwrap();
        let err = Cache::load(&list).unwrap_err();
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::CacheShape)));

        // YAML content behind a .json name is parsed as JSON and fails.
        let misnamed = dir.path().join("cache.json");
        std::fs::write(&misnamed, "sns: {}\n").unwrap();
        assert!(Cache::load(&misnamed).is_err());
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(matches!(Cache::new(json!([1, 2])), Err(EngineError::CacheShape)));
    }

    #[test]
    fn trace_records_absent_reads_and_renders_present_ones() {
        let c = cache();
        let mut trace = ReadTrace::default();
        c.read(&["sns", "listTopics", "us-east-1"], &mut trace);
        c.read(&["sns", "listTopics", "sa-east-1"], &mut trace);
        assert_eq!(trace.len(), 2);
        assert!(trace.contains(&["sns", "listTopics", "sa-east-1"]));

        let source = trace.to_source(&c);
        assert_eq!(source["sns"]["listTopics"]["us-east-1"]["data"][0]["TopicArn"], "arn:t1");
        assert!(source["sns"]["listTopics"].get("sa-east-1").is_none());
    }

    #[test]
    fn traces_merge_as_sets() {
        let mut a = ReadTrace::default();
        a.record(&["sns", "listTopics", "us-east-1"]);
        let mut b = ReadTrace::default();
        b.record(&["sns", "listTopics", "us-east-1"]);
        b.record(&["sns", "listTopics", "us-west-2"]);
        a.merge(b);
        assert_eq!(a.len(), 2);
    }
}
