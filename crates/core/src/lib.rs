use thiserror::Error;

pub mod cache;
pub mod check;
pub mod finding;
pub mod plan;
pub mod regional;
pub mod scanner;
pub mod settings;

pub use cache::{Cache, CacheEntry, CachePath, ErrorInfo, ReadTrace};
pub use check::{ApiRef, Check, CheckMeta, CheckOutcome};
pub use finding::{Finding, Findings, Severity};
pub use plan::collection_order;
pub use regional::{fan_out, RegionalCheck, RegionalRule, Verdict};
pub use scanner::{CheckReport, Report, Scanner};
pub use settings::{FanOutMode, Settings};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("dependency cycle detected between collected apis")]
    Cycle,
    #[error("api reference '{0}' must look like SERVICE:operation")]
    InvalidApi(String),
    #[error("region '{region}' configured for '{family}' is not a usable region identifier")]
    InvalidRegion { family: String, region: String },
    #[error("region '{region}' is listed more than once for '{family}'")]
    DuplicateRegion { family: String, region: String },
    #[error("cache snapshot root must be a map keyed by source")]
    CacheShape,
    #[error("unknown check '{0}'")]
    UnknownCheck(String),
    #[error("unknown severity '{0}'")]
    InvalidSeverity(String),
}
