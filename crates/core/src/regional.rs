//! Region fan-out for list-then-describe checks.
//!
//! Per region the listing entry `[family][list_operation][region]` decides
//! what happens:
//!
//! - absent: the region was never collected; it yields nothing.
//! - errored, or data that is not a sequence: one UNKNOWN finding for the region.
//! - empty: one OK finding saying nothing was found.
//! - otherwise every listed resource is looked up at
//!   `[family][detail_operation][region][resource]` and evaluated on its own.
//!
//! Regions are independent of each other and resources are independent of
//! their siblings, so a failure in one never hides the findings of another.

use async_trait::async_trait;
use serde_json::Value as Json;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    Cache, CacheEntry, Check, CheckMeta, CheckOutcome, ErrorInfo, FanOutMode, Finding, ReadTrace,
    Settings, Severity,
};

/// Result of evaluating one resource's collected attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub severity: Severity,
    pub message: String,
}

impl Verdict {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self { severity, message: message.into() }
    }
}

pub trait RegionalRule: Send + Sync + 'static {
    fn meta(&self) -> &'static CheckMeta;

    /// Key shared by the cache and the `regions` setting.
    fn family(&self) -> &'static str;
    fn list_operation(&self) -> &'static str;
    fn detail_operation(&self) -> &'static str;

    /// Plural noun for messages, e.g. "SNS topics".
    fn resources_noun(&self) -> &'static str;
    /// Noun for the per-resource detail data, e.g. "SNS topic attributes".
    fn details_noun(&self) -> &'static str;

    /// Identifier of a listed item; items without one are skipped.
    fn resource_id(&self, item: &Json) -> Option<String>;

    /// Must be total: anything unexpected in `detail` is a FAIL, never OK.
    fn evaluate(&self, detail: &Json) -> Verdict;

    fn list_error_message(&self, err: &ErrorInfo) -> String {
        format!("Unable to query for {}: {}", self.resources_noun(), err)
    }

    fn empty_message(&self) -> String {
        format!("No {} found", self.resources_noun())
    }

    fn detail_error_message(&self, err: &ErrorInfo) -> String {
        format!("Unable to query {}: {}", self.details_noun(), err)
    }
}

enum Listing {
    Skip,
    Done(Finding),
    Resources(Vec<String>),
}

fn list_resources<R: RegionalRule + ?Sized>(
    rule: &R,
    cache: &Cache,
    region: &str,
    trace: &mut ReadTrace,
) -> Listing {
    let unknown = |err: &ErrorInfo| Finding::region(Severity::Unknown, rule.list_error_message(err), region);
    match cache.read(&[rule.family(), rule.list_operation(), region], trace) {
        CacheEntry::Absent => {
            debug!("listing not collected, skipping region");
            Listing::Skip
        }
        CacheEntry::Error(err) => {
            warn!(error = %err, "listing failed");
            Listing::Done(unknown(&err))
        }
        CacheEntry::Present(data) => match data.as_array() {
            None => {
                let err = ErrorInfo::new("listing data is not a sequence");
                warn!(error = %err, "listing has unexpected shape");
                Listing::Done(unknown(&err))
            }
            Some(items) if items.is_empty() => {
                Listing::Done(Finding::region(Severity::Ok, rule.empty_message(), region))
            }
            Some(items) => Listing::Resources(
                items
                    .iter()
                    .filter_map(|item| {
                        let id = rule.resource_id(item);
                        if id.is_none() {
                            debug!("listed item has no identifier, skipping");
                        }
                        id
                    })
                    .collect(),
            ),
        },
    }
}

fn scan_resource<R: RegionalRule + ?Sized>(
    rule: &R,
    cache: &Cache,
    region: &str,
    resource: &str,
    trace: &mut ReadTrace,
) -> Finding {
    let err = match cache.read(&[rule.family(), rule.detail_operation(), region, resource], trace) {
        CacheEntry::Present(detail) => {
            let verdict = rule.evaluate(detail);
            return Finding::resource(verdict.severity, verdict.message, region, resource);
        }
        CacheEntry::Absent => ErrorInfo::unknown(),
        CacheEntry::Error(err) => err,
    };
    warn!(resource, error = %err, "detail lookup failed");
    Finding::resource(Severity::Unknown, rule.detail_error_message(&err), region, resource)
}

fn resource_outcome<R: RegionalRule + ?Sized>(rule: &R, cache: &Cache, region: &str, resource: &str) -> CheckOutcome {
    let mut part = CheckOutcome::default();
    let finding = scan_resource(rule, cache, region, resource, &mut part.trace);
    part.findings.append(finding);
    part
}

fn region_aborted(region: &str, reason: &str) -> Finding {
    Finding::region(Severity::Unknown, format!("Region scan aborted: {reason}"), region)
}

fn resource_aborted(region: &str, resource: &str, reason: &str) -> Finding {
    Finding::resource(Severity::Unknown, format!("Evaluation aborted: {reason}"), region, resource)
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("panicked: {message}")
}

/// Runs one unit of sequential work, turning a panic into its reason.
fn guarded<T>(unit: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(unit)).map_err(panic_reason)
}

fn scan_region_sequential<R: RegionalRule + ?Sized>(rule: &R, cache: &Cache, region: &str) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    match list_resources(rule, cache, region, &mut outcome.trace) {
        Listing::Skip => {}
        Listing::Done(finding) => outcome.findings.append(finding),
        Listing::Resources(resources) => {
            for resource in &resources {
                match guarded(|| resource_outcome(rule, cache, region, resource)) {
                    Ok(part) => outcome.merge(part),
                    Err(reason) => {
                        warn!(resource = resource.as_str(), %reason, "resource evaluation aborted");
                        outcome.findings.append(resource_aborted(region, resource, &reason));
                    }
                }
            }
        }
    }
    outcome
}

async fn scan_region_concurrent<R: RegionalRule>(rule: Arc<R>, cache: Arc<Cache>, region: String) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    let resources = match list_resources(&*rule, &cache, &region, &mut outcome.trace) {
        Listing::Skip => return outcome,
        Listing::Done(finding) => {
            outcome.findings.append(finding);
            return outcome;
        }
        Listing::Resources(resources) => resources,
    };

    let tasks = resources
        .into_iter()
        .map(|resource| {
            let key = resource.clone();
            let (rule, cache, region) = (Arc::clone(&rule), Arc::clone(&cache), region.clone());
            let handle = tokio::spawn(
                async move { resource_outcome(&*rule, &cache, &region, &resource) }.in_current_span(),
            );
            (key, handle)
        })
        .collect::<Vec<_>>();

    join_all(tasks, &mut outcome, |resource, reason| resource_aborted(&region, &resource, &reason)).await;
    outcome
}

async fn join_all<K>(
    tasks: Vec<(K, JoinHandle<CheckOutcome>)>,
    outcome: &mut CheckOutcome,
    on_abort: impl Fn(K, String) -> Finding,
) {
    for (key, handle) in tasks {
        match handle.await {
            Ok(part) => outcome.merge(part),
            Err(e) => {
                let reason = if e.is_panic() { panic_reason(e.into_panic()) } else { e.to_string() };
                warn!(%reason, "task aborted");
                outcome.findings.append(on_abort(key, reason));
            }
        }
    }
}

/// Runs `rule` over every region and returns once every region, and every
/// resource inside it, has produced its outcome.
pub async fn fan_out<R: RegionalRule>(
    rule: Arc<R>,
    cache: Arc<Cache>,
    regions: &[String],
    mode: FanOutMode,
) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    match mode {
        FanOutMode::Sequential => {
            for region in regions {
                let _span = info_span!("region", family = rule.family(), region = %region).entered();
                match guarded(|| scan_region_sequential(&*rule, &cache, region)) {
                    Ok(part) => outcome.merge(part),
                    Err(reason) => {
                        warn!(%reason, "region scan aborted");
                        outcome.findings.append(region_aborted(region, &reason));
                    }
                }
            }
        }
        FanOutMode::Concurrent => {
            let tasks = regions
                .iter()
                .map(|region| {
                    let span = info_span!("region", family = rule.family(), region = %region);
                    let task = scan_region_concurrent(Arc::clone(&rule), Arc::clone(&cache), region.clone());
                    (region.clone(), tokio::spawn(task.instrument(span)))
                })
                .collect::<Vec<_>>();
            join_all(tasks, &mut outcome, |region, reason| region_aborted(&region, &reason)).await;
        }
    }
    outcome
}

/// Adapts a [`RegionalRule`] into a [`Check`].
pub struct RegionalCheck<R> {
    rule: Arc<R>,
}

impl<R: RegionalRule> RegionalCheck<R> {
    pub fn new(rule: R) -> Self {
        Self { rule: Arc::new(rule) }
    }
}

#[async_trait]
impl<R: RegionalRule> Check for RegionalCheck<R> {
    fn meta(&self) -> &CheckMeta {
        self.rule.meta()
    }

    async fn run(&self, cache: Arc<Cache>, settings: &Settings) -> CheckOutcome {
        let regions = settings.regions_for(self.rule.family());
        fan_out(Arc::clone(&self.rule), cache, regions, settings.fan_out).await
    }
}
