use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value as Json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

use cloudsweep_core::{Cache, FanOutMode, Report, Scanner, Settings, Severity};
use cloudsweep_policy::Policy;

#[derive(Parser, Debug)]
#[command(author, version, about="cloudsweep: audit collected cloud API responses against security checks")]
struct Cli {
    /// Settings file (YAML or JSON)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Regions for a service family, e.g. sns=us-east-1,us-west-2 (repeatable)
    #[arg(long = "regions", global = true, value_parser = parse_regions)]
    regions: Vec<(String, Vec<String>)>,

    /// Restrict to these check ids (repeatable)
    #[arg(long = "check", global = true)]
    checks: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t=Format::Text, global = true)]
    format: Format,

    /// Debug logging
    #[arg(short, long, default_value_t=false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum Format { Text, Json }

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum FailOn { Warn, Fail, Unknown }

impl From<FailOn> for Severity {
    fn from(f: FailOn) -> Self {
        match f { FailOn::Warn => Severity::Warn, FailOn::Fail => Severity::Fail, FailOn::Unknown => Severity::Unknown }
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run checks against a cache snapshot
    Run {
        /// Cache snapshot (JSON, or YAML by extension)
        #[arg(short, long)] cache: PathBuf,
        /// Scan regions and resources one at a time
        #[arg(long, default_value_t=false)] sequential: bool,
        /// Lowest severity that fails the run
        #[arg(long, value_enum, default_value_t=FailOn::Fail)] fail_on: FailOn,
        /// Do not fail the run on findings that could not be evaluated
        #[arg(long, default_value_t=false)] allow_unknown: bool,
        /// Include the consulted cache entries in JSON output
        #[arg(long, default_value_t=false)] trace: bool,
    },
    /// Describe the available checks
    List,
    /// Print the order in which collector calls must run for the selected checks
    Plan,
}

fn parse_regions(s: &str) -> Result<(String, Vec<String>), String> {
    let (family, list) = s.split_once('=').ok_or_else(|| format!("expected FAMILY=REGION[,REGION..], got '{s}'"))?;
    let regions: Vec<String> = list.split(',').map(str::trim).filter(|r| !r.is_empty()).map(str::to_owned).collect();
    if family.trim().is_empty() || regions.is_empty() {
        return Err(format!("expected FAMILY=REGION[,REGION..], got '{s}'"));
    }
    Ok((family.trim().to_ascii_lowercase(), regions))
}

fn render_report(report: &Report, format: Format, cache: Option<&Cache>) -> Result<String> {
    if format == Format::Json {
        let mut out = serde_json::to_value(report)?;
        if let (Some(cache), Some(checks)) = (cache, out["checks"].as_array_mut()) {
            for (entry, check) in checks.iter_mut().zip(&report.checks) {
                entry["source"] = check.trace.to_source(cache);
            }
        }
        return Ok(serde_json::to_string_pretty(&out)?);
    }
    let mut out = String::new();
    for check in &report.checks {
        out.push_str(&format!("== {} ({})\n", check.check.title, check.check.id));
        for f in check.findings.sorted() {
            out.push_str(&format!(
                "{:<8} {:<16} {} {}\n",
                f.severity.label(),
                f.region,
                f.resource.as_deref().unwrap_or("-"),
                f.message
            ));
        }
    }
    out.push_str(&format!(
        "{} finding(s): {} OK, {} WARN, {} FAIL, {} UNKNOWN\n",
        report.total(),
        report.count(Severity::Ok),
        report.count(Severity::Warn),
        report.count(Severity::Fail),
        report.count(Severity::Unknown)
    ));
    Ok(out)
}

fn load_settings(cli: &Cli, sequential: bool) -> Result<Settings> {
    let mut settings = match &cli.settings {
        Some(p) => Settings::load(p)?,
        None => Settings::default(),
    };
    for (family, regions) in &cli.regions {
        settings = settings.with_regions(family, regions.iter().cloned());
    }
    if sequential { settings.fan_out = FanOutMode::Sequential; }
    settings.validate().context("invalid region settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .json()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let mut scanner = Scanner::new().with_checks(cloudsweep_aws::checks());
    scanner.select(&cli.checks)?;

    match &cli.cmd {
        Cmd::List => {
            let metas: Vec<_> = scanner.metas().collect();
            if cli.format == Format::Json {
                println!("{}", serde_json::to_string_pretty(&metas)?);
            } else {
                for m in metas {
                    println!("{:<20} {:<8} {}", m.id, m.category, m.title);
                }
            }
        }
        Cmd::Plan => {
            let order = scanner.collection_order()?;
            if cli.format == Format::Json {
                let apis: Vec<Json> = order.iter().map(|a| json!(a.to_string())).collect();
                println!("{}", serde_json::to_string_pretty(&apis)?);
            } else {
                for api in order { println!("{api}"); }
            }
        }
        Cmd::Run { cache, sequential, fail_on, allow_unknown, trace } => {
            let settings = load_settings(&cli, *sequential)?;
            let cache = Arc::new(Cache::load(cache)?);
            let report = scanner.run(Arc::clone(&cache), &settings).await;
            print!("{}", render_report(&report, cli.format, trace.then_some(cache.as_ref()))?);
            Policy::new((*fail_on).into(), *allow_unknown).check_report(&report)?;
        }
    }
    Ok(())
}
