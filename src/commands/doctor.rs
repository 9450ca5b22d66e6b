use std::time::Instant;

use clap::Args;
use serde::{Deserialize, Serialize};

use super::{Deck, OutputFormat, print_json};
use crate::client::Backend;
use crate::error::ApiError;
use crate::model::TaskFilter;

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Strict mode: also require the optional feeds (usage, sessions)
    #[arg(long)]
    pub strict: bool,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorReport {
    pub config: ConfigStatus,
    pub endpoints: Vec<EndpointStatus>,
    pub issues: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigStatus {
    pub file: Option<String>,
    pub server: String,
    pub store: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub name: String,
    pub required: bool,
    pub ok: bool,
    pub millis: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type Check = fn(&dyn Backend) -> Result<(), ApiError>;

const CHECKS: &[(&str, bool, Check)] = &[
    ("tasks", true, check_tasks),
    ("tasks/ready", true, check_ready),
    ("agents", true, check_agents),
    ("work", true, check_work),
    ("claude/usage", false, check_usage),
    ("sessions", false, check_sessions),
];

fn check_tasks(b: &dyn Backend) -> Result<(), ApiError> {
    b.list_tasks(&TaskFilter::default()).map(drop)
}
fn check_ready(b: &dyn Backend) -> Result<(), ApiError> {
    b.ready_tasks().map(drop)
}
fn check_agents(b: &dyn Backend) -> Result<(), ApiError> {
    b.list_agents().map(drop)
}
fn check_work(b: &dyn Backend) -> Result<(), ApiError> {
    b.work_status().map(drop)
}
fn check_usage(b: &dyn Backend) -> Result<(), ApiError> {
    b.usage_metrics().map(drop)
}
fn check_sessions(b: &dyn Backend) -> Result<(), ApiError> {
    b.sessions().map(drop)
}

/// Time a request to each endpoint.
pub fn check_endpoints(backend: &dyn Backend) -> Vec<EndpointStatus> {
    CHECKS
        .iter()
        .map(|(name, required, check)| {
            let start = Instant::now();
            let result = check(backend);
            EndpointStatus {
                name: (*name).to_string(),
                required: *required,
                ok: result.is_ok(),
                millis: start.elapsed().as_millis(),
                error: result.err().map(|e| e.to_string()),
            }
        })
        .collect()
}

/// Issues worth failing on. Optional feeds only count in strict mode.
pub fn issues(endpoints: &[EndpointStatus], strict: bool) -> Vec<String> {
    endpoints
        .iter()
        .filter(|e| !e.ok && (e.required || strict))
        .map(|e| {
            format!("/api/{} failed: {}", e.name, e.error.as_deref().unwrap_or("unknown error"))
        })
        .collect()
}

impl DoctorArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let deck = Deck::connect()?;
        let format = OutputFormat::resolve(self.format);

        let endpoints = check_endpoints(deck.api());
        let mut report = DoctorReport {
            config: ConfigStatus {
                file: deck.config_path.as_ref().map(|p| p.display().to_string()),
                server: deck.config.server.url.clone(),
                store: deck.config.store_path().map(|p| p.display().to_string()),
            },
            issues: issues(&endpoints, self.strict),
            endpoints,
        };
        if report.config.store.is_none() {
            report.issues.push("no data directory for the preferences file; set store.path".into());
        }

        let issue_count = report.issues.len();

        match format {
            OutputFormat::Pretty => Self::print_pretty(&report),
            OutputFormat::Text => Self::print_text(&report),
            OutputFormat::Json => print_json(&report)?,
        }

        if issue_count > 0 {
            return Err(crate::error::ExitError::new(
                u8::try_from(issue_count.min(125)).unwrap_or(125),
                format!("{issue_count} issue(s) found"),
            )
            .into());
        }

        Ok(())
    }

    fn print_pretty(report: &DoctorReport) {
        println!("=== fleetdeck doctor ===\n");
        println!("Config: {}", report.config.file.as_deref().unwrap_or("(defaults)"));
        println!("Server: {}", report.config.server);
        println!("Store:  {}", report.config.store.as_deref().unwrap_or("-"));
        println!();

        println!("Endpoints:");
        for e in &report.endpoints {
            if e.ok {
                println!("  \u{2713} /api/{}  {} ms", e.name, e.millis);
            } else if e.required {
                println!("  \u{2717} /api/{}: {}", e.name, e.error.as_deref().unwrap_or("failed"));
            } else {
                println!("  - /api/{}: unavailable (optional)", e.name);
            }
        }

        if report.issues.is_empty() {
            println!("\n\u{2713} No issues found");
        } else {
            println!("\nIssues ({}):", report.issues.len());
            for issue in &report.issues {
                println!("  \u{2022} {issue}");
            }
        }
    }

    fn print_text(report: &DoctorReport) {
        println!(
            "fleetdeck-doctor  config={}  server={}",
            report.config.file.as_deref().unwrap_or("-"),
            report.config.server
        );
        for e in &report.endpoints {
            let status = if e.ok { "ok" } else if e.required { "failed" } else { "unavailable" };
            println!("endpoint  {}  {status}  {}ms", e.name, e.millis);
        }
        if !report.issues.is_empty() {
            println!("issues  count={}", report.issues.len());
            for issue in &report.issues {
                println!("issue  {issue}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    #[test]
    fn healthy_backend_has_no_issues() {
        let fake = FakeBackend::new();
        let endpoints = check_endpoints(&fake);
        assert_eq!(endpoints.len(), CHECKS.len());
        assert!(endpoints.iter().all(|e| e.ok));
        assert!(issues(&endpoints, true).is_empty());
    }

    #[test]
    fn optional_failures_only_count_when_strict() {
        let fake = FakeBackend::new();
        fake.fail("usage_metrics");
        let endpoints = check_endpoints(&fake);
        assert!(issues(&endpoints, false).is_empty());
        assert_eq!(issues(&endpoints, true).len(), 1);

        fake.fail("list_agents");
        let endpoints = check_endpoints(&fake);
        let found = issues(&endpoints, false);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("/api/agents"));
    }
}
