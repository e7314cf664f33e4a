use anyhow::{bail, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use course_judge::api::{self, AppState};
use course_judge::content::{ContentError, JsonContentStore};
use course_judge::verify::{AuditReport, CheckError};
use course_judge::{AppConfig, SandboxedRunner, Verifier};

const USAGE: &str = "usage: course-judge [serve | audit [course_id]]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("course_judge=info".parse()?),
        )
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "Loaded configuration: data_dir={}, interpreter={:?}, time_limit={}ms, memory_limit={}MB",
        config.data_dir.display(),
        config.sandbox.interpreter,
        config.sandbox.time_limit_ms,
        config.sandbox.memory_limit_mb
    );

    let runner = Arc::new(SandboxedRunner::new(
        config.sandbox.clone(),
        config.max_concurrent_runs,
    ));
    if let Err(e) = runner.self_test().await {
        bail!(
            "{} (isolation mode {:?}; set SANDBOX_ISOLATION=none on hosts without namespace support)",
            e,
            config.sandbox.isolation.mode
        );
    }

    let verifier = build_verifier(&config, runner);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["serve"] => api::serve(&config.bind_addr, AppState { verifier }).await,
        ["audit"] => run_audit(&verifier, None).await,
        ["audit", course_id] => run_audit(&verifier, Some(*course_id)).await,
        _ => bail!(USAGE),
    }
}

fn build_verifier(config: &AppConfig, runner: Arc<SandboxedRunner>) -> Verifier {
    let content = Arc::new(JsonContentStore::new(
        &config.data_dir,
        config.courses_file.clone(),
    ));
    Verifier::new(runner, content).with_output_variable(config.sandbox.output_variable.clone())
}

async fn run_audit(verifier: &Verifier, course_id: Option<&str>) -> Result<()> {
    let cancel = CancellationToken::new();

    let reports = match course_id {
        Some(id) => vec![verifier.audit_course(id, &cancel).await?],
        None => {
            let mut reports = Vec::new();
            for course in verifier.content().courses().await? {
                match verifier.audit(&course, &cancel).await {
                    Ok(report) => reports.push(report),
                    Err(CheckError::Content(ContentError::SourceNotConfigured { .. })) => {
                        warn!("Skipping course '{}': no exercises file", course.id);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            reports
        }
    };

    let failed: usize = reports.iter().map(print_report).sum();
    if failed > 0 {
        bail!("{} exercise(s) failed the solution audit", failed);
    }
    Ok(())
}

fn print_report(report: &AuditReport) -> usize {
    for entry in &report.exercises {
        println!(
            "[{}] {}/{} {}: {}",
            if entry.passed { "PASS" } else { "FAIL" },
            report.course_id,
            entry.exercise_id,
            entry.title,
            entry.reason
        );
    }
    println!(
        "{}: {} passed, {} failed",
        report.course_id, report.passed, report.failed
    );
    report.failed
}
