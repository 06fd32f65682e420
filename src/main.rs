// ==========================================
// Residency Scheduler - command line entry
// ==========================================
// Usage:
//   residency-scheduler [--db PATH] [--json-logs] <command> [args]
//
// Commands:
//   init                                   create or upgrade the database
//   calendar <start> <end>                 create AM/PM blocks for the range
//   generate <start> <end> [solver] [--seed N] [--budget-ms N] [--dry-run]
//   runs [limit]                           recent schedule runs
//   scan <start> <end>                     detect conflicts
//   resolve                                resolve every open conflict
//   policy                                 print the effective policy
// Results are printed as JSON on stdout; logs go to stderr.
// ==========================================

use std::process::ExitCode;

use anyhow::{anyhow, bail, Context};
use chrono::NaiveDate;
use serde::Serialize;

use residency_scheduler::app::{get_default_db_path, AppState};
use residency_scheduler::engine::GenerationRequest;
use residency_scheduler::{logging, APP_NAME, VERSION};

const USAGE: &str = "usage: residency-scheduler [--db PATH] [--json-logs] \
<init|calendar|generate|runs|scan|resolve|policy> [args]";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let json_logs = args.iter().any(|a| a == "--json-logs");
    if json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "command failed");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let mut db_path = None;
    let mut rest = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--db" => db_path = Some(iter.next().ok_or_else(|| anyhow!("--db needs a path"))?),
            "--json-logs" => {}
            _ => rest.push(arg),
        }
    }
    let Some((command, params)) = rest.split_first() else {
        bail!(USAGE);
    };

    let db_path = db_path.unwrap_or_else(get_default_db_path);
    tracing::info!(app = APP_NAME, version = VERSION, db_path = %db_path, command = %command, "starting");
    let state = AppState::new(db_path).map_err(|e| anyhow!(e))?;

    match command.as_str() {
        "init" => print_json(&serde_json::json!({ "db_path": state.get_db_path(), "version": VERSION })),
        "calendar" => {
            let (start, end) = date_range(params)?;
            let created = state.repos.block_repo.generate_calendar(start, end)?;
            print_json(&serde_json::json!({ "blocks_created": created }))
        }
        "generate" => {
            let (start, end) = date_range(params)?;
            let request = generation_request(start, end, &params[2..])?;
            let response = state.schedule_api.generate(request).await?;
            print_json(&response)
        }
        "runs" => {
            let limit = match params.first() {
                Some(raw) => raw.parse().with_context(|| format!("invalid limit {}", raw))?,
                None => 20,
            };
            print_json(&state.schedule_api.list_runs(limit)?)
        }
        "scan" => {
            let (start, end) = date_range(params)?;
            print_json(&state.conflict_api.scan(start, end)?)
        }
        "resolve" => print_json(&state.conflict_api.resolve_open()?),
        "policy" => print_json(&state.config_api.get_policy()?),
        other => bail!("unknown command {}\n{}", other, USAGE),
    }
}

fn date_range(params: &[String]) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    match params {
        [start, end, ..] => Ok((parse_date(start)?, parse_date(end)?)),
        _ => bail!("expected <start> <end> as YYYY-MM-DD"),
    }
}

fn parse_date(raw: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid date {}", raw))
}

fn generation_request(start: NaiveDate, end: NaiveDate, flags: &[String]) -> anyhow::Result<GenerationRequest> {
    let mut request = GenerationRequest::new(start, end);
    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| anyhow!("{} needs a value", flag));
        match flag.as_str() {
            "--solver" => request.solver_override = Some(value()?.to_lowercase()),
            "--seed" => request.seed = Some(value()?.parse().context("invalid seed")?),
            "--budget-ms" => request.time_budget_ms = Some(value()?.parse().context("invalid budget")?),
            "--dry-run" => request.dry_run = true,
            name if !name.starts_with("--") && request.solver_override.is_none() => {
                request.solver_override = Some(name.to_lowercase())
            }
            other => bail!("unknown generate flag {}", other),
        }
    }
    Ok(request)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
