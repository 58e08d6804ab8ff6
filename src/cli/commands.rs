//! Command implementations for the mailquery CLI.

use std::sync::Arc;
use std::time::Instant;

use crate::cli::args::*;
use crate::cli::fixture::Fixture;
use crate::cli::output::*;
use crate::config::SearchConfig;
use crate::error::Result;
use crate::results::HitStream;
use crate::search::MailboxSearch;

/// Execute a CLI command.
pub fn execute_command(args: MailQueryArgs) -> Result<()> {
    match &args.command {
        Command::Plan(plan_args) => show_plan(plan_args, &args),
        Command::Search(search_args) => run_search(search_args, &args),
    }
}

/// Print the raw plan, the optimized plan and its query string.
fn show_plan(args: &PlanArgs, cli_args: &MailQueryArgs) -> Result<()> {
    let fixture = Fixture::load(&args.fixture)?;
    let raw = fixture.plan.to_operation();
    let search = MailboxSearch::new(fixture.mailbox()).with_params(fixture.params.clone());
    let optimized = search.plan(raw.clone())?;

    let report = PlanReport {
        raw: raw.to_string(),
        optimized: optimized.to_string(),
        query_string: optimized.to_query_string(),
        targets: optimized
            .query_targets()
            .iter()
            .map(ToString::to_string)
            .collect(),
    };
    output_result("Query plan", &report, cli_args)
}

/// Load the fixture into the in-memory engines and run its plan.
fn run_search(args: &SearchArgs, cli_args: &MailQueryArgs) -> Result<()> {
    let fixture = Fixture::load(&args.fixture)?;
    let config = match &args.config {
        Some(path) => SearchConfig::from_file(path)?,
        None => SearchConfig::default(),
    }
    .with_env_overrides()?;

    let mut params = fixture.params.clone();
    if let Some(limit) = args.limit {
        params.limit = limit;
    }
    if let Some(offset) = args.offset {
        params.offset = offset;
    }
    if let Some(sort) = args.sort {
        params.sort = sort;
    }

    let mut search = MailboxSearch::new(fixture.mailbox())
        .with_params(params)
        .with_config(config)
        .with_index(Arc::new(fixture.index()))
        .with_proxy(Arc::new(fixture.proxy()))
        .with_grouping(args.grouping());
    if let Some(chunk) = args.preload {
        search = search.with_preload(chunk);
    }

    let start = Instant::now();
    let mut results = search.run(fixture.plan.to_operation())?;
    let page = results.page()?;
    let hits = page
        .into_iter()
        .map(|id| results.with_loaded_hit(id, HitSummary::from_hit))
        .collect::<Result<Vec<_>>>()?;
    let info = results.result_info().iter().map(ToString::to_string).collect();
    results.close()?;

    let report = SearchReport {
        plan: results.plan().to_string(),
        sort: results.sort_by().to_string(),
        hits,
        info,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    output_result("Search results", &report, cli_args)
}
