//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{MailQueryArgs, OutputFormat};
use crate::error::Result;
use crate::hit::Hit;

/// Result of the `plan` command.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlanReport {
    pub raw: String,
    pub optimized: String,
    /// The optimized plan in query-string form, as sent to remote servers.
    pub query_string: String,
    pub targets: Vec<String>,
}

/// One printed hit.
#[derive(Debug, Serialize, Deserialize)]
pub struct HitSummary {
    pub hit: String,
    pub item_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<String>,
}

impl HitSummary {
    pub fn from_hit(hit: &Hit) -> Self {
        HitSummary {
            hit: hit.to_string(),
            item_id: hit.item_id(),
            account: hit.proxied().map(|p| p.account_id.clone()),
            name: hit.name().map(str::to_string),
            subject: hit.item().map(|item| item.subject.clone()),
            score: Some(hit.score()).filter(|s| !s.is_nan()),
            parts: hit.matched_parts().into_iter().map(|(part, _)| part).collect(),
        }
    }
}

/// Result of the `search` command.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchReport {
    pub plan: String,
    pub sort: String,
    pub hits: Vec<HitSummary>,
    pub info: Vec<String>,
    pub duration_ms: u64,
}

/// Human-readable rendering of a command result.
pub trait HumanOutput {
    fn print_human(&self, args: &MailQueryArgs);
}

impl HumanOutput for PlanReport {
    fn print_human(&self, _args: &MailQueryArgs) {
        println!("Raw:       {}", self.raw);
        println!("Optimized: {}", self.optimized);
        println!("Query:     {}", self.query_string);
        if !self.targets.is_empty() {
            println!("Targets:   {}", self.targets.join(", "));
        }
    }
}

impl HumanOutput for SearchReport {
    fn print_human(&self, args: &MailQueryArgs) {
        if args.verbosity() > 1 {
            println!("Plan: {}", self.plan);
        }
        println!("{} hits (sort {}, {}ms)", self.hits.len(), self.sort, self.duration_ms);
        for (i, hit) in self.hits.iter().enumerate() {
            let label = hit.subject.as_deref().or(hit.name.as_deref()).unwrap_or("");
            print!("{:>4}. {:<24} {}", i + 1, hit.hit, label);
            if let Some(score) = hit.score {
                print!(" [{score:.3}]");
            }
            println!();
            for part in &hit.parts {
                println!("        part {part}");
            }
        }
        for info in &self.info {
            println!("note: {info}");
        }
    }
}

/// Output a command result in the requested format.
pub fn output_result<T>(message: &str, result: &T, args: &MailQueryArgs) -> Result<()>
where
    T: Serialize + HumanOutput,
{
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 1 {
                println!("{message}");
                println!();
            }
            result.print_human(args);
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &MailQueryArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}
