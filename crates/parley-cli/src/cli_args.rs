use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use parley_options::DEFAULT_LANGUAGE;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Ask a person for feedback and suggest reply options",
    version
)]
/// Public struct `Cli` used across Parley components.
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PARLEY_CONFIG",
        help = "Feedback config JSON file; defaults are used when absent or invalid"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "PARLEY_RULES",
        help = "Rule source JSON file; overrides rules_path from the config file"
    )]
    pub rules: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "PARLEY_LANGUAGE",
        default_value = DEFAULT_LANGUAGE,
        help = "Language code used for rule matching"
    )]
    pub language: String,

    #[arg(
        long = "timeout-seconds",
        global = true,
        env = "PARLEY_TIMEOUT_SECONDS",
        value_parser = parse_positive_u64,
        help = "Seconds to wait for a reply; defaults to default_timeout_seconds from the config"
    )]
    pub timeout_seconds: Option<u64>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Show a prompt in the terminal and print the reply.
    Ask(AskArgs),
    /// Print the reply options that would be offered for a text.
    Resolve(ResolveArgs),
    /// Inspect or edit the rule source.
    #[command(subcommand)]
    Rules(RulesCommand),
}

#[derive(Debug, Args)]
pub struct AskArgs {
    pub prompt: String,

    #[arg(
        long = "option",
        help = "Suggested reply; repeat to offer several. Skips rule matching when set"
    )]
    pub options: Vec<String>,

    #[arg(long = "task-id", help = "Explicit task id instead of a generated one")]
    pub task_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    pub text: String,

    #[arg(long = "option", help = "Suggested reply; repeat to offer several")]
    pub options: Vec<String>,

    #[arg(long, help = "Print the full resolution report as JSON")]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// Print engine statistics as JSON.
    Stats,
    /// List languages with their patterns in match order.
    Languages,
    /// Add or replace a pattern and persist the rule source.
    Add(RuleAddArgs),
    /// Remove a pattern and persist the rule source.
    Remove(RuleRemoveArgs),
}

#[derive(Debug, Args)]
pub struct RuleAddArgs {
    pub name: String,

    #[arg(long = "trigger", required = true)]
    pub triggers: Vec<String>,

    #[arg(long = "option", required = true)]
    pub options: Vec<String>,

    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    pub priority: i64,
}

#[derive(Debug, Args)]
pub struct RuleRemoveArgs {
    pub name: String,
}
