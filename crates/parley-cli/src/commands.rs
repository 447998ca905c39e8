use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parley_coordinator::{
    render_reply, FeedbackReply, FeedbackRequest, FeedbackService, RenderedBlock,
    RequestCoordinator, TaskId,
};
use parley_options::{DisplayMode, FeedbackConfig, OptionResolver, ResolutionReport};
use parley_rules::{start_rule_source_watcher, CustomPattern, RuleEngine};
use tracing::info;

use crate::cli_args::{AskArgs, Cli, CliCommand, ResolveArgs, RuleAddArgs, RulesCommand};
use crate::terminal_surface::TerminalSurface;

const RULE_WATCH_INTERVAL: Duration = Duration::from_secs(2);

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let Cli {
        config,
        rules,
        language,
        timeout_seconds,
        command,
    } = cli;
    let config = load_config(config.as_deref());
    let rules_path = rules.or_else(|| config.rules_path.clone());
    let engine = Arc::new(build_rule_engine(rules_path.clone()));

    match command {
        CliCommand::Ask(args) => {
            let timeout = timeout_seconds.unwrap_or(config.default_timeout_seconds);
            run_ask(args, engine, config, &language, timeout).await
        }
        CliCommand::Resolve(args) => run_resolve(args, engine, &config, &language),
        CliCommand::Rules(command) => {
            run_rules(command, &engine, rules_path.as_deref(), &language)
        }
    }
}

fn load_config(path: Option<&Path>) -> FeedbackConfig {
    path.map(FeedbackConfig::load).unwrap_or_default()
}

fn build_rule_engine(rules_path: Option<PathBuf>) -> RuleEngine {
    match rules_path {
        Some(path) => RuleEngine::from_path(path),
        None => RuleEngine::builtin(),
    }
}

async fn run_ask(
    args: AskArgs,
    engine: Arc<RuleEngine>,
    config: FeedbackConfig,
    language: &str,
    timeout_seconds: u64,
) -> Result<()> {
    let display_mode = config.display_mode;
    let mut watcher = start_rule_source_watcher(Arc::clone(&engine), RULE_WATCH_INTERVAL)?;
    let coordinator = Arc::new(
        RequestCoordinator::start(TerminalSurface)
            .context("failed to start presentation coordinator")?,
    );
    let service = Arc::new(FeedbackService::new(
        Arc::clone(&coordinator),
        Arc::new(OptionResolver::with_rule_engine(engine)),
        Arc::new(config),
    ));

    let mut request = FeedbackRequest::new(args.prompt)
        .with_language(language)
        .with_timeout(Duration::from_secs(timeout_seconds));
    if !args.options.is_empty() {
        request = request.with_ai_options(args.options);
    }
    if let Some(task_id) = args.task_id {
        request = request.with_task_id(TaskId::new(task_id)?);
    }

    let outcome = service.request_feedback_async(request).await;
    coordinator.shutdown();
    watcher.shutdown().await;
    let reply = outcome?;
    info!(
        reason_code = "cli_ask_finished",
        task_id = %reply.task_id,
        status = reply.status.as_str(),
        "ask finished"
    );

    let mut stdout = io::stdout().lock();
    write_reply(&mut stdout, &reply, display_mode).context("failed to write reply")?;
    Ok(())
}

fn run_resolve(
    args: ResolveArgs,
    engine: Arc<RuleEngine>,
    config: &FeedbackConfig,
    language: &str,
) -> Result<()> {
    let resolver = OptionResolver::with_rule_engine(engine);
    let ai_options = (!args.options.is_empty()).then_some(args.options);
    let report = resolver.resolve_with_report(&args.text, ai_options.as_deref(), config, language);

    let mut stdout = io::stdout().lock();
    if args.json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to render resolution report")?;
        writeln!(stdout, "{rendered}")?;
    } else {
        write_resolution(&mut stdout, &report)?;
    }
    Ok(())
}

fn run_rules(
    command: RulesCommand,
    engine: &RuleEngine,
    rules_path: Option<&Path>,
    language: &str,
) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match command {
        RulesCommand::Stats => {
            let rendered = serde_json::to_string_pretty(&engine.stats())
                .context("failed to render rule engine stats")?;
            writeln!(stdout, "{rendered}")?;
        }
        RulesCommand::Languages => write_languages(&mut stdout, engine)?,
        RulesCommand::Add(args) => {
            require_rules_path(rules_path, "rules add")?;
            add_rule(engine, language, args)?;
            writeln!(stdout, "generation {}", engine.generation())?;
        }
        RulesCommand::Remove(args) => {
            require_rules_path(rules_path, "rules remove")?;
            engine
                .remove_pattern(language, &args.name)
                .with_context(|| format!("failed to remove pattern '{}'", args.name))?;
            writeln!(stdout, "generation {}", engine.generation())?;
        }
    }
    Ok(())
}

fn require_rules_path(rules_path: Option<&Path>, command: &str) -> Result<()> {
    if rules_path.is_none() {
        bail!("{command} requires --rules, PARLEY_RULES or rules_path in the config file");
    }
    Ok(())
}

fn add_rule(engine: &RuleEngine, language: &str, args: RuleAddArgs) -> Result<()> {
    let pattern = CustomPattern::new(args.triggers, args.options).with_priority(args.priority);
    engine
        .add_custom_pattern(language, &args.name, pattern)
        .with_context(|| format!("failed to add pattern '{}'", args.name))
}

fn write_reply(
    out: &mut impl Write,
    reply: &FeedbackReply,
    display_mode: DisplayMode,
) -> io::Result<()> {
    if display_mode == DisplayMode::Full {
        writeln!(
            out,
            "task {} {} (options from {})",
            reply.task_id,
            reply.status.as_str(),
            reply.resolution.strategy.unwrap_or("none")
        )?;
    }
    for block in render_reply(&reply.result) {
        match block {
            RenderedBlock::Text(text) => writeln!(out, "{text}")?,
            RenderedBlock::Image { data, format } => {
                writeln!(out, "[image {format}, {} bytes]", data.len())?
            }
        }
    }
    Ok(())
}

fn write_resolution(out: &mut impl Write, report: &ResolutionReport) -> io::Result<()> {
    let resolved = &report.resolved;
    match resolved.strategy {
        Some(strategy) => writeln!(
            out,
            "strategy: {strategy} (confidence {:.2})",
            resolved.confidence
        )?,
        None => writeln!(out, "strategy: none")?,
    }
    for (index, option) in resolved.options.iter().enumerate() {
        writeln!(out, "{}. {option}", index + 1)?;
    }
    for failure in &report.failed {
        writeln!(out, "failed: {} ({})", failure.strategy, failure.reason)?;
    }
    Ok(())
}

fn write_languages(out: &mut impl Write, engine: &RuleEngine) -> io::Result<()> {
    for language in engine.available_languages() {
        writeln!(out, "{language}")?;
        for pattern in engine.patterns_for_language(&language) {
            let state = if pattern.enabled { "" } else { " [disabled]" };
            writeln!(
                out,
                "  {} (priority {}){state}: {} -> {}",
                pattern.id,
                pattern.priority,
                pattern.triggers.iter().cloned().collect::<Vec<_>>().join(" "),
                pattern.options.join(" / ")
            )?;
        }
    }
    Ok(())
}
