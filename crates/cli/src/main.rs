use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use intent_dispatch::{
    check_pattern, DispatchConfig, DispatchHandle, DispatchService, Registry,
};
use serde_json::json;

mod command_file;

use command_file::{load_config, CommandFile};

#[derive(Parser)]
#[command(name = "intent-dispatch")]
#[command(about = "Resolve user text to registered commands", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with dispatch settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep unsafe pattern triggers (warn instead of dropping them)
    #[arg(long, global = true)]
    lenient: bool,

    /// Print JSON instead of plain text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve each TEXT (or each stdin line) to a command name
    Resolve(ResolveArgs),

    /// Screen regex patterns for catastrophic-backtracking shapes
    Check(CheckArgs),

    /// Register a command file and print registry statistics as JSON
    Stats(StatsArgs),
}

#[derive(Args)]
struct ResolveArgs {
    /// Command table (TOML, or JSON for .json files)
    #[arg(long)]
    commands: PathBuf,

    /// Texts to resolve; stdin lines are used when empty
    text: Vec<String>,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(required = true)]
    patterns: Vec<String>,
}

#[derive(Args)]
struct StatsArgs {
    #[arg(long)]
    commands: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let mut config = load_config(cli.config.as_deref())?;
    if cli.lenient {
        config.strict = false;
    }
    config.validate().context("Invalid dispatch configuration")?;

    match cli.command {
        Commands::Resolve(args) => run_resolve(config, args, cli.json).await,
        Commands::Check(args) => Ok(run_check(&config, &args, cli.json)),
        Commands::Stats(args) => run_stats(config, &args.commands).await,
    }
}

async fn start(config: DispatchConfig, commands: &Path) -> Result<DispatchHandle> {
    let file = CommandFile::load(commands)?;
    let registry = Registry::new(config)?;
    let handle = DispatchService::spawn(registry);
    file.register(&handle).await?;
    Ok(handle)
}

async fn run_resolve(config: DispatchConfig, args: ResolveArgs, as_json: bool) -> Result<ExitCode> {
    let handle = start(config, &args.commands).await?;

    let texts = if args.text.is_empty() {
        io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<Vec<_>>>()
            .context("Failed to read stdin")?
    } else {
        args.text
    };

    for text in texts {
        let dispatched = handle.dispatch(&text).await?;
        if as_json {
            let (command, reply) = dispatched.map_or((None, None), |d| (Some(d.command), d.reply));
            println!(
                "{}",
                json!({ "text": text, "command": command, "reply": reply })
            );
        } else {
            println!(
                "{}",
                dispatched.map_or_else(|| "-".to_string(), |d| d.command)
            );
        }
    }

    handle.shutdown().await?;
    Ok(ExitCode::SUCCESS)
}

fn run_check(config: &DispatchConfig, args: &CheckArgs, as_json: bool) -> ExitCode {
    let limits = config.safety_limits();
    let mut all_safe = true;
    let mut report = Vec::with_capacity(args.patterns.len());

    for pattern in &args.patterns {
        let verdict = check_pattern(pattern, &limits);
        all_safe &= verdict.is_ok();
        if as_json {
            report.push(json!({
                "pattern": pattern,
                "safe": verdict.is_ok(),
                "violation": verdict.err(),
            }));
        } else {
            match verdict {
                Ok(()) => println!("ok\t{pattern}"),
                Err(violation) => println!("unsafe\t{pattern}\t{violation}"),
            }
        }
    }
    if as_json {
        println!("{}", serde_json::Value::Array(report));
    }

    if all_safe {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_stats(config: DispatchConfig, commands: &Path) -> Result<ExitCode> {
    let handle = start(config, commands).await?;
    handle.flush().await?;
    let stats = handle.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    handle.shutdown().await?;
    Ok(ExitCode::SUCCESS)
}
