//! Devflow CLI.
//!
//! Runs one pipeline cycle per invocation: a feature request goes in, a cycle
//! outcome comes out as JSON. `score` and `branch-name` expose the pure
//! decision helpers for scripting.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use tracing::info;

use devflow::core::branch::feature_branch_name;
use devflow::core::scoring::MergeSignals;
use devflow::exit_codes;
use devflow::io::browser::CommandBrowser;
use devflow::io::config::{DEFAULT_CONFIG_PATH, DevflowConfig, load_config, write_config};
use devflow::io::deploy::PreviewDeployer;
use devflow::io::gemini::GeminiModel;
use devflow::io::git::Git;
use devflow::io::init::{InitOptions, init_devflow};
use devflow::io::log_sink::JsonlLogSink;
use devflow::io::retry::RetryingModel;
use devflow::io::source_control::GitHub;
use devflow::io::workspace::Workspace;
use devflow::logging;
use devflow::pipeline::{Capabilities, Pipeline};

/// Line that ends an interactive request on stdin.
const END_OF_REQUEST: &str = "exit";

#[derive(Parser)]
#[command(
    name = "devflow",
    version,
    about = "Feature request to merged pull request, driven by LLM agents"
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Config file location.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file (and `.devflow/` scaffolding).
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one cycle for a feature request and print the outcome as JSON.
    Run {
        /// Read the request from a file instead of stdin.
        #[arg(long)]
        request: Option<PathBuf>,
    },
    /// Print the merge confidence and decision for a set of signals.
    Score {
        #[arg(long)]
        tests_pass: bool,
        #[arg(long)]
        review_approved: bool,
        #[arg(long)]
        qa_pass: bool,
        /// Estimated risk, 0 (none) to 10.
        #[arg(long)]
        risk: f64,
    },
    /// Print the feature branch name for a ticket.
    BranchName {
        #[arg(long)]
        feature_id: String,
        #[arg(long)]
        title: String,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => {
            let path = init_config(&cli.config, force)?;
            println!("wrote {}", path.display());
            Ok(exit_codes::OK)
        }
        Command::Run { request } => {
            let request = match request {
                Some(path) => fs::read_to_string(&path)
                    .with_context(|| format!("read request {}", path.display()))?,
                None => read_request(std::io::stdin().lock())?,
            };
            let cfg = load_config(&cli.config)?;
            run_cycle(&cfg, &request)
        }
        Command::Score {
            tests_pass,
            review_approved,
            qa_pass,
            risk,
        } => {
            if !(0.0..=10.0).contains(&risk) {
                bail!("--risk must be within 0..=10, got {risk}");
            }
            let signals = MergeSignals {
                tests_pass,
                review_approved,
                qa_pass,
                risk_score: risk,
            };
            let score = signals.confidence();
            let decision = signals.decision();
            print_json(&json!({
                "confidence_score": score,
                "merge_decision": decision.as_str(),
            }))?;
            Ok(exit_codes::OK)
        }
        Command::BranchName { feature_id, title } => {
            println!("{}", feature_branch_name(&feature_id, &title));
            Ok(exit_codes::OK)
        }
    }
}

/// The default location gets the full `.devflow/` layout; any other path
/// gets just the config file.
fn init_config(config_path: &Path, force: bool) -> Result<PathBuf> {
    if config_path == Path::new(DEFAULT_CONFIG_PATH) {
        let root = std::env::current_dir().context("resolve current directory")?;
        let paths = init_devflow(&root, &InitOptions { force })?;
        return Ok(paths.config_path);
    }
    if config_path.exists() && !force {
        return Err(anyhow!(
            "devflow init: {} already exists (use --force to overwrite)",
            config_path.display()
        ));
    }
    write_config(config_path, &DevflowConfig::default())?;
    Ok(config_path.to_path_buf())
}

/// Collect lines until one reads `exit` (any case) or input ends.
fn read_request(input: impl BufRead) -> Result<String> {
    let mut lines = Vec::new();
    for line in input.lines() {
        let line = line.context("read request from stdin")?;
        if line.trim().eq_ignore_ascii_case(END_OF_REQUEST) {
            break;
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn run_cycle(cfg: &DevflowConfig, request: &str) -> Result<i32> {
    cfg.validate()?;
    let model = RetryingModel::new(GeminiModel::from_config(&cfg.model)?, cfg.retry.policy());
    let source_control = GitHub::from_config(
        &cfg.repo,
        Duration::from_secs(cfg.model.request_timeout_secs),
    )?;
    let git = Git::new(&cfg.repo, &cfg.git);
    let caps = Capabilities {
        model: &model,
        git: &git,
        source_control: Arc::new(source_control),
        browser: Arc::new(CommandBrowser::new(&cfg.browser, cfg.tool_timeout())),
        deployer: Arc::new(PreviewDeployer::new(cfg.deploy.preview_url.clone())),
        log_sink: Arc::new(JsonlLogSink::new(cfg.logs.dir.clone())),
        files: Arc::new(Workspace::new(cfg.repo.local_path.clone())),
    };
    let pipeline = Pipeline::new(caps, cfg)?;
    let outcome = pipeline.run_cycle(request)?;
    info!(status = ?outcome.status, stage = outcome.stage.as_str(), "cycle finished");
    print_json(&outcome)?;
    Ok(if outcome.status.is_failure() {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    })
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("write JSON to stdout")?;
    writeln!(stdout).context("write JSON to stdout")?;
    Ok(())
}
