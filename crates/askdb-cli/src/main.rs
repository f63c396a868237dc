//! askdb - ask questions of a SQL database in plain language

mod commands;
mod config;
mod report;
mod tools;
mod utils;

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use askdb_agent::{Agent, AgentEvent, Artifact, RunResult};
use askdb_ai::{Completer, Model, OpenAIProvider, Provider, RetryConfig, Retrying};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::tools::Database;

/// askdb - ask questions of a SQL database in plain language
#[derive(Parser, Debug)]
#[command(name = "askdb")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: gpt-4o-mini)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (openai, groq, openrouter, ollama, custom)
    #[arg(short, long)]
    provider: Option<String>,

    /// Endpoint override for OpenAI-compatible servers
    #[arg(long)]
    base_url: Option<String>,

    /// Database URL or path (e.g. sqlite:///shop.db)
    #[arg(short, long)]
    database: Option<String>,

    /// Ask a single question and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print the reasoning steps after each answer
    #[arg(long)]
    show_steps: bool,

    /// Prompt style (plain, schema-aware, visualization)
    #[arg(long)]
    prompt_style: Option<String>,

    /// Maximum reasoning iterations per question
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Allow statements that modify the database
    #[arg(long)]
    writable: bool,

    /// Disable the chart and diagram tools
    #[arg(long)]
    no_charts: bool,

    /// Disable the email tool
    #[arg(long)]
    no_email: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// CLI flags take precedence over the config file
fn apply_args(cfg: &mut Config, args: &Args) {
    if let Some(ref model) = args.model {
        cfg.model = Some(model.clone());
    }
    if let Some(ref provider) = args.provider {
        cfg.provider = Some(provider.clone());
    }
    if let Some(ref url) = args.base_url {
        cfg.base_url = Some(url.clone());
    }
    if let Some(ref db) = args.database {
        cfg.database.url = Some(db.clone());
    }
    if let Some(ref style) = args.prompt_style {
        cfg.agent.prompt_style = style.clone();
    }
    if let Some(n) = args.max_iterations {
        cfg.agent.max_iterations = n;
    }
    if args.show_steps {
        cfg.agent.show_steps = true;
    }
    if args.writable {
        cfg.database.read_only = false;
    }
    if args.no_charts {
        cfg.tools.charts = false;
    }
    if args.no_email {
        cfg.tools.email = false;
    }
}

fn build_completer(cfg: &Config) -> anyhow::Result<Arc<dyn Completer>> {
    let provider = cfg.provider()?;
    let mut model = Model::new(cfg.model_id(), provider);
    match cfg.base_url {
        Some(ref url) => model = model.with_base_url(url.as_str()),
        None if provider == Provider::Custom => {
            bail!("The custom provider needs a base URL: pass --base-url or set base_url in config")
        }
        None => {}
    }

    let api_key = cfg.get_api_key(provider);
    if api_key.is_none() {
        if let Some(var) = provider.api_key_env_var() {
            eprintln!("Error: No API key found for {}", provider.name());
            eprintln!();
            eprintln!("Set your API key with: export {}=your-key", var);
            eprintln!("Or add it to config file: askdb --init-config");
            std::process::exit(1);
        }
    }

    let provider = OpenAIProvider::new(api_key, model).with_request_timeout(Duration::from_secs(120))?;
    Ok(Arc::new(Retrying::new(provider, RetryConfig::default())))
}

fn open_database(cfg: &Config) -> anyhow::Result<Database> {
    let Some(ref url) = cfg.database.url else {
        bail!(
            "No database configured. Pass --database sqlite:///path/to/db.sqlite \
             or set [database] url in {}",
            Config::config_path().display()
        );
    };
    Database::open_url(
        url,
        cfg.database.read_only,
        Duration::from_secs(cfg.database.query_timeout_secs),
    )
    .with_context(|| format!("cannot open database '{}'", url))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("askdb=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut cfg = Config::load();
    apply_args(&mut cfg, &args);

    let db = open_database(&cfg)?;
    let registry = tools::build_registry(&cfg, &db)?;
    let completer = build_completer(&cfg)?;
    let mut agent = Agent::new(cfg.agent_config()?, completer, registry);

    let mut session = Session {
        show_steps: cfg.agent.show_steps,
        artifacts: Vec::new(),
    };

    if let Some(question) = args.command {
        let result = ask(&mut agent, &mut session, &question).await;
        if !result.is_ok() {
            std::process::exit(1);
        }
        return Ok(());
    }

    if io::stderr().is_terminal() {
        eprintln!(
            "askdb ({}) database: {}",
            agent.model_id(),
            db.path().display()
        );
        eprintln!("Type /help for commands.");
        eprintln!();
    }
    run_interactive(&mut agent, &mut session, &cfg).await
}

/// Per-process state the commands act on
struct Session {
    show_steps: bool,
    artifacts: Vec<Artifact>,
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::ToolStart { tool_name, .. } => {
            eprint!("[{}...", tool_name);
            io::stderr().flush().ok();
        }
        AgentEvent::ToolEnd {
            observation,
            is_error,
            ..
        } => {
            let preview = utils::truncate_chars(observation.lines().next().unwrap_or(""), 60);
            if *is_error {
                eprintln!(" error] {}", preview);
            } else {
                eprintln!(" {}]", preview);
            }
        }
        AgentEvent::ParseRetry { attempt, .. } => {
            eprintln!("[Response was not in the expected format, retrying ({})]", attempt);
        }
        AgentEvent::HistoryTrimmed {
            removed,
            chars_after,
        } => {
            eprintln!(
                "[History trimmed: dropped {} messages, {} characters kept]",
                removed, chars_after
            );
        }
        AgentEvent::HistoryCleared { removed, .. } => {
            eprintln!("[History cleared: {} messages dropped]", removed);
        }
        _ => {}
    }
}

/// Run one question, printing progress to stderr and the answer to stdout
async fn ask(agent: &mut Agent, session: &mut Session, question: &str) -> RunResult {
    let mut receiver = agent.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    print_event(&event);
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let handle = agent.handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort();
        }
    });

    let result = agent.run(question).await;
    interrupt.abort();
    let _ = printer.await;

    if session.show_steps && !result.transcript.is_empty() {
        eprintln!("{}", utils::format_transcript(&result.transcript));
    }
    println!("{}", result.output);
    for artifact in result.artifacts() {
        println!("  -> {}", artifact.path.display());
    }
    if !result.is_ok() {
        eprintln!(
            "[{} after {} iterations, {:.1}s]",
            result.status,
            result.iterations,
            result.elapsed.as_secs_f64()
        );
    }
    session.artifacts.extend(result.artifacts().cloned());
    result
}

async fn write_report(
    agent: &Agent,
    cfg: &Config,
    session: &Session,
    email: Option<String>,
) -> anyhow::Result<()> {
    if agent.history().is_empty() {
        println!("Nothing to report yet.");
        return Ok(());
    }
    let content = report::render(agent.history().messages(), &session.artifacts, agent.model_id());
    let path = report::write(&cfg.report_dir(), &content).context("cannot write report")?;
    println!("Report written to {}", path.display());

    if let Some(to) = email {
        if !agent.registry().contains("send_email") {
            println!("Email is disabled; enable [tools] email in the config.");
            return Ok(());
        }
        let input = serde_json::json!({ "report_path": path, "to": to }).to_string();
        match agent.registry().invoke("send_email", &input).await {
            Ok(output) => println!("{}", output.text),
            Err(e) => eprintln!("{}", e),
        }
    }
    Ok(())
}

async fn run_interactive(
    agent: &mut Agent,
    session: &mut Session,
    cfg: &Config,
) -> anyhow::Result<()> {
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input, agent) {
            match result {
                commands::CommandResult::Clear => {
                    agent.clear_history();
                    session.artifacts.clear();
                    println!("Cleared conversation.");
                }
                commands::CommandResult::Exit => break,
                commands::CommandResult::Message(msg) => println!("{}", msg),
                commands::CommandResult::ToggleSteps => {
                    session.show_steps = !session.show_steps;
                    println!(
                        "Reasoning steps {}.",
                        if session.show_steps { "shown" } else { "hidden" }
                    );
                }
                commands::CommandResult::Report { email } => {
                    if let Err(e) = write_report(agent, cfg, session, email).await {
                        eprintln!("Error: {:#}", e);
                    }
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        ask(agent, session, input).await;
        println!();
    }

    Ok(())
}
