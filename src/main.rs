use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use skychat::cli::{Cli, Commands};
use skychat::config::Config;
use skychat::dispatch::Dispatcher;
use skychat::llm::AnthropicClient;
use skychat::project::{self, Project};
use skychat::server;
use skychat::shell::Repl;

fn setup_logging(config: &Config, verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skychat")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("skychat.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = if verbose {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn build_dispatcher(config: &Config) -> Result<Dispatcher<AnthropicClient>> {
    let llm = project::anthropic_client(config).context("Failed to create Anthropic client")?;
    let dispatcher = config
        .project
        .dispatcher(config, Arc::new(llm))
        .await
        .context(format!("Failed to set up the {} project", config.project))?;
    Ok(dispatcher)
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None | Some(Commands::Repl) => handle_repl_command(config).await,
        Some(Commands::Ask { text }) => handle_ask_command(&text.join(" "), config).await,
        Some(Commands::Serve { host, port }) => handle_serve_command(host.as_deref(), *port, config).await,
        Some(Commands::Tools) => handle_tools_command(config.project, config).await,
    }
}

async fn handle_repl_command(config: &Config) -> Result<()> {
    info!("Launching REPL for project {}", config.project);
    let dispatcher = build_dispatcher(config).await?;
    println!("{} {}", "Chatting with:".green(), config.project);

    let repl = Repl::new(Arc::new(dispatcher));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    repl.run(stdin, &mut stdout).await.context("REPL failed")?;
    Ok(())
}

async fn handle_ask_command(text: &str, config: &Config) -> Result<()> {
    let text = text.trim();
    if text.is_empty() {
        return Err(eyre!("Question cannot be empty"));
    }
    info!("Answering one-shot question: {}", text);

    let dispatcher = build_dispatcher(config).await?;
    let repl = Repl::new(Arc::new(dispatcher));
    let mut stdout = std::io::stdout();
    repl.ask(text, &mut stdout)
        .await
        .context("Failed to write answer")?
        .context("Query failed")?;
    Ok(())
}

async fn handle_serve_command(host: Option<&str>, port: Option<u16>, config: &Config) -> Result<()> {
    let host = host.unwrap_or(&config.server.host).to_string();
    let port = port.unwrap_or(config.server.port);
    info!("Serving project {} on {}:{}", config.project, host, port);

    let dispatcher = build_dispatcher(config).await?;
    println!("{} http://{}:{}", "Listening on".green(), host, port);
    server::serve(Arc::new(dispatcher), &host, port)
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn handle_tools_command(project: Project, config: &Config) -> Result<()> {
    info!("Listing tools for project {}", project);
    let gateway = project
        .gateway(config)
        .await
        .context(format!("Failed to set up the {} project", project))?;

    for spec in gateway.tools() {
        println!("{}", spec.name.cyan().bold());
        println!("  {}", spec.description.replace('\n', "\n  "));
        for param in &spec.params {
            let required = if param.required { "required" } else { "optional" };
            println!(
                "  - {} ({}, {}): {}",
                param.name.green(),
                param.param_type,
                required,
                param.description
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(project) = cli.project {
        config.project = project;
    }

    setup_logging(&config, cli.is_verbose()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
