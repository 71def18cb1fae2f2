// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! mcp-router entry point - CLI commands and the chat REPL.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use mcp_router::config::{self, CliOptions, ResolvedConfig};
use mcp_router::index::{create_embedding_provider, IndexBuilder, ServerStore, VectorIndex};
use mcp_router::mcp::{enumerate_capabilities, list_tool_schemas, McpConfig, StdioLauncher};
use mcp_router::routing::{Assistant, RoutingTurnState, StageProviders};
use mcp_router::telemetry::{init_telemetry, TelemetryConfig};

/// Route conversations to the right MCP server.
#[derive(Parser)]
#[command(name = "mcp-router")]
#[command(author, version, about = "Route conversations to the right MCP server", long_about = None)]
struct Cli {
    /// Configuration file (replaces the workspace search)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server configuration file
    #[arg(short, long, global = true, env = "MCP_ROUTER_SERVERS")]
    servers: Option<PathBuf>,

    /// Decision model provider
    #[arg(short, long, global = true, env = "MCP_ROUTER_PROVIDER")]
    provider: Option<Provider>,

    /// Decision model
    #[arg(short, long, global = true, env = "MCP_ROUTER_MODEL")]
    model: Option<String>,

    /// Base URL of the provider API
    #[arg(long, global = true, env = "MCP_ROUTER_BASE_URL")]
    base_url: Option<String>,

    /// Capability index database
    #[arg(long, global = true)]
    index_path: Option<PathBuf>,

    /// Servers retrieved per routing query
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Show debug logs, tool calls and metrics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Decision model providers.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Provider {
    /// OpenAI - GPT models
    Openai,
    /// Ollama - local models
    Ollama,
    /// Any OpenAI-compatible endpoint (requires --base-url)
    OpenaiCompatible,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Openai => write!(f, "openai"),
            Provider::Ollama => write!(f, "ollama"),
            Provider::OpenaiCompatible => write!(f, "openai-compatible"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the capability index from every enabled server
    Build,

    /// Answer one prompt and exit
    Ask {
        prompt: String,
        /// Print the full conversation state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive conversation
    Chat,

    /// List configured servers
    Servers,

    /// Print the capability description of one server
    Describe { server: String },

    /// Print the tool schemas of one server
    Tools {
        server: String,
        /// Print schemas as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved configuration
    Config,
}

/// Configuration and servers for one invocation.
struct Context {
    config: ResolvedConfig,
    servers: McpConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_telemetry(&TelemetryConfig::from_verbosity(cli.verbose))?;

    let ctx = load_context(&cli)?;
    let verbose = cli.verbose;

    match cli.command {
        Commands::Build => build(&ctx).await?,
        Commands::Ask { prompt, json } => ask(&ctx, &prompt, json, verbose).await?,
        Commands::Chat => chat(&ctx, verbose).await?,
        Commands::Servers => list_servers(&ctx),
        Commands::Describe { server } => describe(&ctx, &server).await?,
        Commands::Tools { server, json } => tools(&ctx, &server, json).await?,
        Commands::Config => println!("{}", serde_json::to_string_pretty(&ctx.config)?),
    }

    #[cfg(feature = "telemetry")]
    if verbose {
        let report = mcp_router::telemetry::GLOBAL_METRICS.snapshot().format_report();
        eprintln!("\n{}", report.dimmed());
    }

    Ok(())
}

fn load_context(cli: &Cli) -> anyhow::Result<Context> {
    let cwd = std::env::current_dir()?;
    let workspace_root = config::find_workspace_root(&cwd).unwrap_or(cwd);

    let options = CliOptions {
        provider: cli.provider.map(|p| p.to_string()),
        model: cli.model.clone(),
        base_url: cli.base_url.clone(),
        servers_file: cli.servers.clone(),
        index_path: cli.index_path.clone(),
        top_k: cli.top_k,
    };

    let config = config::load_config(&workspace_root, cli.config.as_deref(), options)?;
    let servers = config::load_servers(&config, &workspace_root)?;
    Ok(Context { config, servers })
}

fn open_index(config: &ResolvedConfig) -> anyhow::Result<Arc<VectorIndex>> {
    let store = ServerStore::open(&config.index_path)
        .with_context(|| format!("opening index at {}", config.index_path.display()))?;
    let embedder = create_embedding_provider(&config.embedding)?;
    Ok(Arc::new(VectorIndex::new(store, embedder)))
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template("{spinner} {msg}");
    if let Ok(style) = style {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

async fn build(ctx: &Context) -> anyhow::Result<()> {
    let index = open_index(&ctx.config)?;
    let builder = IndexBuilder::new(Arc::new(StdioLauncher::new()), index);

    let count = ctx.servers.enabled_servers().count();
    let pb = spinner(&format!("Indexing {} servers...", count));
    let result = builder.build(&ctx.servers).await;
    pb.finish_and_clear();

    println!("{}", serde_json::to_string(&result)?);
    if let Some(error) = &result.error {
        eprintln!("{} {}", "✗".red(), error.red());
        std::process::exit(1);
    }
    eprintln!("{} Indexed {} servers", "✓".green(), result.indexed);
    Ok(())
}

fn assistant(ctx: &Context) -> anyhow::Result<Assistant> {
    let providers = StageProviders::from_config(&ctx.config)?;
    let index = open_index(&ctx.config)?;
    Ok(Assistant::new(
        &ctx.config,
        providers,
        index,
        Arc::new(StdioLauncher::new()),
        ctx.servers.clone(),
    ))
}

/// Print the invocations made since `seen`.
fn print_invocations(state: &RoutingTurnState, seen: usize) {
    for record in state.invocations.iter().skip(seen) {
        let marker = if record.is_error { "✗".red() } else { "→".cyan() };
        eprintln!(
            "{} {}",
            marker,
            format!("{}/{} ({}ms)", record.server, record.tool, record.duration_ms).dimmed()
        );
    }
}

async fn ask(ctx: &Context, prompt: &str, json: bool, verbose: bool) -> anyhow::Result<()> {
    let assistant = assistant(ctx)?;

    let pb = spinner("Routing...");
    let result = assistant.ask(RoutingTurnState::new(), prompt).await;
    pb.finish_and_clear();
    let state = result?;

    if verbose {
        print_invocations(&state, 0);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        println!("{}", state.final_reply().unwrap_or_default());
    }
    Ok(())
}

async fn chat(ctx: &Context, verbose: bool) -> anyhow::Result<()> {
    let assistant = assistant(ctx)?;
    let mut editor = DefaultEditor::new()?;
    let mut state = RoutingTurnState::new();

    println!(
        "{} {} servers configured. {} starts over, {} quits.",
        "mcp-router".bright_blue().bold(),
        ctx.servers.enabled_servers().count(),
        "/reset".cyan(),
        "/exit".cyan()
    );

    loop {
        let line = match editor.readline("› ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(trimmed);

        match trimmed {
            "/exit" | "/quit" => break,
            "/reset" => {
                state = RoutingTurnState::new();
                println!("{}", "Conversation cleared.".dimmed());
                continue;
            }
            _ => {}
        }

        let seen = state.invocations.len();
        let pb = spinner("Thinking...");
        let result = assistant.ask(state.clone(), trimmed).await;
        pb.finish_and_clear();

        match result {
            Ok(next) => {
                if verbose {
                    print_invocations(&next, seen);
                }
                if let Some(server) = &next.current_server {
                    eprintln!("{}", format!("[{}]", server).dimmed());
                }
                println!("{}\n", next.final_reply().unwrap_or_default());
                state = next;
            }
            Err(e) => eprintln!("{} {}", "Error:".red(), e),
        }
    }

    Ok(())
}

fn list_servers(ctx: &Context) {
    if ctx.servers.servers.is_empty() {
        println!("{}", "No servers configured.".yellow());
        return;
    }

    for (name, server) in &ctx.servers.servers {
        let status = if server.enabled { "✓".green() } else { "-".dimmed() };
        let mode = match server.interface_spec_path() {
            Some(spec) => format!("openapi: {}", spec.display()),
            None => "native".to_string(),
        };
        println!(
            "{} {} [{}] {}",
            status,
            name.bright_white(),
            mode.cyan(),
            format!("{} {}", server.command, server.args.join(" ")).dimmed()
        );
    }
}

fn server_config<'a>(ctx: &'a Context, server: &str) -> anyhow::Result<&'a mcp_router::ServerConfig> {
    ctx.servers
        .get(server)
        .ok_or_else(|| anyhow::anyhow!("Unknown server: {}", server))
}

async fn describe(ctx: &Context, server: &str) -> anyhow::Result<()> {
    let config = server_config(ctx, server)?;
    let description = enumerate_capabilities(&StdioLauncher::new(), server, config).await?;
    print!("{}", description);
    Ok(())
}

async fn tools(ctx: &Context, server: &str, json: bool) -> anyhow::Result<()> {
    let config = server_config(ctx, server)?;
    let schemas = list_tool_schemas(&StdioLauncher::new(), server, config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&schemas)?);
        return Ok(());
    }

    for schema in &schemas {
        let marker = if schema.is_adapted() { " (openapi)" } else { "" };
        println!("{}{}", schema.name.bright_white().bold(), marker.cyan());
        if !schema.description.is_empty() {
            println!("  {}", schema.description);
        }
    }
    if schemas.is_empty() {
        println!("{}", "No tools.".yellow());
    }
    Ok(())
}
