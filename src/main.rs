use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use flowbot_core::traits::FlowRepository;
use flowbot_core::{AppConfig, EventBus, FlowEvent, FlowGraph};
use flowbot_engine::{diagnose, ConversationService, Interpreter, Reply};
use flowbot_gateway::{AppState, GatewayServer};
use flowbot_store::SqliteStore;

#[derive(Parser)]
#[command(name = "flowbot", version, about = "Run visual chatbot flows over HTTP")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve,
    /// Store a flow graph from a JSON file
    Import {
        /// Path to the flow JSON ({nodes, edges})
        file: PathBuf,
        /// Flow identifier used in the message URL
        #[arg(long)]
        flow_id: String,
        /// Owner the flow belongs to
        #[arg(long)]
        owner: String,
    },
    /// Check a flow graph and report problems
    Validate {
        file: PathBuf,
    },
    /// Talk to a flow in the terminal
    Chat {
        file: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowbot=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "flowbot", &mut io::stdout());
        return Ok(());
    }

    // Validation needs no config either
    if let Commands::Validate { file } = &cli.command {
        return validate(file);
    }

    let config = AppConfig::load_or_default(&cli.config)?;
    if !cli.config.exists() {
        debug!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Serve => serve(config).await?,
        Commands::Import {
            file,
            flow_id,
            owner,
        } => {
            let graph = read_graph(&file)?;
            report(&graph);
            let store = SqliteStore::open(&config.database_path())?;
            store.save_flow(&flow_id, &owner, &graph).await?;
            println!(
                "Imported {} nodes and {} edges as {}/{}",
                graph.nodes.len(),
                graph.edges.len(),
                owner,
                flow_id
            );
        }
        Commands::Chat { file } => {
            let graph = read_graph(&file)?;
            report(&graph);
            run_chat(&config, graph).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { .. } | Commands::Completions { .. } => {
            unreachable!("handled before config load")
        }
    }

    Ok(())
}

fn read_graph(path: &Path) -> anyhow::Result<FlowGraph> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    Ok(FlowGraph::from_json(&json)?)
}

/// Log every finding; none of them stop a flow from running.
fn report(graph: &FlowGraph) {
    for finding in diagnose(graph) {
        warn!(finding = %finding, "Flow graph problem");
    }
}

fn validate(file: &Path) -> anyhow::Result<()> {
    let graph = read_graph(file)?;
    let findings = diagnose(&graph);
    if findings.is_empty() {
        println!(
            "OK: {} nodes, {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );
        return Ok(());
    }
    for finding in &findings {
        println!("  {}", finding);
    }
    anyhow::bail!("{} problem(s) found in {}", findings.len(), file.display())
}

fn build_service(
    config: &AppConfig,
    store: Arc<SqliteStore>,
    events: Option<Arc<EventBus>>,
) -> ConversationService {
    let mut interpreter = Interpreter::new(flowbot_llm::create_delegate(config), &config.engine);
    if let Some(events) = events {
        interpreter = interpreter.with_events(events);
    }
    ConversationService::new(
        store.clone(),
        store,
        interpreter,
        config.engine.session_retries,
    )
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(&config.database_path())?);
    let event_bus = Arc::new(EventBus::default());

    // Step trace
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "Step trace lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let service = build_service(&config, store, Some(event_bus));
    let state = Arc::new(AppState::new(service));
    info!(bind = %config.gateway.bind, "Starting gateway");
    let server = GatewayServer::new(config.gateway.clone(), state);

    let cancel = tokio_util::sync::CancellationToken::new();
    let cancel_clone = cancel.clone();

    // Graceful shutdown on Ctrl-C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down gateway...");
        cancel_clone.cancel();
    });

    server.run(cancel).await
}

fn log_event(event: &FlowEvent) {
    match event {
        FlowEvent::RunStarted {
            flow_id,
            session_key,
            resume,
        } => debug!(flow_id = %flow_id, session_key = %session_key, resume = ?resume, "run started"),
        FlowEvent::NodeEntered {
            node_id,
            node_type,
            step,
        } => debug!(node_id = %node_id, node_type = %node_type, step, "node entered"),
        FlowEvent::NodeExited {
            node_id,
            transition,
        } => debug!(node_id = %node_id, transition = %transition, "node exited"),
        FlowEvent::ExpressionRejected {
            node_id,
            expression,
            error,
        } => debug!(node_id = %node_id, expression = %expression, error = %error, "expression rejected"),
        FlowEvent::ActionRecorded {
            node_id,
            method,
            url,
        } => debug!(node_id = %node_id, method = %method, url = %url, "action recorded"),
        FlowEvent::BrokenReference { node_id } => debug!(node_id = %node_id, "broken reference"),
        FlowEvent::StepLimitReached { node_id, max_steps } => {
            debug!(node_id = %node_id, max_steps, "step limit reached")
        }
        FlowEvent::RunFinished {
            flow_id,
            session_key,
            steps,
            resume,
        } => debug!(flow_id = %flow_id, session_key = %session_key, steps, resume = ?resume, "run finished"),
    }
}

const CHAT_OWNER: &str = "local";
const CHAT_FLOW: &str = "chat";

async fn run_chat(config: &AppConfig, graph: FlowGraph) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::in_memory()?);
    store.save_flow(CHAT_FLOW, CHAT_OWNER, &graph).await?;
    let service = build_service(config, store, None);
    let mut session_key = uuid::Uuid::new_v4().to_string();

    println!("Flowbot v{}", env!("CARGO_PKG_VERSION"));
    println!("Type /reset to start over, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }

        match input.trim() {
            "/quit" | "/exit" | "/q" => break,
            "/reset" => {
                session_key = uuid::Uuid::new_v4().to_string();
                println!("(new session)\n");
                continue;
            }
            _ => {}
        }

        // Message text goes through untrimmed, as it would over HTTP
        let text = input.trim_end_matches(['\r', '\n']);
        let outcome = service
            .handle_message(CHAT_OWNER, CHAT_FLOW, &session_key, text)
            .await?;
        println!("{}", render(&outcome.reply));
        for action in &outcome.actions {
            println!("  (action {} {})", action.method, action.url);
        }
        if outcome.truncated {
            println!("  (stopped after {} steps)", outcome.steps);
        }
        println!();
    }

    Ok(())
}

fn render(reply: &Reply) -> String {
    match reply {
        Reply::Text(text) => text.clone(),
        Reply::Button { text, buttons } => {
            let options: Vec<String> = buttons.iter().map(|b| format!("[{}]", b)).collect();
            format!("{}\n{}", text, options.join(" "))
        }
        Reply::Media { text, images } => {
            let mut out = text.clone();
            for image in images {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("<image {}>", image.url));
                if !image.caption.is_empty() {
                    out.push_str(&format!(" {}", image.caption));
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbot_core::MediaItem;

    #[test]
    fn test_render_buttons() {
        let reply = Reply::Button {
            text: "Pick one".into(),
            buttons: vec!["Yes".into(), "No".into()],
        };
        assert_eq!(render(&reply), "Pick one\n[Yes] [No]");
    }

    #[test]
    fn test_render_media() {
        let reply = Reply::Media {
            text: String::new(),
            images: vec![MediaItem::new("https://cdn.example/a.png", "A map")],
        };
        assert_eq!(render(&reply), "<image https://cdn.example/a.png> A map");
    }

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
        let cli = Cli::parse_from(["flowbot", "import", "f.json", "--flow-id", "bot", "--owner", "acme"]);
        assert!(matches!(cli.command, Commands::Import { .. }));
    }
}
