// crates/flowcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowclient::{
    ChannelState, ClientConfig, ClientError, InteractionResponse, MessageCategory, NoticeLevel,
    Payload, PendingInteraction, Session, SessionUpdate, TimelineChange,
};
use flowcore::variables::ReferenceStatus;
use flowcore::{Graph, Node, Parameter, Value};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow execution client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph against an execution engine and chat with it
    Run {
        /// Path to graph JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Engine WebSocket base URL; the session id is appended
        #[arg(short, long, env = "FLOW_ENGINE_URL")]
        engine: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check every variable reference in a graph file
    Validate {
        /// Path to graph JSON file
        file: PathBuf,
    },

    /// Show fields as they display in the editor, with reference problems
    Fields {
        /// Path to graph JSON file
        file: PathBuf,

        /// Only this node
        #[arg(short, long)]
        node: Option<String>,
    },

    /// Create a new example graph
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, engine, verbose } => {
            let default_level = if verbose { "debug" } else { "warn" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .with_writer(std::io::stderr)
                .init();

            let mut config = ClientConfig::from_env();
            if let Some(url) = engine {
                config.engine_url = url;
            }
            run_graph(&file, config, verbose).await?;
        }

        Commands::Validate { file } => {
            if !validate_graph(&file)? {
                std::process::exit(1);
            }
        }

        Commands::Fields { file, node } => {
            show_fields(&file, node.as_deref())?;
        }

        Commands::Init { output } => {
            create_example_graph(&output)?;
        }
    }

    Ok(())
}

fn load_graph(file: &Path) -> Result<Graph> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    Graph::from_json(&json).with_context(|| format!("cannot parse {}", file.display()))
}

async fn run_graph(file: &Path, config: ClientConfig, verbose: bool) -> Result<()> {
    let graph = load_graph(file)?;
    println!("🚀 Running {} against {}", file.display(), config.engine_url);

    let mut session = Session::websocket(config);
    let mut console = Console::new(verbose);

    match session.start_run(&graph) {
        Ok(updates) => console.render(&session, &updates),
        Err(ClientError::Validation(errors)) => {
            println!("❌ Graph has {} invalid field(s):", errors.len());
            for error in &errors {
                println!("   • {}", error);
            }
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stopping = false;

    loop {
        tokio::select! {
            update = session.next_update() => match update {
                Some(updates) => console.render(&session, &updates),
                None => break,
            },
            line = lines.next_line(), if !console.round_over => match line? {
                Some(line) => {
                    if line.trim() == "/stop" {
                        session.stop()?;
                        stopping = true;
                    } else {
                        answer(&mut session, &mut console, line.trim());
                    }
                }
                None => {
                    session.stop()?;
                    stopping = true;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                if stopping {
                    break;
                }
                println!("\n⏹  Stopping run (press Ctrl-C again to quit)");
                session.stop()?;
                stopping = true;
            }
        }

        if console.round_over || session.channel_state() == ChannelState::Closed {
            break;
        }
    }

    session.close();
    Ok(())
}

fn answer(session: &mut Session, console: &mut Console, line: &str) {
    let Some(pending) = session.pending() else {
        println!("   (nothing to answer yet; /stop aborts the run)");
        return;
    };
    let response = match parse_response(pending, line) {
        Ok(response) => response,
        Err(hint) => {
            println!("   {}", hint);
            return;
        }
    };
    match session.submit(&response) {
        Ok(updates) => console.render(session, &updates),
        Err(e) => println!("   ⚠️  {}", e),
    }
}

/// Map a console line onto the pending interaction's shape.
fn parse_response(pending: &PendingInteraction, line: &str) -> Result<InteractionResponse, String> {
    match pending {
        PendingInteraction::Choice { options, .. } => {
            let by_index = line
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| options.get(i));
            by_index
                .or_else(|| options.iter().find(|o| o.id == line || o.label == line))
                .map(|o| InteractionResponse::Choice(o.id.clone()))
                .ok_or_else(|| "pick one of the listed options".to_string())
        }
        PendingInteraction::Text { default, .. } => {
            if line.is_empty() {
                default
                    .clone()
                    .map(InteractionResponse::Text)
                    .ok_or_else(|| "an answer is required".to_string())
            } else {
                Ok(InteractionResponse::Text(line.to_string()))
            }
        }
        PendingInteraction::Form { .. } => {
            let values: BTreeMap<String, String> = line
                .split(';')
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect();
            if values.is_empty() {
                Err("answer as key=value; key=value".to_string())
            } else {
                Ok(InteractionResponse::Form(values))
            }
        }
    }
}

/// Prints session updates; streamed text is written as it arrives.
struct Console {
    verbose: bool,
    printed: HashMap<String, usize>,
    round_over: bool,
}

impl Console {
    fn new(verbose: bool) -> Self {
        Self {
            verbose,
            printed: HashMap::new(),
            round_over: false,
        }
    }

    fn render(&mut self, session: &Session, updates: &[SessionUpdate]) {
        for update in updates {
            match update {
                SessionUpdate::Timeline(change) => self.timeline(session, change),
                SessionUpdate::NodeState { node_id, state } if self.verbose => {
                    println!("  ⚡ {} → {:?}", node_id, state);
                }
                SessionUpdate::NodeState { .. } => {}
                SessionUpdate::Notice(notice) => {
                    let icon = match notice.level {
                        NoticeLevel::Info => "ℹ️ ",
                        NoticeLevel::Warning => "⚠️ ",
                        NoticeLevel::Error => "❌",
                    };
                    println!("{} {}", icon, notice.text);
                }
                SessionUpdate::Channel(state) if self.verbose => {
                    println!("  🔌 channel {:?}", state);
                }
                SessionUpdate::Channel(_) => {}
            }
        }
        let _ = std::io::stdout().flush();
    }

    fn timeline(&mut self, session: &Session, change: &TimelineChange) {
        match change {
            TimelineChange::Appended(id) | TimelineChange::Updated(id) => {
                let Some(message) = session.timeline().get(id) else {
                    return;
                };
                match &message.payload {
                    Payload::Separator { reason } => {
                        match reason {
                            Some(reason) => println!("─── {} ───", reason),
                            None => println!("───"),
                        }
                        self.round_over = true;
                    }
                    Payload::NodeRun { node_id, name } if self.verbose => {
                        println!("  ▶️  {}", name.as_deref().unwrap_or(node_id));
                    }
                    Payload::NodeRun { .. } => {}
                    _ if message.category == MessageCategory::User => {}
                    _ => self.write_text(id, message.text().unwrap_or_default(), message.complete),
                }
            }
            TimelineChange::Completed(id) => {
                if let Some(message) = session.timeline().get(id) {
                    self.write_text(id, message.text().unwrap_or_default(), true);
                }
            }
            TimelineChange::Removed(_) => {}
            TimelineChange::InteractionRequested(pending) => prompt(pending),
            TimelineChange::InteractionCleared => {}
            TimelineChange::GuideQuestions(questions) => {
                for question in questions {
                    println!("  💡 {}", question);
                }
            }
        }
    }

    /// Print the part of a message not yet on screen.
    fn write_text(&mut self, id: &str, text: &str, complete: bool) {
        let shown = self.printed.entry(id.to_string()).or_insert(0);
        if *shown == 0 && !text.is_empty() {
            print!("🤖 ");
        }
        if let Some(rest) = text.get(*shown..) {
            print!("{}", rest);
        }
        *shown = text.len();
        if complete {
            println!();
        }
    }
}

fn prompt(pending: &PendingInteraction) {
    match pending {
        PendingInteraction::Choice { options, .. } => {
            for (i, option) in options.iter().enumerate() {
                println!("   {}) {}", i + 1, option.label);
            }
            print!("choice> ");
        }
        PendingInteraction::Text { prompt, default, .. } => {
            if let Some(prompt) = prompt {
                println!("   {}", prompt);
            }
            match default {
                Some(default) => print!("you [{}]> ", default),
                None => print!("you> "),
            }
        }
        PendingInteraction::Form { fields, .. } => {
            for field in fields {
                let marker = if field.required { "*" } else { "" };
                println!(
                    "   {}{} ({})",
                    field.label.as_deref().unwrap_or(&field.key),
                    marker,
                    field.key
                );
            }
            print!("form (key=value; ...)> ");
        }
    }
    let _ = std::io::stdout().flush();
}

/// Returns whether the graph is clean.
fn validate_graph(file: &Path) -> Result<bool> {
    println!("🔍 Validating graph: {}", file.display());
    let graph = load_graph(file)?;

    let errors = graph.resolver().validate_graph();
    let order = graph.execution_order();

    println!("   Nodes: {}", graph.nodes().len());
    println!("   Edges: {}", graph.edges().len());
    if let Err(e) = &order {
        println!("❌ {}", e);
    }
    if errors.is_empty() && order.is_ok() {
        println!("✅ Graph is valid");
        return Ok(true);
    }
    for error in &errors {
        println!("❌ {}", error);
    }
    Ok(false)
}

fn show_fields(file: &Path, only: Option<&str>) -> Result<()> {
    let graph = load_graph(file)?;
    if let Some(id) = only {
        if !graph.contains(id) {
            anyhow::bail!("no node '{}' in {}", id, file.display());
        }
    }

    for node in graph.nodes().iter().filter(|n| only.map_or(true, |id| n.id == id)) {
        println!("{} ({}, {})", node.name, node.node_type, node.id);
        for parameter in node.active_parameters() {
            if parameter.value.as_str().is_none() {
                continue;
            }
            let encoded = graph.encode_field(&node.id, &parameter.key)?;
            println!("   {}: {}", parameter.display_name(), encoded.display);
            for reference in encoded.references.iter().filter(|r| r.status != ReferenceStatus::Valid) {
                let what = match reference.status {
                    ReferenceStatus::Dangling => "missing",
                    ReferenceStatus::Ambiguous => "ambiguous",
                    ReferenceStatus::Valid => continue,
                };
                println!("      ⚠️  {} is {} ({})", reference.label, what, reference.reference);
            }
        }
    }
    Ok(())
}

fn create_example_graph(output: &Path) -> Result<()> {
    let mut graph = Graph::new();

    let start = graph.add_node(
        Node::new("start", "Start")
            .with_parameter(Parameter::new("guide_word", "Hello! What should I echo?"))
            .with_parameter(Parameter::new(
                "guide_question",
                Value::from(json!(["Echo my name", "Echo a joke"])),
            ))
            .with_position(100.0, 100.0),
    )?;
    let input = graph.add_node(
        Node::new("input", "User Input")
            .with_parameter(Parameter::new("user_input", "").with_label("Question").exported())
            .with_position(300.0, 100.0),
    )?;
    let llm = graph.add_node(
        Node::new("llm", "Echo LLM")
            .with_parameter(
                Parameter::new("user_prompt", format!("You asked: {{{{#{}.user_input#}}}}", input))
                    .required(),
            )
            .with_parameter(Parameter::new("output", "").with_label("Reply").exported())
            .with_position(500.0, 100.0),
    )?;
    let confirm = graph.add_node(
        Node::new("output", "Confirm")
            .with_parameter(Parameter::new("message", format!("Happy with: {{{{#{}.output#}}}}?", llm)))
            .with_parameter(Parameter::new("output_type", "choice"))
            .with_parameter(Parameter::new(
                "options",
                Value::from(json!([
                    {"id": "yes", "label": "Yes"},
                    {"id": "no", "label": "No"}
                ])),
            ))
            .with_position(700.0, 100.0),
    )?;
    let end = graph.add_node(Node::new("end", "End").with_position(900.0, 100.0))?;

    graph.connect(&start, &input)?;
    graph.connect(&input, &llm)?;
    graph.connect(&llm, &confirm)?;
    graph.connect(&confirm, &end)?;

    std::fs::write(output, graph.to_json()?)?;

    println!("✨ Created example graph: {}", output.display());
    println!();
    println!("Start the development engine, then run it with:");
    println!("  flowserver &");
    println!("  flow run --file {}", output.display());

    Ok(())
}
