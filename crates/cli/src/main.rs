use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use doctalk_core::{
    build_graph, load, persist, resolve_config, CallParams, ChatMessage, ChatSession,
    ConfigOverrides, Graph, LlmClient, ModelConfig, OpenAiCompatClient, QueryOptions,
    SessionRecord, SessionStore, StoredMessage,
};

#[derive(Parser)]
#[command(name = "doctalk", about = "Answer questions about a codebase using retrieval-grounded chat")]
struct Cli {
    /// Resume an existing conversation by id.
    #[arg(short = 'c', long = "continue")]
    continue_id: Option<String>,

    /// List stored session ids and exit.
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Delete a stored session by id and exit.
    #[arg(short = 'd', long = "delete")]
    delete: Option<String>,

    /// Source of the code tree (local path or host/user/repo reference).
    #[arg(long)]
    code: Option<String>,

    /// Source of the docs tree.
    #[arg(long)]
    docs: Option<String>,

    /// Glob pattern to exclude from indexing; repeatable.
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Identifier used to key the persisted index and remote clone cache.
    #[arg(long = "cache-id")]
    cache_id: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Build the knowledge graph and persist it to the cache, without chatting.
    Index,
    /// Build/load the graph and render one retrieval answer, without an LLM call.
    Ask { question: Vec<String> },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("doctalk=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> doctalk_core::Result<()> {
    let project_dir = std::env::current_dir()?;
    let overrides = ConfigOverrides {
        code: cli.code.clone(),
        docs: cli.docs.clone(),
        exclude: cli.exclude.clone(),
        cache_root: None,
        api_base_url: None,
    };
    let config = resolve_config(&project_dir, overrides)?;
    let sessions = SessionStore::new(config.cache_root.join("sessions"));

    if cli.list {
        for id in sessions.list()? {
            println!("{id}");
        }
        return Ok(());
    }

    if let Some(id) = &cli.delete {
        sessions.delete(id)?;
        println!("deleted {id}");
        return Ok(());
    }

    match cli.command {
        Some(Command::Index) => {
            let graph = index(&cli, &config)?;
            println!("indexed {} nodes", graph.nodes.len());
            Ok(())
        }
        Some(Command::Ask { ref question }) => {
            let graph = index(&cli, &config)?;
            let question = question.join(" ");
            let answer = doctalk_core::query(&graph, &question, &QueryOptions::default());
            println!("{answer}");
            Ok(())
        }
        None => chat(&cli, &config, &sessions),
    }
}

fn cache_index_path(config: &doctalk_core::ResolvedConfig, cli: &Cli) -> PathBuf {
    let id = cli.cache_id.as_deref().unwrap_or("default");
    config.cache_root.join(format!("{id}.c4ai"))
}

fn index(cli: &Cli, config: &doctalk_core::ResolvedConfig) -> doctalk_core::Result<Graph> {
    let index_path = cache_index_path(config, cli);

    let graph = build_graph(config.code_root.as_deref(), config.docs_root.as_deref(), &config.exclude)?;

    if let Some(parent) = index_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let params = doctalk_core::BuildParams {
        code_root: config.code_root.as_ref().map(|p| p.display().to_string()),
        docs_root: config.docs_root.as_ref().map(|p| p.display().to_string()),
        exclude: config.exclude.clone(),
    };
    persist(&index_path, &graph, &params)?;

    Ok(graph)
}

fn load_or_build(cli: &Cli, config: &doctalk_core::ResolvedConfig) -> doctalk_core::Result<Graph> {
    let index_path = cache_index_path(config, cli);
    if index_path.exists() {
        Ok(load(&index_path)?.graph)
    } else {
        index(cli, config)
    }
}

fn chat(cli: &Cli, config: &doctalk_core::ResolvedConfig, sessions: &SessionStore) -> doctalk_core::Result<()> {
    let Ok(api_key) = std::env::var("DOCTALK_API_KEY") else {
        eprintln!("DOCTALK_API_KEY is not set; use the `index` or `ask` subcommands for key-free retrieval");
        return Ok(());
    };

    let graph = Arc::new(load_or_build(cli, config)?);
    let client = OpenAiCompatClient::new(
        config.api_base_url.clone(),
        api_key,
        ModelConfig { decision_model: config.decision_model.clone(), generation_model: config.generation_model.clone() },
    );

    let (session_id, mut chat_session) = match &cli.continue_id {
        Some(id) => {
            let record = sessions.load(id)?;
            (record.id.clone(), restore_session(record))
        }
        None => (uuid::Uuid::new_v4().to_string(), ChatSession::new()),
    };

    println!("doctalk session {session_id} — type 'exit' to quit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        let mut stdout = io::stdout();
        tokio_run(chat_session.ask(
            &graph,
            question,
            &client as &dyn LlmClient,
            CallParams::default(),
            &mut |chunk: &str| {
                let _ = stdout.write_all(chunk.as_bytes());
                let _ = stdout.flush();
            },
        ));
        println!();

        save_session(sessions, &session_id, &chat_session)?;
    }

    Ok(())
}

fn tokio_run<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to start tokio runtime")
        .block_on(fut)
}

fn restore_session(record: SessionRecord) -> ChatSession {
    let mut session = ChatSession::new();
    for msg in record.messages {
        let role: &'static str = if msg.role == "user" { "user" } else { "assistant" };
        session.history.push(ChatMessage { role, content: msg.content });
    }
    session.contexts.restore(record.contexts);
    session
}

fn save_session(sessions: &SessionStore, id: &str, session: &ChatSession) -> doctalk_core::Result<()> {
    let record = SessionRecord {
        id: id.to_string(),
        messages: session.history.iter().map(StoredMessage::from).collect(),
        contexts: session.contexts.all_contexts(),
        created: chrono::Utc::now(),
    };
    sessions.save(&record)
}
