mod config;
mod llm;
mod logging;
mod session;
mod storage;
mod workflow;

use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;

use crate::config::AppConfig;
use crate::llm::{LlmSettings, Provider};
use crate::session::{NOT_INITIALIZED_REPLY, ProjectSession, SessionStatus};
use crate::workflow::{TaskNode, WorkflowStep};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "plw",
    version,
    about = "Conversational project planner: interview, task tree, decomposition"
)]
pub struct Cli {
    /// Project directory to open (defaults to the current directory)
    pub project_dir: Option<PathBuf>,

    /// Chat backend: openai, anthropic, google or ollama
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Model id, e.g. gpt-4o or llama3
    #[arg(long)]
    pub model: Option<String>,

    /// API key for the chosen provider (falls back to the provider's env var)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Override the provider's API base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Log level (error,warn,info,debug,trace)
    #[arg(long)]
    pub log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let cfg = AppConfig::from_cli(cli)?;
    logging::init_logging(&cfg.log_level)?;
    info!(root = %cfg.project_root.display(), "starting planner");

    run_repl(cfg).await
}

fn print_help() {
    println!(
        "/help                    Show help\n\
         /open <path>             Open or resume a project\n\
         /status                  Show project, workflow step and model\n\
         /models [provider] [api_key]  List models (openai, anthropic, google, ollama)\n\
         /use <provider> <model> [api_key]  Pick the model to chat with\n\
         /tasks                   Show the task tree\n\
         /quit                    Quit\n\
         Anything else is sent to the planner."
    );
}

async fn run_repl(cfg: AppConfig) -> Result<()> {
    println!("planweaver - type /help for commands");

    let mut session = match ProjectSession::open(&cfg.project_root, &cfg) {
        Ok(s) => {
            println!("Opened project at {}", s.root().display());
            Some(s)
        }
        Err(e) => {
            eprintln!("Could not open {}: {e}", cfg.project_root.display());
            None
        }
    };

    let stdin = io::stdin();
    for line in BufReader::new(stdin).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/help" => {
                print_help();
                continue;
            }
            "/quit" | "/exit" => break,
            "/status" => {
                print_status(session.as_ref());
                continue;
            }
            "/tasks" => {
                match session.as_ref() {
                    Some(session) => match session.tasks() {
                        Ok(Some(tree)) => print_tree(&tree, 0),
                        Ok(None) => println!("No task tree yet; finish task generation first."),
                        Err(e) => eprintln!("tasks error: {e}"),
                    },
                    None => println!("{NOT_INITIALIZED_REPLY}"),
                }
                continue;
            }
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("/open") {
            let path = rest.trim();
            if path.is_empty() {
                eprintln!("usage: /open <path>");
                continue;
            }
            match ProjectSession::open(path, &cfg) {
                Ok(s) => {
                    println!("Opened project at {}", s.root().display());
                    session = Some(s);
                }
                Err(e) => eprintln!("open error: {e}"),
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("/models") {
            let Some(session) = session.as_ref() else {
                println!("{NOT_INITIALIZED_REPLY}");
                continue;
            };
            let active = session.active_model().map(|(p, _)| p);
            let Some((provider, api_key)) = parse_models_args(rest, active) else {
                eprintln!("usage: /models [openai|anthropic|google|ollama] [api_key]");
                continue;
            };
            match session.models(provider, api_key.as_deref()).await {
                Ok(models) => {
                    for m in models {
                        println!("{}  {}", m.id, m.name);
                    }
                }
                Err(e) => eprintln!("models error: {e}"),
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("/use") {
            let Some(session) = session.as_mut() else {
                println!("{NOT_INITIALIZED_REPLY}");
                continue;
            };
            let mut parts = rest.split_whitespace();
            let (Some(provider), Some(model)) = (parts.next(), parts.next()) else {
                eprintln!("usage: /use <provider> <model> [api_key]");
                continue;
            };
            let Ok(provider) = provider.parse::<Provider>() else {
                eprintln!("unknown provider: {provider}");
                continue;
            };
            let choice = LlmSettings {
                provider,
                model_id: model.to_string(),
                api_key: parts.next().map(str::to_string),
            };
            match session.configure_llm(choice) {
                Ok(()) => println!("Now chatting with {provider} / {model}"),
                Err(e) => eprintln!("could not save the model choice: {e}"),
            }
            continue;
        }

        if line.starts_with('/') {
            eprintln!("unknown command: {line} (try /help)");
            continue;
        }

        match session.as_mut() {
            Some(session) => {
                let turn = session.chat(line).await;
                println!("{}", turn.content);
            }
            None => println!("{NOT_INITIALIZED_REPLY}"),
        }
    }

    Ok(())
}

fn print_status(session: Option<&ProjectSession>) {
    let status = session
        .map(ProjectSession::status)
        .unwrap_or_else(SessionStatus::idle);
    if !status.is_running {
        println!("No project open.");
        return;
    }
    if let Some(path) = &status.project_path {
        println!("Project: {}", path.display());
    }
    if let Some(session) = session {
        let step = session.step();
        println!(
            "Step:    {} of {} ({})",
            step.number(),
            WorkflowStep::COUNT,
            step.title()
        );
        match session.active_model() {
            Some((provider, model)) => println!("Model:   {provider} / {model}"),
            None => println!("Model:   none; replies are mocked until /use picks one"),
        }
    }
}

fn print_tree(node: &TaskNode, depth: usize) {
    println!("{}- {} [{}]", "  ".repeat(depth), node.title, node.id);
    if let Some(children) = &node.children {
        for child in children {
            print_tree(child, depth + 1);
        }
    }
}

/// `/models` arguments: an optional provider (falling back to the active
/// one) and an optional API key for the listing call.
fn parse_models_args(rest: &str, active: Option<Provider>) -> Option<(Provider, Option<String>)> {
    let mut parts = rest.split_whitespace();
    let provider = match parts.next() {
        Some(raw) => raw.parse().ok()?,
        None => active?,
    };
    Some((provider, parts.next().map(str::to_string)))
}
