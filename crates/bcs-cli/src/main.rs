//! Interactive operator console over the command server.
//!
//! Lines are fed through `runsource` with continuation prompts for
//! incomplete input; lines starting with `:` are console meta-commands
//! (`:help` lists them). Ctrl-C aborts whatever is running without leaving
//! the console.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bcs_core::{MapAuthoriser, ServerEvent, ServerObserver, ThreadEventKind};
use bcs_server::{CommandServer, ServerConfig, StubInterpreter};
use bcs_session::SessionRegistry;

const CONSOLE_IDENTITY: &str = "local-console";
const OPERATOR_LEVEL: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "bcs", version, about = "Beamline command server console")]
struct Cli {
    /// Script executed while the server configures.
    #[arg(long, value_name = "FILE")]
    startup_script: Option<PathBuf>,

    /// Username the console session registers with.
    #[arg(long, default_value = "operator")]
    user: String,

    /// Visit recorded for the session.
    #[arg(long, default_value = "cm-0000")]
    visit: String,

    /// Emit server events as JSON lines instead of formatted text.
    #[arg(long)]
    json: bool,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log);

    let interpreter = Arc::new(StubInterpreter::new());
    let authoriser = Arc::new(MapAuthoriser::with_default(HashMap::new(), OPERATOR_LEVEL));
    let sessions = Arc::new(SessionRegistry::new(authoriser));
    let config = ServerConfig {
        startup_script: cli.startup_script.clone(),
        ..ServerConfig::default()
    };
    let server = Arc::new(
        CommandServer::builder(interpreter, sessions)
            .config(config)
            .observer(Arc::new(ConsoleObserver { json: cli.json }))
            .build(),
    );
    server.configure().context("configure command server")?;

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    server
        .add_facade(CONSOLE_IDENTITY, &hostname, &cli.user, &cli.user, &cli.visit)
        .context("register console session")?;
    if server.request_baton(CONSOLE_IDENTITY) {
        tracing::debug!("console holds the baton");
    }

    let signal_server = server.clone();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::info!("interrupt received, aborting commands");
            let server = signal_server.clone();
            // Device stops may block; keep the runtime responsive.
            tokio::task::spawn_blocking(move || server.abort_commands(false));
        }
    });

    let console_server = server.clone();
    tokio::task::spawn_blocking(move || run_console(&console_server)).await??;

    server.remove_facade(CONSOLE_IDENTITY);
    Ok(())
}

fn setup_logging(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_console(server: &CommandServer) -> Result<()> {
    let stdin = io::stdin();
    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { ">>> " } else { "... " };
        print!("{prompt}");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            println!();
            return Ok(());
        }
        let line = line.trim_end_matches(['\n', '\r']);

        if pending.is_empty() {
            if let Some(meta) = line.strip_prefix(':') {
                if !run_meta(server, meta) {
                    return Ok(());
                }
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
        }

        let source = if pending.is_empty() {
            line.to_string()
        } else {
            format!("{pending}\n{line}")
        };
        if server.runsource(&source, CONSOLE_IDENTITY) {
            pending.clear();
        } else {
            pending = source;
        }
    }
}

/// Handles one `:` meta-command; returns `false` when the console should
/// exit.
fn run_meta(server: &CommandServer, meta: &str) -> bool {
    let mut parts = meta.trim().splitn(2, ' ');
    let verb = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();
    match verb {
        "quit" | "q" => return false,
        "status" => {
            let status = server.server_status();
            println!("script {:?}, scan {:?}", status.script, status.scan);
        }
        "threads" => {
            let threads = server.command_threads();
            if threads.is_empty() {
                println!("no workers");
            }
            for info in threads {
                println!(
                    "{:>4}  {:<12} {:<9} {:?}  {}",
                    info.id,
                    info.name,
                    info.kind.label(),
                    info.state,
                    info.command
                );
            }
        }
        "clients" => {
            for client in server.all_clients() {
                println!(
                    "{:>4}  {:<12} level {}  baton {}",
                    client.index,
                    client.username,
                    client.authorisation_level,
                    if client.holds_baton { "yes" } else { "no" }
                );
            }
        }
        "pause" => server.pause_script(),
        "resume" => server.resume_script(),
        "abort" => server.abort_commands(false),
        "halt" => server.abort_commands(true),
        "restart" => {
            if let Err(err) = server.restart() {
                println!("restart failed: {err}");
            }
        }
        "eval" => println!("{}", server.evaluate_command(rest, CONSOLE_IDENTITY)),
        "script" => match std::fs::read_to_string(rest) {
            Ok(source) => match server.run_script(&source, CONSOLE_IDENTITY).kind {
                ThreadEventKind::Submitted => println!("script submitted"),
                ThreadEventKind::Busy => println!("a script is already running"),
                _ => println!("the script could not be started"),
            },
            Err(err) => println!("could not read '{rest}': {err}"),
        },
        "baton" => match rest {
            "take" => {
                if server.request_baton(CONSOLE_IDENTITY) {
                    println!("baton acquired");
                } else {
                    println!("baton refused");
                }
            }
            "return" => server.return_baton(CONSOLE_IDENTITY),
            _ => match server.baton_holder() {
                Some(holder) => {
                    println!("baton held by {} (client {})", holder.username, holder.index);
                }
                None => println!("baton free"),
            },
        },
        "msg" => server.publish_message(CONSOLE_IDENTITY, rest),
        _ => {
            println!(
                "commands: :status :threads :clients :pause :resume :abort :halt :restart \
                 :eval <expr> :script <file> :baton [take|return|who] :msg <text> :quit"
            );
        }
    }
    true
}

/// Renders server events for the terminal, or as JSON lines for piping.
struct ConsoleObserver {
    json: bool,
}

impl ServerObserver for ConsoleObserver {
    fn update(&self, event: &ServerEvent) {
        if self.json {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
            return;
        }
        match event {
            ServerEvent::Terminal { text } => {
                let mut out = io::stdout().lock();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }
            ServerEvent::Thread(thread) => {
                if thread.kind == ThreadEventKind::SubmitError {
                    println!("-- the command could not be started");
                }
            }
            ServerEvent::Status(status) => {
                tracing::info!(script = ?status.script, scan = ?status.scan, "status changed");
            }
            ServerEvent::Baton { holder: Some(index) } => {
                println!("-- baton now held by client {index}");
            }
            ServerEvent::Baton { holder: None } => println!("-- baton returned"),
            ServerEvent::PanicStop => println!("-- panic stop completed"),
            ServerEvent::Message(message) => println!("[{}] {}", message.username, message.text),
        }
    }
}
