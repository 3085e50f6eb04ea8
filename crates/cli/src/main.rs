use chatlink::client::{ChatClient, ClientEvent, ConnectionState};
use chatlink::conversation::{ConversationStore, InMemoryConversations};
use chatlink::error_log::ErrorLog;
use chatlink::files::FileDescriptor;
use chatlink::message::Message;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "chatlink")]
#[command(about = "chatlink CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json (reconnect defaults included).
    Init {
        /// Config file path (default: CHATLINK_CONFIG_PATH or ~/.chatlink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the service over its realtime channel (interactive).
    Chat {
        /// Config file path (default: CHATLINK_CONFIG_PATH or ~/.chatlink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Service base URL; overrides CHATLINK_ENDPOINT and the config file.
        #[arg(long, short, value_name = "URL")]
        endpoint: Option<String>,

        /// Ask for complete replies instead of token streams.
        #[arg(long)]
        no_stream: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("chatlink {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            config,
            endpoint,
            no_stream,
        }) => {
            if let Err(e) = run_chat(config, endpoint, no_stream).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(chatlink::config::default_config_path);
    let dir = chatlink::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_chat(
    config_path: Option<PathBuf>,
    endpoint: Option<String>,
    no_stream: bool,
) -> anyhow::Result<()> {
    let (config, _) = chatlink::config::load_config(config_path)?;
    let mut client_config = config.client.clone();
    client_config.endpoint = endpoint
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| chatlink::config::resolve_endpoint(&config));
    if no_stream {
        client_config.streaming = false;
    }

    let store = Arc::new(InMemoryConversations::new());
    let conversation_id = store.create().await;
    let client = ChatClient::websocket(&client_config, store.clone(), Arc::new(ErrorLog::new()));
    client.set_conversation(conversation_id.clone());
    let printer = tokio::spawn(print_events(client.subscribe()));
    client.connect();

    println!(
        "chatlink: {} (streaming {}). /file PATH, /cancel, /ping, /reconnect, /status, /quit",
        client_config.endpoint,
        if client.streaming() { "on" } else { "off" }
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        match input {
            "/cancel" => {
                if !client.cancel_stream() {
                    eprintln!("not connected");
                }
            }
            "/ping" => {
                if !client.ping() {
                    eprintln!("not connected");
                }
            }
            "/reconnect" => client.reconnect(),
            "/status" => {
                let status = client.status();
                println!(
                    "state: {}, reconnect attempts: {}, last error: {}",
                    status.state,
                    status.reconnect_attempts,
                    status.last_error.as_deref().unwrap_or("none")
                );
            }
            _ => {
                if let Some(path) = input.strip_prefix("/file ") {
                    send_file(&client, store.as_ref(), &conversation_id, Path::new(path.trim()))
                        .await;
                } else {
                    match client.try_send(input) {
                        Ok(()) => store.append(&conversation_id, Message::user(input)).await,
                        Err(e) => eprintln!("not sent: {}", e),
                    }
                }
            }
        }
    }

    client.disconnect();
    let mut status = client.watch_status();
    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.state == ConnectionState::Disconnected),
    )
    .await;
    printer.abort();
    Ok(())
}

async fn send_file(
    client: &ChatClient,
    store: &InMemoryConversations,
    conversation_id: &str,
    path: &Path,
) {
    let file = match FileDescriptor::from_path(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("cannot read {}: {}", path.display(), e);
            return;
        }
    };
    match client.try_send_file(&file) {
        Ok(()) => {
            println!("sent {} ({})", file.name, file.size_formatted());
            let note = Message::user(format!("[file] {}", file.name)).with_files(vec![file]);
            store.append(conversation_id, note).await;
        }
        Err(e) => eprintln!("not sent: {}", e),
    }
}

/// Render client events: streamed chunks inline, connection changes and errors on stderr.
async fn print_events(mut events: broadcast::Receiver<ClientEvent>) {
    let mut streaming = false;
    loop {
        let event = match events.recv().await {
            Ok(e) => e,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::debug!("event printer lagged {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ClientEvent::StateChanged(ConnectionState::Open) => eprintln!("[connected]"),
            ClientEvent::StateChanged(state) => eprintln!("[{}]", state),
            ClientEvent::StreamStarted { .. } => {
                streaming = true;
                print!("< ");
                let _ = std::io::stdout().flush();
            }
            ClientEvent::Chunk(chunk) => {
                print!("{}", chunk.delta);
                let _ = std::io::stdout().flush();
            }
            ClientEvent::Message(m) => {
                if streaming {
                    println!();
                    streaming = false;
                } else {
                    println!("< {}", m.content.trim());
                }
            }
            ClientEvent::StreamCancelled { .. } => eprintln!("[stream cancelled]"),
            ClientEvent::Error(e) => {
                eprintln!("error {}: {}. {}", e.code.as_u16(), e.message, e.user_message())
            }
            ClientEvent::GaveUp { attempts } => eprintln!("[gave up after {} attempts]", attempts),
        }
    }
}
