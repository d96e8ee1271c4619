//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod model_list;
pub mod say;
pub mod session_list;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use crate::api::backend::{format_api_error, BackendClient, BackendError};
use crate::cli::model_list::list_models;
use crate::cli::say::run_say;
use crate::cli::session_list::list_sessions;
use crate::core::app::{ChatController, ChatError, PresetSlot};
use crate::core::config::Config;
use crate::core::store::ConversationStore;
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "chatdeck")]
#[command(version, about = "Streaming chat client for a multi-provider LLM backend")]
#[command(
    long_about = "chatdeck talks to a chat backend proxy that fronts several LLM providers \
(OpenAI, Anthropic, Gemini, Hugging Face, Mistral, Upstage). Sessions live on the backend; \
responses are streamed to the terminal as they arrive.\n\n\
Environment Variables:\n\
  RUST_LOG          Log filter (overrides the log-level setting)\n\n\
Controls:\n\
  Ctrl+C            Stop the response being streamed by 'say' (partial text is kept)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Backend base URL (overrides the backend-url setting)
    #[arg(short = 'b', long, global = true, value_name = "URL")]
    pub backend: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the models offered by the backend
    Models,
    /// List sessions stored on the backend
    Sessions,
    /// Create a new session
    New,
    /// Delete a session
    Remove { session: String },
    /// Send a prompt and stream the response
    Say {
        /// Session to post into (defaults to the most recent one)
        #[arg(short = 's', long)]
        session: Option<String>,
        /// Attach a file to the message (repeatable)
        #[arg(short = 'a', long = "attach", value_name = "FILE")]
        attachments: Vec<PathBuf>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Summarize a session
    Summarize { session: String },
    /// Rename a session
    Title {
        session: String,
        #[arg(trailing_var_arg = true, required = true)]
        title: Vec<String>,
    },
    /// Switch a session to one of its two model presets
    Preset {
        session: String,
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        slot: u8,
    },
    /// Turn automatic summaries on or off for a session
    Summarization { session: String, state: Toggle },
    /// Show the current configuration
    Config,
    /// Set configuration values
    Set {
        /// Configuration key to set
        key: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let mut config = Config::load()?;
    init_tracing(config.log_level.as_deref());

    match args.command {
        Commands::Config => {
            config.print_all();
            return Ok(());
        }
        Commands::Set { key, value } => {
            config.set_key(&key, &value.join(" "))?;
            let path = config.save()?;
            println!("✅ Set {key} in {}", path.display());
            return Ok(());
        }
        Commands::Unset { key } => {
            config.unset_key(&key)?;
            let path = config.save()?;
            println!("✅ Unset {key} in {}", path.display());
            return Ok(());
        }
        command => {
            let base_url = args
                .backend
                .unwrap_or_else(|| config.backend_url().to_string());
            let backend = BackendClient::new(base_url, config.connect_timeout())?;
            let store = ConversationStore::with_marker(config.streaming_marker());
            let controller = ChatController::new(Arc::new(backend), store);
            if let Err(err) = run_backend_command(&controller, command).await {
                report_error(err.as_ref());
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

async fn run_backend_command(
    controller: &ChatController,
    command: Commands,
) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Models => list_models(controller).await,
        Commands::Sessions => list_sessions(controller).await,
        Commands::New => {
            let id = controller.new_session().await?;
            println!("{id}");
            Ok(())
        }
        Commands::Remove { session } => {
            controller.load_sessions().await?;
            controller.remove_session(&session).await?;
            println!("✅ Removed session {session}");
            Ok(())
        }
        Commands::Say {
            session,
            attachments,
            prompt,
        } => run_say(controller, session, attachments, prompt).await,
        Commands::Summarize { session } => {
            controller.load_sessions().await?;
            let summary = controller.summarize(&session).await?;
            println!("{summary}");
            Ok(())
        }
        Commands::Title { session, title } => {
            controller.load_sessions().await?;
            let title = title.join(" ");
            controller.set_title(&session, &title).await?.await?;
            println!("✅ Renamed session {session} to: {title}");
            Ok(())
        }
        Commands::Preset { session, slot } => {
            let slot = PresetSlot::from_index(slot).ok_or("preset slot must be 1 or 2")?;
            controller.load_sessions().await?;
            controller.select_preset(&session, slot).await?.await?;
            let store = controller.store();
            let store = store.lock().await;
            if let Some(session) = store.session(&session) {
                println!("✅ Session {} now uses {}", session.id, session.settings.model);
            }
            Ok(())
        }
        Commands::Summarization { session, state } => {
            controller.load_sessions().await?;
            controller
                .set_summarization(&session, state == Toggle::On)
                .await?;
            println!(
                "✅ Summarization {} for session {session}",
                if state == Toggle::On { "enabled" } else { "disabled" }
            );
            Ok(())
        }
        Commands::Config | Commands::Set { .. } | Commands::Unset { .. } => Ok(()),
    }
}

fn report_error(err: &(dyn Error + 'static)) {
    let status_body = err
        .downcast_ref::<ChatError>()
        .and_then(|err| match err {
            ChatError::Backend(BackendError::Status { body, .. }) => Some(body.as_str()),
            _ => None,
        })
        .or_else(|| match err.downcast_ref::<BackendError>() {
            Some(BackendError::Status { body, .. }) => Some(body.as_str()),
            _ => None,
        });

    eprintln!("❌ Error: {err}");
    if let Some(body) = status_body {
        eprintln!("{}", format_api_error(body));
    }
}
