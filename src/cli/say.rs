//! One-shot "say" command: post a prompt and stream the reply to stdout.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::core::app::{ChatController, SendOutcome};
use crate::core::session::{Attachment, StreamState};
use crate::core::store::{ConversationStore, StoreEvent};

pub async fn run_say(
    controller: &ChatController,
    session: Option<String>,
    attachment_paths: Vec<PathBuf>,
    prompt: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() && attachment_paths.is_empty() {
        eprintln!("Usage: chatdeck say [--session ID] [--attach FILE]... <prompt>");
        std::process::exit(1);
    }

    let attachments = attachment_paths
        .iter()
        .map(|path| {
            Attachment::from_path(path)
                .map_err(|err| format!("Failed to read {}: {err}", path.display()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    controller.load_sessions().await?;
    let current = controller
        .store()
        .lock()
        .await
        .current_session_id()
        .map(str::to_string);
    let session_id = match session.or(current) {
        Some(id) => id,
        None => controller.new_session().await?,
    };

    let store = controller.store();
    let events = store.lock().await.subscribe();
    let printer = tokio::spawn(print_response(
        Arc::clone(&store),
        session_id.clone(),
        events,
    ));

    let send = controller.send_message(&session_id, &prompt, attachments);
    tokio::pin!(send);
    let outcome = tokio::select! {
        outcome = &mut send => outcome,
        _ = tokio::signal::ctrl_c() => {
            controller.abort(&session_id).await;
            send.await
        }
    };

    let outcome = match outcome {
        Ok(SendOutcome::Ignored) => {
            printer.abort();
            return Ok(());
        }
        Ok(outcome) => outcome,
        Err(err) => {
            printer.abort();
            return Err(err.into());
        }
    };
    printer.await??;

    match outcome {
        SendOutcome::Cancelled(_) => eprintln!("⏹ Response stopped; partial text kept."),
        SendOutcome::Failed(_) => std::process::exit(1),
        SendOutcome::Completed(_) | SendOutcome::Ignored => {}
    }
    Ok(())
}

/// Prints the session's last response as it grows, until its stream ends.
async fn print_response(
    store: Arc<Mutex<ConversationStore>>,
    session_id: String,
    mut events: mpsc::UnboundedReceiver<StoreEvent>,
) -> io::Result<()> {
    let mut printed = String::new();
    let mut stdout = io::stdout();

    while let Some(event) = events.recv().await {
        let finished = match &event {
            StoreEvent::ResponseUpdated { session_id: id, .. } if *id == session_id => false,
            StoreEvent::StreamStateChanged {
                session_id: id,
                state: StreamState::Idle,
            } if *id == session_id => true,
            _ => continue,
        };

        let text = store
            .lock()
            .await
            .session(&session_id)
            .and_then(|session| session.last_turn())
            .map(|turn| turn.ai_response.clone())
            .unwrap_or_default();
        match text.strip_prefix(printed.as_str()) {
            Some(rest) => write!(stdout, "{rest}")?,
            // Replaced rather than extended, e.g. by an error message.
            None => write!(stdout, "\n{text}")?,
        }
        stdout.flush()?;
        printed = text;

        if finished {
            writeln!(stdout)?;
            break;
        }
    }
    Ok(())
}
