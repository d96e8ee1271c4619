use std::error::Error;

use crate::core::app::ChatController;

pub async fn list_sessions(controller: &ChatController) -> Result<(), Box<dyn Error>> {
    controller.load_sessions().await?;
    let store = controller.store();
    let store = store.lock().await;

    if store.sessions().is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    let current = store.current_session_id();
    for session in store.sessions() {
        let marker = if Some(session.id.as_str()) == current { "*" } else { " " };
        let summarization = if session.settings.enable_summarization {
            ", summaries on"
        } else {
            ""
        };
        println!(
            "{marker} {}  {}  ({} turns, {}{summarization})",
            session.id,
            session.title,
            session.messages.len(),
            session.settings.model
        );
    }
    Ok(())
}
