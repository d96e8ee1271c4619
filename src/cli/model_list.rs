//! Model listing functionality

use std::error::Error;

use crate::core::app::ChatController;

pub async fn list_models(controller: &ChatController) -> Result<(), Box<dyn Error>> {
    let catalog = controller.list_models().await?;
    let available: Vec<_> = catalog
        .iter()
        .filter(|(_, models)| !models.is_empty())
        .collect();

    if available.is_empty() {
        println!("No models available. Check the provider API keys configured on the backend.");
        return Ok(());
    }

    println!("Available models:");
    for (provider, models) in available {
        println!();
        println!("{provider}:");
        for model in models {
            println!("  {:<50} {}", model.code, model.name);
        }
    }
    Ok(())
}
