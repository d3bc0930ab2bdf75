//! `spindle chat` — interactive chat or single-message mode.

use anyhow::Context;
use spindle_core::event::{DomainEvent, EventBus, ToolStatus};
use spindle_engine::{Engine, EngineOptions};
use spindle_providers::OpenAiCompatProvider;
use spindle_storage::SqliteStore;
use std::io::{BufRead, Write};
use std::sync::Arc;

use super::{build_registry, expand_home, load_config};

pub async fn run(message: Option<String>, system: Option<String>) -> anyhow::Result<()> {
    let config = load_config()?;

    let api_key = config
        .api_key
        .clone()
        .context("No API key configured (set SPINDLE_API_KEY or api_key in the config)")?;
    let provider = Arc::new(OpenAiCompatProvider::new(
        "openai-compat",
        config.api_url.clone(),
        api_key,
    )?);

    let db_path = expand_home(&config.storage.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::new(&db_path.to_string_lossy()).await?);

    let registry = build_registry(&config)?;
    let event_bus = Arc::new(EventBus::default());

    // Print live tool progress while turns run.
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let DomainEvent::ToolStatus {
                tool_name, status, ..
            } = event.as_ref()
            {
                match status {
                    ToolStatus::Calling => println!("  [tool] {tool_name} ..."),
                    ToolStatus::Completed => println!("  [tool] {tool_name} done"),
                    ToolStatus::Error => println!("  [tool] {tool_name} failed"),
                }
            }
        }
    });

    let engine = Engine::new(
        store,
        provider,
        registry.clone(),
        config.tool_servers.clone(),
        event_bus,
        EngineOptions {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            summary_threshold: config.summarizer.threshold,
            summary_batch_size: config.summarizer.batch_size,
        },
    );

    let chat = engine.create_chat(None).await?;

    if let Some(message) = message {
        let answer = engine.run_turn(&chat.id, &message, system.as_deref()).await?;
        println!("{answer}");
    } else {
        println!("Chat started ({}). Type a message, or /quit to exit.", chat.id);
        let stdin = std::io::stdin();
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if input == "/quit" || input == "/exit" {
                break;
            }

            match engine.run_turn(&chat.id, input, system.as_deref()).await {
                Ok(answer) => println!("{answer}"),
                Err(e) => eprintln!("Turn failed: {e}"),
            }
        }
    }

    // Let any in-flight compaction finish, then drop sessions cleanly.
    engine.summarizer().wait_idle().await;
    registry.shutdown().await;
    Ok(())
}
