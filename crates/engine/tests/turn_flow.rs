//! End-to-end turn flow: assemble → orchestrate → persist → compact.

use async_trait::async_trait;
use spindle_core::error::RegistryError;
use spindle_core::event::EventBus;
use spindle_core::message::Role;
use spindle_engine::testing::{
    scripted_registry, text_response, tool_call_response, ScriptedProvider,
};
use spindle_engine::{Engine, EngineOptions};
use spindle_registry::{SkillEntry, SkillSource, ToolRegistry};
use spindle_storage::{ChatStore, InMemoryStore};
use std::sync::Arc;
use std::time::Duration;

fn options() -> EngineOptions {
    EngineOptions {
        model: "mock-model".into(),
        ..EngineOptions::default()
    }
}

#[tokio::test]
async fn five_turns_cross_the_threshold_and_compact() {
    let store = Arc::new(InMemoryStore::new());

    // Five plain turns (no tool calls), then one merge call for the
    // compaction run the fifth turn triggers.
    let mut script = Vec::new();
    for i in 0..5 {
        script.push(text_response(&format!("answer {i}")));
    }
    script.push(text_response("A summary of the first ten messages."));

    let provider = Arc::new(ScriptedProvider::new(script));
    let registry = scripted_registry().await;
    let engine = Engine::new(
        store.clone(),
        provider,
        registry,
        Vec::new(),
        Arc::new(EventBus::default()),
        options(),
    );

    let chat = engine.create_chat(Some("long chat")).await.unwrap().id;

    for i in 0..5 {
        let answer = engine
            .run_turn(&chat, &format!("question {i}"), None)
            .await
            .unwrap();
        assert_eq!(answer, format!("answer {i}"));
        engine.summarizer().wait_idle().await;
    }

    // 10 conversational messages crossed the threshold: everything is
    // folded and the summary is live.
    assert_eq!(store.count_unsummarized_turns(&chat).await.unwrap(), 0);
    let summary = store.summary(&chat).await.unwrap().unwrap();
    assert_eq!(summary.content, "A summary of the first ten messages.");

    // The next turn sees the summary as a system message, not the old
    // tail. (No script left — exhausting it proves exactly one more
    // model call would be made; just check assembly via the store.)
    let tail = store.unsummarized_messages(&chat).await.unwrap();
    assert!(tail.is_empty());
}

#[tokio::test]
async fn a_tool_turn_round_trips_through_the_registry() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call_response("call_1", "srv_echo", r#"{"text":"ping"}"#),
        text_response("The tool said ping."),
    ]));
    let registry = scripted_registry().await;

    let servers = vec![spindle_core::server::ToolServer {
        id: "srv".into(),
        name: "srv".into(),
        transport: spindle_core::server::ServerTransport::Http {
            endpoint: "http://localhost:1/rpc".into(),
        },
        enabled: true,
    }];

    let engine = Engine::new(
        store.clone(),
        provider.clone(),
        registry,
        servers,
        Arc::new(EventBus::default()),
        options(),
    );

    let chat = engine.create_chat(None).await.unwrap().id;
    let answer = engine.run_turn(&chat, "echo ping", None).await.unwrap();
    engine.summarizer().wait_idle().await;

    assert_eq!(answer, "The tool said ping.");
    assert_eq!(provider.calls(), 2);

    let roles: Vec<Role> = store
        .unsummarized_messages(&chat)
        .await
        .unwrap()
        .iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
}

struct GuideSkills;

#[async_trait]
impl SkillSource for GuideSkills {
    async fn fetch_catalog(&self) -> Result<Vec<SkillEntry>, RegistryError> {
        Ok(vec![SkillEntry {
            name: "Style Guide".into(),
            description: "House writing style".into(),
            content: "Always write in active voice.".into(),
            source_url: "https://skills.example/style".into(),
            fetched_at: chrono::Utc::now(),
        }])
    }
}

#[tokio::test]
async fn a_skill_turn_feeds_documentation_back_to_the_model() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call_response(
            "call_1",
            "skill_style_guide",
            r#"{"query":"how should I write?"}"#,
        ),
        text_response("Use active voice."),
    ]));
    let registry = Arc::new(ToolRegistry::new(
        Arc::new(GuideSkills),
        Duration::from_secs(3600),
    ));

    let engine = Engine::new(
        store.clone(),
        provider,
        registry,
        Vec::new(),
        Arc::new(EventBus::default()),
        options(),
    );

    let chat = engine.create_chat(None).await.unwrap().id;
    let answer = engine
        .run_turn(&chat, "check the style guide", None)
        .await
        .unwrap();
    engine.summarizer().wait_idle().await;

    assert_eq!(answer, "Use active voice.");

    // The tool message carries the skill's documentation plus the query.
    let messages = store.unsummarized_messages(&chat).await.unwrap();
    let tool_message = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_message.content.contains("Always write in active voice."));
    assert!(tool_message.content.contains("how should I write?"));
}
