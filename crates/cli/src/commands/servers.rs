//! `spindle servers` — inspect configured tool servers.

use spindle_core::server::ServerTransport;

use super::{build_registry, load_config};

pub async fn run() -> anyhow::Result<()> {
    let config = load_config()?;

    if config.tool_servers.is_empty() {
        println!("No tool servers configured.");
        return Ok(());
    }

    let registry = build_registry(&config)?;
    let tools = registry.list_enabled_tools(&config.tool_servers).await;

    for server in &config.tool_servers {
        let transport = match &server.transport {
            ServerTransport::Http { endpoint } => format!("http {endpoint}"),
            ServerTransport::Process { command, .. } => format!("process {command}"),
        };
        let state = if server.enabled { "enabled" } else { "disabled" };
        println!("{} ({transport}) — {state}", server.id);

        let mut listed = false;
        for tool in tools.iter() {
            if let spindle_core::tool::ToolSource::Server { server_id, .. } = &tool.source {
                if server_id == &server.id {
                    println!("    {}", tool.name);
                    listed = true;
                }
            }
        }
        if server.enabled && !listed {
            println!("    (unreachable or no tools)");
        }
    }

    let skills = registry.list_skill_tools().await;
    if !skills.is_empty() {
        println!("skills:");
        for skill in skills {
            println!("    {}", skill.name);
        }
    }

    registry.shutdown().await;
    Ok(())
}
