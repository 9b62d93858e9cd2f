//! `concierge memory`: long-term memory management.

use super::runtime;
use concierge_config::AppConfig;
use concierge_core::memory::MemoryEntry;

fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

pub async fn list(user: &str, include_archived: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let backend = runtime::open_memories(&config);
    let entries = backend.list(user, include_archived).await?;

    if entries.is_empty() {
        println!("No memories stored for '{user}'.");
        return Ok(());
    }

    for (i, entry) in entries.iter().enumerate() {
        let preview: String = entry.content.chars().take(80).collect();
        let archived = if entry.archived { " (archived)" } else { "" };
        println!("  {:>2}. [{:.2}] {preview}{archived}", i + 1, entry.importance);
        if !entry.tags.is_empty() {
            println!("      tags: {}", entry.tags.join(", "));
        }
    }
    println!("\n{} memories", entries.len());
    Ok(())
}

pub async fn add(user: &str, content: &str, tags: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let content = content.trim();
    if content.is_empty() {
        return Err("Memory content is empty".into());
    }

    let config = load_config()?;
    let backend = runtime::open_memories(&config);
    let entry = MemoryEntry::new(user, content)
        .with_tags(tags)
        .with_importance(0.8)
        .with_source("cli");
    let id = backend.store(entry).await?;
    println!("Stored memory {id}");
    Ok(())
}

pub async fn clear(user: &str, confirm: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirm {
        println!("This deletes ALL memories of '{user}' permanently.");
        println!("Run with --confirm to proceed:");
        println!("  concierge memory clear --user {user} --confirm");
        return Ok(());
    }

    let config = load_config()?;
    let backend = runtime::open_memories(&config);
    let removed = backend.clear_user(user).await?;
    println!("Deleted {removed} memories.");
    Ok(())
}
