//! `concierge status`: show configuration and storage.

use concierge_config::AppConfig;

pub async fn run(check: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("Concierge status");
    println!("================");
    println!("  Config dir:     {}", AppConfig::config_dir().display());
    println!("  Provider:       {}", config.provider.name);
    println!("  Model:          {}", config.provider.model);
    println!("  API key:        {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Max steps:      {}", config.agent.max_steps);
    println!("  Resume window:  {} min", config.conversation.resume_window_minutes);
    println!("  Storage:        {}", config.storage.backend);
    if config.storage.backend == "sqlite" {
        println!("  Database:       {}", describe_file(&config.storage.resolved_sqlite_path()));
    }
    println!("  Memories:       {}", describe_file(&config.storage.resolved_memory_path()));
    if let Some(dir) = &config.storage.knowledge_dir {
        println!("  Knowledge dir:  {}", dir.display());
    }
    println!("  Auto-save:      {}", config.memory.auto_save);
    println!("  Workers:        {}", config.background.workers);
    println!("  Telemetry:      {}", if config.telemetry.enabled { "enabled" } else { "disabled" });

    if check {
        println!("  Reachable:      {}", provider_reachability(&config).await);
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file: run `concierge onboard` first");
    }

    Ok(())
}

fn describe_file(path: &std::path::Path) -> String {
    match std::fs::metadata(path) {
        Ok(meta) => format!("{} ({:.1} KB)", path.display(), meta.len() as f64 / 1024.0),
        Err(_) => format!("{} (not created yet)", path.display()),
    }
}

async fn provider_reachability(config: &AppConfig) -> String {
    let provider = match concierge_providers::build_provider(&config.provider, config.agent.planner_timeout()) {
        Ok(provider) => provider,
        Err(e) => return format!("no ({e})"),
    };
    match provider.health_check().await {
        Ok(true) => "yes".into(),
        Ok(false) => "no (endpoint rejected the request)".into(),
        Err(e) => format!("no ({e})"),
    }
}
