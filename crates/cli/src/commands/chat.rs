//! `concierge chat`: single-message or interactive mode.

use super::runtime::{self, Runtime};
use concierge_config::AppConfig;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(message: Option<String>, user: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() && !is_local(&config.provider.name) {
        eprintln!();
        eprintln!("  ERROR: No API key configured for provider '{}'.", config.provider.name);
        eprintln!();
        eprintln!("  Set CONCIERGE_API_KEY (or OPENROUTER_API_KEY / OPENAI_API_KEY),");
        eprintln!("  or add `api_key` under [provider] in:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found".into());
    }

    let runtime = runtime::build(&config).await?;

    match message {
        Some(msg) => {
            let result = runtime.handler.handle_turn(user, &msg).await;
            runtime.shutdown().await;
            println!("{}", result?.response);
        }
        None => interactive(&runtime, &config, user).await?,
    }

    Ok(())
}

fn is_local(provider: &str) -> bool {
    matches!(provider, "ollama" | "vllm" | "llamacpp")
}

async fn interactive(runtime: &Runtime, config: &AppConfig, user: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    println!("  Concierge");
    println!("  Provider:  {}", config.provider.name);
    println!("  Model:     {}", config.provider.model);
    println!("  User:      {user}");
    let tools = runtime.tools.names();
    if tools.is_empty() {
        println!("  Tools:     none");
    } else {
        println!("  Tools:     {}", tools.join(", "));
    }
    println!();
    println!("  Type your message and press Enter. Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        match runtime.handler.handle_turn(user, input).await {
            Ok(turn) => {
                println!();
                for line in turn.response.lines() {
                    println!("  Concierge > {line}");
                }
                println!();
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    runtime.shutdown().await;

    if let Some(telemetry) = &runtime.telemetry {
        let summary = telemetry.summary();
        println!();
        println!(
            "  {} turns, {:.1} steps/turn, {} tool calls, {} memories learned",
            summary.turns,
            summary.mean_steps(),
            summary.tool_executions,
            summary.memories_learned
        );
    }
    println!();
    Ok(())
}
