//! Wires configuration into a ready [`TurnHandler`].

use concierge_agent::{
    AgentLoop, BackgroundService, BackgroundWorker, ContextInjectionService, ContextService,
    ConversationService, LlmPlanner, ToolExecutionService, TurnHandler,
};
use concierge_config::AppConfig;
use concierge_core::context::ContextOptimizer;
use concierge_core::event::EventBus;
use concierge_core::memory::MemoryBackend;
use concierge_core::storage::StorageManager;
use concierge_core::tool::ToolRegistry;
use concierge_memory::{
    DecayLifecycleManager, FileBackend, FocusOptimizer, InMemoryKnowledgeBase, InMemoryStateStore,
    MemoryLearningManager, SqliteStateStore, StoreRetriever,
};
use concierge_telemetry::TelemetryEngine;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Runtime {
    pub handler: TurnHandler,
    pub tools: Arc<ToolRegistry>,
    pub telemetry: Option<Arc<TelemetryEngine>>,
}

impl Runtime {
    /// Drain queued background work. Call before exiting.
    pub async fn shutdown(&self) {
        self.handler.background().shutdown().await;
    }
}

/// Open the conversation store the config names.
pub async fn open_storage(config: &AppConfig) -> Result<Arc<dyn StorageManager>, Box<dyn std::error::Error>> {
    match config.storage.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStateStore::new())),
        _ => {
            let path = config.storage.resolved_sqlite_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteStateStore::new(&path.to_string_lossy())
                .await
                .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
            Ok(Arc::new(store))
        }
    }
}

pub fn open_memories(config: &AppConfig) -> Arc<dyn MemoryBackend> {
    Arc::new(FileBackend::new(config.storage.resolved_memory_path()))
}

pub async fn build(config: &AppConfig) -> Result<Runtime, Box<dyn std::error::Error>> {
    let event_bus = Arc::new(EventBus::default());

    let provider = concierge_providers::build_provider(&config.provider, config.agent.planner_timeout())?;
    let tools = Arc::new(ToolRegistry::new());
    let planner = Arc::new(LlmPlanner::from_config(
        provider,
        tools.clone(),
        &config.provider,
        &config.agent,
    ));
    let tool_exec = Arc::new(
        ToolExecutionService::new(tools.clone(), event_bus.clone()).with_timeout(config.agent.tool_timeout()),
    );
    let agent_loop = AgentLoop::new(planner, tool_exec)
        .with_max_steps(config.agent.max_steps)
        .with_planner_timeout(config.agent.planner_timeout());

    let storage = open_storage(config).await?;
    let memories = open_memories(config);
    let retriever = Arc::new(StoreRetriever::new(memories.clone()));

    let mut context = ContextService::new()
        .with_retriever(retriever.clone())
        .with_tagged_retriever(retriever)
        .with_limits(config.context.ltm_limit, config.context.rag_limit);
    let mut injection = ContextInjectionService::new();
    if config.context.optimize {
        let optimizer: Arc<dyn ContextOptimizer> = Arc::new(FocusOptimizer::default());
        context = context.with_optimizer(optimizer.clone());
        injection = injection.with_optimizer(optimizer);
    }
    if let Some(dir) = &config.storage.knowledge_dir {
        let knowledge = InMemoryKnowledgeBase::new(config.context.rag_limit);
        match knowledge.load_dir(dir).await {
            Ok(loaded) => debug!(dir = %dir.display(), loaded, "Knowledge documents loaded"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "Knowledge directory unavailable"),
        }
        context = context.with_knowledge_base(Arc::new(knowledge));
    }

    let mut background = BackgroundService::new(storage.clone(), event_bus.clone())
        .with_config(&config.background)
        .with_learning(Arc::new(
            MemoryLearningManager::new(memories.clone()).with_auto_save(config.memory.auto_save),
        ))
        .with_lifecycle(Arc::new(DecayLifecycleManager::new(
            memories,
            config.memory.decay_per_day,
            config.memory.archive_threshold,
        )));

    let telemetry = if config.telemetry.enabled {
        let engine = Arc::new(TelemetryEngine::new(config.telemetry.max_traces));
        engine.spawn_event_listener(event_bus.subscribe());
        background = background.with_metrics(engine.clone());
        Some(engine)
    } else {
        None
    };

    let worker = Arc::new(BackgroundWorker::from_config(Arc::new(background), &config.background));

    let handler = TurnHandler::new(
        ConversationService::from_config(storage, config),
        context,
        injection,
        agent_loop,
        worker,
        event_bus,
    );

    Ok(Runtime {
        handler,
        tools,
        telemetry,
    })
}
