//! Wires the in-memory reference repositories and a deterministic
//! `MockProvider` into a runnable `loom_pipeline::Pipeline`. This is the
//! one place in the binary that knows every crate in the workspace —
//! modeled on `sa-gateway::main::run_server`'s single composition-root
//! function, minus the HTTP server: there is no transport here, only the
//! pieces `ProcessTurn` (spec.md §6) needs.

use std::sync::Arc;
use std::time::Duration;

use loom_domain::config::PipelineConfig;
use loom_enforcement::Enforcer;
use loom_memory::{ConversationSummarizer, EntityDeduplicator, EntityExtractor, MemoryIngestor};
use loom_migration::field_resolver::MissingFieldResolver;
use loom_migration::MigrationExecutor;
use loom_pipeline::Pipeline;
use loom_providers::MockProvider;
use loom_repositories::{InMemoryAuditRepository, InMemoryConfigRepository, InMemoryIdempotencyCache, InMemoryInterlocutorRepository, InMemoryMemoryRepository, InMemorySessionRepository, InMemoryVectorRepository};
use uuid::Uuid;

use crate::seed;

pub struct Runtime {
    pub pipeline: Arc<Pipeline>,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
}

/// Builds a fully-wired `Pipeline` over the demo tenant/agent seeded by
/// [`seed::seed_demo_data`]. No `ToolHandler` is registered — the demo
/// scenario has no tool bindings, and a concrete tool catalog is a
/// deployment concern this binary deliberately leaves unimplemented
/// (`loom-pipeline::tool::ToolHandler` is the seam).
pub async fn build(config: PipelineConfig) -> Runtime {
    let session_repo = Arc::new(InMemorySessionRepository::new());
    let interlocutor_repo: Arc<dyn loom_repositories::InterlocutorRepository> = Arc::new(InMemoryInterlocutorRepository::new());
    let config_repo = Arc::new(InMemoryConfigRepository::new());
    let vector_repo = Arc::new(InMemoryVectorRepository::new());
    let audit_repo = Arc::new(InMemoryAuditRepository::new());
    let idempotency_cache = Arc::new(InMemoryIdempotencyCache::new());
    let memory_repo = Arc::new(InMemoryMemoryRepository::new());

    let demo = seed::seed_demo_data(&config_repo).await;

    let generator_mock = MockProvider::new("loom-cli-generator");
    generator_mock.set_default_response("Thanks for reaching out — how can I help?");
    let generator: Arc<dyn loom_providers::LlmProvider> = Arc::new(generator_mock);
    let judge: Arc<dyn loom_providers::LlmProvider> = Arc::new(MockProvider::new("loom-cli-judge"));
    let embedder: Arc<dyn loom_providers::LlmProvider> = Arc::new(MockProvider::new("loom-cli-embedder"));

    let config_repo_dyn: Arc<dyn loom_repositories::ConfigRepository> = config_repo;
    let enforcer = Arc::new(Enforcer::new(config_repo_dyn.clone(), judge.clone()));

    let migration_field_resolver = MissingFieldResolver::new(Some(interlocutor_repo.clone()), Some(judge.clone()));
    let migration_executor = Arc::new(MigrationExecutor::new(config_repo_dyn.clone(), session_repo.clone(), migration_field_resolver));
    let field_resolver = Arc::new(MissingFieldResolver::new(Some(interlocutor_repo.clone()), Some(judge.clone())));

    let extractor = Arc::new(EntityExtractor::new(judge.clone(), config.entity_extraction.min_confidence));
    let deduplicator = Arc::new(EntityDeduplicator::new(memory_repo.clone(), config.dedup.fuzzy_threshold, config.dedup.embedding_threshold));
    let summarizer = Arc::new(ConversationSummarizer::new(judge.clone(), memory_repo.clone(), config.summarization.turns_per_summary, config.summarization.summaries_per_meta, config.summarization.enabled_at_turn_count));
    let memory_ingestor = Arc::new(MemoryIngestor::new(memory_repo, embedder.clone(), None, Some(extractor), Some(deduplicator), Some(summarizer), true, Duration::from_millis(500)));

    let session_locks = Arc::new(loom_concurrency::SessionLockManager::new());

    let pipeline = Arc::new(Pipeline {
        session_repo,
        interlocutor_repo,
        config_repo: config_repo_dyn,
        vector_repo,
        audit_repo,
        idempotency_cache,
        generator,
        judge,
        embedder,
        enforcer,
        migration_executor,
        field_resolver,
        memory_ingestor: Some(memory_ingestor),
        tool_executor: None,
        session_locks,
        config,
    });

    Runtime { pipeline, tenant_id: demo.tenant_id, agent_id: demo.agent_id }
}
