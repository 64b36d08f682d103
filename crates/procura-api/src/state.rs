//! Application state wiring the engine to its stores.
//!
//! The engine is generic over checkpoint and projection stores; AppState pins
//! it to the SQLite implementations. Used by both CLI commands and REST API
//! handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use procura_core::collaborator::{BoxRiskAssessor, RuleBasedRiskAssessor};
use procura_core::engine::WorkflowEngine;
use procura_core::workflows::builtin_graphs;
use procura_infra::sqlite::checkpoint::SqliteCheckpointStore;
use procura_infra::sqlite::pool::{DatabasePool, database_url};
use procura_infra::sqlite::projection::SqliteProjectionStore;
use procura_types::config::EngineConfig;

/// Engine pinned to the SQLite stores.
pub type ConcreteEngine = WorkflowEngine<SqliteCheckpointStore, SqliteProjectionStore>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: create the data directory, open
    /// `procura.db` inside it and compile the built-in workflow graphs.
    pub async fn init(data_dir: PathBuf, config: EngineConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let db_url = database_url(&data_dir);
        Self::connect(&db_url, data_dir, config).await
    }

    /// Open the given database and wire the engine against it.
    pub async fn connect(
        url: &str,
        data_dir: PathBuf,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::new(url)
            .await
            .with_context(|| format!("failed to open database {url}"))?;

        let graphs = builtin_graphs(&config, BoxRiskAssessor::new(RuleBasedRiskAssessor))
            .context("failed to compile built-in workflow graphs")?;

        let engine = WorkflowEngine::new(
            SqliteCheckpointStore::new(db_pool.clone()),
            SqliteProjectionStore::new(db_pool.clone()),
            config.engine.clone(),
        )
        .with_graphs(graphs);

        tracing::debug!(
            data_dir = %data_dir.display(),
            workflows = engine.workflow_types().len(),
            "application state initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
            data_dir,
            db_pool,
        })
    }
}
