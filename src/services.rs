//! Wiring: the store, engine, strategies and queues one process shares.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use trovesearch_core::engine::SearchEngine;
use trovesearch_core::strategy::selection::StrategyRegistry;

use crate::config::Config;
use crate::db;
use crate::elastic::ElasticEngine;
use crate::messenger::IndexMessenger;
use crate::migrate;
use crate::sqlite_store::SqliteIndexcardStore;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<SqliteIndexcardStore>,
    pub engine: Arc<dyn SearchEngine>,
    pub registry: StrategyRegistry,
    pub messenger: IndexMessenger,
}

impl Services {
    /// Open the database (migrating it) and connect to Elasticsearch.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;
        let engine: Arc<dyn SearchEngine> = Arc::new(ElasticEngine::new(&config.elastic)?);
        Self::with_engine(config, pool, engine)
    }

    /// Build around an already-migrated pool and any engine.
    pub fn with_engine(
        config: &Config,
        pool: SqlitePool,
        engine: Arc<dyn SearchEngine>,
    ) -> Result<Self> {
        let store = Arc::new(SqliteIndexcardStore::new(pool.clone()));
        let registry = StrategyRegistry::from_names(
            &config.strategies.enabled,
            engine.clone(),
            store.clone(),
            store.clone(),
        )?;
        let messenger = IndexMessenger::sqlite(&registry, &pool);
        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            engine,
            registry,
            messenger,
        })
    }

    pub async fn close(&self) {
        self.store.pool().close().await;
    }
}
