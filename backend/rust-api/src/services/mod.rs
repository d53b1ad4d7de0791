use crate::config::{Config, EventSink};
use crate::services::events::{EventRecorder, MongoEventRecorder, TracingEventRecorder};
use crate::services::lifecycle::{AttemptLifecycleManager, LifecycleDeps};
use crate::services::locks::AttemptLocks;
use crate::services::passback::{DisabledGradePassback, GradePassback, HttpGradePassback};
use crate::services::rubric::HighestAttemptRubric;
use crate::services::scoring::GraderRegistry;
use crate::store::{MongoAttemptStore, MongoCatalog};
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

pub mod events;
pub mod graders;
pub mod history;
pub mod lifecycle;
pub mod locks;
pub mod passback;
pub mod review;
pub mod rubric;
pub mod scoring;

pub struct AppState {
    pub config: Config,
    pub engine: Arc<AttemptLifecycleManager>,
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    /// Production wiring: MongoDB store and catalog, Redis locks when a Redis
    /// URI is configured, HTTP grade passback when a URL is configured.
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        graders: GraderRegistry,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        let store = MongoAttemptStore::new(mongo_client, mongo.clone());
        store.ensure_indexes().await?;

        let redis = match &config.redis_uri {
            Some(uri) => Some(connect_redis(uri).await?),
            None => {
                tracing::warn!("REDIS_URI not set, attempt locks are local to this process");
                None
            }
        };
        let lock_ttl = Duration::from_millis(config.lock_ttl_ms);
        let locks = match &redis {
            Some(conn) => AttemptLocks::redis(conn.clone(), lock_ttl),
            None => AttemptLocks::local(),
        };

        let passback: Arc<dyn GradePassback> = match &config.grade_passback_url {
            Some(url) => Arc::new(HttpGradePassback::new(url.clone())),
            None => {
                tracing::warn!("GRADE_PASSBACK_URL not set, scores will not be passed back");
                Arc::new(DisabledGradePassback)
            }
        };

        let events: Arc<dyn EventRecorder> = match config.event_sink {
            EventSink::Mongo => Arc::new(MongoEventRecorder::new(mongo.clone())),
            EventSink::Log => Arc::new(TracingEventRecorder),
        };

        let engine = AttemptLifecycleManager::new(LifecycleDeps {
            store: Arc::new(store),
            catalog: Arc::new(MongoCatalog::new(mongo.clone())),
            grading: Arc::new(graders),
            rubric: Arc::new(HighestAttemptRubric),
            passback,
            events,
            locks,
        });

        Ok(Self {
            config,
            engine: Arc::new(engine),
            mongo: Some(mongo),
            redis,
        })
    }

    /// State around an already wired engine, without external stores.
    pub fn with_engine(config: Config, engine: Arc<AttemptLifecycleManager>) -> Self {
        Self {
            config,
            engine,
            mongo: None,
            redis: None,
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(uri)?;

    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}
