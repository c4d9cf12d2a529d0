//! Test utilities for database testing.
//!
//! In-memory SQLite databases with migrations applied, a scripted source
//! adapter, and fixture helpers for the catalog tables.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use catalog_sync::chunk_executor::ChunkExecutor;
use catalog_sync::config::AppConfig;
use catalog_sync::dispatcher::ChunkDispatcher;
use catalog_sync::models::{canonical_product, job, match_link, product_enrichment, supplier_record};
use catalog_sync::sources::{
    RawRecord, RestSettings, SourceAdapter, SourceDescriptor, SourceError, SourcePage,
    SourceRegistry, SourceSettings,
};
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, EntityTrait, Set};
use serde_json::{Value, json};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Configuration with immediate retries and no throttling.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        ..AppConfig::default()
    };
    config.retry_policy.base_seconds = 0;
    config.retry_policy.jitter_factor = 0.0;
    config.deletion.inter_item_delay_ms = 0;
    config.worker.concurrency = 1;
    config
}

/// Source adapter serving a fixed row list, optionally failing first.
///
/// Registered under the `rest` platform so REST descriptors resolve to it.
pub struct ScriptedSource {
    rows: Vec<RawRecord>,
    failures: Mutex<VecDeque<SourceError>>,
    fetch_calls: AtomicUsize,
    fetch_delay: Duration,
}

impl ScriptedSource {
    pub fn new(rows: Vec<Value>) -> Arc<Self> {
        Self::failing(rows, Vec::new())
    }

    /// Each `fetch_page` call pops the next failure until none remain.
    pub fn failing(rows: Vec<Value>, failures: Vec<SourceError>) -> Arc<Self> {
        Arc::new(Self {
            rows: rows
                .into_iter()
                .filter_map(|row| row.as_object().cloned())
                .collect(),
            failures: Mutex::new(failures.into()),
            fetch_calls: AtomicUsize::new(0),
            fetch_delay: Duration::ZERO,
        })
    }

    /// Every `fetch_page` call takes at least `fetch_delay`.
    pub fn slow(rows: Vec<Value>, fetch_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            rows: rows
                .into_iter()
                .filter_map(|row| row.as_object().cloned())
                .collect(),
            failures: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicUsize::new(0),
            fetch_delay,
        })
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn platform(&self) -> &'static str {
        "rest"
    }

    async fn count(&self, _descriptor: &SourceDescriptor) -> Result<u64, SourceError> {
        Ok(self.rows.len() as u64)
    }

    async fn fetch_page(
        &self,
        _descriptor: &SourceDescriptor,
        offset: u64,
        limit: u64,
    ) -> Result<SourcePage, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        if let Some(failure) = self.failures.lock().unwrap().pop_front() {
            return Err(failure);
        }

        let start = (offset as usize).min(self.rows.len());
        let end = (start + limit as usize).min(self.rows.len());
        Ok(SourcePage {
            rows: self.rows[start..end].to_vec(),
            malformed: Vec::new(),
            has_more: end < self.rows.len(),
        })
    }
}

/// REST descriptor resolved by [`ScriptedSource`]
pub fn scripted_descriptor(source_id: &str) -> SourceDescriptor {
    SourceDescriptor {
        source_id: source_id.to_string(),
        settings: SourceSettings::Rest(RestSettings {
            base_url: "https://supplier.test/api".to_string(),
            items_path: "/products".to_string(),
            items_field: "items".to_string(),
            count_path: None,
            credential_env: None,
            query: Default::default(),
        }),
    }
}

/// Test harness: database, dispatcher and an executor sharing one registry.
pub struct Harness {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub dispatcher: Arc<ChunkDispatcher>,
    pub executor: ChunkExecutor,
}

impl Harness {
    pub async fn new(config: AppConfig, adapter: Arc<dyn SourceAdapter>) -> Result<Self> {
        Self::with_db(setup_test_db().await?, config, adapter)
    }

    /// Harness over an already migrated database.
    pub fn with_db(
        db: DatabaseConnection,
        config: AppConfig,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Result<Self> {
        let mut registry = SourceRegistry::new();
        registry.register(adapter);

        let config = Arc::new(config);
        let dispatcher = Arc::new(ChunkDispatcher::new(
            db.clone(),
            config.clone(),
            Arc::new(registry),
        ));
        let executor = ChunkExecutor::new(db.clone(), dispatcher.clone(), config.worker.clone());

        Ok(Self {
            db,
            config,
            dispatcher,
            executor,
        })
    }

    pub async fn job(&self, job_id: Uuid) -> Result<job::Model> {
        Ok(job::Entity::find_by_id(job_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {} missing", job_id))?)
    }
}

pub fn product_row(reference: &str, ean: Option<&str>, name: &str, price: &str) -> Value {
    let mut row = json!({
        "sku": reference,
        "name": name,
        "price": price,
        "stock": 3,
    });
    if let Some(ean) = ean {
        row["ean"] = json!(ean);
    }
    row
}

pub async fn insert_canonical(
    db: &DatabaseConnection,
    owner_id: Uuid,
    ean: Option<&str>,
    name: &str,
) -> Result<canonical_product::Model> {
    let now = Utc::now().fixed_offset();
    Ok(canonical_product::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        ean: Set(ean.map(str::to_string)),
        name: Set(name.to_string()),
        brand: Set(None),
        attributes: Set(json!({})),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?)
}

pub async fn insert_supplier_record(
    db: &DatabaseConnection,
    owner_id: Uuid,
    source_id: &str,
    reference: &str,
    name: &str,
) -> Result<supplier_record::Model> {
    let now = Utc::now().fixed_offset();
    Ok(supplier_record::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        source_id: Set(source_id.to_string()),
        external_reference: Set(reference.to_string()),
        ean: Set(None),
        name: Set(name.to_string()),
        brand: Set(None),
        price: Set(9.99),
        stock: Set(1),
        currency: Set("EUR".to_string()),
        extra: Set(json!({})),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?)
}

pub async fn insert_link(
    db: &DatabaseConnection,
    owner_id: Uuid,
    record_id: Uuid,
    product_id: Uuid,
    origin: match_link::LinkOrigin,
) -> Result<match_link::Model> {
    let now = Utc::now().fixed_offset();
    Ok(match_link::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        supplier_record_id: Set(record_id),
        canonical_product_id: Set(product_id),
        link_type: Set(match_link::LinkType::ExactId),
        origin: Set(origin),
        confidence: Set(100),
        created_by: Set("test".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?)
}

pub async fn insert_enrichment(
    db: &DatabaseConnection,
    owner_id: Uuid,
    product_id: Option<Uuid>,
    record_id: Option<Uuid>,
) -> Result<product_enrichment::Model> {
    Ok(product_enrichment::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        canonical_product_id: Set(product_id),
        supplier_record_id: Set(record_id),
        kind: Set("description".to_string()),
        content: Set(json!({"text": "generated copy"})),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await?)
}
