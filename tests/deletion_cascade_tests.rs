//! Cascading bulk deletion: dependents go first, orphans follow, nothing dangles.

mod test_utils;

use anyhow::Result;
use catalog_sync::config::DeletionConfig;
use catalog_sync::jobs::{CascadingDeleter, DeletionTarget, JobOptions, TargetEntity};
use catalog_sync::models::job::JobStatus;
use catalog_sync::models::match_link::{self, LinkOrigin};
use catalog_sync::models::match_suggestion;
use catalog_sync::models::{canonical_product, product_enrichment, supplier_record};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use test_utils::{
    Harness, ScriptedSource, insert_canonical, insert_enrichment, insert_link,
    insert_supplier_record, test_config,
};
use uuid::Uuid;

fn record_target(id: Uuid) -> DeletionTarget {
    DeletionTarget {
        entity: TargetEntity::SupplierRecord,
        id,
    }
}

async fn empty_harness() -> Result<Harness> {
    Harness::new(test_config(), ScriptedSource::new(Vec::new())).await
}

#[tokio::test]
async fn test_deleting_records_removes_dependents_and_orphans() -> Result<()> {
    let harness = empty_harness().await?;
    let db = &harness.db;
    let owner_id = Uuid::new_v4();

    // Two records share one product; a third owns its product alone
    let shared = insert_canonical(db, owner_id, Some("4006381333931"), "Shared Product").await?;
    let alone = insert_canonical(db, owner_id, Some("4006381333948"), "Lonely Product").await?;
    let r1 = insert_supplier_record(db, owner_id, "acme", "D-1", "Shared Product").await?;
    let r2 = insert_supplier_record(db, owner_id, "acme", "D-2", "Shared Product v2").await?;
    let r3 = insert_supplier_record(db, owner_id, "acme", "D-3", "Lonely Product").await?;
    insert_link(db, owner_id, r1.id, shared.id, LinkOrigin::Automatic).await?;
    insert_link(db, owner_id, r2.id, shared.id, LinkOrigin::Automatic).await?;
    insert_link(db, owner_id, r3.id, alone.id, LinkOrigin::Automatic).await?;
    insert_link(db, owner_id, r3.id, alone.id, LinkOrigin::Manual).await?;
    insert_enrichment(db, owner_id, Some(shared.id), None).await?;
    insert_enrichment(db, owner_id, Some(alone.id), None).await?;
    insert_enrichment(db, owner_id, None, Some(r3.id)).await?;

    let now = Utc::now().fixed_offset();
    match_suggestion::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        job_id: Set(None),
        supplier_record_id: Set(r1.id),
        canonical_product_id: Set(alone.id),
        link_type: Set(match_link::LinkType::FuzzyName),
        confidence: Set(80),
        status: Set(match_suggestion::SuggestionStatus::Pending),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    let job = harness
        .dispatcher
        .submit_deletion(
            owner_id,
            vec![record_target(r1.id), record_target(r3.id)],
            JobOptions {
                chunk_size: Some(1),
                ..JobOptions::default()
            },
        )
        .await?;
    let executed = harness.executor.drain().await?;
    assert_eq!(executed, 2);

    let job = harness.job(job.id).await?;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_items, 2);
    assert_eq!(job.error_count, 0);

    let remaining_records: Vec<Uuid> = supplier_record::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(remaining_records, vec![r2.id]);

    // Still linked from r2, so the shared product survives
    assert!(canonical_product::Entity::find_by_id(shared.id).one(db).await?.is_some());
    assert!(canonical_product::Entity::find_by_id(alone.id).one(db).await?.is_none());

    let links = match_link::Entity::find().all(db).await?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].supplier_record_id, r2.id);

    assert_eq!(match_suggestion::Entity::find().count(db).await?, 0);

    let enrichments = product_enrichment::Entity::find().all(db).await?;
    assert_eq!(enrichments.len(), 1);
    assert_eq!(enrichments[0].canonical_product_id, Some(shared.id));

    Ok(())
}

#[tokio::test]
async fn test_deleting_canonical_product_unlinks_records() -> Result<()> {
    let harness = empty_harness().await?;
    let db = &harness.db;
    let owner_id = Uuid::new_v4();

    let product = insert_canonical(db, owner_id, None, "Standing Desk").await?;
    let record = insert_supplier_record(db, owner_id, "acme", "P-1", "Standing Desk").await?;
    insert_link(db, owner_id, record.id, product.id, LinkOrigin::Automatic).await?;
    insert_enrichment(db, owner_id, Some(product.id), None).await?;

    harness
        .dispatcher
        .submit_deletion(
            owner_id,
            vec![DeletionTarget {
                entity: TargetEntity::CanonicalProduct,
                id: product.id,
            }],
            JobOptions::default(),
        )
        .await?;
    harness.executor.drain().await?;

    assert_eq!(canonical_product::Entity::find().count(db).await?, 0);
    assert_eq!(match_link::Entity::find().count(db).await?, 0);
    assert_eq!(product_enrichment::Entity::find().count(db).await?, 0);
    assert!(
        supplier_record::Entity::find_by_id(record.id).one(db).await?.is_some(),
        "records outlive the product they pointed at"
    );

    Ok(())
}

#[tokio::test]
async fn test_missing_and_foreign_targets_count_as_deleted() -> Result<()> {
    let harness = empty_harness().await?;
    let db = &harness.db;
    let owner_id = Uuid::new_v4();
    let someone_else = Uuid::new_v4();

    let foreign = insert_supplier_record(db, someone_else, "acme", "F-1", "Not yours").await?;

    let job = harness
        .dispatcher
        .submit_deletion(
            owner_id,
            vec![record_target(Uuid::new_v4()), record_target(foreign.id)],
            JobOptions::default(),
        )
        .await?;
    harness.executor.drain().await?;

    let job = harness.job(job.id).await?;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_items, 2);
    assert!(
        supplier_record::Entity::find_by_id(foreign.id).one(db).await?.is_some(),
        "another owner's record is never touched"
    );

    Ok(())
}

#[tokio::test]
async fn test_delete_target_is_repeatable() -> Result<()> {
    let harness = empty_harness().await?;
    let db = &harness.db;
    let owner_id = Uuid::new_v4();

    let product = insert_canonical(db, owner_id, None, "Whiteboard").await?;
    let record = insert_supplier_record(db, owner_id, "acme", "W-1", "Whiteboard").await?;
    insert_link(db, owner_id, record.id, product.id, LinkOrigin::Automatic).await?;

    let deleter = CascadingDeleter::new(
        db.clone(),
        DeletionConfig {
            chunk_size: 10,
            item_timeout_ms: 5_000,
            inter_item_delay_ms: 0,
        },
    );

    let first = deleter.delete_target(owner_id, &record_target(record.id)).await?;
    assert!(first.found);
    assert_eq!(first.links, 1);
    assert_eq!(first.orphaned_canonicals, 1);

    let second = deleter.delete_target(owner_id, &record_target(record.id)).await?;
    assert!(!second.found);
    assert_eq!(canonical_product::Entity::find().count(db).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_deletion_progress_is_conserved_across_chunks() -> Result<()> {
    let harness = empty_harness().await?;
    let db = &harness.db;
    let owner_id = Uuid::new_v4();

    let mut targets = Vec::new();
    for index in 0..7 {
        let record =
            insert_supplier_record(db, owner_id, "acme", &format!("N-{}", index), "Item").await?;
        targets.push(record_target(record.id));
    }

    let job = harness
        .dispatcher
        .submit_deletion(
            owner_id,
            targets,
            JobOptions {
                chunk_size: Some(3),
                ..JobOptions::default()
            },
        )
        .await?;
    let executed = harness.executor.drain().await?;
    assert_eq!(executed, 3);

    let job = harness.job(job.id).await?;
    assert_eq!(job.processed_items, job.total_items);
    assert_eq!(job.cursor, 7);
    assert_eq!(
        supplier_record::Entity::find()
            .filter(supplier_record::Column::OwnerId.eq(owner_id))
            .count(db)
            .await?,
        0
    );

    Ok(())
}
