//! End-to-end import runs: submit, drain the chunk queue, inspect the catalog.

mod test_utils;

use anyhow::Result;
use catalog_sync::dispatcher::ChunkOutcome;
use catalog_sync::jobs::JobOptions;
use catalog_sync::models::chunk_task::TaskStatus;
use catalog_sync::models::job::{ErrorKind, JobStatus};
use catalog_sync::models::match_link::{self, LinkOrigin, LinkType};
use catalog_sync::models::match_suggestion::{self, SuggestionStatus};
use catalog_sync::models::{canonical_product, supplier_record};
use catalog_sync::repositories::{SuggestionRepository, chunk_task};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use test_utils::{
    Harness, ScriptedSource, insert_canonical, product_row, scripted_descriptor, test_config,
};
use uuid::Uuid;

fn catalog_rows() -> Vec<serde_json::Value> {
    vec![
        product_row("A-1", Some("4006381333931"), "HDMI Cable 2m", "4,99"),
        product_row("A-2", Some("4006381333948"), "Desk Lamp", "24.50"),
        product_row("A-3", None, "Ergonomic Office Chair", "189,00 €"),
        product_row("A-4", Some("4006381333955"), "Wireless Keyboard", "39.90"),
        product_row("A-5", None, "Notebook A5 squared", "2.10"),
    ]
}

fn options(chunk_size: u32) -> JobOptions {
    JobOptions {
        chunk_size: Some(chunk_size),
        ..JobOptions::default()
    }
}

#[tokio::test]
async fn test_import_runs_in_chunks_to_completion() -> Result<()> {
    let source = ScriptedSource::new(catalog_rows());
    let harness = Harness::new(test_config(), source.clone()).await?;
    let owner_id = Uuid::new_v4();

    let job = harness
        .dispatcher
        .submit_import(owner_id, scripted_descriptor("acme"), options(2))
        .await?;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.total_items, 5);

    let executed = harness.executor.drain().await?;
    assert_eq!(executed, 3, "5 rows in chunks of 2 take 3 chunks");
    assert_eq!(source.fetch_calls(), 3);

    let job = harness.job(job.id).await?;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_items, 5);
    assert_eq!(job.new_count, 5);
    assert_eq!(job.matched_count, 0);
    assert_eq!(job.error_count, 0);
    assert_eq!(job.cursor, 5);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    let tasks = chunk_task::list_for_job(&harness.db, job.id).await?;
    let offsets: Vec<i64> = tasks.iter().map(|t| t.chunk_offset).collect();
    assert_eq!(offsets, vec![0, 2, 4]);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Done));

    let records = supplier_record::Entity::find()
        .filter(supplier_record::Column::OwnerId.eq(owner_id))
        .count(&harness.db)
        .await?;
    assert_eq!(records, 5);

    let links = match_link::Entity::find()
        .filter(match_link::Column::OwnerId.eq(owner_id))
        .all(&harness.db)
        .await?;
    assert_eq!(links.len(), 5);
    assert!(
        links
            .iter()
            .all(|l| l.origin == LinkOrigin::Automatic && l.link_type == LinkType::ExactId)
    );

    let chair = supplier_record::Entity::find()
        .filter(supplier_record::Column::ExternalReference.eq("A-3"))
        .one(&harness.db)
        .await?
        .unwrap();
    assert_eq!(chair.price, 189.0);
    assert_eq!(chair.currency, "EUR");
    assert_eq!(chair.stock, 3);

    Ok(())
}

#[tokio::test]
async fn test_reimport_is_idempotent() -> Result<()> {
    let source = ScriptedSource::new(catalog_rows());
    let harness = Harness::new(test_config(), source).await?;
    let owner_id = Uuid::new_v4();

    for _ in 0..2 {
        harness
            .dispatcher
            .submit_import(owner_id, scripted_descriptor("acme"), options(3))
            .await?;
        harness.executor.drain().await?;
    }

    let records = supplier_record::Entity::find()
        .filter(supplier_record::Column::OwnerId.eq(owner_id))
        .count(&harness.db)
        .await?;
    let products = canonical_product::Entity::find()
        .filter(canonical_product::Column::OwnerId.eq(owner_id))
        .count(&harness.db)
        .await?;
    let links = match_link::Entity::find()
        .filter(match_link::Column::OwnerId.eq(owner_id))
        .count(&harness.db)
        .await?;

    assert_eq!(records, 5);
    assert_eq!(products, 5);
    assert_eq!(links, 5);

    let jobs = catalog_sync::models::job::Entity::find()
        .filter(catalog_sync::models::job::Column::OwnerId.eq(owner_id))
        .all(&harness.db)
        .await?;
    let second = jobs.iter().find(|j| j.new_count == 0).expect("second run creates nothing");
    assert_eq!(second.matched_count, 5);
    assert_eq!(second.status, JobStatus::Completed);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_ean_yields_one_canonical_product() -> Result<()> {
    let rows = vec![
        product_row("B-1", Some("5901234123457"), "USB-C Charger 65W", "29.00"),
        product_row("B-2", Some("5901234123457"), "Charger USB C 65 Watt", "28.50"),
        product_row("B-3", Some("5901234123457"), "65W GaN charger", "27.00"),
    ];
    let harness = Harness::new(test_config(), ScriptedSource::new(rows)).await?;
    let owner_id = Uuid::new_v4();

    let job = harness
        .dispatcher
        .submit_import(owner_id, scripted_descriptor("acme"), options(2))
        .await?;
    harness.executor.drain().await?;

    let with_ean = canonical_product::Entity::find()
        .filter(canonical_product::Column::OwnerId.eq(owner_id))
        .filter(canonical_product::Column::Ean.eq("5901234123457"))
        .all(&harness.db)
        .await?;
    assert_eq!(with_ean.len(), 1);

    let linked = match_link::Entity::find()
        .filter(match_link::Column::CanonicalProductId.eq(with_ean[0].id))
        .count(&harness.db)
        .await?;
    assert_eq!(linked, 3);

    let job = harness.job(job.id).await?;
    assert_eq!(job.new_count, 1);
    assert_eq!(job.matched_count, 2);

    Ok(())
}

#[tokio::test]
async fn test_close_name_becomes_suggestion_and_can_be_confirmed() -> Result<()> {
    let rows = vec![product_row("L-1", None, "Logitech MX Master 3", "89,90")];
    let harness = Harness::new(test_config(), ScriptedSource::new(rows)).await?;
    let owner_id = Uuid::new_v4();
    let existing = insert_canonical(&harness.db, owner_id, None, "Logitech MX Master 3S").await?;

    let job = harness
        .dispatcher
        .submit_import(owner_id, scripted_descriptor("acme"), options(10))
        .await?;
    harness.executor.drain().await?;

    let job = harness.job(job.id).await?;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.suggested_count, 1);
    assert_eq!(job.new_count, 0);
    assert_eq!(job.matched_count, 0);

    let suggestion = match_suggestion::Entity::find()
        .filter(match_suggestion::Column::OwnerId.eq(owner_id))
        .one(&harness.db)
        .await?
        .unwrap();
    assert_eq!(suggestion.canonical_product_id, existing.id);
    assert_eq!(suggestion.confidence, 90);
    assert_eq!(suggestion.link_type, LinkType::FuzzyName);
    assert_eq!(suggestion.status, SuggestionStatus::Pending);
    assert_eq!(suggestion.job_id, Some(job.id));

    let links = match_link::Entity::find()
        .filter(match_link::Column::OwnerId.eq(owner_id))
        .count(&harness.db)
        .await?;
    assert_eq!(links, 0, "suggestions never create links on their own");

    let repo = SuggestionRepository::new(harness.db.clone());
    let link = repo.confirm(owner_id, suggestion.id, "reviewer").await.unwrap();
    assert_eq!(link.origin, LinkOrigin::Manual);
    assert_eq!(link.link_type, LinkType::Manual);
    assert_eq!(link.canonical_product_id, existing.id);

    let again = repo.confirm(owner_id, suggestion.id, "reviewer").await;
    assert!(again.is_err(), "a reviewed suggestion cannot be confirmed twice");

    Ok(())
}

#[tokio::test]
async fn test_auto_link_disabled_turns_exact_matches_into_suggestions() -> Result<()> {
    let rows = vec![product_row("E-1", Some("4006381333931"), "Stabilo Point 88", "1.20")];
    let harness = Harness::new(test_config(), ScriptedSource::new(rows)).await?;
    let owner_id = Uuid::new_v4();
    let existing = insert_canonical(&harness.db, owner_id, Some("4006381333931"), "Stabilo point 88 fineliner").await?;

    let job = harness
        .dispatcher
        .submit_import(
            owner_id,
            scripted_descriptor("acme"),
            JobOptions {
                auto_link: false,
                ..options(10)
            },
        )
        .await?;
    harness.executor.drain().await?;

    let job = harness.job(job.id).await?;
    assert_eq!(job.suggested_count, 1);

    let suggestion = match_suggestion::Entity::find()
        .filter(match_suggestion::Column::OwnerId.eq(owner_id))
        .one(&harness.db)
        .await?
        .unwrap();
    assert_eq!(suggestion.canonical_product_id, existing.id);
    assert_eq!(suggestion.confidence, 100);
    assert_eq!(suggestion.link_type, LinkType::ExactId);

    Ok(())
}

#[tokio::test]
async fn test_bad_rows_are_recorded_and_skipped() -> Result<()> {
    let rows = vec![
        product_row("C-1", None, "Printer Paper A4", "5.49"),
        json!({"sku": "C-2", "price": "3.00"}),
        json!({"sku": "C-3", "name": "Toner", "price": "call us"}),
        product_row("C-4", Some("4006381333930"), "Stapler", "7.00"),
    ];
    let harness = Harness::new(test_config(), ScriptedSource::new(rows)).await?;
    let owner_id = Uuid::new_v4();

    let job = harness
        .dispatcher
        .submit_import(owner_id, scripted_descriptor("acme"), options(10))
        .await?;
    harness.executor.drain().await?;

    let job = harness.job(job.id).await?;
    assert_eq!(job.status, JobStatus::CompletedWithErrors);
    assert_eq!(job.processed_items, 2, "rejected rows are not progress");
    assert_eq!(job.cursor, 4);
    assert_eq!(job.new_count, 2);
    assert_eq!(job.error_count, 2);

    let errors = job.error_entries();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].reference, "C-2");
    assert_eq!(errors[0].kind, ErrorKind::Validation);
    assert_eq!(errors[1].reference, "C-3");
    assert_eq!(errors[1].kind, ErrorKind::Parsing);

    let stapler = supplier_record::Entity::find()
        .filter(supplier_record::Column::ExternalReference.eq("C-4"))
        .one(&harness.db)
        .await?
        .unwrap();
    assert_eq!(stapler.ean, None, "invalid checksum keeps the row without an EAN");

    Ok(())
}

#[tokio::test]
async fn test_import_without_any_valid_row_fails() -> Result<()> {
    let rows = vec![
        json!({"sku": "X-1", "price": "3.00"}),
        json!({"sku": "X-2", "name": "Toner", "price": "abc"}),
    ];
    let harness = Harness::new(test_config(), ScriptedSource::new(rows)).await?;

    let job = harness
        .dispatcher
        .submit_import(Uuid::new_v4(), scripted_descriptor("acme"), options(10))
        .await?;
    harness.executor.drain().await?;

    let job = harness.job(job.id).await?;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.processed_items, 0);
    assert_eq!(job.error_count, 2);
    assert_eq!(job.cursor, 2, "the input is still fully consumed");
    assert!(job.completed_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_duplicate_task_for_counted_chunk_is_skipped() -> Result<()> {
    let harness = Harness::new(test_config(), ScriptedSource::new(catalog_rows())).await?;
    let owner_id = Uuid::new_v4();

    let job = harness
        .dispatcher
        .submit_import(owner_id, scripted_descriptor("acme"), options(2))
        .await?;

    let first = chunk_task::claim_due(&harness.db, 1).await?.remove(0);
    let outcome = harness.dispatcher.run_chunk(first.clone()).await?;
    assert_eq!(outcome, ChunkOutcome::Advanced { next_offset: 2 });

    // A redelivered copy of the same chunk must not count its rows again
    let outcome = harness.dispatcher.run_chunk(first).await?;
    assert_eq!(outcome, ChunkOutcome::Skipped);

    let job = harness.job(job.id).await?;
    assert_eq!(job.processed_items, 2);
    assert_eq!(job.cursor, 2);

    Ok(())
}

#[tokio::test]
async fn test_records_are_scoped_by_source() -> Result<()> {
    let rows = vec![product_row("S-1", Some("4006381333962"), "Monitor Arm", "59.00")];
    let harness = Harness::new(test_config(), ScriptedSource::new(rows)).await?;
    let owner_id = Uuid::new_v4();

    for source_id in ["north", "south"] {
        harness
            .dispatcher
            .submit_import(owner_id, scripted_descriptor(source_id), options(5))
            .await?;
    }
    harness.executor.drain().await?;

    let records = supplier_record::Entity::find()
        .filter(supplier_record::Column::OwnerId.eq(owner_id))
        .count(&harness.db)
        .await?;
    let products = canonical_product::Entity::find()
        .filter(canonical_product::Column::OwnerId.eq(owner_id))
        .count(&harness.db)
        .await?;
    assert_eq!(records, 2, "same reference from two sources is two records");
    assert_eq!(products, 1, "both records resolve to one product by EAN");

    Ok(())
}

#[tokio::test]
async fn test_branded_reimport_keeps_link_without_suggesting_it() -> Result<()> {
    let mut row = product_row("B-1", None, "Bosch GSR 12V drill", "99.00");
    row["brand"] = json!("Bosch");
    let harness = Harness::new(test_config(), ScriptedSource::new(vec![row])).await?;
    let owner_id = Uuid::new_v4();

    let first = harness
        .dispatcher
        .submit_import(owner_id, scripted_descriptor("acme"), options(10))
        .await?;
    harness.executor.drain().await?;
    assert_eq!(harness.job(first.id).await?.new_count, 1);

    let second = harness
        .dispatcher
        .submit_import(owner_id, scripted_descriptor("acme"), options(10))
        .await?;
    harness.executor.drain().await?;

    let second = harness.job(second.id).await?;
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.matched_count, 1);
    assert_eq!(second.suggested_count, 0);
    assert_eq!(second.new_count, 0);

    let suggestions = match_suggestion::Entity::find()
        .filter(match_suggestion::Column::OwnerId.eq(owner_id))
        .count(&harness.db)
        .await?;
    assert_eq!(suggestions, 0, "an existing link is never offered for review");

    let links = match_link::Entity::find()
        .filter(match_link::Column::OwnerId.eq(owner_id))
        .count(&harness.db)
        .await?;
    assert_eq!(links, 1);

    Ok(())
}

#[tokio::test]
async fn test_moving_a_link_removes_the_unlinked_product() -> Result<()> {
    let harness = Harness::new(
        test_config(),
        ScriptedSource::new(vec![product_row("M-1", None, "Cordless Screwdriver", "49.00")]),
    )
    .await?;
    let owner_id = Uuid::new_v4();

    harness
        .dispatcher
        .submit_import(owner_id, scripted_descriptor("acme"), options(10))
        .await?;
    harness.executor.drain().await?;

    let created = canonical_product::Entity::find()
        .filter(canonical_product::Column::OwnerId.eq(owner_id))
        .one(&harness.db)
        .await?
        .unwrap();
    let listed = insert_canonical(&harness.db, owner_id, Some("4006381333931"), "Screwdriver Set Pro").await?;

    // The supplier now sends an EAN that resolves to the listed product
    let rerun = Harness::with_db(
        harness.db.clone(),
        test_config(),
        ScriptedSource::new(vec![product_row(
            "M-1",
            Some("4006381333931"),
            "Cordless Screwdriver",
            "49.00",
        )]),
    )?;
    let job = rerun
        .dispatcher
        .submit_import(owner_id, scripted_descriptor("acme"), options(10))
        .await?;
    rerun.executor.drain().await?;

    let job = rerun.job(job.id).await?;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.matched_count, 1);

    let link = match_link::Entity::find()
        .filter(match_link::Column::OwnerId.eq(owner_id))
        .one(&harness.db)
        .await?
        .unwrap();
    assert_eq!(link.canonical_product_id, listed.id);
    assert_eq!(link.link_type, LinkType::ExactId);

    assert!(
        canonical_product::Entity::find_by_id(created.id)
            .one(&harness.db)
            .await?
            .is_none(),
        "the product left without links is removed"
    );
    assert!(
        canonical_product::Entity::find_by_id(listed.id)
            .one(&harness.db)
            .await?
            .is_some()
    );

    Ok(())
}
