//! Integration tests for duplicate location planning and merging.

mod common;

use common::{TestEngine, report};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use univaf_core::{Availability, ExternalId};
use univaf_engine::{LocationRef, MergeOptions};
use univaf_metadata::repos::ExternalIdRepo;

const T0: OffsetDateTime = datetime!(2021-05-14 06:00:00 UTC);

#[tokio::test]
async fn test_shared_id_merges_into_oldest() {
    let t = TestEngine::new().await;
    let a = t.insert_location(T0, &[("kroger", "123")], |_| {}).await;
    let b = t
        .insert_location(T0 + Duration::hours(1), &[("kroger", "123")], |_| {})
        .await;

    let locations = t.engine.load_locations(&Default::default()).await.unwrap();
    let planned = t.engine.plan_duplicate_merges(&locations, None, false);
    assert_eq!(planned.plans.len(), 1);
    assert_eq!(planned.plans[0].target, a.id);
    assert_eq!(planned.plans[0].donors, vec![b.id]);

    let stats = t
        .engine
        .commit_merge(&planned.plans[0], true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.donors_deleted, 1);

    assert_eq!(t.engine.get_location(b.id).await.unwrap_err().code(), "not_found");
    let merged = t.engine.get_location(a.id).await.unwrap();
    assert!(merged.external_ids.contains(&ExternalId::new("kroger", "123")));
    assert!(
        merged
            .external_ids
            .contains(&ExternalId::new("univaf_v1", b.id.to_string()))
    );
}

#[tokio::test]
async fn test_commit_keeps_ids_attached_after_planning() {
    let t = TestEngine::new().await;
    let a = t.insert_location(T0, &[("kroger", "1")], |_| {}).await;
    let b = t
        .insert_location(T0 + Duration::hours(1), &[("kroger", "1")], |_| {})
        .await;

    let locations = t.engine.load_locations(&Default::default()).await.unwrap();
    let planned = t.engine.plan_duplicate_merges(&locations, None, false);
    assert_eq!(planned.plans.len(), 1);

    let late = T0 + Duration::hours(2);
    t.engine
        .metadata
        .add_external_ids(a.id, &[ExternalId::new("cvs", "42")], late)
        .await
        .unwrap();
    t.engine
        .metadata
        .add_external_ids(b.id, &[ExternalId::new("walgreens", "7")], late)
        .await
        .unwrap();

    t.engine.commit_merge(&planned.plans[0], true).await.unwrap();

    let merged = t.engine.get_location(a.id).await.unwrap();
    for id in [
        ExternalId::new("kroger", "1"),
        ExternalId::new("cvs", "42"),
        ExternalId::new("walgreens", "7"),
        ExternalId::new("univaf_v1", b.id.to_string()),
    ] {
        assert!(merged.external_ids.contains(&id), "missing {id}");
    }
    assert_eq!(merged.external_ids.len(), 4);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let t = TestEngine::new().await;
    t.insert_location(T0, &[("kroger", "1")], |_| {}).await;
    let b = t
        .insert_location(T0 + Duration::hours(1), &[("kroger", "1")], |_| {})
        .await;

    let report = t
        .engine
        .merge_duplicates(&MergeOptions::default(), false)
        .await
        .unwrap();
    assert_eq!(report.plans.len(), 1);
    assert_eq!(report.committed, 0);
    assert!(t.engine.get_location(b.id).await.is_ok());
}

#[tokio::test]
async fn test_second_pass_finds_nothing() {
    let t = TestEngine::new().await;
    t.insert_location(T0, &[("kroger", "1"), ("cvs", "9")], |_| {})
        .await;
    t.insert_location(T0 + Duration::hours(1), &[("kroger", "1")], |_| {})
        .await;
    t.insert_location(T0 + Duration::hours(2), &[("cvs", "9"), ("npi_usa", "x")], |_| {})
        .await;

    let first = t
        .engine
        .merge_duplicates(&MergeOptions::default(), true)
        .await
        .unwrap();
    assert_eq!(first.committed, 1);
    assert_eq!(first.stats.donors_deleted, 2);

    let second = t
        .engine
        .merge_duplicates(&MergeOptions::default(), true)
        .await
        .unwrap();
    assert!(second.plans.is_empty());
    assert!(second.conflicts.is_empty());
}

#[tokio::test]
async fn test_target_fields_are_never_overwritten() {
    let t = TestEngine::new().await;
    let a = t
        .insert_location(T0, &[("kroger", "1")], |l| {
            l.name = Some("Kroger Pharmacy #1".to_string());
            l.meta.insert("source".into(), "a".into());
            l.is_public = false;
        })
        .await;
    t.insert_location(T0 + Duration::hours(1), &[("kroger", "1")], |l| {
        l.name = Some("KROGER 1".to_string());
        l.city = Some("Newark".to_string());
        l.meta.insert("source".into(), "b".into());
        l.meta.insert("store_number".into(), "1".into());
    })
    .await;

    t.engine
        .merge_duplicates(&MergeOptions::default(), true)
        .await
        .unwrap();

    let merged = t.engine.get_location(a.id).await.unwrap();
    assert_eq!(merged.name.as_deref(), Some("Kroger Pharmacy #1"));
    assert_eq!(merged.city.as_deref(), Some("Newark"));
    assert_eq!(merged.meta["source"], "a");
    assert_eq!(merged.meta["store_number"], "1");
    assert!(merged.is_public);
}

#[tokio::test]
async fn test_transitive_duplicates_form_one_cluster() {
    let t = TestEngine::new().await;
    let a = t.insert_location(T0, &[("kroger", "1")], |_| {}).await;
    let b = t
        .insert_location(T0 + Duration::hours(1), &[("kroger", "1"), ("walgreens", "2")], |_| {})
        .await;
    let c = t
        .insert_location(T0 + Duration::hours(2), &[("walgreens", "2")], |_| {})
        .await;

    let locations = t.engine.load_locations(&Default::default()).await.unwrap();
    let planned = t.engine.plan_duplicate_merges(&locations, None, false);
    assert_eq!(planned.plans.len(), 1);
    assert_eq!(planned.plans[0].target, a.id);
    assert_eq!(planned.plans[0].donors, vec![b.id, c.id]);
}

#[tokio::test]
async fn test_conflict_skips_only_its_cluster() {
    let t = TestEngine::new().await;
    t.insert_location(T0, &[("kroger", "1"), ("cvs", "10")], |_| {})
        .await;
    let conflicted = t
        .insert_location(T0 + Duration::hours(1), &[("kroger", "1"), ("cvs", "20")], |_| {})
        .await;
    let c = t.insert_location(T0, &[("rite_aid", "5")], |_| {}).await;
    let d = t
        .insert_location(T0 + Duration::hours(1), &[("rite_aid", "5")], |_| {})
        .await;

    let report = t
        .engine
        .merge_duplicates(&MergeOptions::default(), true)
        .await
        .unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.committed, 1);
    assert!(report.failures.is_empty());

    assert!(t.engine.get_location(conflicted.id).await.is_ok());
    assert!(t.engine.get_location(c.id).await.is_ok());
    assert!(t.engine.get_location(d.id).await.is_err());
}

#[tokio::test]
async fn test_merge_keeps_freshest_availability_and_history() {
    let t = TestEngine::new().await;
    let engine = &t.engine;
    let a = t.insert_location(T0, &[("kroger", "1")], |_| {}).await;
    let b = t
        .insert_location(T0 + Duration::hours(1), &[("kroger", "1")], |_| {})
        .await;

    let at_a = LocationRef::Id(a.id);
    let at_b = LocationRef::Id(b.id);
    engine
        .reconcile_availability(&at_a, report("X", T0, Availability::No, None))
        .await
        .unwrap();
    engine
        .reconcile_availability(
            &at_b,
            report("X", T0 + Duration::hours(1), Availability::Yes, Some(2)),
        )
        .await
        .unwrap();
    engine
        .reconcile_availability(&at_b, report("Y", T0, Availability::Yes, None))
        .await
        .unwrap();
    engine.flush().await;

    let report = engine
        .merge_duplicates(&MergeOptions::default(), true)
        .await
        .unwrap();
    assert_eq!(report.stats.availability_replaced, 1);
    assert_eq!(report.stats.availability_moved, 1);
    assert_eq!(report.stats.log_entries_moved, 2);

    let records = engine.list_availability(a.id).await.unwrap();
    let sources: Vec<&str> = records.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(sources, vec!["X", "Y"]);
    assert_eq!(records[0].values.available, Availability::Yes);
    assert_eq!(records[0].checked_at, T0 + Duration::hours(1));

    let history = engine.list_availability_log(a.id, Some("X")).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_unpad_groups_zero_padded_values() {
    let t = TestEngine::new().await;
    t.insert_location(T0, &[("kroger", "0123")], |_| {}).await;
    t.insert_location(T0 + Duration::hours(1), &[("kroger", "123")], |_| {})
        .await;

    let locations = t.engine.load_locations(&Default::default()).await.unwrap();
    assert!(
        t.engine
            .plan_duplicate_merges(&locations, None, false)
            .is_empty()
    );
    let planned = t.engine.plan_duplicate_merges(&locations, None, true);
    assert_eq!(planned.plans.len(), 1);
    assert_eq!(planned.plans[0].external_ids.len(), 2);
}

#[tokio::test]
async fn test_excluded_and_unselected_systems_do_not_group() {
    let t = TestEngine::new().await;
    t.insert_location(T0, &[("vtrcks", "1"), ("cvs", "7")], |_| {})
        .await;
    t.insert_location(T0 + Duration::hours(1), &[("vtrcks", "1"), ("cvs", "7")], |_| {})
        .await;

    let locations = t.engine.load_locations(&Default::default()).await.unwrap();
    let only_vtrcks = vec!["vtrcks".to_string()];
    assert!(
        t.engine
            .plan_duplicate_merges(&locations, Some(&only_vtrcks), false)
            .is_empty()
    );
    let only_cvs = vec!["cvs".to_string()];
    assert_eq!(
        t.engine
            .plan_duplicate_merges(&locations, Some(&only_cvs), false)
            .plans
            .len(),
        1
    );
}
