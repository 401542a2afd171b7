// src/tests/sync_tests/reconcile_tests.rs
use crate::domain::images::media_marker;
use crate::sync::fields::{
    META_IMAGES_POSITION, META_MLS, META_PRICE, META_SQFT, TAX_BATHS, TAX_BEDS, TAX_CITY,
    TAX_PROPERTY_TYPE, TAX_STATUS,
};
use crate::sync::{
    FeaturedImagePolicy, ReconcileOutcome, ReconcilePolicy, ReconcileStep, Reconciler, SkipReason,
};
use crate::tests::utils::*;

fn reconciler_run(
    store: &mut RecordingStore,
    policy: &ReconcilePolicy,
    raw: &crate::apimo::RawListing,
) -> ReconcileOutcome {
    Reconciler::new(policy)
        .reconcile(store, &record(raw), now())
        .expect("reconcile")
}

#[test]
fn new_listing_is_created_with_everything_attached() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new().with_user("ana@agency.test", 7);
    let raw = with_pictures(
        raw_listing("1001", "Sea view flat"),
        &[("p1", "https://cdn.test/1001/one.jpg", 1)],
    );

    let outcome = reconciler_run(&mut store, &policy, &raw);
    let ReconcileOutcome::Created(id) = outcome else {
        panic!("expected a create, got {outcome:?}");
    };

    let fields = &store.state.listings[&id];
    assert_eq!(fields.title, "Sea view flat");
    assert_eq!(fields.body, "Bright flat.");
    assert_eq!(fields.author_id, 7);
    assert_eq!(fields.external_id, "1001");

    let meta = &store.state.meta[&id];
    assert_eq!(meta[META_PRICE], "250000");
    assert_eq!(meta[META_SQFT], "84.5");
    assert_eq!(meta[META_MLS], "1001");

    assert_eq!(store.terms_of(id, TAX_STATUS), vec!["en-vente"]);
    assert_eq!(store.terms_of(id, TAX_PROPERTY_TYPE), vec!["Apartment"]);
    assert_eq!(store.terms_of(id, TAX_BEDS), vec!["3"]);
    assert_eq!(store.terms_of(id, TAX_BATHS), vec!["1"]);
    assert_eq!(store.terms_of(id, TAX_CITY), vec!["Nice"]);

    let media = store.media_of(id);
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].marker, media_marker("p1"));
    assert_eq!(media[0].title, "Sea view flat");
    assert_eq!(store.state.featured.get(&id), Some(&media[0].id));
}

#[test]
fn unknown_agent_falls_back_to_default_author() {
    let policy = ReconcilePolicy {
        fallback_author_id: 3,
        ..ReconcilePolicy::default()
    };
    let mut store = RecordingStore::new();

    let ReconcileOutcome::Created(id) =
        reconciler_run(&mut store, &policy, &raw_listing("5", "Loft"))
    else {
        panic!("expected a create");
    };
    assert_eq!(store.state.listings[&id].author_id, 3);
}

#[test]
fn subtype_wins_when_it_exists_under_the_type() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    store.state.term_defs.push((
        TAX_PROPERTY_TYPE.to_string(),
        "Apartment".to_string(),
        None,
    ));
    store.state.term_defs.push((
        TAX_PROPERTY_TYPE.to_string(),
        "Penthouse".to_string(),
        Some("Apartment".to_string()),
    ));

    let ReconcileOutcome::Created(id) =
        reconciler_run(&mut store, &policy, &raw_listing("8", "Top floor"))
    else {
        panic!("expected a create");
    };
    assert_eq!(store.terms_of(id, TAX_PROPERTY_TYPE), vec!["Penthouse"]);
    assert_eq!(store.term_parent_of(id, TAX_PROPERTY_TYPE), Some("Apartment"));
}

#[test]
fn missing_subtype_falls_back_to_the_top_level_type() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    store.state.term_defs.push((
        TAX_PROPERTY_TYPE.to_string(),
        "Penthouse".to_string(),
        Some("House".to_string()),
    ));

    let ReconcileOutcome::Created(id) =
        reconciler_run(&mut store, &policy, &raw_listing("9", "Flat"))
    else {
        panic!("expected a create");
    };
    assert_eq!(store.terms_of(id, TAX_PROPERTY_TYPE), vec!["Apartment"]);
    assert_eq!(store.term_parent_of(id, TAX_PROPERTY_TYPE), None);
}

#[test]
fn stale_update_is_skipped_without_writes() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    store.seed_listing("Old title", Some("1001"));

    let raw = with_updated_at(raw_listing("1001", "New title"), Some(days_ago(10)));
    assert_eq!(
        reconciler_run(&mut store, &policy, &raw),
        ReconcileOutcome::Skipped(SkipReason::Stale)
    );
    assert_eq!(store.writes, 0);
    assert_eq!(store.state.listings.len(), 1);
}

#[test]
fn missing_timestamp_counts_as_stale_for_existing_listings() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    store.seed_listing("Flat", Some("7"));

    let raw = with_updated_at(raw_listing("7", "Flat"), Some("yesterday-ish".to_string()));
    assert_eq!(
        reconciler_run(&mut store, &policy, &raw),
        ReconcileOutcome::Skipped(SkipReason::Stale)
    );
    assert_eq!(store.writes, 0);
}

#[test]
fn stale_record_still_creates_missing_listing() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();

    let raw = with_updated_at(raw_listing("44", "Quiet studio"), None);
    assert!(matches!(
        reconciler_run(&mut store, &policy, &raw),
        ReconcileOutcome::Created(_)
    ));
}

#[test]
fn records_without_id_or_title_are_skipped() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();

    let no_id = raw_listing("", "Anonymous");
    assert_eq!(
        reconciler_run(&mut store, &policy, &no_id),
        ReconcileOutcome::Skipped(SkipReason::MissingExternalId)
    );

    let mut no_title = raw_listing("12", "");
    no_title.comments.clear();
    assert_eq!(
        reconciler_run(&mut store, &policy, &no_title),
        ReconcileOutcome::Skipped(SkipReason::MissingTitle)
    );
    assert_eq!(store.writes, 0);
}

#[test]
fn second_run_updates_in_place() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    let raw = with_pictures(
        raw_listing("1001", "Sea view flat"),
        &[
            ("p1", "https://cdn.test/1001/one.jpg", 1),
            ("p2", "https://cdn.test/1001/two.jpg", 2),
        ],
    );

    let ReconcileOutcome::Created(id) = reconciler_run(&mut store, &policy, &raw) else {
        panic!("expected a create");
    };
    let after_first = store.state.clone();

    assert_eq!(
        reconciler_run(&mut store, &policy, &raw),
        ReconcileOutcome::Updated(id)
    );
    assert_eq!(store.state.listings, after_first.listings);
    assert_eq!(store.state.meta, after_first.meta);
    assert_eq!(store.state.terms, after_first.terms);
    assert_eq!(store.state.media, after_first.media);
    assert_eq!(store.uploads.len(), 2);
}

#[test]
fn legacy_listing_is_adopted_by_title() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    let legacy = store.seed_listing("Sea view flat", None);

    assert_eq!(
        reconciler_run(&mut store, &policy, &raw_listing("1001", "Sea view flat")),
        ReconcileOutcome::Updated(legacy)
    );
    assert_eq!(store.state.listings[&legacy].external_id, "1001");
}

#[test]
fn same_title_with_other_external_id_is_a_new_listing() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    let other = store.seed_listing("Sea view flat", Some("999"));

    let outcome = reconciler_run(&mut store, &policy, &raw_listing("1001", "Sea view flat"));
    assert!(matches!(outcome, ReconcileOutcome::Created(id) if id != other));
    assert_eq!(store.state.listings.len(), 2);
}

#[test]
fn removed_images_are_deleted_and_new_ones_uploaded() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    let first = with_pictures(
        raw_listing("1001", "Sea view flat"),
        &[
            ("a", "https://cdn.test/1001/a.jpg", 1),
            ("b", "https://cdn.test/1001/b.jpg", 2),
        ],
    );
    let ReconcileOutcome::Created(id) = reconciler_run(&mut store, &policy, &first) else {
        panic!("expected a create");
    };

    let second = with_pictures(
        raw_listing("1001", "Sea view flat"),
        &[
            ("b", "https://cdn.test/1001/b.jpg", 1),
            ("c", "https://cdn.test/1001/c.jpg", 2),
        ],
    );
    reconciler_run(&mut store, &policy, &second);

    let mut markers: Vec<_> = store
        .media_of(id)
        .iter()
        .map(|m| m.marker.clone())
        .collect();
    markers.sort();
    assert_eq!(markers, vec![media_marker("b"), media_marker("c")]);
    assert_eq!(
        store.uploads,
        vec![
            "https://cdn.test/1001/a.jpg",
            "https://cdn.test/1001/b.jpg",
            "https://cdn.test/1001/c.jpg",
        ]
    );
}

#[test]
fn replaced_image_file_is_uploaded_again() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    let first = with_pictures(
        raw_listing("1001", "Flat"),
        &[("a", "https://cdn.test/1001/a.jpg", 1)],
    );
    reconciler_run(&mut store, &policy, &first);

    let second = with_pictures(
        raw_listing("1001", "Flat"),
        &[("a", "https://cdn.test/1001/a-v2.jpg", 1)],
    );
    reconciler_run(&mut store, &policy, &second);

    assert_eq!(store.state.media.len(), 1);
    assert_eq!(store.uploads.len(), 2);
    let media = store.state.media.values().next().unwrap();
    assert_eq!(media.source_url, "https://cdn.test/1001/a-v2.jpg");
}

fn featured_for(policy: FeaturedImagePolicy) -> (RecordingStore, i64) {
    let policy = ReconcilePolicy {
        featured_image: policy,
        ..ReconcilePolicy::default()
    };
    let mut store = RecordingStore::new();
    let raw = with_pictures(
        raw_listing("1001", "Flat"),
        &[
            ("late", "https://cdn.test/1001/late.jpg", 3),
            ("early", "https://cdn.test/1001/early.jpg", 1),
        ],
    );
    let ReconcileOutcome::Created(id) = reconciler_run(&mut store, &policy, &raw) else {
        panic!("expected a create");
    };
    (store, id)
}

fn media_id(store: &RecordingStore, image_id: &str) -> i64 {
    let marker = media_marker(image_id);
    store
        .state
        .media
        .values()
        .find(|m| m.marker == marker)
        .map(|m| m.id)
        .unwrap()
}

#[test]
fn featured_image_is_first_encountered_by_default() {
    let (store, id) = featured_for(FeaturedImagePolicy::FirstEncountered);
    assert_eq!(store.state.featured[&id], media_id(&store, "late"));
}

#[test]
fn featured_image_can_follow_rank() {
    let (store, id) = featured_for(FeaturedImagePolicy::LowestRank);
    assert_eq!(store.state.featured[&id], media_id(&store, "early"));

    let expected = format!(
        r#"{{"1":{},"3":{}}}"#,
        media_id(&store, "early"),
        media_id(&store, "late")
    );
    assert_eq!(store.state.meta[&id][META_IMAGES_POSITION], expected);
}

#[test]
fn failing_step_rolls_back_the_listing() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    store.fail_on = Some("set_listing_meta");

    let raw = with_pictures(
        raw_listing("1001", "Flat"),
        &[("a", "https://cdn.test/1001/a.jpg", 1)],
    );
    let err = Reconciler::new(&policy)
        .reconcile(&mut store, &record(&raw), now())
        .unwrap_err();

    assert_eq!(err.mls, "1001");
    assert_eq!(err.step, ReconcileStep::Metadata);
    assert_eq!(store.rollbacks, 1);
    assert!(store.state.listings.is_empty());
    assert!(store.state.media.is_empty());
}

#[test]
fn failing_update_reports_update_step() {
    let policy = ReconcilePolicy::default();
    let mut store = RecordingStore::new();
    let id = store.seed_listing("Flat", Some("1001"));
    store.fail_on = Some("update_listing");

    let err = Reconciler::new(&policy)
        .reconcile(&mut store, &record(&raw_listing("1001", "Renamed flat")), now())
        .unwrap_err();

    assert_eq!(err.step, ReconcileStep::UpdateListing);
    assert_eq!(store.state.listings[&id].title, "Flat");
}
