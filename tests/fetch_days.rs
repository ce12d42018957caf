// tests/fetch_days.rs
use chrono::NaiveDate;
use interaction_sync::fetch::download_contacts;
use interaction_sync::service::ServiceCall;
use interaction_sync::{ArtifactStore, DateRange, FixtureService, InteractionType};
use serde_json::json;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn one_call_and_one_artifact_per_day_across_a_month_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ArtifactStore::open(dir.path()).unwrap();
    let svc = FixtureService::new()
        .with_contacts(InteractionType::Im, Some("2019-01-31"), vec![json!({"ContactID": 7})])
        .with_contacts(InteractionType::Im, Some("2019-02-01"), vec![json!({"ContactID": 8})]);
    let range = DateRange::new(day(2019, 1, 30), day(2019, 2, 2)).unwrap();

    let names = download_contacts(&svc, &mut store, InteractionType::Im, Some(range))
        .await
        .unwrap();

    assert_eq!(
        names,
        vec![
            "IM_2019-01-30_contacts.txt",
            "IM_2019-01-31_contacts.txt",
            "IM_2019-02-01_contacts.txt",
            "IM_2019-02-02_contacts.txt",
        ]
    );
    let windows: Vec<(String, String)> = svc
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ServiceCall::Contacts {
                start_time: Some(s),
                end_time: Some(e),
                ..
            } => Some((s, e)),
            _ => None,
        })
        .collect();
    assert_eq!(windows.len(), 4);
    assert_eq!(windows[0].0, "2019-01-30T00:00:00.000000");
    assert_eq!(windows[0].1, "2019-01-30T23:59:59.999000");
    assert_eq!(windows[3].0, "2019-02-02T00:00:00.000000");

    // Days with no contacts still produce an (empty) artifact.
    assert_eq!(store.read("IM_2019-01-30_contacts.txt").unwrap(), json!([]));
    assert_eq!(
        store.read("IM_2019-02-01_contacts.txt").unwrap(),
        json!([{"ContactID": 8}])
    );
}

#[tokio::test]
async fn refetching_a_day_replaces_its_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ArtifactStore::open(dir.path()).unwrap();
    let range = DateRange::single(day(2019, 1, 1));
    let first = FixtureService::new().with_contacts(
        InteractionType::Voice,
        Some("2019-01-01"),
        vec![json!({"ContactID": 1})],
    );
    download_contacts(&first, &mut store, InteractionType::Voice, Some(range))
        .await
        .unwrap();
    let second = FixtureService::new().with_contacts(
        InteractionType::Voice,
        Some("2019-01-01"),
        vec![json!({"ContactID": 1}), json!({"ContactID": 2})],
    );
    download_contacts(&second, &mut store, InteractionType::Voice, Some(range))
        .await
        .unwrap();

    let payload = store.read("Voice_2019-01-01_contacts.txt").unwrap();
    assert_eq!(payload.as_array().map(Vec::len), Some(2));
    assert_eq!(store.index().contact_files().count(), 1);
}
