use std::path::PathBuf;
use std::sync::Arc;

use convarc_adapters::{load_fixture_bundle, Endpoint, FixtureApi, RemoteSource};

fn bundle_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/offline/bundle.json")
}

#[tokio::test]
async fn offline_bundle_lists_both_pages_and_resolves_sentences() {
    let bundle = load_fixture_bundle(bundle_path()).expect("load bundle");
    assert_eq!(bundle.fixture_id, "offline-sample");

    let api = Arc::new(FixtureApi::from_bundle(bundle));
    let source = RemoteSource::new(api.clone());

    let window = source.list_conversations(500, 1).await.expect("list");
    let ids: Vec<&str> = window.records.iter().map(|r| r.record.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["c-1001", "c-1002", "c-1003", "c-1004", "c-1005", "c-1001", "c-1006"]
    );
    assert_eq!(window.next_page, 3);
    assert_eq!(window.malformed, 0);
    assert_eq!(api.calls(Endpoint::Conversations), 2);

    let text = source
        .fetch_transcription_sentences("T-1")
        .await
        .expect("sentences");
    assert_eq!(
        text.text,
        "Hi Dana, Thanks for joining today. Let's review the renewal."
    );
    assert_eq!(text.sentence_count, 3);
}
