use std::sync::{Arc, Mutex};
use std::time::Duration;

use atomic_store::{AtomicError, FetchOpts};
use serde_json::json;

use crate::support::{eventually, fixture, slow_fixture, CHILD, DOC, TITLE};

#[tokio::test]
async fn placeholder_loads_in_the_background() {
    let f = fixture();
    let resource = f.store.get_resource_loading(DOC, FetchOpts::default());
    assert!(resource.is_loading());
    assert_eq!(resource.subject(), DOC);

    resource.wait_until_loaded().await;
    assert!(resource.is_ready());
    assert_eq!(resource.get(TITLE), Some(json!("Hello")));
    assert!(f.store.get_cached(DOC).unwrap().ptr_eq(&resource));
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_fetch() {
    let f = slow_fixture(Duration::from_millis(50));
    let notified = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&notified);
    let _sub = f
        .store
        .subscribe(DOC, move |_| *counter.lock().unwrap() += 1);

    let first = f.store.get_resource_loading(DOC, FetchOpts::default());
    let second = f.store.get_resource_loading(DOC, FetchOpts::default());
    assert!(first.ptr_eq(&second));
    assert!(second.is_loading());

    let loaded = f.store.get_resource(DOC).await;
    assert!(loaded.ptr_eq(&first));
    assert_eq!(f.server.fetch_count(DOC), 1);
    assert_eq!(*notified.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn unsubscribing_does_not_cancel_a_shared_fetch() {
    let f = slow_fixture(Duration::from_millis(50));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (a, b) = (Arc::clone(&calls), Arc::clone(&calls));
    let leaving = f.store.subscribe(DOC, move |_| a.lock().unwrap().push("leaving"));
    let _staying = f.store.subscribe(DOC, move |_| b.lock().unwrap().push("staying"));

    let resource = f.store.get_resource_loading(DOC, FetchOpts::default());
    assert!(f.store.unsubscribe(&leaving));
    resource.wait_until_loaded().await;

    assert_eq!(*calls.lock().unwrap(), vec!["staying"]);
    assert_eq!(resource.get(TITLE), Some(json!("Hello")));
}

#[tokio::test]
async fn refetch_keeps_pending_edits() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    resource.set_unsafe(TITLE, json!("Local draft"));

    f.server
        .insert(json!({
            "@id": DOC,
            TITLE: "Remote title",
            "https://x/properties/description": "Added elsewhere",
        }))
        .unwrap();
    let refetched = f.store.fetch_resource_from_server(DOC).await.unwrap();

    assert!(refetched.ptr_eq(&resource));
    assert_eq!(resource.get(TITLE), Some(json!("Local draft")));
    assert_eq!(
        resource.get("https://x/properties/description"),
        Some(json!("Added elsewhere"))
    );
    assert_eq!(resource.committed_props()[TITLE], json!("Remote title"));
    assert!(resource.has_pending_changes());
}

#[tokio::test]
async fn nested_resources_are_cached_separately() {
    let f = fixture();
    f.server
        .insert(json!({
            "@id": "https://x/folder",
            "https://x/properties/children": [{"@id": CHILD, TITLE: "Child"}],
        }))
        .unwrap();

    let folder = f.store.get_resource("https://x/folder").await;
    assert_eq!(
        folder.get("https://x/properties/children"),
        Some(json!([CHILD]))
    );
    let child = f.store.get_cached(CHILD).unwrap();
    assert!(!child.is_loading());
    assert_eq!(child.get(TITLE), Some(json!("Child")));
    assert_eq!(f.server.fetch_count(CHILD), 0);
}

#[tokio::test]
async fn missing_resource_carries_its_error() {
    let f = fixture();
    let resource = f.store.get_resource("https://x/nope").await;
    assert!(!resource.is_loading());
    assert!(matches!(resource.error(), Some(AtomicError::NotFound(_))));
    assert!(f.store.errors().is_empty());
}

#[tokio::test]
async fn network_failure_marks_the_resource_and_reaches_the_sink() {
    let f = fixture();
    f.server.set_offline(true);
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let _sub = f
        .store
        .subscribe(DOC, move |r| *sink.lock().unwrap() = r.error());

    let resource = f.store.get_resource(DOC).await;

    assert!(matches!(resource.error(), Some(AtomicError::Network(_))));
    assert_eq!(*seen.lock().unwrap(), resource.error());
    let errors = f.store.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].error, AtomicError::Network(_)));
}

#[tokio::test]
async fn pushed_changes_trigger_a_refetch() {
    let f = fixture();
    f.store.listen_for_changes();
    let resource = f.store.get_resource(DOC).await;

    f.server
        .insert(json!({"@id": DOC, TITLE: "Changed elsewhere"}))
        .unwrap();
    f.server.notify_change(DOC);

    eventually(|| resource.get(TITLE) == Some(json!("Changed elsewhere"))).await;
    assert_eq!(f.server.fetch_count(DOC), 2);
}

#[tokio::test]
async fn property_lookup_goes_through_the_cache() {
    let f = fixture();
    let done = f.store.get_property(crate::support::DONE).await.unwrap();
    assert_eq!(done.datatype, atomic_store::Datatype::Boolean);
    assert_eq!(done.shortname, "done");

    let missing = f.store.get_property("https://x/properties/nope").await;
    assert!(missing.is_err());
}

#[tokio::test(start_paused = true)]
async fn clear_discards_fetches_already_under_way() {
    let f = slow_fixture(Duration::from_millis(50));
    let orphan = f.store.get_resource_loading(DOC, FetchOpts::default());

    f.store.clear();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(f.store.get_cached(DOC).is_none());
    assert!(!orphan.is_loading());
    assert!(orphan.error().is_some());

    let fresh = f.store.get_resource(DOC).await;
    assert!(!fresh.ptr_eq(&orphan));
    assert_eq!(fresh.get(TITLE), Some(json!("Hello")));
    assert_eq!(f.server.fetch_count(DOC), 2);
}
