use std::sync::{Arc, Mutex};
use std::time::Duration;

use atomic_store::{
    urls, AtomicError, CommitBuilder, NewResourceOpts, PendingChange, ResourceEventKind, SetOpts,
    Transport,
};
use serde_json::json;

use crate::support::{eventually, fixture, slow_ack_fixture, slow_fixture, DOC, TAGS, TITLE};

#[tokio::test]
async fn save_sends_one_commit_and_settles_pending() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    let saved = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&saved);
    let _handle = resource.on(ResourceEventKind::Saved, move |_| *counter.lock().unwrap() += 1);

    resource.set_unsafe(TITLE, json!("Saved title"));
    resource.save(&f.store).await.unwrap();

    assert_eq!(f.server.commit_count(), 1);
    assert!(!resource.has_pending_changes());
    assert_eq!(resource.committed_props()[TITLE], json!("Saved title"));
    assert_eq!(f.server.get(DOC).unwrap()[TITLE], json!("Saved title"));
    assert_eq!(
        resource.get(urls::LAST_COMMIT),
        Some(json!("https://x/commits/1"))
    );
    assert_eq!(*saved.lock().unwrap(), 1);

    let commit = &f.server.commits()[0];
    assert_eq!(commit.signer, f.agent.subject());
    assert!(commit.verify(&f.agent.public_key()).is_ok());
}

#[tokio::test]
async fn saving_twice_sends_at_most_one_commit() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    resource.set_unsafe(TITLE, json!("Once"));

    resource.save(&f.store).await.unwrap();
    resource.save(&f.store).await.unwrap();
    assert_eq!(f.server.commit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn overlapping_saves_send_one_commit() {
    let f = slow_fixture(Duration::from_millis(20));
    let resource = f.store.get_resource(DOC).await;
    resource.set_unsafe(TITLE, json!("Once"));

    let (a, b) = tokio::join!(resource.save(&f.store), resource.save(&f.store));
    a.unwrap();
    b.unwrap();
    assert_eq!(f.server.commit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_are_debounced_into_one_commit() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;

    for n in 0..10 {
        f.store
            .set_value(&resource, TITLE, Some(json!(format!("draft {n}"))), SetOpts::commit())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(f.server.commit_count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let commits = f.server.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].set[TITLE], json!("draft 9"));
    assert!(!resource.has_pending_changes());
}

#[tokio::test(start_paused = true)]
async fn debounce_delay_can_be_overridden() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    f.store
        .set_value(
            &resource,
            TITLE,
            Some(json!("Later")),
            SetOpts::commit().debounce(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(f.server.commit_count(), 0);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(f.server.commit_count(), 1);
}

#[tokio::test]
async fn saving_without_an_agent_fails_before_the_network() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    f.store.set_agent(None);
    resource.set_unsafe(TITLE, json!("Anonymous"));

    let err = resource.save(&f.store).await.unwrap_err();

    assert!(matches!(err, AtomicError::Signing(_)));
    assert_eq!(f.server.commit_count(), 0);
    assert_eq!(
        resource.pending_changes()[TITLE],
        PendingChange::Set(json!("Anonymous"))
    );
    assert_eq!(f.store.errors()[0].error, err);
}

#[tokio::test]
async fn stale_commit_is_rejected_then_succeeds_after_refetch() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;

    let elsewhere = CommitBuilder::new(DOC)
        .set(TITLE, json!("Edited elsewhere"))
        .sign(Some(&f.agent), 1)
        .unwrap();
    f.server
        .post_commit(&elsewhere.to_json_ad().unwrap())
        .await
        .unwrap();

    resource.set_unsafe("https://x/properties/note", json!("mine"));
    let err = resource.save(&f.store).await.unwrap_err();
    assert!(err.is_conflict());
    assert!(resource.has_pending_changes());
    assert!(f.store.errors().iter().any(|r| r.error == err));

    f.store.fetch_resource_from_server(DOC).await.unwrap();
    resource.save(&f.store).await.unwrap();
    let stored = f.server.get(DOC).unwrap();
    assert_eq!(stored[TITLE], json!("Edited elsewhere"));
    assert_eq!(stored["https://x/properties/note"], json!("mine"));
}

#[tokio::test]
async fn pushes_are_sent_as_push_operations() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    resource.push(TAGS, vec![json!("https://x/tags/b")]).unwrap();
    resource.save(&f.store).await.unwrap();

    let commit = &f.server.commits()[0];
    assert_eq!(commit.push[TAGS], vec![json!("https://x/tags/b")]);
    assert_eq!(
        f.server.get(DOC).unwrap()[TAGS],
        json!(["https://x/tags/a", "https://x/tags/b"])
    );
    assert_eq!(
        resource.get(TAGS),
        Some(json!(["https://x/tags/a", "https://x/tags/b"]))
    );
}

#[tokio::test(start_paused = true)]
async fn edits_made_during_a_save_survive_it() {
    let f = slow_fixture(Duration::from_millis(50));
    let resource = f.store.get_resource(DOC).await;
    resource.set_unsafe(TITLE, json!("In flight"));

    let (store, target) = (f.store.clone(), resource.clone());
    let saving = tokio::spawn(async move { target.save(&store).await });
    tokio::task::yield_now().await;
    resource.set_unsafe("https://x/properties/note", json!("typed meanwhile"));
    saving.await.unwrap().unwrap();

    let pending = resource.pending_changes();
    assert_eq!(pending.len(), 1);
    assert!(pending.contains_key("https://x/properties/note"));
    assert_eq!(resource.get(TITLE), Some(json!("In flight")));
}

#[tokio::test]
async fn new_resources_are_created_by_their_first_save() {
    let f = fixture();
    let resource = f
        .store
        .new_resource(NewResourceOpts::with_class(urls::CLASS).parent(DOC))
        .unwrap();
    resource.set_unsafe(TITLE, json!("Fresh"));
    resource.save(&f.store).await.unwrap();

    assert!(!resource.is_new());
    let stored = f.server.get(&resource.subject()).unwrap();
    assert_eq!(stored[urls::IS_A], json!([urls::CLASS]));
    assert_eq!(stored[urls::PARENT], json!(DOC));
    assert_eq!(stored[TITLE], json!("Fresh"));
}

#[tokio::test(start_paused = true)]
async fn destroy_evicts_only_after_confirmation() {
    let f = slow_fixture(Duration::from_millis(50));
    let resource = f.store.get_resource(DOC).await;

    let (store, target) = (f.store.clone(), resource.clone());
    let destroying = tokio::spawn(async move { target.destroy(&store).await });
    tokio::task::yield_now().await;

    assert_eq!(resource.get(TITLE), Some(json!("Hello")));
    assert!(f.store.get_cached(DOC).is_some());

    destroying.await.unwrap().unwrap();
    assert!(f.store.get_cached(DOC).is_none());
    assert!(f.server.get(DOC).is_none());
}

#[tokio::test]
async fn failed_destroy_keeps_the_resource_and_reports() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    f.server.set_offline(true);

    let err = resource.destroy(&f.store).await.unwrap_err();

    assert!(matches!(err, AtomicError::Network(_)));
    assert!(f.store.get_cached(DOC).is_some());
    assert_eq!(f.store.errors().len(), 1);
}

#[tokio::test]
async fn post_to_server_caches_the_answer() {
    let f = fixture();
    f.server.register_endpoint("https://x/search", |body| {
        let query = body
            .and_then(|b| b.get("q"))
            .and_then(|q| q.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(json!({
            "@id": "https://x/search/result",
            (urls::NAME): query,
            "https://x/properties/hits": [{"@id": "https://x/hit1", TITLE: "Hit"}],
        }))
    });

    let result = f
        .store
        .post_to_server("https://x/search", Some(json!({"q": "hello"})))
        .await
        .unwrap();

    assert_eq!(result.get(urls::NAME), Some(json!("hello")));
    assert!(f.store.get_cached("https://x/search/result").unwrap().ptr_eq(&result));
    assert!(f.store.get_cached("https://x/hit1").is_some());
}

#[tokio::test(start_paused = true)]
async fn refetch_before_the_ack_does_not_repeat_pushes() {
    let f = slow_ack_fixture(Duration::from_millis(50));
    let resource = f.store.get_resource(DOC).await;
    resource.push(TAGS, vec![json!("https://x/tags/b")]).unwrap();

    let saving = {
        let (store, resource) = (f.store.clone(), resource.clone());
        tokio::spawn(async move { resource.save(&store).await })
    };
    eventually(|| f.server.commit_count() == 1).await;
    f.store.fetch_resource_from_server(DOC).await.unwrap();

    let expected = json!(["https://x/tags/a", "https://x/tags/b"]);
    assert_eq!(resource.get(TAGS), Some(expected.clone()));

    saving.await.unwrap().unwrap();
    assert_eq!(resource.get(TAGS), Some(expected.clone()));
    assert_eq!(resource.committed_props()[TAGS], expected);
    assert_eq!(f.server.get(DOC).unwrap()[TAGS], expected);
    assert!(!resource.has_pending_changes());
    assert_eq!(
        resource.get(urls::LAST_COMMIT),
        Some(json!("https://x/commits/1"))
    );
}
