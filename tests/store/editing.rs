use std::sync::{Arc, Mutex};

use atomic_store::{
    urls, AtomicError, NewResourceOpts, ResourceEvent, ResourceEventKind, SetOpts,
};
use serde_json::json;

use crate::support::{fixture, CHILD, DOC, DONE, TAGS, TITLE};

#[tokio::test]
async fn staged_value_is_readable_before_any_commit() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;

    resource
        .set(&f.store, TITLE, json!("Renamed"), true)
        .await
        .unwrap();

    assert_eq!(resource.get(TITLE), Some(json!("Renamed")));
    assert_eq!(f.server.commit_count(), 0);
}

#[tokio::test]
async fn invalid_value_is_rejected_and_nothing_is_staged() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;

    let err = resource
        .set(&f.store, DONE, json!("not-a-bool"), true)
        .await
        .unwrap_err();

    assert!(matches!(err, AtomicError::Validation(_)));
    assert_eq!(resource.get(DONE), Some(json!(false)));
    assert!(!resource.has_pending_changes());
}

#[tokio::test]
async fn unvalidated_set_skips_the_property_lookup() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    resource
        .set(&f.store, "https://x/properties/unknown", json!(1), false)
        .await
        .unwrap();
    assert_eq!(f.server.fetch_count("https://x/properties/unknown"), 0);
    assert_eq!(resource.get("https://x/properties/unknown"), Some(json!(1)));
}

#[tokio::test]
async fn local_change_listeners_run_before_network_activity() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _handle = resource.on(ResourceEventKind::LocalChange, move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    resource.set_unsafe(TITLE, json!("Typed"));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![ResourceEvent::LocalChange {
            property: TITLE.into(),
            value: Some(json!("Typed")),
        }]
    );
    assert_eq!(f.server.commit_count(), 0);
}

#[tokio::test]
async fn set_value_with_none_stages_a_removal() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    f.store
        .set_value(&resource, TITLE, None, SetOpts::default())
        .await
        .unwrap();
    assert_eq!(resource.get(TITLE), None);
}

#[tokio::test]
async fn set_value_failures_reach_caller_and_sink() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    let result = f
        .store
        .set_value(&resource, DONE, Some(json!("yes")), SetOpts::commit())
        .await;

    assert!(matches!(result, Err(AtomicError::Validation(_))));
    let errors = f.store.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].error, AtomicError::Validation(_)));
}

#[tokio::test]
async fn push_appends_after_existing_items() {
    let f = fixture();
    let resource = f.store.get_resource(DOC).await;
    resource.push(TAGS, vec![json!("https://x/tags/b")]).unwrap();
    assert_eq!(
        resource.get(TAGS),
        Some(json!(["https://x/tags/a", "https://x/tags/b"]))
    );
    assert!(matches!(
        resource.push(TITLE, vec![json!("x")]),
        Err(AtomicError::NotAResourceArray(_))
    ));
}

#[tokio::test]
async fn new_resources_stay_local_until_saved() {
    let f = fixture();
    let resource = f
        .store
        .new_resource(
            NewResourceOpts::with_class(urls::CLASS)
                .parent(DOC)
                .propval(TITLE, json!("Draft")),
        )
        .unwrap();

    assert!(resource.is_new());
    assert!(!resource.is_loading());
    assert!(resource.subject().starts_with("https://x/doc1/"));
    assert_eq!(resource.get(urls::PARENT), Some(json!(DOC)));
    assert!(resource.has_class(urls::CLASS));
    assert!(f.server.get(&resource.subject()).is_none());
    assert_eq!(f.server.fetch_count(&resource.subject()), 0);
}

#[tokio::test]
async fn write_rights_are_inherited_from_parents() {
    let f = fixture();
    let me = f.agent.subject().to_string();
    f.server
        .insert(json!({"@id": DOC, TITLE: "Hello", (urls::WRITE): [me.clone()]}))
        .unwrap();
    f.server
        .insert(json!({"@id": CHILD, (urls::PARENT): DOC}))
        .unwrap();

    let child = f.store.get_resource(CHILD).await;
    assert_eq!(child.can_write(&f.store, &me).await.unwrap(), (true, None));

    let (allowed, reason) = child
        .can_write(&f.store, "https://x/agents/stranger")
        .await
        .unwrap();
    assert!(!allowed);
    assert!(reason.unwrap().contains(DOC));

    let draft = f
        .store
        .new_resource(NewResourceOpts::default())
        .unwrap();
    assert!(draft.can_write(&f.store, "https://x/agents/stranger").await.unwrap().0);
}

#[tokio::test]
async fn public_agent_grants_everyone_write() {
    let f = fixture();
    f.server
        .insert(json!({"@id": DOC, (urls::WRITE): [urls::PUBLIC_AGENT]}))
        .unwrap();
    let doc = f.store.get_resource(DOC).await;
    assert!(doc.can_write(&f.store, "https://x/agents/anyone").await.unwrap().0);
}

#[tokio::test]
async fn parent_cycles_end_the_walk() {
    let f = fixture();
    f.server
        .insert(json!({"@id": "https://x/a", (urls::PARENT): "https://x/b"}))
        .unwrap();
    f.server
        .insert(json!({"@id": "https://x/b", (urls::PARENT): "https://x/a"}))
        .unwrap();
    let a = f.store.get_resource("https://x/a").await;
    let (allowed, reason) = a.can_write(&f.store, "https://x/agents/me").await.unwrap();
    assert!(!allowed);
    assert!(reason.unwrap().contains("Cycle"));
}
