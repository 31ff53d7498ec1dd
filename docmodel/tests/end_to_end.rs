mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::{Beverage, Event, Location, Post, User, client, stub};
use docmodel::prelude::*;

fn party_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1937, 9, 21, 17, 0, 0).unwrap()
}

fn party_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1937, 9, 22, 6, 0, 0).unwrap()
}

#[tokio::test]
async fn set_with_nil_foreign_key() {
    let client = client().await;
    let ctx = Context::new();

    let event_ref = client.collection("events").new_doc();
    let event = Event {
        description: "An Unexpected Party".into(),
        start: party_start(),
        end: party_end(),
        location: None,
        ..Default::default()
    };
    event_ref.set(&ctx, &event).await.unwrap();

    let stored = client
        .backend()
        .get_document(event_ref.path(), &ctx)
        .await
        .unwrap();
    assert_eq!(stored.data.get("location"), Some(&Value::Null));
    assert_eq!(stored.data.get("beverages"), Some(&Value::Array(vec![])));
    assert!(!stored.data.contains_key("attendees"));
    assert_eq!(stored.data.get("start"), Some(&Value::Timestamp(party_start())));
}

#[tokio::test]
async fn set_and_get_by_id() {
    let client = client().await;
    let ctx = Context::new();

    let users = client.collection("users");
    let (bilbo_ref, gandalf_ref, thorin_ref) = (users.new_doc(), users.new_doc(), users.new_doc());
    let mut bilbo = User { email: "bilbo@theshire.net".into(), ..Default::default() };
    let mut gandalf = User { email: "gandalf@middle-earth.org".into(), ..Default::default() };
    let mut thorin = User { email: "thorin@underthemountain.com".into(), ..Default::default() };
    bilbo_ref.set(&ctx, &bilbo).await.unwrap();
    gandalf_ref.set(&ctx, &gandalf).await.unwrap();
    thorin_ref.set(&ctx, &thorin).await.unwrap();
    bilbo.set_id(bilbo_ref.id());
    gandalf.set_id(gandalf_ref.id());
    thorin.set_id(thorin_ref.id());

    let ale_ref = client.collection("beverages").new_doc();
    let ale = Beverage {
        meta: ModelMeta::with_id(ale_ref.id()),
        name: "ale".into(),
        quantity: 14,
    };
    ale_ref.set(&ctx, &ale).await.unwrap();

    let location_ref = client.collection("locations").new_doc();
    let location = Location {
        name: "Bag End, Hobbiton, The Shire".into(),
        ..Default::default()
    };
    location_ref.set(&ctx, &location).await.unwrap();

    let event_ref = client.collection("events").new_doc();
    let event = Event {
        description: "An Unexpected Party".into(),
        start: party_start(),
        end: party_end(),
        location: Some(Box::new(stub(location_ref.id()))),
        attendees: vec![bilbo.clone(), gandalf.clone(), thorin.clone()],
        beverages: vec![Some(Box::new(ale.clone()))],
        ..Default::default()
    };
    event_ref.set(&ctx, &event).await.unwrap();

    let mut saved = Event::default();
    event_ref.get(&ctx, &mut saved).await.unwrap();

    // Clear timestamps for comparison
    for attendee in &mut saved.attendees {
        attendee.meta.create_time = Default::default();
        attendee.meta.update_time = Default::default();
    }

    assert_eq!(saved.id(), event_ref.id());
    assert_ne!(saved.create_time(), DateTime::<Utc>::default());
    assert_eq!(saved.create_time(), saved.update_time());
    assert_eq!(saved.beverages.len(), 1);
    let beverage = saved.beverages[0].as_deref().unwrap();
    assert_eq!(beverage.name, "ale");
    assert_eq!(beverage.quantity, 14);
    assert_eq!(saved.attendees, vec![bilbo, gandalf, thorin]);
    assert_eq!(saved.description, event.description);
    assert_eq!(saved.start, event.start);
    assert_eq!(saved.end, event.end);

    let saved_location = saved.location.unwrap();
    assert_eq!(saved_location.id(), location_ref.id());
    assert_eq!(saved_location.name, location.name);
}

#[tokio::test]
async fn add_assigns_identifiers_and_timestamps() {
    let client = client().await;
    let ctx = Context::new();
    let users = client.collection("users");

    let mut fresh = User { name: "Dave".into(), ..Default::default() };
    let fresh_ref = users.add(&ctx, &mut fresh).await.unwrap();
    assert_eq!(fresh.id().len(), 20);
    assert_eq!(fresh.id(), fresh_ref.id());
    assert_eq!(fresh.create_time(), fresh.update_time());

    let mut named = User { meta: ModelMeta::with_id("dave"), name: "Dave".into(), ..Default::default() };
    let first_write = {
        users.add(&ctx, &mut named).await.unwrap();
        named.create_time()
    };
    named.name = "David".into();
    users.add(&ctx, &mut named).await.unwrap();

    assert_eq!(named.id(), "dave");
    assert_eq!(named.create_time(), first_write);
    assert!(named.update_time() >= named.create_time());
}

#[tokio::test]
async fn subcollections_and_deletes() {
    let client = client().await;
    let ctx = Context::new();

    let dave = client.collection("users").doc("dave");
    let drafts = dave.collection("drafts");
    assert_eq!(drafts.path(), "users/dave/drafts");
    assert_eq!(drafts.id(), "drafts");

    drafts
        .doc("d1")
        .set(&ctx, &Location { name: "somewhere".into(), capacity: 3, ..Default::default() })
        .await
        .unwrap();

    let mut read = Location::default();
    client
        .doc("users/dave/drafts/d1")
        .unwrap()
        .get(&ctx, &mut read)
        .await
        .unwrap();
    assert_eq!(read.capacity, 3);
    assert_eq!(read.id(), "d1");

    drafts.doc("d1").delete(&ctx).await.unwrap();
    let err = drafts.doc("d1").get(&ctx, &mut read).await.unwrap_err();
    assert_eq!(
        err,
        DocumentStoreError::DocumentNotFound("d1".into(), "users/dave/drafts".into())
    );
    drafts.doc("d1").delete(&ctx).await.unwrap();
}

#[tokio::test]
async fn unknown_stored_fields_are_rejected() {
    let client = client().await;
    let ctx = Context::new();

    let mut body = Map::new();
    body.insert("name".into(), Value::from("Dave"));
    body.insert("nickname".into(), Value::from("D"));
    client
        .backend()
        .set_document(&DocumentPath::new("users", "u1"), body, &ctx)
        .await
        .unwrap();

    let mut read = User::default();
    let err = client
        .collection("users")
        .doc("u1")
        .get(&ctx, &mut read)
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::UnmatchedField { ref field, .. } if field == "nickname"));
}

#[tokio::test]
async fn cancelled_contexts_stop_requests() {
    let client = client().await;
    let ctx = Context::new();
    ctx.cancel();

    let mut user = User::default();
    let err = client
        .collection("users")
        .add(&ctx, &mut user)
        .await
        .unwrap_err();
    assert_eq!(err, DocumentStoreError::Cancelled);
    assert_eq!(user.id(), "");
}

#[tokio::test]
async fn failed_adds_leave_models_unidentified() {
    let client = client().await;
    let ctx = Context::new();
    let posts = client.collection("posts");

    let mut orphan = Post {
        body: "by nobody".into(),
        author: Some(Box::default()),
        ..Default::default()
    };
    let err = posts.add(&ctx, &mut orphan).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidReference(_)));
    assert_eq!(orphan.id(), "");
    assert_eq!(client.backend().count("posts").await, 0);

    let mut named = Post { meta: ModelMeta::with_id("p1"), author: Some(Box::default()), ..Default::default() };
    posts.add(&ctx, &mut named).await.unwrap_err();
    assert_eq!(named.id(), "p1");
}
