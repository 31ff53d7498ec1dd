#![allow(dead_code)]

use chrono::{DateTime, Utc};
use docmodel::{memory::InMemoryStore, prelude::*};

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct User {
    #[docmodel(embed)]
    pub meta: ModelMeta,
    pub name: String,
    #[docmodel(tag = "email,omitempty")]
    pub email: String,
    #[docmodel(tag = "visits,omitempty")]
    pub visits: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Post {
    #[docmodel(embed)]
    pub meta: ModelMeta,
    pub body: String,
    #[docmodel(tag = "author,ref:users")]
    pub author: Option<Box<User>>,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Location {
    #[docmodel(embed)]
    pub meta: ModelMeta,
    pub name: String,
    pub capacity: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Beverage {
    #[docmodel(embed)]
    pub meta: ModelMeta,
    pub name: String,
    pub quantity: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Event {
    #[docmodel(embed)]
    pub meta: ModelMeta,
    pub description: String,
    #[docmodel(tag = "attendees,ref:users,omitempty")]
    pub attendees: Vec<User>,
    #[docmodel(tag = "beverages,ref:beverages")]
    pub beverages: Vec<Option<Box<Beverage>>>,
    #[docmodel(tag = "location,ref:locations")]
    pub location: Option<Box<Location>>,
    #[docmodel(tag = "start")]
    pub start: DateTime<Utc>,
    #[docmodel(tag = "end")]
    pub end: DateTime<Utc>,
}

/// A store with tracing output routed to the test harness.
pub async fn client() -> Client<InMemoryStore> {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = InMemoryStore::builder()
        .build()
        .await
        .unwrap();

    Client::new(store)
}

/// A placeholder holding only an identifier, as stored references are read back.
pub fn stub<M: Model>(id: &str) -> M {
    let mut model = M::default();
    model.set_id(id);
    model
}

pub async fn add_user(client: &Client<InMemoryStore>, ctx: &Context, name: &str) -> User {
    let mut user = User {
        name: name.to_string(),
        ..Default::default()
    };
    client
        .collection("users")
        .add(ctx, &mut user)
        .await
        .unwrap();
    user
}
