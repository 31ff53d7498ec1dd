//! Main docmodel crate providing a unified interface for typed document storage.
//!
//! This crate is the primary entry point for users of the docmodel framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! convenient access to the storage backends.
//!
//! # Features
//!
//! - **Typed models** - Plain structs deriving [`Model`], persisted as document trees
//! - **References** - Fields that store another document's identifier and read back as the full model
//! - **Multiple backends** - In-memory and MongoDB storage behind one backend trait
//! - **Flexible querying** - Composable filters, multi-key sorting, offsets and limits
//! - **Transactions** - Read-modify-write bodies retried by the backend on conflict
//!
//! The derive macros expand to paths under [`core`], so this crate is the only dependency an
//! application needs. Crates that use `docmodel-core` without this facade set
//! `DOCMODEL_CORE_CRATE=::docmodel_core` in their build environment.
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//!
//! #[derive(Debug, Default, Clone, Model)]
//! pub struct User {
//!     #[docmodel(embed)]
//!     pub meta: ModelMeta,
//!     pub name: String,
//! }
//!
//! #[derive(Debug, Default, Clone, Model)]
//! pub struct Post {
//!     #[docmodel(embed)]
//!     pub meta: ModelMeta,
//!     pub body: String,
//!     #[docmodel(tag = "author,ref:users")]
//!     pub author: Option<Box<User>>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let client = Client::new(InMemoryStore::builder().build().await?);
//!     client.must_register_model::<Post>();
//!     let ctx = Context::new();
//!
//!     let mut dave = User { name: "Dave".to_string(), ..Default::default() };
//!     client.collection("users").add(&ctx, &mut dave).await?;
//!
//!     let post = Post {
//!         body: "hi".to_string(),
//!         author: Some(Box::new(User { meta: ModelMeta::with_id(dave.id()), ..Default::default() })),
//!         ..Default::default()
//!     };
//!     client.collection("posts").doc("p1").set(&ctx, &post).await?;
//!
//!     // The author comes back fully populated.
//!     let mut read = Post::default();
//!     client.doc("posts/p1")?.get(&ctx, &mut read).await?;
//!     assert_eq!(read.author.map(|a| a.name), Some("Dave".to_string()));
//!
//!     // Query results are expanded in one bulk read per reference field.
//!     let posts = client
//!         .collection("posts")
//!         .where_("body", FieldOp::Eq, "hi")
//!         .documents(&ctx)
//!         .await?
//!         .get_all::<Post>(&ctx)
//!         .await?;
//!     assert_eq!(posts.len(), 1);
//!
//!     client.shutdown().await
//! }
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! client
//!     .run_transaction(&ctx, |tx| {
//!         async move {
//!             let path = DocumentPath::new("users", "u1");
//!             let mut user = User::default();
//!             tx.get(&path, &mut user).await?;
//!             user.name.push('!');
//!             tx.set(&path, &user).await
//!         }
//!         .boxed()
//!     })
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

/// The core crate, the path generated code is resolved against.
pub use docmodel_core as core;

pub use docmodel_core::{
    backend, client, codec, context, error, expand, fields, iter, model, query, reference, reflect, transaction,
    value,
};
pub use docmodel_core::{Model, ModelMeta, Record};
pub use docmodel_core::client::Client;

// Re-export the crates appearing in public signatures
pub use bson;
pub use chrono;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder, DEFAULT_MAX_ATTEMPTS};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
