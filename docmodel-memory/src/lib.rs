//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Document envelope** - Create and update times maintained per document, server timestamps resolved on write
//! - **Full query support** - Filtering, multi-key sorting, offsets and limits from either end
//! - **Optimistic transactions** - Version-checked commits with automatic retry on conflict
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{Client, Model, ModelMeta, context::Context, memory::InMemoryStore};
//!
//! #[derive(Debug, Default, Model)]
//! pub struct User {
//!     #[docmodel(embed)]
//!     pub meta: ModelMeta,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(InMemoryStore::builder().build().await?);
//!     let ctx = Context::new();
//!
//!     let mut user = User { name: "Alice".to_string(), ..Default::default() };
//!     let reference = client.collection("users").add(&ctx, &mut user).await?;
//!
//!     let mut loaded = User::default();
//!     reference.get(&ctx, &mut loaded).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder, DEFAULT_MAX_ATTEMPTS};
