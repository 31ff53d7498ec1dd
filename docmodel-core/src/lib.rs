//! An object-document mapper for document stores, with automatic reference expansion.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Reflection** ([`reflect`]) - Static type descriptors and runtime views generated by `#[derive(Record)]` / `#[derive(Model)]`
//! - **Field directory** ([`fields`]) - Which members of a record are persisted, and under what names
//! - **Value codec** ([`codec`]) - Conversion between typed values and document [`Value`](value::Value) trees
//! - **Reference expansion** ([`expand`]) - Replacing stored identifiers with the documents they name
//! - **Model contract** ([`model`]) - Identifier and timestamps carried by every model
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Query and filtering API** ([`query`]) - Query construction and filtering
//! - **Access facade** ([`client`], [`reference`], [`iter`], [`transaction`]) - Typed reads and writes
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{Model, ModelMeta};
//!
//! #[derive(Debug, Default, Model)]
//! pub struct User {
//!     #[docmodel(embed)]
//!     pub meta: ModelMeta,
//!     pub name: String,
//! }
//!
//! #[derive(Debug, Default, Model)]
//! pub struct Post {
//!     #[docmodel(embed)]
//!     pub meta: ModelMeta,
//!     pub body: String,
//!     #[docmodel(tag = "author,ref:users")]
//!     pub author: Option<Box<User>>,
//! }
//! ```
//!
//! A `Post` is stored with its author's identifier in the `author` field. Reading it back
//! fetches the user document and places the full `User` in `author`.

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod expand;
pub mod fields;
pub mod iter;
pub mod model;
pub mod query;
pub mod reference;
pub mod reflect;
pub mod transaction;
pub mod value;

pub use docmodel_macros::{Model, Record};
pub use model::{Model, ModelMeta};
