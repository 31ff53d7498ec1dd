//! Convenient re-exports of commonly used types from docmodel.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - The model traits and derives
//! - The client and its references
//! - Store backends and builders
//! - Query construction and filtering
//! - Error types and the cancellation context

pub use docmodel_core::{
    Model, ModelMeta, Record,
    backend::{DocumentPath, DocumentSource, RawDocument, StoreBackend, StoreBackendBuilder, TransactionScope},
    client::{Client, ClientBuilder},
    codec::Codec,
    context::Context,
    error::{DocumentStoreError, DocumentStoreResult},
    iter::DocumentIterator,
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    reference::{CollectionRef, DocumentRef, QueryRef},
    transaction::Transaction,
    value::{Blob, Map, Value},
};

pub use futures::FutureExt;
