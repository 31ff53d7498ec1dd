//! Storage backend abstraction for the document mapper.
//!
//! This module defines the traits that abstract over storage implementations, allowing the
//! mapper to work with an in-memory store, a MongoDB deployment, or anything else that can
//! hold keyed document bodies.
//!
//! # Overview
//!
//! Documents are addressed by a [`DocumentPath`] (collection plus identifier) and exchanged as
//! [`RawDocument`]s: a body [`Map`] wrapped in an envelope carrying the store-assigned
//! timestamps. Backends never see typed models; the codec converts on both sides.
//!
//! # Traits
//!
//! - [`DocumentSource`]: the read primitives shared by backends and transaction scopes
//! - [`StoreBackend`]: the core trait for storage backends
//! - [`TransactionScope`]: the per-attempt view a backend hands to a transaction body
//! - [`StoreBackendBuilder`]: factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::{DocumentPath, StoreBackend};
//!
//! let path = DocumentPath::new("users", "u1");
//! backend.set_document(&path, body, &ctx).await?;
//! let document = backend.get_document(&path, &ctx).await?;
//! assert!(document.exists);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::{
    context::Context,
    error::{DocumentStoreError, DocumentStoreResult},
    query::Query,
    value::Map,
};

/// The address of a document: the collection path and the identifier within it.
///
/// Collection paths of subcollections contain the parent document, as in
/// `users/u1/posts`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentPath {
    pub collection: String,
    pub id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Parses a full path of the form `collection/id`, where the collection part may itself
    /// contain further `parent/id` segments.
    pub fn parse(path: &str) -> DocumentStoreResult<Self> {
        let trimmed = path.trim_matches('/');

        match trimmed.rsplit_once('/') {
            Some((collection, id)) if !collection.is_empty() && !id.is_empty() => {
                Ok(Self::new(collection, id))
            }
            _ => Err(DocumentStoreError::InvalidDocument(format!(
                "document path {path:?} is not of the form collection/id"
            ))),
        }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as stored: its body plus the envelope maintained by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub path: DocumentPath,
    pub data: Map,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
    /// False when nothing is stored at `path`; the other fields are then empty.
    pub exists: bool,
}

impl RawDocument {
    /// A placeholder for a path with no stored document.
    pub fn missing(path: DocumentPath) -> Self {
        Self {
            path,
            data: Map::new(),
            create_time: None,
            update_time: None,
            exists: false,
        }
    }
}

/// Read primitives shared by backends and transaction scopes.
///
/// The expansion engine is written against this trait so the same code serves plain reads and
/// reads inside a transaction attempt.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Retrieves one document.
    ///
    /// # Returns
    ///
    /// The stored document, or a [`RawDocument`] with `exists == false` when nothing is stored
    /// at `path`. A missing document is not an error at this level.
    async fn get_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<RawDocument>;

    /// Retrieves several documents of one collection in a single round trip.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection path shared by all requested documents
    /// * `ids` - The identifiers to fetch, possibly with repetitions
    ///
    /// # Returns
    ///
    /// Exactly one [`RawDocument`] per requested identifier, in request order. Identifiers
    /// with no stored document yield placeholders with `exists == false`.
    async fn get_documents(
        &self,
        collection: &str,
        ids: &[String],
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>>;

    /// Queries documents in a collection using a structured query.
    ///
    /// Filters are evaluated against document bodies; sort keys and windowing are applied as
    /// described on [`Query`].
    async fn query_documents(
        &self,
        collection: &str,
        query: &Query,
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>>;
}

/// The view of a store offered to one transaction attempt.
///
/// Writes become visible to other callers only when the attempt commits. If a document read by
/// the attempt changed in the meantime, the backend discards the writes and may call the body
/// again. Whether an attempt's reads see its own pending writes is backend-specific: the
/// in-memory store reads committed state, MongoDB reads through the session.
#[async_trait]
pub trait TransactionScope: DocumentSource {
    async fn set_document(&self, path: &DocumentPath, data: Map, ctx: &Context) -> DocumentStoreResult<()>;

    async fn delete_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<()>;
}

/// A transaction body as handed to [`StoreBackend::run_transaction`].
///
/// The body may run several times; each run receives a fresh scope and must not leak effects
/// other than through it. Build one with [`transaction_body`].
pub type TransactionBody<'b> = Box<
    dyn for<'s> FnMut(&'s dyn TransactionScope) -> BoxFuture<'s, DocumentStoreResult<()>> + Send + 'b,
>;

/// Boxes a closure as a [`TransactionBody`], fixing its higher-ranked signature.
pub fn transaction_body<'b, F>(body: F) -> TransactionBody<'b>
where
    F: for<'s> FnMut(&'s dyn TransactionScope) -> BoxFuture<'s, DocumentStoreResult<()>> + Send + 'b,
{
    Box::new(body)
}

/// Abstract interface for document storage backends.
///
/// Implementers provide concrete storage for document bodies and the envelope around them.
/// The mapper layers typed models, references and expansion on top.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model is implementation-specific.
///
/// # Cancellation
///
/// Every operation takes the caller's [`Context`]. Implementations check it before doing
/// work and stop retrying transactions once it is cancelled.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Backend failures without a more specific variant map to
/// [`DocumentStoreError::Backend`].
#[async_trait]
pub trait StoreBackend: DocumentSource + Debug {
    /// Writes a document body, replacing whatever was stored at `path`.
    ///
    /// [`Value::ServerTimestamp`](crate::value::Value::ServerTimestamp) sentinels anywhere in
    /// the body are replaced by the commit time. The create time is set on the first write
    /// of a path and kept afterwards; the update time is set on every write.
    ///
    /// # Arguments
    ///
    /// * `path` - The document address. The collection is created implicitly.
    /// * `data` - The complete document body
    async fn set_document(&self, path: &DocumentPath, data: Map, ctx: &Context) -> DocumentStoreResult<()>;

    /// Deletes a document. Deleting a missing document succeeds.
    async fn delete_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<()>;

    /// Runs `body` inside a transaction, retrying it when the commit conflicts with a
    /// concurrent write.
    ///
    /// # Returns
    ///
    /// `Ok(())` once an attempt commits. An error returned by the body aborts the
    /// transaction without retrying and is handed back unchanged. When every attempt
    /// conflicts, [`DocumentStoreError::Conflict`] is returned.
    async fn run_transaction(&self, body: TransactionBody<'_>, ctx: &Context) -> DocumentStoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> DocumentSource for &B
where
    B: DocumentSource + ?Sized,
{
    async fn get_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<RawDocument> {
        (**self).get_document(path, ctx).await
    }

    async fn get_documents(
        &self,
        collection: &str,
        ids: &[String],
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        (**self)
            .get_documents(collection, ids, ctx)
            .await
    }

    async fn query_documents(
        &self,
        collection: &str,
        query: &Query,
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        (**self)
            .query_documents(collection, query, ctx)
            .await
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn set_document(&self, path: &DocumentPath, data: Map, ctx: &Context) -> DocumentStoreResult<()> {
        (**self).set_document(path, data, ctx).await
    }

    async fn delete_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<()> {
        (**self).delete_document(path, ctx).await
    }

    async fn run_transaction(&self, body: TransactionBody<'_>, ctx: &Context) -> DocumentStoreResult<()> {
        (**self).run_transaction(body, ctx).await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_parse_with_subcollections() {
        assert_eq!(DocumentPath::parse("users/u1").unwrap(), DocumentPath::new("users", "u1"));
        assert_eq!(
            DocumentPath::parse("users/u1/posts/p1").unwrap(),
            DocumentPath::new("users/u1/posts", "p1")
        );
        assert_eq!(DocumentPath::new("users/u1/posts", "p1").to_string(), "users/u1/posts/p1");

        assert!(DocumentPath::parse("users").is_err());
        assert!(DocumentPath::parse("users/").is_err());
        assert!(DocumentPath::parse("/u1").is_err());
    }
}
