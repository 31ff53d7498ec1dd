//! Collection, document and query references.
//!
//! References are cheap handles that carry a [`Client`] and an address. Nothing touches the
//! store until one of their async methods is called.

use uuid::Uuid;

use crate::{
    backend::{DocumentPath, StoreBackend},
    client::Client,
    context::Context,
    error::DocumentStoreResult,
    iter::DocumentIterator,
    model::Model,
    query::{Expr, FieldOp, Query, QueryBuilder, SortDirection},
    value::Value,
};

const ALPHANUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

const ID_LEN: usize = 20;

/// Generates a random 20 character alphanumeric document identifier.
pub fn unique_id() -> String {
    // Bytes 6 and 8 of a v4 UUID carry the version and variant bits.
    std::iter::repeat_with(Uuid::new_v4)
        .flat_map(|uuid| {
            uuid.into_bytes()
                .into_iter()
                .enumerate()
                .filter(|(i, _)| *i != 6 && *i != 8)
                .map(|(_, b)| b)
        })
        .take(ID_LEN)
        .map(|b| ALPHANUM[b as usize % ALPHANUM.len()] as char)
        .collect()
}

/// A collection of documents, addressed by its path.
///
/// A collection reference is also the query over all of its documents; the query shortcuts
/// below start a [`QueryRef`] on it.
#[derive(Debug)]
pub struct CollectionRef<B: StoreBackend> {
    client: Client<B>,
    path: String,
}

impl<B: StoreBackend> Clone for CollectionRef<B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            path: self.path.clone(),
        }
    }
}

impl<B: StoreBackend> CollectionRef<B> {
    pub(crate) fn new(client: Client<B>, path: String) -> Self {
        Self { client, path }
    }

    /// The full collection path, e.g. `users/u1/posts`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The last segment of the path.
    pub fn id(&self) -> &str {
        self.path
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }

    pub fn doc(&self, id: impl Into<String>) -> DocumentRef<B> {
        DocumentRef::new(
            self.client.clone(),
            DocumentPath::new(self.path.clone(), id),
        )
    }

    /// A reference to a document with a freshly generated identifier.
    pub fn new_doc(&self) -> DocumentRef<B> {
        self.doc(unique_id())
    }

    /// Writes `model` into this collection, generating an identifier first if it has none.
    ///
    /// On return the model's identifier and timestamps reflect what was stored. If the write
    /// fails, a generated identifier is taken back and the model is left without one.
    pub async fn add<M: Model>(&self, ctx: &Context, model: &mut M) -> DocumentStoreResult<DocumentRef<B>> {
        let generated = model.id().is_empty();
        let doc = if generated {
            let doc = self.new_doc();
            model.set_id(doc.id());
            doc
        } else {
            self.doc(model.id())
        };

        if let Err(e) = doc.set(ctx, model).await {
            if generated {
                model.set_id("");
            }
            return Err(e);
        }
        doc.refresh_meta(ctx, model).await?;

        Ok(doc)
    }

    /// A query over every document of the collection.
    pub fn query(&self) -> QueryRef<B> {
        QueryRef {
            client: self.client.clone(),
            collection: self.path.clone(),
            query: Query::default(),
            expand: self.client.expands_by_default(),
        }
    }

    pub fn where_(&self, field: impl Into<String>, op: FieldOp, value: impl Into<Value>) -> QueryRef<B> {
        self.query().where_(field, op, value)
    }

    pub fn filter(&self, expr: Expr) -> QueryRef<B> {
        self.query().filter(expr)
    }

    pub fn order_by(&self, field: impl Into<String>, direction: SortDirection) -> QueryRef<B> {
        self.query().order_by(field, direction)
    }

    pub fn limit(&self, limit: usize) -> QueryRef<B> {
        self.query().limit(limit)
    }

    pub fn limit_to_last(&self, limit: usize) -> QueryRef<B> {
        self.query().limit_to_last(limit)
    }

    pub fn offset(&self, offset: usize) -> QueryRef<B> {
        self.query().offset(offset)
    }

    /// Reads every document of the collection.
    pub async fn documents(&self, ctx: &Context) -> DocumentStoreResult<DocumentIterator<'_, B>> {
        ctx.check()?;

        let documents = self
            .client
            .backend()
            .query_documents(&self.path, &Query::default(), ctx)
            .await?;

        Ok(DocumentIterator::new(
            self.client.backend(),
            self.client.codec(),
            documents,
            self.client.expands_by_default(),
        ))
    }
}

/// A single document, addressed by collection path and identifier.
#[derive(Debug)]
pub struct DocumentRef<B: StoreBackend> {
    client: Client<B>,
    path: DocumentPath,
    expand: bool,
}

impl<B: StoreBackend> Clone for DocumentRef<B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            path: self.path.clone(),
            expand: self.expand,
        }
    }
}

impl<B: StoreBackend> DocumentRef<B> {
    pub(crate) fn new(client: Client<B>, path: DocumentPath) -> Self {
        let expand = client.expands_by_default();
        Self { client, path, expand }
    }

    pub fn id(&self) -> &str {
        &self.path.id
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    /// A subcollection of this document.
    pub fn collection(&self, id: &str) -> CollectionRef<B> {
        CollectionRef::new(self.client.clone(), format!("{}/{id}", self.path))
    }

    /// Returns a copy of this reference that does or does not expand references on read.
    pub fn expand(&self, expand: bool) -> Self {
        Self {
            expand,
            ..self.clone()
        }
    }

    /// Reads the document into `model`, then expands its references.
    ///
    /// Fails with [`DocumentNotFound`](crate::error::DocumentStoreError::DocumentNotFound)
    /// when nothing is stored at this path.
    pub async fn get<M: Model>(&self, ctx: &Context, model: &mut M) -> DocumentStoreResult<()> {
        ctx.check()?;

        let document = self
            .client
            .backend()
            .get_document(&self.path, ctx)
            .await?;
        self.client
            .codec()
            .decode_model(model, &document)?;

        if self.expand {
            self.client
                .expander()
                .expand_document(self.path.clone(), model, ctx)
                .await?;
        }

        Ok(())
    }

    /// Overwrites the document with `model`.
    pub async fn set<M: Model>(&self, ctx: &Context, model: &M) -> DocumentStoreResult<()> {
        ctx.check()?;

        let data = self.client.codec().encode_model(model)?;
        self.client
            .backend()
            .set_document(&self.path, data, ctx)
            .await
    }

    /// Deletes the document if it exists.
    pub async fn delete(&self, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.check()?;

        self.client
            .backend()
            .delete_document(&self.path, ctx)
            .await
    }

    /// Copies the stored identifier and timestamps into `model` without touching its body.
    async fn refresh_meta<M: Model>(&self, ctx: &Context, model: &mut M) -> DocumentStoreResult<()> {
        let document = self
            .client
            .backend()
            .get_document(&self.path, ctx)
            .await?;

        let meta = model.meta_mut();
        meta.id.clone_from(&self.path.id);
        if let Some(create_time) = document.create_time {
            meta.create_time = create_time;
        }
        if let Some(update_time) = document.update_time {
            meta.update_time = update_time;
        }

        Ok(())
    }
}

/// An immutable query over one collection.
///
/// Every method returns a new query and leaves the receiver unchanged.
#[derive(Debug)]
pub struct QueryRef<B: StoreBackend> {
    client: Client<B>,
    collection: String,
    query: Query,
    expand: bool,
}

impl<B: StoreBackend> Clone for QueryRef<B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            collection: self.collection.clone(),
            query: self.query.clone(),
            expand: self.expand,
        }
    }
}

impl<B: StoreBackend> QueryRef<B> {
    fn with(&self, update: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        Self {
            query: update(QueryBuilder::from(self.query.clone())).build(),
            ..self.clone()
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Adds a filter on `field`. Several filters must all match.
    pub fn where_(&self, field: impl Into<String>, op: FieldOp, value: impl Into<Value>) -> Self {
        let expr = Expr::field(field, op, value);
        self.with(|q| q.and_filter(expr))
    }

    /// Adds an arbitrary filter expression. Several filters must all match.
    pub fn filter(&self, expr: Expr) -> Self {
        self.with(|q| q.and_filter(expr))
    }

    /// Appends a sort key; earlier keys take precedence.
    pub fn order_by(&self, field: impl Into<String>, direction: SortDirection) -> Self {
        let field = field.into();
        self.with(|q| q.sort(field, direction))
    }

    /// Returns at most the first `limit` results.
    pub fn limit(&self, limit: usize) -> Self {
        self.with(|q| q.limit(limit))
    }

    /// Returns at most the last `limit` results, still in sort order.
    pub fn limit_to_last(&self, limit: usize) -> Self {
        self.with(|q| q.limit_to_last(limit))
    }

    pub fn offset(&self, offset: usize) -> Self {
        self.with(|q| q.offset(offset))
    }

    /// Sets whether results have their references expanded.
    pub fn expand(&self, expand: bool) -> Self {
        Self {
            expand,
            ..self.clone()
        }
    }

    /// Runs the query.
    pub async fn documents(&self, ctx: &Context) -> DocumentStoreResult<DocumentIterator<'_, B>> {
        ctx.check()?;

        let documents = self
            .client
            .backend()
            .query_documents(&self.collection, &self.query, ctx)
            .await?;

        Ok(DocumentIterator::new(
            self.client.backend(),
            self.client.codec(),
            documents,
            self.expand,
        ))
    }
}
