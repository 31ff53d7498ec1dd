//! Typed access to a store from inside a transaction attempt.

use crate::{
    backend::{DocumentPath, TransactionScope},
    codec::Codec,
    context::Context,
    error::DocumentStoreResult,
    expand::Expander,
    iter::DocumentIterator,
    model::Model,
    query::Query,
};

/// One attempt of a transaction started with
/// [`Client::run_transaction`](crate::client::Client::run_transaction).
///
/// Reads, including the reads made by reference expansion, go through the transaction. Writes
/// take effect only if the attempt commits.
pub struct Transaction<'t> {
    scope: &'t dyn TransactionScope,
    codec: Codec,
    ctx: Context,
    expand: bool,
}

impl<'t> Transaction<'t> {
    pub(crate) fn new(scope: &'t dyn TransactionScope, codec: Codec, ctx: Context, expand: bool) -> Self {
        Self {
            scope,
            codec,
            ctx,
            expand,
        }
    }

    /// The context the transaction was started with.
    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// Returns a copy of this handle that does or does not expand references on read.
    pub fn expand(self, expand: bool) -> Self {
        Self { expand, ..self }
    }

    pub async fn get<M: Model>(&self, path: &DocumentPath, model: &mut M) -> DocumentStoreResult<()> {
        let document = self
            .scope
            .get_document(path, &self.ctx)
            .await?;
        self.codec.decode_model(model, &document)?;

        if self.expand {
            Expander::new(self.scope, &self.codec)
                .expand_document(path.clone(), model, &self.ctx)
                .await?;
        }

        Ok(())
    }

    pub async fn set<M: Model>(&self, path: &DocumentPath, model: &M) -> DocumentStoreResult<()> {
        let data = self.codec.encode_model(model)?;
        self.scope
            .set_document(path, data, &self.ctx)
            .await
    }

    pub async fn delete(&self, path: &DocumentPath) -> DocumentStoreResult<()> {
        self.scope
            .delete_document(path, &self.ctx)
            .await
    }

    /// Runs `query` over `collection` inside the transaction.
    pub async fn documents(
        &self,
        collection: &str,
        query: &Query,
    ) -> DocumentStoreResult<DocumentIterator<'_, dyn TransactionScope + 't>> {
        let documents = self
            .scope
            .query_documents(collection, query, &self.ctx)
            .await?;

        Ok(DocumentIterator::new(self.scope, &self.codec, documents, self.expand))
    }
}
