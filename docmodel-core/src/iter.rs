//! Iteration over query results.

use std::vec;

use crate::{
    backend::{DocumentSource, RawDocument},
    codec::Codec,
    context::Context,
    error::DocumentStoreResult,
    expand::Expander,
    model::Model,
};

/// The results of a query, decoded into models on demand.
///
/// References are expanded through the same source the results came from, so an iterator
/// obtained inside a transaction expands inside it too.
pub struct DocumentIterator<'s, S: DocumentSource + ?Sized> {
    source: &'s S,
    codec: &'s Codec,
    documents: vec::IntoIter<RawDocument>,
    expand: bool,
}

impl<'s, S: DocumentSource + ?Sized> DocumentIterator<'s, S> {
    pub(crate) fn new(source: &'s S, codec: &'s Codec, documents: Vec<RawDocument>, expand: bool) -> Self {
        Self {
            source,
            codec,
            documents: documents.into_iter(),
            expand,
        }
    }

    /// Number of results not yet consumed.
    pub fn remaining(&self) -> usize {
        self.documents.len()
    }

    /// Decodes the next result into `model` and expands it.
    ///
    /// Returns `false`, leaving `model` untouched, once the results are exhausted; every later
    /// call returns `false` as well.
    pub async fn next<M: Model>(&mut self, ctx: &Context, model: &mut M) -> DocumentStoreResult<bool> {
        let Some(document) = self.documents.next() else {
            return Ok(false);
        };

        self.codec.decode_model(model, &document)?;

        if self.expand {
            Expander::new(self.source, self.codec)
                .expand_document(document.path, model, ctx)
                .await?;
        }

        Ok(true)
    }

    /// Decodes every remaining result, expanding references in one batch per field.
    pub async fn get_all<M: Model>(&mut self, ctx: &Context) -> DocumentStoreResult<Vec<M>> {
        let mut models = Vec::with_capacity(self.documents.len());

        for document in self.documents.by_ref() {
            let mut model = M::default();
            self.codec.decode_model(&mut model, &document)?;
            models.push(model);
        }

        if self.expand && !models.is_empty() {
            Expander::new(self.source, self.codec)
                .expand_all(&mut models, ctx)
                .await?;
        }

        Ok(models)
    }
}
