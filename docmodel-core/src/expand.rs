//! Reference expansion: replacing identifier placeholders with the documents they name.
//!
//! After decoding, a reference field holds a placeholder model whose only populated member
//! is its identifier. Expansion fetches each referenced document, decodes it into the
//! placeholder and expands the fetched value in turn.
//!
//! [`Expander::expand`] handles one model, fetching references one at a time.
//! [`Expander::expand_all`] handles a slice of models and issues a single bulk fetch per
//! reference field, with the fetches for different fields running concurrently.

use futures::future::{BoxFuture, FutureExt, try_join_all};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::{
    backend::{DocumentPath, DocumentSource, RawDocument},
    codec::Codec,
    context::Context,
    error::{DocumentStoreError, DocumentStoreResult},
    fields::Field,
    model::Model,
    reflect::{self, Reflect, ReflectList, ReflectMut, ReflectRef, ShapeKind},
};

/// Expands reference fields by reading from a [`DocumentSource`].
///
/// The source is either a backend or a transaction scope, so expansion inside a transaction
/// reads through the transaction.
pub struct Expander<'a, S: DocumentSource + ?Sized> {
    source: &'a S,
    codec: &'a Codec,
}

impl<'a, S: DocumentSource + ?Sized> Expander<'a, S> {
    pub fn new(source: &'a S, codec: &'a Codec) -> Self {
        Self { source, codec }
    }

    /// Expands every reference of `model`, recursively.
    ///
    /// References that are absent or carry an empty identifier are left untouched. A
    /// reference to a document that does not exist fails with
    /// [`DocumentStoreError::DocumentNotFound`].
    pub async fn expand<M: Model>(&self, model: &mut M, ctx: &Context) -> DocumentStoreResult<()> {
        self.expand_value(model, ctx, &mut Vec::new()).await
    }

    /// Like [`expand`](Self::expand) for a model read from `path`; references leading back to
    /// `path` are left as placeholders.
    pub async fn expand_document(
        &self,
        path: DocumentPath,
        model: &mut dyn Reflect,
        ctx: &Context,
    ) -> DocumentStoreResult<()> {
        self.expand_value(model, ctx, &mut vec![path]).await
    }

    fn expand_value<'v>(
        &'v self,
        value: &'v mut dyn Reflect,
        ctx: &'v Context,
        chain: &'v mut Vec<DocumentPath>,
    ) -> BoxFuture<'v, DocumentStoreResult<()>> {
        async move {
            ctx.check()?;

            let fields = self.codec.field_cache().fields(value.dyn_shape())?;

            for field in fields.references() {
                let Some(collection) = field.reference() else {
                    continue;
                };
                if reflect::member(value, &field.index)?.is_none() {
                    continue;
                }

                let slot = reflect::member_mut(value, &field.index)?;
                match slot.dyn_shape().unwrap_optional().kind {
                    ShapeKind::List(_) => {
                        let Some(list) = list_mut(slot) else {
                            continue;
                        };
                        for i in 0..list.len() {
                            if let Some(element) = list.get_mut(i) {
                                self.expand_reference(element, collection, ctx, &mut *chain)
                                    .await?;
                            }
                        }
                    }
                    ShapeKind::Map(_) => {
                        return Err(unimplemented_map(field));
                    }
                    _ => {
                        self.expand_reference(slot, collection, ctx, &mut *chain)
                            .await?
                    }
                }
            }

            Ok(())
        }
        .boxed()
    }

    fn expand_reference<'v>(
        &'v self,
        slot: &'v mut dyn Reflect,
        collection: &'v str,
        ctx: &'v Context,
        chain: &'v mut Vec<DocumentPath>,
    ) -> BoxFuture<'v, DocumentStoreResult<()>> {
        async move {
            let id = match reflect::model_meta(slot) {
                Some(meta) if !meta.id.is_empty() => meta.id.clone(),
                _ => return Ok(()),
            };
            let Some(target) = present_mut(slot) else {
                return Ok(());
            };

            let path = DocumentPath::new(collection, id);
            if chain.contains(&path) {
                trace!(
                    target: "docmodel::expand",
                    path = %path,
                    "Reference cycle, keeping placeholder"
                );
                return Ok(());
            }

            trace!(target: "docmodel::expand", path = %path, "Expanding reference");

            let document = self.source.get_document(&path, ctx).await?;
            self.codec.decode_document(target, &document)?;

            chain.push(path);
            let result = self.expand_value(target, ctx, &mut *chain).await;
            chain.pop();

            result
        }
        .boxed()
    }

    /// Expands the references of several models of one type, batching the reads.
    ///
    /// Every distinct identifier held by a reference field across all `models` is fetched in a
    /// single [`get_documents`](DocumentSource::get_documents) call for that field; the calls
    /// for different fields run concurrently and the first failure cancels the others. If any
    /// requested document is missing, nothing is written back. Fetched values are then
    /// expanded recursively one by one.
    pub async fn expand_all<M: Model>(&self, models: &mut [M], ctx: &Context) -> DocumentStoreResult<()> {
        ctx.check()?;

        let fields = self.codec.field_cache().fields(M::shape())?;
        let mut batches = Vec::new();

        for field in fields.references() {
            let Some(collection) = field.reference() else {
                continue;
            };

            let mut batch = Batch {
                field,
                collection,
                ids: Vec::new(),
                slots: Vec::new(),
            };
            let mut seen = HashSet::new();

            for (position, model) in models.iter().enumerate() {
                for (element, id) in reference_ids(model, field)? {
                    if seen.insert(id.clone()) {
                        batch.ids.push(id.clone());
                    }
                    batch.slots.push(Slot { model: position, element, id });
                }
            }

            if !batch.ids.is_empty() {
                batches.push(batch);
            }
        }

        if batches.is_empty() {
            return Ok(());
        }

        let child = ctx.child();
        let fetches = batches.iter().map(|batch| {
            let child = &child;

            async move {
                debug!(
                    target: "docmodel::expand",
                    field = %batch.field.name,
                    collection = batch.collection,
                    count = batch.ids.len(),
                    "Fetching references"
                );

                let result = self
                    .source
                    .get_documents(batch.collection, &batch.ids, child)
                    .await;
                if result.is_err() {
                    child.cancel();
                }

                result
            }
        });
        let fetched = try_join_all(fetches).await?;

        let mut resolved = Vec::with_capacity(batches.len());
        for (batch, documents) in batches.iter().zip(fetched.iter()) {
            let mut by_id = HashMap::new();
            for (id, document) in batch.ids.iter().zip(documents.iter()) {
                if !document.exists {
                    return Err(DocumentStoreError::DocumentNotFound(
                        id.clone(),
                        batch.collection.to_string(),
                    ));
                }
                by_id.insert(id.as_str(), document);
            }
            if by_id.len() != batch.ids.len() {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "bulk read of {} returned {} documents for {} identifiers",
                    batch.collection,
                    documents.len(),
                    batch.ids.len()
                )));
            }
            resolved.push(by_id);
        }

        for (batch, by_id) in batches.iter().zip(resolved.iter()) {
            for slot in &batch.slots {
                let Some(document) = by_id.get(slot.id.as_str()) else {
                    continue;
                };
                let Some(model) = models.get_mut(slot.model) else {
                    continue;
                };
                let Some(target) = reference_target(model, batch.field, slot.element)? else {
                    continue;
                };

                self.fill(target, document, ctx).await?;
            }
        }

        Ok(())
    }

    async fn fill(&self, target: &mut dyn Reflect, document: &RawDocument, ctx: &Context) -> DocumentStoreResult<()> {
        self.codec.decode_document(target, document)?;
        self.expand_value(target, ctx, &mut vec![document.path.clone()])
            .await
    }
}

struct Batch<'f> {
    field: &'f Field,
    collection: &'f str,
    ids: Vec<String>,
    slots: Vec<Slot>,
}

/// Where a fetched document goes: a model, and an element of a list field if any.
struct Slot {
    model: usize,
    element: Option<usize>,
    id: String,
}

fn unimplemented_map(field: &Field) -> DocumentStoreError {
    DocumentStoreError::Unimplemented(format!(
        "expansion of map reference field {:?}",
        field.name
    ))
}

/// Non-empty identifiers held by a reference field, with their list positions.
fn reference_ids(model: &dyn Reflect, field: &Field) -> DocumentStoreResult<Vec<(Option<usize>, String)>> {
    let Some(slot) = reflect::member(model, &field.index)? else {
        return Ok(Vec::new());
    };

    let id_of = |value: &dyn Reflect| {
        reflect::model_meta(value)
            .map(|meta| meta.id.clone())
            .filter(|id| !id.is_empty())
    };

    if matches!(slot.reflect(), ReflectRef::Optional(None)) {
        return Ok(Vec::new());
    }

    Ok(match slot.reflect() {
        ReflectRef::List(list) => (0..list.len())
            .filter_map(|i| list.get(i).and_then(id_of).map(|id| (Some(i), id)))
            .collect(),
        ReflectRef::Map(_) => return Err(unimplemented_map(field)),
        _ => id_of(slot)
            .map(|id| (None, id))
            .into_iter()
            .collect(),
    })
}

fn reference_target<'v>(
    model: &'v mut dyn Reflect,
    field: &Field,
    element: Option<usize>,
) -> DocumentStoreResult<Option<&'v mut dyn Reflect>> {
    let slot = reflect::member_mut(model, &field.index)?;

    let slot = match element {
        Some(i) => match list_mut(slot).and_then(|list| list.get_mut(i)) {
            Some(element) => element,
            None => return Ok(None),
        },
        None => slot,
    };

    Ok(present_mut(slot))
}

fn list_mut(value: &mut dyn Reflect) -> Option<&mut dyn ReflectList> {
    match value.reflect_mut() {
        ReflectMut::List(list) => Some(list),
        _ => None,
    }
}

/// The value inside an optional slot, or the slot itself; `None` for an empty optional.
fn present_mut(slot: &mut dyn Reflect) -> Option<&mut dyn Reflect> {
    if !matches!(slot.dyn_shape().kind, ShapeKind::Optional(_)) {
        return Some(slot);
    }

    match slot.reflect_mut() {
        ReflectMut::Optional(optional) => optional.get_mut(),
        _ => None,
    }
}
