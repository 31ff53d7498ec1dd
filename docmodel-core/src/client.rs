//! The entry point of the mapper: a backend plus the codec used to talk to it.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let client = Client::new(InMemoryStore::new());
//! let ctx = Context::new();
//!
//! let mut user = User { name: "Dave".into(), ..Default::default() };
//! client.collection("users").add(&ctx, &mut user).await?;
//!
//! let mut post = Post { author: Some(Box::new(user.clone())), ..Default::default() };
//! client.collection("posts").doc("p1").set(&ctx, &post).await?;
//!
//! let mut read = Post::default();
//! client.doc("posts/p1")?.get(&ctx, &mut read).await?;
//! assert_eq!(read.author.unwrap().name, "Dave");
//! ```

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::{
    backend::{DocumentPath, StoreBackend, transaction_body},
    codec::Codec,
    context::Context,
    error::{DocumentStoreError, DocumentStoreResult},
    expand::Expander,
    fields::FieldCache,
    model::Model,
    reference::{CollectionRef, DocumentRef},
    transaction::Transaction,
};

#[derive(Debug)]
struct ClientInner<B> {
    backend: B,
    codec: Codec,
    expand: bool,
}

/// A handle to a store backend through which models are read and written.
///
/// Cloning a client is cheap; clones share the backend and the field directory cache.
#[derive(Debug)]
pub struct Client<B: StoreBackend> {
    inner: Arc<ClientInner<B>>,
}

impl<B: StoreBackend> Clone for Client<B> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<B: StoreBackend> Client<B> {
    /// Creates a client using the process-wide field cache, with expansion enabled.
    pub fn new(backend: B) -> Self {
        Self::builder(backend).build()
    }

    pub fn builder(backend: B) -> ClientBuilder<B> {
        ClientBuilder {
            backend,
            fields: None,
            expand: true,
        }
    }

    /// A reference to the collection at `path`, e.g. `users` or `users/u1/posts`.
    pub fn collection(&self, path: impl Into<String>) -> CollectionRef<B> {
        CollectionRef::new(self.clone(), path.into())
    }

    /// A reference to the document at a full `collection/id` path.
    pub fn doc(&self, path: &str) -> DocumentStoreResult<DocumentRef<B>> {
        Ok(DocumentRef::new(self.clone(), DocumentPath::parse(path)?))
    }

    /// Runs `body` in a transaction, retrying it as the backend sees fit.
    ///
    /// The body receives a fresh [`Transaction`] on every attempt and must produce a boxed
    /// future:
    ///
    /// ```ignore
    /// client.run_transaction(&ctx, |tx| Box::pin(async move {
    ///     let path = DocumentPath::new("users", "u1");
    ///     let mut user = User::default();
    ///     tx.get(&path, &mut user).await?;
    ///     user.visits += 1;
    ///     tx.set(&path, &user).await
    /// })).await?;
    /// ```
    pub async fn run_transaction<F>(&self, ctx: &Context, mut f: F) -> DocumentStoreResult<()>
    where
        F: for<'t> FnMut(Transaction<'t>) -> BoxFuture<'t, DocumentStoreResult<()>> + Send,
    {
        let codec = self.inner.codec.clone();
        let expand = self.inner.expand;
        let attempt_ctx = ctx.clone();

        let body = transaction_body(move |scope| {
            f(Transaction::new(scope, codec.clone(), attempt_ctx.clone(), expand))
        });

        self.inner
            .backend
            .run_transaction(body, ctx)
            .await
    }

    /// Resolves and caches the field directory of `M`, surfacing declaration errors early.
    pub fn register_model<M: Model>(&self) -> DocumentStoreResult<()> {
        self.inner
            .codec
            .field_cache()
            .fields(M::shape())
            .map(|_| ())
    }

    /// Like [`register_model`](Self::register_model), but panics on an invalid declaration.
    /// Meant for program start-up.
    pub fn must_register_model<M: Model>(&self) {
        if let Err(e) = self.register_model::<M>() {
            panic!("invalid model {}: {e}", M::shape().type_name);
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Whether reads expand references unless told otherwise.
    pub fn expands_by_default(&self) -> bool {
        self.inner.expand
    }

    /// An expander reading straight from the backend.
    pub fn expander(&self) -> Expander<'_, B> {
        Expander::new(&self.inner.backend, &self.inner.codec)
    }

    /// Shuts the backend down. Fails if other clones of this client are still alive.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner.backend.shutdown().await,
            Err(_) => Err(DocumentStoreError::Backend(
                "cannot shut down a client that is still shared".into(),
            )),
        }
    }
}

/// Configures a [`Client`].
#[derive(Debug)]
pub struct ClientBuilder<B> {
    backend: B,
    fields: Option<Arc<FieldCache>>,
    expand: bool,
}

impl<B: StoreBackend> ClientBuilder<B> {
    /// Uses `fields` instead of the process-wide cache.
    pub fn field_cache(mut self, fields: Arc<FieldCache>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Sets whether reads expand references by default.
    pub fn expand(mut self, expand: bool) -> Self {
        self.expand = expand;
        self
    }

    pub fn build(self) -> Client<B> {
        let fields = self.fields.unwrap_or_else(FieldCache::global);

        Client {
            inner: Arc::new(ClientInner {
                backend: self.backend,
                codec: Codec::new(fields),
                expand: self.expand,
            }),
        }
    }
}
