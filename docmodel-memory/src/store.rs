//! In-memory storage implementation for document stores.
//!
//! This module provides a simple backend that keeps document bodies in ordered maps behind an
//! async-safe read-write lock. Every stored document carries a version drawn from a store-wide
//! counter, which transactions use to detect concurrent writes at commit time.

use std::{
    collections::{BTreeMap, HashMap},
    mem,
    sync::Arc,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mea::{mutex::Mutex, rwlock::RwLock};
use tracing::{debug, warn};

use docmodel_core::{
    backend::{
        DocumentPath, DocumentSource, RawDocument, StoreBackend, StoreBackendBuilder, TransactionBody,
        TransactionScope,
    },
    context::Context,
    error::{DocumentStoreError, DocumentStoreResult},
    query::Query,
    value::{resolve_map_server_timestamps, Map},
};

use crate::evaluator::{compare_documents, lookup, DocumentEvaluator};

/// Number of times a conflicting transaction is attempted before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Map,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    /// collection path -> (document id -> document)
    collections: HashMap<String, BTreeMap<String, StoredDocument>>,
    /// Last version handed out; zero stands for "no document".
    version: u64,
}

impl State {
    fn get(&self, path: &DocumentPath) -> Option<&StoredDocument> {
        self.collections
            .get(&path.collection)?
            .get(&path.id)
    }

    fn version_of(&self, path: &DocumentPath) -> u64 {
        self.get(path)
            .map(|stored| stored.version)
            .unwrap_or(0)
    }

    fn read(&self, path: &DocumentPath) -> RawDocument {
        match self.get(path) {
            Some(stored) => raw_document(path.clone(), stored),
            None => RawDocument::missing(path.clone()),
        }
    }

    fn set(&mut self, path: &DocumentPath, mut data: Map, now: DateTime<Utc>) {
        resolve_map_server_timestamps(&mut data, now);
        self.version += 1;

        let version = self.version;
        let collection = self
            .collections
            .entry(path.collection.clone())
            .or_default();
        let create_time = collection
            .get(&path.id)
            .map(|stored| stored.create_time)
            .unwrap_or(now);

        collection.insert(
            path.id.clone(),
            StoredDocument {
                data,
                create_time,
                update_time: now,
                version,
            },
        );
    }

    fn delete(&mut self, path: &DocumentPath) {
        if let Some(collection) = self.collections.get_mut(&path.collection) {
            collection.remove(&path.id);
        }
    }

    fn query(&self, collection: &str, query: &Query) -> DocumentStoreResult<Vec<RawDocument>> {
        let Some(documents) = self.collections.get(collection) else {
            return Ok(vec![]);
        };

        let mut matched = Vec::new();
        for (id, stored) in documents {
            if let Some(filter) = &query.filter
                && !DocumentEvaluator::new(&stored.data).evaluate(filter)?
            {
                continue;
            }

            // Documents without a value for every sort field are not part of a sorted result.
            if query
                .sort
                .iter()
                .any(|key| lookup(&stored.data, &key.field).is_none())
            {
                continue;
            }

            matched.push((id, stored));
        }

        if !query.sort.is_empty() {
            matched.sort_by(|(left_id, left), (right_id, right)| {
                compare_documents(&left.data, &right.data, &query.sort).then_with(|| left_id.cmp(right_id))
            });
        }

        let documents = matched
            .into_iter()
            .map(|(id, stored)| raw_document(DocumentPath::new(collection, id.as_str()), stored))
            .collect();

        Ok(query.window(documents))
    }
}

fn raw_document(path: DocumentPath, stored: &StoredDocument) -> RawDocument {
    RawDocument {
        path,
        data: stored.data.clone(),
        create_time: Some(stored.create_time),
        update_time: Some(stored.update_time),
        exists: true,
    }
}

/// Thread-safe in-memory document storage backend.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Transactions
///
/// Transactions are optimistic. An attempt records the version of every document it reads
/// and buffers its writes; at commit the versions are compared under the write lock, and the
/// writes are applied only if none changed. A conflicting attempt is discarded and the body
/// runs again, up to the configured number of attempts.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing). For small to medium
/// datasets, this is typically acceptable. For larger datasets, consider using a
/// persistent backend like MongoDB.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::{DocumentPath, DocumentSource, StoreBackend};
///
/// let store = InMemoryStore::new();
/// let path = DocumentPath::new("users", "u1");
///
/// store.set_document(&path, body, &ctx).await?;
/// assert!(store.get_document(&path, &ctx).await?.exists);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    max_attempts: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore` with custom options.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use docmodel_memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::builder().max_attempts(10).build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Number of attempts a conflicting transaction gets.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Returns the number of documents stored in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentSource for InMemoryStore {
    async fn get_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<RawDocument> {
        ctx.check()?;

        Ok(self.state.read().await.read(path))
    }

    async fn get_documents(
        &self,
        collection: &str,
        ids: &[String],
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        ctx.check()?;

        let state = self.state.read().await;
        let documents = ids
            .iter()
            .map(|id| state.read(&DocumentPath::new(collection, id.as_str())))
            .collect::<Vec<_>>();

        Ok(documents)
    }

    async fn query_documents(
        &self,
        collection: &str,
        query: &Query,
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        ctx.check()?;

        self.state
            .read()
            .await
            .query(collection, query)
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn set_document(&self, path: &DocumentPath, data: Map, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.check()?;

        self.state
            .write()
            .await
            .set(path, data, Utc::now());

        Ok(())
    }

    async fn delete_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.check()?;

        self.state.write().await.delete(path);

        Ok(())
    }

    async fn run_transaction(&self, mut body: TransactionBody<'_>, ctx: &Context) -> DocumentStoreResult<()> {
        for attempt in 1..=self.max_attempts {
            ctx.check()?;

            let transaction = InMemoryTransaction::new(self);
            body(&transaction).await?;

            match transaction.commit(ctx).await {
                Ok(()) => {
                    debug!(target: "docmodel::memory", attempt, "Transaction committed");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    warn!(target: "docmodel::memory", attempt, error = %e, "Transaction conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(DocumentStoreError::Conflict(format!(
            "transaction did not commit after {} attempts",
            self.max_attempts
        )))
    }
}

enum Write {
    Set(DocumentPath, Map),
    Delete(DocumentPath),
}

/// One attempt of a transaction against an [`InMemoryStore`].
struct InMemoryTransaction<'a> {
    store: &'a InMemoryStore,
    /// Version of each document as first observed by this attempt.
    reads: Mutex<HashMap<DocumentPath, u64>>,
    writes: Mutex<Vec<Write>>,
}

impl<'a> InMemoryTransaction<'a> {
    fn new(store: &'a InMemoryStore) -> Self {
        Self {
            store,
            reads: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    async fn observe(&self, path: &DocumentPath, version: u64) {
        self.reads
            .lock()
            .await
            .entry(path.clone())
            .or_insert(version);
    }

    async fn commit(self, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.check()?;

        let reads = mem::take(&mut *self.reads.lock().await);
        let writes = mem::take(&mut *self.writes.lock().await);
        let mut state = self.store.state.write().await;

        for (path, version) in &reads {
            if state.version_of(path) != *version {
                return Err(DocumentStoreError::Conflict(format!(
                    "document {path} changed since it was read"
                )));
            }
        }

        let now = Utc::now();
        for write in writes {
            match write {
                Write::Set(path, data) => state.set(&path, data, now),
                Write::Delete(path) => state.delete(&path),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DocumentSource for InMemoryTransaction<'_> {
    async fn get_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<RawDocument> {
        ctx.check()?;

        let (document, version) = {
            let state = self.store.state.read().await;
            (state.read(path), state.version_of(path))
        };
        self.observe(path, version).await;

        Ok(document)
    }

    async fn get_documents(
        &self,
        collection: &str,
        ids: &[String],
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        ctx.check()?;

        let observed = {
            let state = self.store.state.read().await;
            ids.iter()
                .map(|id| {
                    let path = DocumentPath::new(collection, id.as_str());
                    let version = state.version_of(&path);
                    (state.read(&path), version)
                })
                .collect::<Vec<_>>()
        };

        let mut documents = Vec::with_capacity(observed.len());
        for (document, version) in observed {
            self.observe(&document.path, version).await;
            documents.push(document);
        }

        Ok(documents)
    }

    async fn query_documents(
        &self,
        collection: &str,
        query: &Query,
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        ctx.check()?;

        let observed = {
            let state = self.store.state.read().await;
            let documents = state.query(collection, query)?;
            documents
                .into_iter()
                .map(|document| {
                    let version = state.version_of(&document.path);
                    (document, version)
                })
                .collect::<Vec<_>>()
        };

        let mut documents = Vec::with_capacity(observed.len());
        for (document, version) in observed {
            self.observe(&document.path, version).await;
            documents.push(document);
        }

        Ok(documents)
    }
}

#[async_trait]
impl TransactionScope for InMemoryTransaction<'_> {
    async fn set_document(&self, path: &DocumentPath, data: Map, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.check()?;

        self.writes
            .lock()
            .await
            .push(Write::Set(path.clone(), data));

        Ok(())
    }

    async fn delete_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.check()?;

        self.writes
            .lock()
            .await
            .push(Write::Delete(path.clone()));

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().max_attempts(3).build().await?;
/// ```
#[derive(Debug)]
pub struct InMemoryStoreBuilder {
    max_attempts: usize,
}

impl Default for InMemoryStoreBuilder {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl InMemoryStoreBuilder {
    /// Sets how many times a conflicting transaction is attempted. Values below one are
    /// raised to one.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::with_max_attempts(self.max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use docmodel_core::{
        backend::transaction_body,
        query::{Filter, QueryBuilder, SortDirection},
        value::Value,
    };
    use futures::FutureExt;

    fn body(entries: Vec<(&str, Value)>) -> Map {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn path(id: &str) -> DocumentPath {
        DocumentPath::new("users", id)
    }

    async fn seed(store: &InMemoryStore, ctx: &Context) {
        for (id, name, age) in [("u1", "Dave", 40), ("u2", "Erin", 31), ("u3", "Alan", 52)] {
            store
                .set_document(
                    &path(id),
                    body(vec![("name", Value::from(name)), ("age", Value::from(age))]),
                    ctx,
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn writes_maintain_the_envelope() {
        let store = InMemoryStore::new();
        let ctx = Context::new();

        store
            .set_document(&path("u1"), body(vec![("seen", Value::ServerTimestamp)]), &ctx)
            .await
            .unwrap();
        let first = store.get_document(&path("u1"), &ctx).await.unwrap();

        assert!(first.exists);
        assert_eq!(first.data.get("seen"), first.update_time.map(Value::Timestamp).as_ref());

        store
            .set_document(&path("u1"), body(vec![("name", Value::from("Dave"))]), &ctx)
            .await
            .unwrap();
        let second = store.get_document(&path("u1"), &ctx).await.unwrap();

        assert_eq!(second.create_time, first.create_time);
        assert!(second.update_time >= first.update_time);
        assert!(!second.data.contains_key("seen"));

        store.delete_document(&path("u1"), &ctx).await.unwrap();
        store.delete_document(&path("u1"), &ctx).await.unwrap();
        assert!(!store.get_document(&path("u1"), &ctx).await.unwrap().exists);
    }

    #[tokio::test]
    async fn bulk_reads_keep_request_order() {
        let store = InMemoryStore::new();
        let ctx = Context::new();
        seed(&store, &ctx).await;

        let ids = vec!["u3".to_string(), "nope".to_string(), "u1".to_string(), "u3".to_string()];
        let documents = store.get_documents("users", &ids, &ctx).await.unwrap();

        let found = documents
            .iter()
            .map(|d| (d.path.id.as_str(), d.exists))
            .collect::<Vec<_>>();
        assert_eq!(found, vec![("u3", true), ("nope", false), ("u1", true), ("u3", true)]);
    }

    #[tokio::test]
    async fn queries_filter_sort_and_window() {
        let store = InMemoryStore::new();
        let ctx = Context::new();
        seed(&store, &ctx).await;
        store
            .set_document(&path("u4"), body(vec![("name", Value::from("Zed"))]), &ctx)
            .await
            .unwrap();

        let ids = |documents: Vec<RawDocument>| {
            documents
                .into_iter()
                .map(|d| d.path.id)
                .collect::<Vec<_>>()
        };

        let all = store.query_documents("users", &Query::new(), &ctx).await.unwrap();
        assert_eq!(ids(all), vec!["u1", "u2", "u3", "u4"]);

        let by_age = QueryBuilder::default()
            .sort("age", SortDirection::Desc)
            .build();
        let sorted = store.query_documents("users", &by_age, &ctx).await.unwrap();
        assert_eq!(ids(sorted), vec!["u3", "u1", "u2"]);

        let last_two = QueryBuilder::default()
            .filter(Filter::gt("age", 30))
            .sort("age", SortDirection::Asc)
            .limit_to_last(2)
            .build();
        let windowed = store.query_documents("users", &last_two, &ctx).await.unwrap();
        assert_eq!(ids(windowed), vec!["u1", "u3"]);

        let missing = store.query_documents("nothing", &Query::new(), &ctx).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn transactions_commit_buffered_writes() {
        let store = InMemoryStore::new();
        let ctx = Context::new();
        seed(&store, &ctx).await;

        store
            .run_transaction(
                transaction_body(|scope| {
                    async move {
                        let ctx = Context::new();
                        let mut dave = scope.get_document(&path("u1"), &ctx).await?.data;
                        dave.insert("age".into(), Value::from(41));
                        scope.set_document(&path("u1"), dave, &ctx).await?;
                        scope.delete_document(&path("u2"), &ctx).await?;

                        // Writes stay buffered until commit.
                        assert!(scope.get_document(&path("u2"), &ctx).await?.exists);
                        Ok(())
                    }
                    .boxed()
                }),
                &ctx,
            )
            .await
            .unwrap();

        let dave = store.get_document(&path("u1"), &ctx).await.unwrap();
        assert_eq!(dave.data.get("age"), Some(&Value::Integer(41)));
        assert!(!store.get_document(&path("u2"), &ctx).await.unwrap().exists);
    }

    #[tokio::test]
    async fn conflicting_transactions_are_retried() {
        let store = InMemoryStore::new();
        let ctx = Context::new();
        seed(&store, &ctx).await;
        let attempts = Arc::new(AtomicUsize::new(0));

        let outside = store.clone();
        let counter = attempts.clone();
        store
            .run_transaction(
                transaction_body(move |scope| {
                    let outside = outside.clone();
                    let counter = counter.clone();
                    async move {
                        let ctx = Context::new();
                        let mut dave = scope.get_document(&path("u1"), &ctx).await?.data;

                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            outside
                                .set_document(&path("u1"), body(vec![("age", Value::from(99))]), &ctx)
                                .await?;
                        }

                        let age = dave.get("age").and_then(Value::as_i64).unwrap_or(0);
                        dave.insert("age".into(), Value::from(age + 1));
                        scope.set_document(&path("u1"), dave, &ctx).await
                    }
                    .boxed()
                }),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let dave = store.get_document(&path("u1"), &ctx).await.unwrap();
        assert_eq!(dave.data.get("age"), Some(&Value::Integer(100)));
    }

    #[tokio::test]
    async fn transactions_give_up_after_max_attempts() {
        let store = InMemoryStore::builder().max_attempts(3).build().await.unwrap();
        let ctx = Context::new();
        seed(&store, &ctx).await;
        let attempts = Arc::new(AtomicUsize::new(0));

        let outside = store.clone();
        let counter = attempts.clone();
        let result = store
            .run_transaction(
                transaction_body(move |scope| {
                    let outside = outside.clone();
                    let counter = counter.clone();
                    async move {
                        let ctx = Context::new();
                        counter.fetch_add(1, Ordering::SeqCst);
                        let dave = scope.get_document(&path("u1"), &ctx).await?.data;
                        outside.set_document(&path("u1"), dave.clone(), &ctx).await?;
                        scope.set_document(&path("u1"), dave, &ctx).await
                    }
                    .boxed()
                }),
                &ctx,
            )
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Conflict(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn body_errors_abort_without_retry() {
        let store = InMemoryStore::new();
        let ctx = Context::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let result = store
            .run_transaction(
                transaction_body(move |scope| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        scope
                            .set_document(&path("u9"), Map::new(), &Context::new())
                            .await?;
                        Err::<(), _>(DocumentStoreError::Transaction("rejected".into()))
                    }
                    .boxed()
                }),
                &ctx,
            )
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Transaction(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(store.count("users").await, 0);
    }

    #[tokio::test]
    async fn cancelled_context_stops_work() {
        let store = InMemoryStore::new();
        let ctx = Context::new();
        ctx.cancel();

        let result = store.get_document(&path("u1"), &ctx).await;
        assert!(matches!(result, Err(DocumentStoreError::Cancelled)));
    }
}
