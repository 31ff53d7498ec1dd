use std::collections::HashMap;
use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{doc, Document};
use mea::mutex::Mutex;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection,
    error::{Error as MongoError, TRANSIENT_TRANSACTION_ERROR},
    options::{ClientOptions, FindOptions},
};
use tracing::{debug, warn};

use docmodel_core::{
    backend::{
        DocumentPath, DocumentSource, RawDocument, StoreBackend, StoreBackendBuilder, TransactionBody,
        TransactionScope,
    },
    context::Context,
    error::{DocumentStoreError, DocumentStoreResult},
    query::Query,
    value::{map_from_bson, map_to_bson, resolve_map_server_timestamps, Map},
};

use crate::{
    query::{FindPlan, DATA},
    sanitizer::KeySanitizer,
};

/// Number of times a transaction failing with a transient error is attempted.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

const ID: &str = "_id";
const CREATE_TIME: &str = "create_time";
const UPDATE_TIME: &str = "update_time";

/// Maps driver errors, turning transient transaction failures into conflicts so the
/// transaction loop retries them.
fn mongo_error(e: MongoError) -> DocumentStoreError {
    if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        DocumentStoreError::Conflict(e.to_string())
    } else {
        DocumentStoreError::Backend(e.to_string())
    }
}

/// The update applied by a write: the body and update time are replaced, the create time is
/// only set when the record is inserted.
fn upsert(mut data: Map) -> Document {
    let now = bson::DateTime::now();
    resolve_map_server_timestamps(&mut data, now.to_chrono());

    doc! {
        "$set": {
            DATA: KeySanitizer::sanitize_document(map_to_bson(data)),
            UPDATE_TIME: now,
        },
        "$setOnInsert": {
            CREATE_TIME: now,
        },
    }
}

fn raw_document(collection: &str, mut record: Document) -> DocumentStoreResult<RawDocument> {
    let id = record
        .get_str(ID)
        .map_err(|e| DocumentStoreError::Serialization(format!("stored record without string id: {e}")))?
        .to_string();
    let data = match record.remove(DATA) {
        Some(bson::Bson::Document(data)) => map_from_bson(KeySanitizer::restore_document(data))?,
        _ => Map::new(),
    };

    Ok(RawDocument {
        path: DocumentPath::new(collection, id),
        data,
        create_time: record.get_datetime(CREATE_TIME).ok().map(|t| t.to_chrono()),
        update_time: record.get_datetime(UPDATE_TIME).ok().map(|t| t.to_chrono()),
        exists: true,
    })
}

fn find_options(plan: &FindPlan) -> FindOptions {
    let mut options = FindOptions::default();

    options.sort = Some(plan.sort.clone());
    options.skip = plan.skip;
    options.limit = plan.limit;

    options
}

/// Orders fetched records by the requested identifiers, with placeholders for the missing.
fn in_request_order(
    collection: &str,
    ids: &[String],
    records: Vec<Document>,
) -> DocumentStoreResult<Vec<RawDocument>> {
    let mut found = HashMap::with_capacity(records.len());
    for record in records {
        let document = raw_document(collection, record)?;
        found.insert(document.path.id.clone(), document);
    }

    Ok(
        ids.iter()
            .map(|id| {
                found
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| RawDocument::missing(DocumentPath::new(collection, id.as_str())))
            })
            .collect()
    )
}

fn unique_ids(ids: &[String]) -> Vec<&str> {
    let mut unique = ids
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>();
    unique.sort_unstable();
    unique.dedup();
    unique
}

/// MongoDB document storage backend.
///
/// Each document is stored as one record in a MongoDB collection named after the collection
/// path: `{ _id, data, create_time, update_time }`, where `data` holds the body with its keys
/// sanitized. Transactions run in a client session and are retried when MongoDB labels a
/// failure as transient.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    max_attempts: usize,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self {
            client,
            database,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(&KeySanitizer::sanitize_key(collection_name))
    }
}

#[async_trait]
impl DocumentSource for MongoDbStore {
    async fn get_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<RawDocument> {
        let record = ctx
            .guard(async {
                self.get_collection(&path.collection)
                    .find_one(doc! { ID: path.id.as_str() })
                    .await
                    .map_err(mongo_error)
            })
            .await?;

        match record {
            Some(record) => raw_document(&path.collection, record),
            None => Ok(RawDocument::missing(path.clone())),
        }
    }

    async fn get_documents(
        &self,
        collection: &str,
        ids: &[String],
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        let records = ctx
            .guard(async {
                self.get_collection(collection)
                    .find(doc! { ID: { "$in": unique_ids(ids) } })
                    .await
                    .map_err(mongo_error)?
                    .try_collect::<Vec<Document>>()
                    .await
                    .map_err(mongo_error)
            })
            .await?;

        in_request_order(collection, ids, records)
    }

    async fn query_documents(
        &self,
        collection: &str,
        query: &Query,
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        let plan = FindPlan::new(query)?;
        let records = ctx
            .guard(async {
                self.get_collection(collection)
                    .find(plan.filter.clone())
                    .with_options(find_options(&plan))
                    .await
                    .map_err(mongo_error)?
                    .try_collect::<Vec<Document>>()
                    .await
                    .map_err(mongo_error)
            })
            .await?;

        plan.finish(records)
            .into_iter()
            .map(|record| raw_document(collection, record))
            .collect()
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn set_document(&self, path: &DocumentPath, data: Map, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.guard(async {
            self.get_collection(&path.collection)
                .update_one(doc! { ID: path.id.as_str() }, upsert(data))
                .upsert(true)
                .await
                .map_err(mongo_error)
        })
        .await?;

        Ok(())
    }

    async fn delete_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.guard(async {
            self.get_collection(&path.collection)
                .delete_one(doc! { ID: path.id.as_str() })
                .await
                .map_err(mongo_error)
        })
        .await?;

        Ok(())
    }

    async fn run_transaction(&self, mut body: TransactionBody<'_>, ctx: &Context) -> DocumentStoreResult<()> {
        for attempt in 1..=self.max_attempts {
            ctx.check()?;

            let mut session = self
                .client
                .start_session()
                .await
                .map_err(mongo_error)?;
            session
                .start_transaction()
                .await
                .map_err(mongo_error)?;

            let transaction = MongoTransaction {
                store: self,
                session: Mutex::new(session),
            };
            let outcome = body(&transaction).await;
            let result = match outcome {
                Ok(()) => transaction.commit(ctx).await,
                Err(e) => {
                    transaction.abort().await;
                    Err(e)
                }
            };

            match result {
                Ok(()) => {
                    debug!(target: "docmodel::mongodb", attempt, "Transaction committed");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    warn!(target: "docmodel::mongodb", attempt, error = %e, "Transaction conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(DocumentStoreError::Conflict(format!(
            "transaction did not commit after {} attempts",
            self.max_attempts
        )))
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// One attempt of a transaction, bound to a MongoDB client session.
struct MongoTransaction<'a> {
    store: &'a MongoDbStore,
    session: Mutex<ClientSession>,
}

impl MongoTransaction<'_> {
    async fn commit(&self, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.check()?;

        self.session
            .lock()
            .await
            .commit_transaction()
            .await
            .map_err(mongo_error)
    }

    async fn abort(&self) {
        if let Err(e) = self.session.lock().await.abort_transaction().await {
            warn!(target: "docmodel::mongodb", error = %e, "Failed to abort transaction");
        }
    }

    async fn find(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        let mut session = self.session.lock().await;
        let mut cursor = self
            .store
            .get_collection(collection)
            .find(filter)
            .with_options(options)
            .session(&mut *session)
            .await
            .map_err(mongo_error)?;

        cursor
            .stream(&mut *session)
            .try_collect::<Vec<Document>>()
            .await
            .map_err(mongo_error)
    }
}

#[async_trait]
impl DocumentSource for MongoTransaction<'_> {
    async fn get_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<RawDocument> {
        let record = ctx
            .guard(async {
                let mut session = self.session.lock().await;
                self.store
                    .get_collection(&path.collection)
                    .find_one(doc! { ID: path.id.as_str() })
                    .session(&mut *session)
                    .await
                    .map_err(mongo_error)
            })
            .await?;

        match record {
            Some(record) => raw_document(&path.collection, record),
            None => Ok(RawDocument::missing(path.clone())),
        }
    }

    async fn get_documents(
        &self,
        collection: &str,
        ids: &[String],
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        let records = ctx
            .guard(self.find(collection, doc! { ID: { "$in": unique_ids(ids) } }, FindOptions::default()))
            .await?;

        in_request_order(collection, ids, records)
    }

    async fn query_documents(
        &self,
        collection: &str,
        query: &Query,
        ctx: &Context,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        let plan = FindPlan::new(query)?;
        let records = ctx
            .guard(self.find(collection, plan.filter.clone(), find_options(&plan)))
            .await?;

        plan.finish(records)
            .into_iter()
            .map(|record| raw_document(collection, record))
            .collect()
    }
}

#[async_trait]
impl TransactionScope for MongoTransaction<'_> {
    async fn set_document(&self, path: &DocumentPath, data: Map, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.guard(async {
            let mut session = self.session.lock().await;
            self.store
                .get_collection(&path.collection)
                .update_one(doc! { ID: path.id.as_str() }, upsert(data))
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(mongo_error)
        })
        .await?;

        Ok(())
    }

    async fn delete_document(&self, path: &DocumentPath, ctx: &Context) -> DocumentStoreResult<()> {
        ctx.guard(async {
            let mut session = self.session.lock().await;
            self.store
                .get_collection(&path.collection)
                .delete_one(doc! { ID: path.id.as_str() })
                .session(&mut *session)
                .await
                .map_err(mongo_error)
        })
        .await?;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    max_attempts: usize,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets how many times a transaction failing with a transient error is attempted.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let client = Client::with_options(
            ClientOptions::parse(&self.dsn)
                .await
                .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
        )
        .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        Ok(MongoDbStore {
            max_attempts: self.max_attempts,
            ..MongoDbStore::new(client, self.database)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodel_core::value::Value;

    #[test]
    fn writes_resolve_server_timestamps() {
        let mut data = Map::new();
        data.insert("seen".into(), Value::ServerTimestamp);
        data.insert("a.b".into(), Value::from(1));

        let update = upsert(data);
        let set = update.get_document("$set").unwrap();
        let body = set.get_document(DATA).unwrap();

        assert_eq!(body.get_datetime("seen").unwrap(), set.get_datetime(UPDATE_TIME).unwrap());
        assert_eq!(body.get_i64("a__dot__b").unwrap(), 1);
        assert!(update.get_document("$setOnInsert").unwrap().contains_key(CREATE_TIME));
    }

    #[test]
    fn records_become_raw_documents() {
        let now = bson::DateTime::now();
        let record = doc! {
            ID: "u1",
            DATA: { "name": "Dave", "a__dot__b": true },
            CREATE_TIME: now,
            UPDATE_TIME: now,
        };

        let document = raw_document("users", record).unwrap();

        assert!(document.exists);
        assert_eq!(document.path, DocumentPath::new("users", "u1"));
        assert_eq!(document.data.get("a.b"), Some(&Value::Bool(true)));
        assert_eq!(document.create_time, Some(now.to_chrono()));
    }

    #[test]
    fn bulk_reads_answer_in_request_order() {
        let ids = vec!["b".to_string(), "x".to_string(), "a".to_string(), "b".to_string()];
        let records = vec![doc! { ID: "a", DATA: {} }, doc! { ID: "b", DATA: {} }];

        let documents = in_request_order("users", &ids, records).unwrap();
        let found = documents
            .iter()
            .map(|d| (d.path.id.as_str(), d.exists))
            .collect::<Vec<_>>();

        assert_eq!(found, vec![("b", true), ("x", false), ("a", true), ("b", true)]);
        assert_eq!(unique_ids(&ids), vec!["a", "b", "x"]);
    }
}
