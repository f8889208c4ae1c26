//! # Storage Port
//!
//! The core talks to persistence only through [`EntityStore`]: a document
//! store with point lookups, filtered/ordered queries and a transaction
//! primitive. Adapters live in the `storage-adapters` crate.

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::errors::DomainError;
use crate::models::{ApprovalRecord, Board, Item};

/// A stored entity: always a JSON object.
pub type Document = serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Boards,
    Items,
    Claps,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Boards => "boards",
            Collection::Items => "items",
            Collection::Claps => "claps",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{collection}/{id} does not exist")]
    NotFound { collection: Collection, id: String },

    #[error("{collection}/{id} already exists")]
    AlreadyExists { collection: Collection, id: String },

    /// Could not lock the document within the configured timeout.
    #[error("{collection}/{id} is locked by another transaction")]
    Contention { collection: Collection, id: String },

    #[error("document codec: {0}")]
    Codec(String),

    #[error("storage backend: {0}")]
    Backend(String),

    /// A transaction body refused to commit for a business reason.
    #[error(transparent)]
    Rejected(DomainError),
}

impl StoreError {
    pub fn not_found(collection: Collection, id: &str) -> Self {
        Self::NotFound {
            collection,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                DomainError::NotFound(entity_name(collection).to_string(), id)
            }
            StoreError::AlreadyExists { collection, id } => {
                DomainError::Conflict(format!("{} {id} already exists", entity_name(collection)))
            }
            StoreError::Rejected(err) => err,
            other => DomainError::Internal(other.to_string()),
        }
    }
}

fn entity_name(collection: Collection) -> &'static str {
    match collection {
        Collection::Boards => "Board",
        Collection::Items => "Item",
        Collection::Claps => "Approval",
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ── Queries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Time(DateTime<Utc>),
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Time(v)
    }
}

impl FieldValue {
    /// Orders a stored field against this value, or `None` when the stored
    /// field is missing or of a different type.
    pub fn compare_stored(&self, stored: &Document) -> Option<Ordering> {
        match self {
            FieldValue::Str(v) => stored.as_str().map(|s| s.cmp(v.as_str())),
            FieldValue::Bool(v) => stored.as_bool().map(|b| b.cmp(v)),
            FieldValue::Int(v) => stored.as_i64().map(|n| n.cmp(v)),
            FieldValue::Time(v) => stored
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc).cmp(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Lt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: &'static str,
    pub op: FilterOp,
    pub value: FieldValue,
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<FieldValue>) -> Self {
        Self {
            field,
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn gt(field: &'static str, value: impl Into<FieldValue>) -> Self {
        Self {
            field,
            op: FilterOp::Gt,
            value: value.into(),
        }
    }

    pub fn lt(field: &'static str, value: impl Into<FieldValue>) -> Self {
        Self {
            field,
            op: FilterOp::Lt,
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let Some(stored) = doc.get(self.field) else {
            return false;
        };
        let wanted = match self.op {
            FilterOp::Eq => Ordering::Equal,
            FilterOp::Gt => Ordering::Greater,
            FilterOp::Lt => Ordering::Less,
        };
        self.value.compare_stored(stored) == Some(wanted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: &'static str,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: &'static str) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn desc(field: &'static str) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    /// Orders two documents by this field. Missing fields sort first;
    /// RFC 3339 strings compare as instants.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ord = compare_fields(a.get(self.field), b.get(self.field));
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

fn compare_fields(a: Option<&Document>, b: Option<&Document>) -> Ordering {
    use serde_json::Value;

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

// ── Transactions ────────────────────────────────────────────────────────────

/// Operations available inside [`EntityStore::transaction`]. Every document
/// touched stays locked until the transaction ends; writes become visible
/// only on commit.
#[async_trait]
pub trait TxHandle: Send {
    async fn get(&mut self, collection: Collection, id: &str) -> StoreResult<Option<Document>>;
    async fn set(&mut self, collection: Collection, id: &str, doc: Document) -> StoreResult<()>;
    /// Creates the document unless it exists. Returns whether it was created.
    async fn insert(&mut self, collection: Collection, id: &str, doc: Document) -> StoreResult<bool>;
    /// Shallow-merges `partial` into an existing document.
    async fn update(&mut self, collection: Collection, id: &str, partial: Document) -> StoreResult<()>;
    async fn delete(&mut self, collection: Collection, id: &str) -> StoreResult<bool>;
}

pub type TxFuture<'t> = Pin<Box<dyn Future<Output = StoreResult<Document>> + Send + 't>>;

/// Body of a transaction. Returning `Err` rolls every write back.
pub type TxFn = Box<dyn for<'t> FnOnce(&'t mut dyn TxHandle) -> TxFuture<'t> + Send>;

/// Boxes a transaction body, letting the compiler infer the closure's
/// higher-ranked signature.
pub fn tx_fn<F>(f: F) -> TxFn
where
    F: for<'t> FnOnce(&'t mut dyn TxHandle) -> TxFuture<'t> + Send + 'static,
{
    Box::new(f)
}

/// Document store contract consumed by the core.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>>;
    async fn set(&self, collection: Collection, id: &str, doc: Document) -> StoreResult<()>;
    async fn insert(&self, collection: Collection, id: &str, doc: Document) -> StoreResult<bool>;
    async fn update(&self, collection: Collection, id: &str, partial: Document) -> StoreResult<()>;
    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool>;
    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        order_by: Option<OrderBy>,
    ) -> StoreResult<Vec<(String, Document)>>;
    /// Runs `f` with serializable semantics per touched document.
    async fn transaction(&self, f: TxFn) -> StoreResult<Document>;
}

// ── Typed access ────────────────────────────────────────────────────────────

/// A model that lives in one collection under a string key.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn key(&self) -> String;

    fn to_document(&self) -> StoreResult<Document> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_document(doc: Document) -> StoreResult<Self> {
        Ok(serde_json::from_value(doc)?)
    }
}

impl Entity for Board {
    const COLLECTION: Collection = Collection::Boards;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Entity for Item {
    const COLLECTION: Collection = Collection::Items;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Entity for ApprovalRecord {
    const COLLECTION: Collection = Collection::Claps;

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[async_trait]
pub trait EntityStoreExt: EntityStore {
    async fn load<E: Entity>(&self, id: &str) -> StoreResult<Option<E>> {
        self.get(E::COLLECTION, id)
            .await?
            .map(E::from_document)
            .transpose()
    }

    async fn save<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        let doc = entity.to_document()?;
        self.set(E::COLLECTION, &entity.key(), doc).await
    }

    async fn find<E: Entity>(
        &self,
        filters: &[Filter],
        order_by: Option<OrderBy>,
    ) -> StoreResult<Vec<E>> {
        self.query(E::COLLECTION, filters, order_by)
            .await?
            .into_iter()
            .map(|(_, doc)| E::from_document(doc))
            .collect()
    }
}

impl<S: EntityStore + ?Sized> EntityStoreExt for S {}

#[async_trait]
pub trait TxHandleExt: TxHandle {
    async fn load<E: Entity>(&mut self, id: &str) -> StoreResult<Option<E>> {
        self.get(E::COLLECTION, id)
            .await?
            .map(E::from_document)
            .transpose()
    }

    /// Like [`TxHandleExt::load`], but a missing document is an error.
    async fn load_required<E: Entity>(&mut self, id: &str) -> StoreResult<E> {
        self.load(id)
            .await?
            .ok_or_else(|| StoreError::not_found(E::COLLECTION, id))
    }

    async fn save<E: Entity>(&mut self, entity: &E) -> StoreResult<()> {
        let doc = entity.to_document()?;
        self.set(E::COLLECTION, &entity.key(), doc).await
    }
}

impl<T: TxHandle + ?Sized> TxHandleExt for T {}
