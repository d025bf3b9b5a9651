//! Full-collection sync contract.
//!
//! Clients read a whole collection, edit it locally, and push the whole thing
//! back. A push replaces whatever the server held for that user and kind;
//! nothing is merged. Payloads are validated completely before the store is
//! touched, so a rejected push leaves the previous collection in place.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SyncError;
use crate::model::{Annotation, Bookmark, Collection, CollectionKind, UserId};
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaceAck {
    pub success: bool,
    pub count: usize,
}

pub struct SyncService<S> {
    store: Arc<S>,
}

impl<S> Clone for SyncService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: RecordStore> SyncService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn fetch(&self, user_id: &str, kind: CollectionKind) -> Result<Collection, SyncError> {
        let user_id = UserId::parse(user_id)?;
        self.store.fetch_collection(&user_id, kind).await
    }

    pub async fn replace(
        &self,
        user_id: &str,
        kind: CollectionKind,
        body: &Value,
    ) -> Result<ReplaceAck, SyncError> {
        let user_id = UserId::parse(user_id)?;
        let collection = parse_collection(kind, body)?.owned_by(&user_id);
        let state = collection.state();

        let count = self.store.replace_collection(&user_id, collection).await?;
        tracing::info!(user_id = %user_id, kind = %kind, count, state = ?state, "replaced collection");

        Ok(ReplaceAck {
            success: true,
            count,
        })
    }
}

/// Validates a push body of the form `{ "<kind>": [ ... ] }`.
pub fn parse_collection(kind: CollectionKind, body: &Value) -> Result<Collection, SyncError> {
    let field = kind.as_str();
    let Some(object) = body.as_object() else {
        return Err(SyncError::invalid("request body must be a JSON object"));
    };
    let Some(items) = object.get(field) else {
        return Err(SyncError::invalid(format!("missing `{field}` field")));
    };
    let Some(items) = items.as_array() else {
        return Err(SyncError::invalid(format!("`{field}` must be an array")));
    };

    match kind {
        CollectionKind::Bookmarks => {
            let bookmarks: Vec<Bookmark> = parse_items(field, items)?;
            for (i, b) in bookmarks.iter().enumerate() {
                check_identity(field, i, "id", &b.id)?;
                check_positive(field, i, "chapter", b.chapter)?;
                check_positive(field, i, "verse", b.verse)?;
            }
            check_unique(field, "id", bookmarks.iter().map(|b| b.id.as_str()))?;
            Ok(Collection::Bookmarks(bookmarks))
        }
        CollectionKind::Annotations => {
            let annotations: Vec<Annotation> = parse_items(field, items)?;
            for (i, a) in annotations.iter().enumerate() {
                check_identity(field, i, "key", &a.key)?;
            }
            check_unique(field, "key", annotations.iter().map(|a| a.key.as_str()))?;
            Ok(Collection::Annotations(annotations))
        }
    }
}

fn parse_items<T: DeserializeOwned>(field: &str, items: &[Value]) -> Result<Vec<T>, SyncError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            if !item.is_object() {
                return Err(SyncError::invalid(format!("{field}[{i}]: must be an object")));
            }
            T::deserialize(item).map_err(|e| SyncError::invalid(format!("{field}[{i}]: {e}")))
        })
        .collect()
}

fn check_identity(field: &str, index: usize, name: &str, value: &str) -> Result<(), SyncError> {
    if value.trim().is_empty() {
        return Err(SyncError::invalid(format!("{field}[{index}]: `{name}` must not be empty")));
    }
    Ok(())
}

fn check_positive(field: &str, index: usize, name: &str, value: u32) -> Result<(), SyncError> {
    if value == 0 {
        return Err(SyncError::invalid(format!("{field}[{index}]: `{name}` must be positive")));
    }
    Ok(())
}

fn check_unique<'a>(
    field: &str,
    name: &str,
    keys: impl Iterator<Item = &'a str>,
) -> Result<(), SyncError> {
    let mut seen = HashSet::new();
    for (i, key) in keys.enumerate() {
        if !seen.insert(key) {
            return Err(SyncError::invalid(format!("{field}[{i}]: duplicate {name} `{key}`")));
        }
    }
    Ok(())
}
