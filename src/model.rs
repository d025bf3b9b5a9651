use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Bookmarks,
    Annotations,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 2] = [CollectionKind::Bookmarks, CollectionKind::Annotations];

    /// URL segment and request body field name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Bookmarks => "bookmarks",
            CollectionKind::Annotations => "annotations",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bookmarks" => Some(CollectionKind::Bookmarks),
            "annotations" => Some(CollectionKind::Annotations),
            _ => None,
        }
    }

    pub fn empty(&self) -> Collection {
        match self {
            CollectionKind::Bookmarks => Collection::Bookmarks(vec![]),
            CollectionKind::Annotations => Collection::Annotations(vec![]),
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of a collection. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        if raw.trim().is_empty() {
            return Err(SyncError::invalid("user id must not be empty"));
        }
        Ok(UserId(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    #[serde(default, skip_deserializing)]
    pub user_id: String,
    pub id: String,
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(default, skip_deserializing)]
    pub user_id: String,
    pub key: String,
    pub note: String,
    pub color: String,
    #[serde(default)]
    pub html: Option<String>,
}

/// A whole per-user collection of one kind. Serializes as a bare array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Collection {
    Bookmarks(Vec<Bookmark>),
    Annotations(Vec<Annotation>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Empty,
    Populated(usize),
}

impl Collection {
    pub fn kind(&self) -> CollectionKind {
        match self {
            Collection::Bookmarks(_) => CollectionKind::Bookmarks,
            Collection::Annotations(_) => CollectionKind::Annotations,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Collection::Bookmarks(items) => items.len(),
            Collection::Annotations(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> PartitionState {
        match self.len() {
            0 => PartitionState::Empty,
            n => PartitionState::Populated(n),
        }
    }

    /// Overwrites the owner of every item; the caller-supplied value never survives.
    pub fn owned_by(mut self, user_id: &UserId) -> Self {
        match &mut self {
            Collection::Bookmarks(items) => {
                for b in items.iter_mut() {
                    b.user_id = user_id.as_str().to_owned();
                }
            }
            Collection::Annotations(items) => {
                for a in items.iter_mut() {
                    a.user_id = user_id.as_str().to_owned();
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_path_segment() {
        for kind in CollectionKind::ALL {
            assert_eq!(CollectionKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(CollectionKind::from_str("Bookmarks"), Some(CollectionKind::Bookmarks));
        assert_eq!(CollectionKind::from_str("highlights"), None);
    }

    #[test]
    fn test_user_id_rejects_blank() {
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("   ").is_err());
        assert_eq!(UserId::parse("u1").unwrap().as_str(), "u1");
    }

    #[test]
    fn test_bookmark_uses_camel_case_fields() {
        let b = Bookmark {
            user_id: "u1".into(),
            id: "Genesis-1-1".into(),
            book: "Genesis".into(),
            chapter: 1,
            verse: 1,
            text: "In the beginning...".into(),
        };
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["chapter"], 1);
    }

    #[test]
    fn test_annotation_html_is_optional() {
        let a: Annotation =
            serde_json::from_str(r#"{"key":"John-3-16","note":"love","color":"yellow"}"#).unwrap();
        assert_eq!(a.html, None);
        assert_eq!(a.user_id, "");

        let a: Annotation = serde_json::from_str(
            r#"{"key":"John-3-16","note":"love","color":"yellow","html":null}"#,
        )
        .unwrap();
        assert_eq!(a.html, None);
    }

    #[test]
    fn test_collection_serializes_as_bare_array() {
        let json = serde_json::to_string(&CollectionKind::Annotations.empty()).unwrap();
        assert_eq!(json, "[]");
    }

    #[test]
    fn test_owned_by_overwrites_client_user_id() {
        let user = UserId::parse("u1").unwrap();
        let c = Collection::Annotations(vec![Annotation {
            user_id: "someone-else".into(),
            key: "Psalms-23-1".into(),
            note: "".into(),
            color: "blue".into(),
            html: None,
        }])
        .owned_by(&user);

        match c {
            Collection::Annotations(items) => assert_eq!(items[0].user_id, "u1"),
            _ => panic!("kind changed"),
        }
    }

    #[test]
    fn test_state_tracks_length() {
        assert_eq!(CollectionKind::Bookmarks.empty().state(), PartitionState::Empty);
        let c = Collection::Bookmarks(vec![Bookmark {
            user_id: String::new(),
            id: "b1".into(),
            book: "Ruth".into(),
            chapter: 1,
            verse: 16,
            text: "".into(),
        }]);
        assert_eq!(c.state(), PartitionState::Populated(1));
    }
}
