/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Value types exchanged between the engine and its delivery layer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationType {
    Quote,
    Post,
    Article,
}

impl PublicationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Post => "post",
            Self::Article => "article",
        }
    }

    /// Lenient parse used for query-string filters: unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "quote" => Some(Self::Quote),
            "post" => Some(Self::Post),
            "article" => Some(Self::Article),
            _ => None,
        }
    }
}

/// Access tier of a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Community,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Community => "community",
            Self::Private => "private",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "public" => Some(Self::Public),
            "community" => Some(Self::Community),
            "private" => Some(Self::Private),
            _ => None,
        }
    }

    /// Whether a publication with this visibility, written by `author_id`,
    /// may be shown to `viewer`.
    pub fn allows(self, author_id: &str, viewer: Option<&str>) -> bool {
        match (self, viewer) {
            (Self::Public, _) => true,
            (_, None) => false,
            (Self::Community, Some(_)) => true,
            (Self::Private, Some(v)) => v == author_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: String,
    pub author_id: String,
    #[serde(rename = "type")]
    pub kind: PublicationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub publication_date_ms: i64,
    pub visibility: Visibility,
    pub likes_count: i64,
    pub comments_count: i64,
    pub saved_count: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_ids: Vec<String>,
}

/// A publication together with the viewer's own relationship to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationView {
    #[serde(flatten)]
    pub publication: Publication,
    pub is_liked: bool,
    pub is_saved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPublication {
    #[serde(flatten)]
    pub publication: Publication,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_note: Option<String>,
    pub saved_at_ms: i64,
    pub is_liked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub publication_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub author_id: String,
    pub text: String,
    pub created_at_ms: i64,
    pub likes_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies_count: i64,
    pub is_liked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub registered_at_ms: i64,
}

/// One row of a publication's like list. `username` is absent when the
/// liker never registered a local profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liker {
    pub user_id: String,
    pub username: Option<String>,
    pub liked_at_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub publications_count: i64,
    pub followers_count: i64,
    pub following_count: i64,
    pub likes_received: i64,
    pub comments_received: i64,
    pub saved_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: String,
    pub owner_id: String,
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub created_at_ms: i64,
}

/// Result of flipping a like: the state after the flip and the committed total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOutcome {
    pub liked: bool,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Explicit feed filters. Every field is optional; `None` means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilters {
    #[serde(default, rename = "type")]
    pub kind: Option<PublicationType>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub date_from_ms: Option<i64>,
    #[serde(default)]
    pub date_to_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPublication {
    #[serde(rename = "type")]
    pub kind: PublicationType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub visibility: Visibility,
    #[serde(default)]
    pub media_ids: Vec<String>,
}

/// Partial update: only fields that are `Some` are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub media_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub text: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedia {
    pub mime: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub publications_fixed: u64,
    pub comments_fixed: u64,
    pub users_fixed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_allows_follows_tiers() {
        assert!(Visibility::Public.allows("a", None));
        assert!(!Visibility::Community.allows("a", None));
        assert!(Visibility::Community.allows("a", Some("b")));
        assert!(!Visibility::Private.allows("a", Some("b")));
        assert!(Visibility::Private.allows("a", Some("a")));
        assert!(!Visibility::Private.allows("a", None));
    }

    #[test]
    fn lenient_parse_drops_unknown_values() {
        assert_eq!(PublicationType::parse(" Article "), Some(PublicationType::Article));
        assert_eq!(PublicationType::parse("video"), None);
        assert_eq!(Visibility::parse("COMMUNITY"), Some(Visibility::Community));
        assert_eq!(Visibility::parse(""), None);
    }

    #[test]
    fn view_flattens_publication_fields() {
        let view = PublicationView {
            publication: Publication {
                id: "p1".into(),
                author_id: "a".into(),
                kind: PublicationType::Quote,
                title: None,
                content: Some("hi".into()),
                source: None,
                publication_date_ms: 10,
                visibility: Visibility::Public,
                likes_count: 1,
                comments_count: 0,
                saved_count: 0,
                media_ids: vec![],
            },
            is_liked: true,
            is_saved: false,
        };
        let v = serde_json::to_value(&view).unwrap();
        assert_eq!(v["type"], "quote");
        assert_eq!(v["is_liked"], true);
        assert_eq!(v["likes_count"], 1);
        assert!(v.get("title").is_none());
        assert!(v.get("media_ids").is_none());
    }
}
