/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Visibility predicate builder.
//!
//! Turns a viewer and a set of explicit filters into an ordered list of
//! predicates. The list is lowered into `(fragment, values)` pairs with
//! anonymous `?` placeholders, so bind order is simply list order and no
//! caller ever computes a placeholder index.

use rusqlite::types::Value;
use sense_protocol::{FeedFilters, PublicationType, Visibility};

/// Per-request filter input. Built fresh for every request, never cached.
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    pub viewer: Option<String>,
    pub filters: FeedFilters,
    /// Free-text query (search only).
    pub text: Option<String>,
}

impl FilterContext {
    pub fn new(viewer: Option<&str>, filters: FeedFilters) -> Self {
        Self {
            viewer: non_empty(viewer).map(str::to_string),
            filters,
            text: None,
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = non_empty(Some(text)).map(str::to_string);
        self
    }

    /// Pins the author, replacing any author filter supplied by the caller.
    pub fn pin_author(mut self, author_id: &str) -> Self {
        self.filters.author_id = Some(author_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Case-insensitive substring over title and content.
    TextMatch(String),
    VisibleToAnonymous,
    /// Public, community, or authored by the viewer.
    VisibleTo(String),
    KindIs(PublicationType),
    VisibilityIs(Visibility),
    AuthorIs(String),
    PublishedFrom(i64),
    PublishedTo(i64),
}

/// Builds the predicate list. Order: text, implicit visibility, type,
/// visibility, author, date-from, date-to.
pub fn build(ctx: &FilterContext) -> Vec<Predicate> {
    let mut out = Vec::with_capacity(7);
    if let Some(text) = non_empty(ctx.text.as_deref()) {
        out.push(Predicate::TextMatch(text.to_string()));
    }
    match non_empty(ctx.viewer.as_deref()) {
        Some(viewer) => out.push(Predicate::VisibleTo(viewer.to_string())),
        None => out.push(Predicate::VisibleToAnonymous),
    }
    let f = &ctx.filters;
    if let Some(kind) = f.kind {
        out.push(Predicate::KindIs(kind));
    }
    if let Some(vis) = f.visibility {
        out.push(Predicate::VisibilityIs(vis));
    }
    if let Some(author) = non_empty(f.author_id.as_deref()) {
        out.push(Predicate::AuthorIs(author.to_string()));
    }
    if let Some(from) = f.date_from_ms {
        out.push(Predicate::PublishedFrom(from));
    }
    if let Some(to) = f.date_to_ms {
        out.push(Predicate::PublishedTo(to));
    }
    out
}

/// Ordered conjunction of SQL fragments plus their bound values.
#[derive(Debug, Clone, Default)]
pub struct ClauseList {
    fragments: Vec<String>,
    values: Vec<Value>,
}

impl ClauseList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowers predicates against the publications table aliased as `alias`.
    pub fn from_predicates(alias: &str, predicates: &[Predicate]) -> Self {
        let mut list = Self::new();
        for p in predicates {
            list.push_predicate(alias, p);
        }
        list
    }

    pub fn push(&mut self, fragment: impl Into<String>, values: impl IntoIterator<Item = Value>) {
        self.fragments.push(fragment.into());
        self.values.extend(values);
    }

    pub fn push_predicate(&mut self, alias: &str, predicate: &Predicate) {
        let a = alias;
        match predicate {
            Predicate::TextMatch(text) => {
                let pattern = format!("%{}%", escape_like(&text.to_lowercase()));
                self.push(
                    format!(
                        "(lower(coalesce({a}.title, '')) LIKE ? ESCAPE '\\' OR lower(coalesce({a}.content, '')) LIKE ? ESCAPE '\\')"
                    ),
                    [Value::Text(pattern.clone()), Value::Text(pattern)],
                );
            }
            Predicate::VisibleToAnonymous => {
                self.push(format!("{a}.visibility = 'public'"), []);
            }
            Predicate::VisibleTo(viewer) => {
                self.push(
                    format!("({a}.visibility = 'public' OR {a}.visibility = 'community' OR {a}.author_id = ?)"),
                    [Value::Text(viewer.clone())],
                );
            }
            Predicate::KindIs(kind) => {
                self.push(format!("{a}.type = ?"), [Value::Text(kind.as_str().to_string())]);
            }
            Predicate::VisibilityIs(vis) => {
                self.push(format!("{a}.visibility = ?"), [Value::Text(vis.as_str().to_string())]);
            }
            Predicate::AuthorIs(author) => {
                self.push(format!("{a}.author_id = ?"), [Value::Text(author.clone())]);
            }
            Predicate::PublishedFrom(ms) => {
                self.push(format!("{a}.publication_date_ms >= ?"), [Value::Integer(*ms)]);
            }
            Predicate::PublishedTo(ms) => {
                self.push(format!("{a}.publication_date_ms <= ?"), [Value::Integer(*ms)]);
            }
        }
    }

    /// `WHERE ...` or an empty string.
    pub fn where_sql(&self) -> String {
        if self.fragments.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.fragments.join(" AND "))
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn escape_like(input: &str) -> String {
    input.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_viewer_only_sees_public() {
        let preds = build(&FilterContext::new(None, FeedFilters::default()));
        assert_eq!(preds, vec![Predicate::VisibleToAnonymous]);
    }

    #[test]
    fn blank_viewer_is_anonymous() {
        let preds = build(&FilterContext::new(Some("  "), FeedFilters::default()));
        assert_eq!(preds, vec![Predicate::VisibleToAnonymous]);
    }

    #[test]
    fn explicit_visibility_tightens_without_replacing_implicit_clause() {
        let filters = FeedFilters {
            visibility: Some(Visibility::Private),
            ..Default::default()
        };
        let preds = build(&FilterContext::new(Some("u1"), filters));
        assert_eq!(
            preds,
            vec![
                Predicate::VisibleTo("u1".into()),
                Predicate::VisibilityIs(Visibility::Private),
            ]
        );
    }

    #[test]
    fn order_is_stable_across_all_filters() {
        let filters = FeedFilters {
            kind: Some(PublicationType::Article),
            visibility: Some(Visibility::Public),
            author_id: Some("a".into()),
            date_from_ms: Some(1),
            date_to_ms: Some(2),
        };
        let ctx = FilterContext::new(Some("v"), filters).with_text("rust");
        let preds = build(&ctx);
        assert_eq!(
            preds,
            vec![
                Predicate::TextMatch("rust".into()),
                Predicate::VisibleTo("v".into()),
                Predicate::KindIs(PublicationType::Article),
                Predicate::VisibilityIs(Visibility::Public),
                Predicate::AuthorIs("a".into()),
                Predicate::PublishedFrom(1),
                Predicate::PublishedTo(2),
            ]
        );
    }

    #[test]
    fn blank_author_and_text_are_omitted() {
        let filters = FeedFilters {
            author_id: Some("".into()),
            ..Default::default()
        };
        let ctx = FilterContext::new(None, filters).with_text("   ");
        assert_eq!(build(&ctx), vec![Predicate::VisibleToAnonymous]);
    }

    #[test]
    fn pinned_author_overrides_filter_author() {
        let filters = FeedFilters {
            author_id: Some("other".into()),
            ..Default::default()
        };
        let ctx = FilterContext::new(None, filters).pin_author("me");
        assert!(build(&ctx).contains(&Predicate::AuthorIs("me".into())));
        assert!(!build(&ctx).contains(&Predicate::AuthorIs("other".into())));
    }

    #[test]
    fn lowering_binds_values_in_predicate_order() {
        let filters = FeedFilters {
            kind: Some(PublicationType::Post),
            date_to_ms: Some(99),
            ..Default::default()
        };
        let ctx = FilterContext::new(Some("v"), filters).with_text("50%_off");
        let list = ClauseList::from_predicates("p", &build(&ctx));
        assert_eq!(
            list.values(),
            &[
                Value::Text("%50\\%\\_off%".into()),
                Value::Text("%50\\%\\_off%".into()),
                Value::Text("v".into()),
                Value::Text("post".into()),
                Value::Integer(99),
            ]
        );
        let sql = list.where_sql();
        assert!(sql.starts_with("WHERE (lower(coalesce(p.title"));
        assert_eq!(sql.matches('?').count(), list.values().len());
    }

    #[test]
    fn empty_list_renders_no_where() {
        assert_eq!(ClauseList::new().where_sql(), "");
    }
}
