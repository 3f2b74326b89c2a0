/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Query composer: paged listings built from a [`ClauseList`].
//!
//! Each listing runs a COUNT and a SELECT sharing the same WHERE clause. The
//! two statements are not wrapped in a transaction, so a write landing between
//! them can make `total` and `items` disagree by that write.

use crate::predicate::ClauseList;
use crate::store::{read_publication, PUBLICATION_COLUMNS, PUBLICATION_COLUMN_COUNT};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use sense_protocol::{
    Comment, CommentView, Liker, Publication, PublicationView, SavedPublication, UserStats,
};
use std::collections::HashMap;

/// Already-clamped page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: u32,
    pub offset: u32,
}

impl PageWindow {
    fn values(self) -> [Value; 2] {
        [
            Value::Integer(i64::from(self.limit)),
            Value::Integer(i64::from(self.offset)),
        ]
    }
}

fn count(conn: &Connection, sql: &str, values: &[Value]) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(sql, params_from_iter(values.iter()), |r| r.get(0))?;
    Ok(n.max(0) as u64)
}

/// Publications matching `clauses` with the viewer's like/save flags.
pub(crate) fn publications(
    conn: &Connection,
    viewer: Option<&str>,
    clauses: &ClauseList,
    page: PageWindow,
) -> rusqlite::Result<(u64, Vec<PublicationView>)> {
    let where_sql = clauses.where_sql();
    let total = count(
        conn,
        &format!("SELECT COUNT(*) FROM publications p {where_sql}"),
        clauses.values(),
    )?;
    if total == 0 || u64::from(page.offset) >= total {
        return Ok((total, Vec::new()));
    }

    let mut values: Vec<Value> = Vec::with_capacity(clauses.values().len() + 4);
    let (flags, joins) = match viewer {
        Some(v) => {
            values.push(Value::Text(v.to_string()));
            values.push(Value::Text(v.to_string()));
            (
                "l.user_id IS NOT NULL, s.user_id IS NOT NULL",
                "LEFT JOIN publication_likes l ON l.publication_id = p.id AND l.user_id = ? \
                 LEFT JOIN saved_items s ON s.publication_id = p.id AND s.user_id = ?",
            )
        }
        None => ("0, 0", ""),
    };
    values.extend_from_slice(clauses.values());
    values.extend(page.values());

    let sql = format!(
        "SELECT {PUBLICATION_COLUMNS}, {flags} FROM publications p {joins} {where_sql} \
         ORDER BY p.publication_date_ms DESC, p.id DESC LIMIT ? OFFSET ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut items = stmt
        .query_map(params_from_iter(values.iter()), |r| {
            Ok(PublicationView {
                publication: read_publication(r, 0)?,
                is_liked: r.get(PUBLICATION_COLUMN_COUNT)?,
                is_saved: r.get(PUBLICATION_COLUMN_COUNT + 1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut pubs: Vec<&mut Publication> = items.iter_mut().map(|v| &mut v.publication).collect();
    attach_media(conn, &mut pubs)?;
    Ok((total, items))
}

/// A user's saved publications, most recently saved first. `clauses` must
/// already carry the visibility predicates for the saver.
pub(crate) fn saved(
    conn: &Connection,
    user_id: &str,
    clauses: &ClauseList,
    page: PageWindow,
) -> rusqlite::Result<(u64, Vec<SavedPublication>)> {
    let mut clauses = clauses.clone();
    clauses.push("s.user_id = ?", [Value::Text(user_id.to_string())]);
    let where_sql = clauses.where_sql();

    let total = count(
        conn,
        &format!(
            "SELECT COUNT(*) FROM saved_items s JOIN publications p ON p.id = s.publication_id {where_sql}"
        ),
        clauses.values(),
    )?;
    if total == 0 || u64::from(page.offset) >= total {
        return Ok((total, Vec::new()));
    }

    let mut values = vec![Value::Text(user_id.to_string())];
    values.extend_from_slice(clauses.values());
    values.extend(page.values());
    let sql = format!(
        "SELECT {PUBLICATION_COLUMNS}, s.note, s.added_at_ms, l.user_id IS NOT NULL \
         FROM saved_items s JOIN publications p ON p.id = s.publication_id \
         LEFT JOIN publication_likes l ON l.publication_id = p.id AND l.user_id = ? \
         {where_sql} ORDER BY s.added_at_ms DESC, p.id DESC LIMIT ? OFFSET ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let n = PUBLICATION_COLUMN_COUNT;
    let mut items = stmt
        .query_map(params_from_iter(values.iter()), |r| {
            Ok(SavedPublication {
                publication: read_publication(r, 0)?,
                saved_note: r.get(n)?,
                saved_at_ms: r.get(n + 1)?,
                is_liked: r.get(n + 2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut pubs: Vec<&mut Publication> = items.iter_mut().map(|v| &mut v.publication).collect();
    attach_media(conn, &mut pubs)?;
    Ok((total, items))
}

/// Fills `media_ids` for a page of publications with one `IN (...)` query.
fn attach_media(conn: &Connection, pubs: &mut [&mut Publication]) -> rusqlite::Result<()> {
    if pubs.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; pubs.len()].join(", ");
    let sql = format!(
        "SELECT publication_id, media_id FROM publication_media \
         WHERE publication_id IN ({placeholders}) ORDER BY publication_id, ord"
    );
    let ids: Vec<&str> = pubs.iter().map(|p| p.id.as_str()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let mut by_pub: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map(params_from_iter(ids.iter()), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (pub_id, media_id) = row?;
        by_pub.entry(pub_id).or_default().push(media_id);
    }
    for p in pubs.iter_mut() {
        if let Some(media) = by_pub.remove(&p.id) {
            p.media_ids = media;
        }
    }
    Ok(())
}

const COMMENT_COLUMNS: &str =
    "c.id, c.publication_id, c.parent_id, c.author_id, c.text, c.created_at_ms, c.likes_count";

fn read_comment(r: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: r.get(0)?,
        publication_id: r.get(1)?,
        parent_id: r.get(2)?,
        author_id: r.get(3)?,
        text: r.get(4)?,
        created_at_ms: r.get(5)?,
        likes_count: r.get(6)?,
    })
}

pub(crate) fn load_comment(conn: &Connection, comment_id: &str) -> rusqlite::Result<Option<Comment>> {
    conn.query_row(
        &format!("SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.id = ?1"),
        params![comment_id],
        read_comment,
    )
    .optional()
}

pub(crate) fn comment_view(
    conn: &Connection,
    comment_id: &str,
    viewer: Option<&str>,
) -> rusqlite::Result<Option<CommentView>> {
    conn.query_row(
        &format!(
            "SELECT {COMMENT_COLUMNS}, \
             (SELECT COUNT(*) FROM comments r WHERE r.parent_id = c.id), \
             EXISTS(SELECT 1 FROM comment_likes cl WHERE cl.comment_id = c.id AND cl.user_id = ?2) \
             FROM comments c WHERE c.id = ?1"
        ),
        params![comment_id, viewer],
        read_comment_view,
    )
    .optional()
}

fn read_comment_view(r: &Row<'_>) -> rusqlite::Result<CommentView> {
    Ok(CommentView {
        comment: read_comment(r)?,
        replies_count: r.get(7)?,
        is_liked: r.get(8)?,
    })
}

/// Comments of a publication, oldest first. `parent_id = None` lists
/// top-level comments; `Some(id)` lists the replies to that comment.
pub(crate) fn comments(
    conn: &Connection,
    publication_id: &str,
    parent_id: Option<&str>,
    viewer: Option<&str>,
    page: PageWindow,
) -> rusqlite::Result<(u64, Vec<CommentView>)> {
    let mut clauses = ClauseList::new();
    clauses.push("c.publication_id = ?", [Value::Text(publication_id.to_string())]);
    match parent_id {
        Some(parent) => clauses.push("c.parent_id = ?", [Value::Text(parent.to_string())]),
        None => clauses.push("c.parent_id IS NULL", []),
    }
    let where_sql = clauses.where_sql();

    let total = count(
        conn,
        &format!("SELECT COUNT(*) FROM comments c {where_sql}"),
        clauses.values(),
    )?;
    if total == 0 || u64::from(page.offset) >= total {
        return Ok((total, Vec::new()));
    }

    let mut values = vec![match viewer {
        Some(v) => Value::Text(v.to_string()),
        None => Value::Null,
    }];
    values.extend_from_slice(clauses.values());
    values.extend(page.values());
    let sql = format!(
        "SELECT {COMMENT_COLUMNS}, \
         (SELECT COUNT(*) FROM comments r WHERE r.parent_id = c.id), \
         EXISTS(SELECT 1 FROM comment_likes cl WHERE cl.comment_id = c.id AND cl.user_id = ?) \
         FROM comments c {where_sql} ORDER BY c.created_at_ms ASC, c.id ASC LIMIT ? OFFSET ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(values.iter()), read_comment_view)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((total, items))
}

/// Everyone who liked a publication, most recent like first. Likers without
/// a local profile are listed with no username.
pub(crate) fn liked_users(
    conn: &Connection,
    publication_id: &str,
    page: PageWindow,
) -> rusqlite::Result<(u64, Vec<Liker>)> {
    let total = count(
        conn,
        "SELECT COUNT(*) FROM publication_likes WHERE publication_id = ?",
        &[Value::Text(publication_id.to_string())],
    )?;
    if total == 0 || u64::from(page.offset) >= total {
        return Ok((total, Vec::new()));
    }
    let mut stmt = conn.prepare(
        "SELECT l.user_id, u.username, l.created_at_ms \
         FROM publication_likes l LEFT JOIN users u ON u.id = l.user_id \
         WHERE l.publication_id = ?1 \
         ORDER BY l.created_at_ms DESC, l.user_id ASC LIMIT ?2 OFFSET ?3",
    )?;
    let items = stmt
        .query_map(params![publication_id, page.limit, page.offset], |r| {
            Ok(Liker {
                user_id: r.get(0)?,
                username: r.get(1)?,
                liked_at_ms: r.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((total, items))
}

pub(crate) fn is_liked(conn: &Connection, publication_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM publication_likes WHERE publication_id = ?1 AND user_id = ?2)",
        params![publication_id, user_id],
        |r| r.get(0),
    )
}

pub(crate) fn is_saved(conn: &Connection, publication_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM saved_items WHERE publication_id = ?1 AND user_id = ?2)",
        params![publication_id, user_id],
        |r| r.get(0),
    )
}

pub(crate) fn is_following(conn: &Connection, follower_id: &str, following_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM user_follows WHERE follower_id = ?1 AND following_id = ?2)",
        params![follower_id, following_id],
        |r| r.get(0),
    )
}

/// `None` when the user is not registered.
pub(crate) fn user_stats(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<UserStats>> {
    conn.query_row(
        r#"
        SELECT
          (SELECT COUNT(*) FROM publications WHERE author_id = u.id),
          u.followers_count,
          u.following_count,
          (SELECT COALESCE(SUM(likes_count), 0) FROM publications WHERE author_id = u.id),
          (SELECT COALESCE(SUM(comments_count), 0) FROM publications WHERE author_id = u.id),
          (SELECT COUNT(*) FROM saved_items WHERE user_id = u.id)
        FROM users u WHERE u.id = ?1
        "#,
        params![user_id],
        |r| {
            Ok(UserStats {
                publications_count: r.get(0)?,
                followers_count: r.get(1)?,
                following_count: r.get(2)?,
                likes_received: r.get(3)?,
                comments_received: r.get(4)?,
                saved_count: r.get(5)?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{build, FilterContext};
    use crate::store::SCHEMA;
    use sense_protocol::FeedFilters;

    fn conn_with_rows() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        for (id, author, vis, date, title) in [
            ("p1", "a", "public", 100, "Rust tips"),
            ("p2", "a", "private", 200, "secret rust"),
            ("p3", "b", "community", 300, "community post"),
            ("p4", "b", "public", 300, "100% real_news"),
        ] {
            conn.execute(
                "INSERT INTO publications(id, author_id, type, title, publication_date_ms, visibility) VALUES(?1, ?2, 'post', ?3, ?4, ?5)",
                params![id, author, title, date, vis],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO media_assets(id, owner_id, mime, created_at_ms) VALUES('m1', 'a', 'image/png', 0), ('m2', 'a', 'image/png', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO publication_media(publication_id, media_id, ord) VALUES('p1', 'm2', 0), ('p1', 'm1', 1)",
            [],
        )
        .unwrap();
        conn
    }

    fn page(limit: u32, offset: u32) -> PageWindow {
        PageWindow { limit, offset }
    }

    fn feed(conn: &Connection, viewer: Option<&str>, text: Option<&str>, window: PageWindow) -> (u64, Vec<String>) {
        let mut ctx = FilterContext::new(viewer, FeedFilters::default());
        if let Some(t) = text {
            ctx = ctx.with_text(t);
        }
        let clauses = ClauseList::from_predicates("p", &build(&ctx));
        let (total, items) = publications(conn, viewer, &clauses, window).unwrap();
        (total, items.into_iter().map(|v| v.publication.id).collect())
    }

    #[test]
    fn orders_by_date_then_id_descending() {
        let conn = conn_with_rows();
        let (total, ids) = feed(&conn, Some("a"), None, page(10, 0));
        assert_eq!(total, 4);
        assert_eq!(ids, vec!["p4", "p3", "p2", "p1"]);
    }

    #[test]
    fn anonymous_feed_is_a_subset_of_signed_in_feed() {
        let conn = conn_with_rows();
        let (anon_total, anon) = feed(&conn, None, None, page(10, 0));
        let (_, signed) = feed(&conn, Some("c"), None, page(10, 0));
        assert_eq!(anon_total, 2);
        assert!(anon.iter().all(|id| signed.contains(id)));
        assert!(!signed.contains(&"p2".to_string()));
    }

    #[test]
    fn offset_past_total_keeps_true_total() {
        let conn = conn_with_rows();
        let (total, ids) = feed(&conn, None, None, page(10, 50));
        assert_eq!(total, 2);
        assert!(ids.is_empty());
    }

    #[test]
    fn search_is_case_insensitive_and_escapes_wildcards() {
        let conn = conn_with_rows();
        let (total, ids) = feed(&conn, Some("a"), Some("RUST"), page(10, 0));
        assert_eq!((total, ids), (2, vec!["p2".to_string(), "p1".to_string()]));
        let (total, ids) = feed(&conn, None, Some("0% real_"), page(10, 0));
        assert_eq!((total, ids), (1, vec!["p4".to_string()]));
        let (total, _) = feed(&conn, None, Some("_"), page(10, 0));
        assert_eq!(total, 1);
    }

    #[test]
    fn media_ids_follow_link_order() {
        let conn = conn_with_rows();
        let clauses = ClauseList::from_predicates("p", &build(&FilterContext::new(None, FeedFilters::default())));
        let (_, items) = publications(&conn, None, &clauses, page(10, 0)).unwrap();
        let p1 = items.iter().find(|v| v.publication.id == "p1").unwrap();
        assert_eq!(p1.publication.media_ids, vec!["m2", "m1"]);
    }

    #[test]
    fn viewer_flags_do_not_multiply_rows() {
        let conn = conn_with_rows();
        for user in ["a", "b", "c"] {
            conn.execute(
                "INSERT INTO publication_likes(user_id, publication_id, created_at_ms) VALUES(?1, 'p1', 0)",
                params![user],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO saved_items(user_id, publication_id, added_at_ms) VALUES('b', 'p1', 0)",
            [],
        )
        .unwrap();
        let clauses = ClauseList::from_predicates("p", &build(&FilterContext::new(Some("b"), FeedFilters::default())));
        let (total, items) = publications(&conn, Some("b"), &clauses, page(10, 0)).unwrap();
        assert_eq!(total as usize, items.len());
        let p1 = items.iter().find(|v| v.publication.id == "p1").unwrap();
        assert!(p1.is_liked && p1.is_saved);
    }
}
