/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Relationship rows and the denormalized counters that mirror them.
//!
//! Every function here mutates a relationship row and its counter inside one
//! `IMMEDIATE` transaction. Decrements clamp at zero. Counters only move when
//! a row was actually inserted or removed, so repeating an idempotent call
//! (save, follow, unsave, unfollow) never drifts them.

use crate::error::{EngineError, EngineResult};
use crate::store::{new_id, now_ms, publication_access, write_tx};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use sense_protocol::{Comment, ReconcileReport, ToggleOutcome};

/// Fails with `NotFound` unless the publication exists and `user_id` may see it.
fn require_visible(tx: &Transaction<'_>, publication_id: &str, user_id: &str) -> EngineResult<()> {
    match publication_access(tx, publication_id)? {
        Some((author, vis)) if vis.allows(&author, Some(user_id)) => Ok(()),
        _ => Err(EngineError::not_found("publication")),
    }
}

pub(crate) fn toggle_publication_like(
    conn: &mut Connection,
    publication_id: &str,
    user_id: &str,
) -> EngineResult<ToggleOutcome> {
    let tx = write_tx(conn)?;
    require_visible(&tx, publication_id, user_id)?;

    let exists = tx
        .query_row(
            "SELECT 1 FROM publication_likes WHERE user_id = ?1 AND publication_id = ?2",
            params![user_id, publication_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    if exists {
        tx.execute(
            "DELETE FROM publication_likes WHERE user_id = ?1 AND publication_id = ?2",
            params![user_id, publication_id],
        )?;
        tx.execute(
            "UPDATE publications SET likes_count = MAX(likes_count - 1, 0) WHERE id = ?1",
            params![publication_id],
        )?;
    } else {
        tx.execute(
            "INSERT INTO publication_likes(user_id, publication_id, created_at_ms) VALUES(?1, ?2, ?3)",
            params![user_id, publication_id, now_ms()],
        )?;
        tx.execute(
            "UPDATE publications SET likes_count = likes_count + 1 WHERE id = ?1",
            params![publication_id],
        )?;
    }
    // COMMIT stays the last statement; the count is read under the write lock.
    let count: i64 = tx.query_row(
        "SELECT likes_count FROM publications WHERE id = ?1",
        params![publication_id],
        |r| r.get(0),
    )?;
    tx.commit()?;
    Ok(ToggleOutcome {
        liked: !exists,
        count,
    })
}

pub(crate) fn toggle_comment_like(
    conn: &mut Connection,
    comment_id: &str,
    user_id: &str,
) -> EngineResult<ToggleOutcome> {
    let tx = write_tx(conn)?;
    let publication_id: String = tx
        .query_row(
            "SELECT publication_id FROM comments WHERE id = ?1",
            params![comment_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("comment"))?;
    if let Err(e) = require_visible(&tx, &publication_id, user_id) {
        return Err(if e.is_not_found() {
            EngineError::not_found("comment")
        } else {
            e
        });
    }

    let removed = tx.execute(
        "DELETE FROM comment_likes WHERE user_id = ?1 AND comment_id = ?2",
        params![user_id, comment_id],
    )?;
    if removed > 0 {
        tx.execute(
            "UPDATE comments SET likes_count = MAX(likes_count - 1, 0) WHERE id = ?1",
            params![comment_id],
        )?;
    } else {
        tx.execute(
            "INSERT INTO comment_likes(user_id, comment_id, created_at_ms) VALUES(?1, ?2, ?3)",
            params![user_id, comment_id, now_ms()],
        )?;
        tx.execute(
            "UPDATE comments SET likes_count = likes_count + 1 WHERE id = ?1",
            params![comment_id],
        )?;
    }
    let count: i64 = tx.query_row(
        "SELECT likes_count FROM comments WHERE id = ?1",
        params![comment_id],
        |r| r.get(0),
    )?;
    tx.commit()?;
    Ok(ToggleOutcome {
        liked: removed == 0,
        count,
    })
}

/// Upserts a saved item. Returns `true` when a new row was inserted; saving
/// again only replaces the note and keeps `added_at_ms`.
pub(crate) fn save(
    conn: &mut Connection,
    publication_id: &str,
    user_id: &str,
    note: Option<&str>,
) -> EngineResult<bool> {
    let tx = write_tx(conn)?;
    require_visible(&tx, publication_id, user_id)?;

    let already = tx
        .query_row(
            "SELECT 1 FROM saved_items WHERE user_id = ?1 AND publication_id = ?2",
            params![user_id, publication_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    tx.execute(
        r#"
        INSERT INTO saved_items(user_id, publication_id, note, added_at_ms)
        VALUES(?1, ?2, ?3, ?4)
        ON CONFLICT(user_id, publication_id) DO UPDATE SET note = excluded.note
        "#,
        params![user_id, publication_id, note, now_ms()],
    )?;
    if !already {
        tx.execute(
            "UPDATE publications SET saved_count = saved_count + 1 WHERE id = ?1",
            params![publication_id],
        )?;
    }
    tx.commit()?;
    Ok(!already)
}

/// Removes a saved item. Missing rows are a no-op; returns whether a row went away.
pub(crate) fn unsave(conn: &mut Connection, publication_id: &str, user_id: &str) -> EngineResult<bool> {
    let tx = write_tx(conn)?;
    let removed = tx.execute(
        "DELETE FROM saved_items WHERE user_id = ?1 AND publication_id = ?2",
        params![user_id, publication_id],
    )?;
    if removed > 0 {
        tx.execute(
            "UPDATE publications SET saved_count = MAX(saved_count - 1, 0) WHERE id = ?1",
            params![publication_id],
        )?;
    }
    tx.commit()?;
    Ok(removed > 0)
}

/// Records a follow edge. The target was already confirmed by the caller's
/// user directory; counters move only for users with a local row.
pub(crate) fn follow(conn: &mut Connection, follower_id: &str, following_id: &str) -> EngineResult<bool> {
    if follower_id == following_id {
        return Err(EngineError::validation("cannot follow yourself"));
    }
    let tx = write_tx(conn)?;
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO user_follows(follower_id, following_id, created_at_ms) VALUES(?1, ?2, ?3)",
        params![follower_id, following_id, now_ms()],
    )?;
    if inserted > 0 {
        tx.execute(
            "UPDATE users SET following_count = following_count + 1 WHERE id = ?1",
            params![follower_id],
        )?;
        tx.execute(
            "UPDATE users SET followers_count = followers_count + 1 WHERE id = ?1",
            params![following_id],
        )?;
    }
    tx.commit()?;
    Ok(inserted > 0)
}

pub(crate) fn unfollow(conn: &mut Connection, follower_id: &str, following_id: &str) -> EngineResult<bool> {
    let tx = write_tx(conn)?;
    let removed = tx.execute(
        "DELETE FROM user_follows WHERE follower_id = ?1 AND following_id = ?2",
        params![follower_id, following_id],
    )?;
    if removed > 0 {
        tx.execute(
            "UPDATE users SET following_count = MAX(following_count - 1, 0) WHERE id = ?1",
            params![follower_id],
        )?;
        tx.execute(
            "UPDATE users SET followers_count = MAX(followers_count - 1, 0) WHERE id = ?1",
            params![following_id],
        )?;
    }
    tx.commit()?;
    Ok(removed > 0)
}

/// Inserts a comment (or a reply when `parent_id` is set) and bumps the
/// publication's `comments_count`. Replies must target a top-level comment
/// of the same publication.
pub(crate) fn insert_comment(
    conn: &mut Connection,
    publication_id: &str,
    author_id: &str,
    text: &str,
    parent_id: Option<&str>,
) -> EngineResult<Comment> {
    let tx = write_tx(conn)?;
    require_visible(&tx, publication_id, author_id)?;

    if let Some(parent) = parent_id {
        let row: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT publication_id, parent_id FROM comments WHERE id = ?1",
                params![parent],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match row {
            None => return Err(EngineError::not_found("comment")),
            Some((pub_id, _)) if pub_id != publication_id => {
                return Err(EngineError::validation("parent comment belongs to another publication"))
            }
            Some((_, Some(_))) => {
                return Err(EngineError::validation("replies cannot be nested"))
            }
            Some(_) => {}
        }
    }

    let comment = Comment {
        id: new_id(),
        publication_id: publication_id.to_string(),
        parent_id: parent_id.map(str::to_string),
        author_id: author_id.to_string(),
        text: text.to_string(),
        created_at_ms: now_ms(),
        likes_count: 0,
    };
    tx.execute(
        r#"
        INSERT INTO comments(id, publication_id, parent_id, author_id, text, created_at_ms, likes_count)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, 0)
        "#,
        params![
            comment.id,
            comment.publication_id,
            comment.parent_id,
            comment.author_id,
            comment.text,
            comment.created_at_ms
        ],
    )?;
    tx.execute(
        "UPDATE publications SET comments_count = comments_count + 1 WHERE id = ?1",
        params![publication_id],
    )?;
    tx.commit()?;
    Ok(comment)
}

/// Deletes a comment authored by `caller_id`, along with its replies, and
/// subtracts every removed row from the publication's `comments_count`.
pub(crate) fn delete_comment(conn: &mut Connection, comment_id: &str, caller_id: &str) -> EngineResult<u64> {
    let tx = write_tx(conn)?;
    let (publication_id, author_id): (String, String) = tx
        .query_row(
            "SELECT publication_id, author_id FROM comments WHERE id = ?1",
            params![comment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("comment"))?;
    if author_id != caller_id {
        return Err(EngineError::NotAuthor { entity: "comment" });
    }

    let replies: i64 = tx.query_row(
        "SELECT COUNT(*) FROM comments WHERE parent_id = ?1",
        params![comment_id],
        |r| r.get(0),
    )?;
    tx.execute(
        "DELETE FROM comments WHERE parent_id = ?1",
        params![comment_id],
    )?;
    tx.execute("DELETE FROM comments WHERE id = ?1", params![comment_id])?;
    let removed = replies + 1;
    tx.execute(
        "UPDATE publications SET comments_count = MAX(comments_count - ?1, 0) WHERE id = ?2",
        params![removed, publication_id],
    )?;
    tx.commit()?;
    Ok(removed as u64)
}

/// Recomputes every counter from the relationship rows. Returns how many
/// rows of each table held a drifted value.
pub(crate) fn reconcile(conn: &mut Connection) -> EngineResult<ReconcileReport> {
    let tx = write_tx(conn)?;

    let publications_fixed = tx.execute(
        r#"
        WITH actual AS (
          SELECT p.id AS id,
            (SELECT COUNT(*) FROM publication_likes l WHERE l.publication_id = p.id) AS likes,
            (SELECT COUNT(*) FROM comments c WHERE c.publication_id = p.id) AS comments,
            (SELECT COUNT(*) FROM saved_items s WHERE s.publication_id = p.id) AS saves
          FROM publications p
        )
        UPDATE publications SET
          likes_count = (SELECT likes FROM actual WHERE actual.id = publications.id),
          comments_count = (SELECT comments FROM actual WHERE actual.id = publications.id),
          saved_count = (SELECT saves FROM actual WHERE actual.id = publications.id)
        WHERE EXISTS (
          SELECT 1 FROM actual
          WHERE actual.id = publications.id
            AND (actual.likes <> publications.likes_count
              OR actual.comments <> publications.comments_count
              OR actual.saves <> publications.saved_count)
        )
        "#,
        [],
    )?;

    let comments_fixed = tx.execute(
        r#"
        UPDATE comments SET
          likes_count = (SELECT COUNT(*) FROM comment_likes cl WHERE cl.comment_id = comments.id)
        WHERE likes_count <> (SELECT COUNT(*) FROM comment_likes cl WHERE cl.comment_id = comments.id)
        "#,
        [],
    )?;

    let users_fixed = tx.execute(
        r#"
        UPDATE users SET
          followers_count = (SELECT COUNT(*) FROM user_follows f WHERE f.following_id = users.id),
          following_count = (SELECT COUNT(*) FROM user_follows f WHERE f.follower_id = users.id)
        WHERE followers_count <> (SELECT COUNT(*) FROM user_follows f WHERE f.following_id = users.id)
           OR following_count <> (SELECT COUNT(*) FROM user_follows f WHERE f.follower_id = users.id)
        "#,
        [],
    )?;

    tx.commit()?;
    Ok(ReconcileReport {
        publications_fixed: publications_fixed as u64,
        comments_fixed: comments_fixed as u64,
        users_fixed: users_fixed as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SCHEMA;

    fn conn_with_schema() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn
    }

    fn seed_publication(conn: &Connection, id: &str, author: &str, visibility: &str) {
        conn.execute(
            "INSERT INTO publications(id, author_id, type, publication_date_ms, visibility) VALUES(?1, ?2, 'post', 1, ?3)",
            params![id, author, visibility],
        )
        .unwrap();
    }

    fn seed_user(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO users(id, username, registered_at_ms) VALUES(?1, ?1, 0)",
            params![id],
        )
        .unwrap();
    }

    fn counters(conn: &Connection, id: &str) -> (i64, i64, i64) {
        conn.query_row(
            "SELECT likes_count, comments_count, saved_count FROM publications WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap()
    }

    #[test]
    fn toggle_twice_restores_state() {
        let mut conn = conn_with_schema();
        seed_publication(&conn, "p", "a", "public");
        let on = toggle_publication_like(&mut conn, "p", "b").unwrap();
        assert_eq!(on, ToggleOutcome { liked: true, count: 1 });
        let off = toggle_publication_like(&mut conn, "p", "b").unwrap();
        assert_eq!(off, ToggleOutcome { liked: false, count: 0 });
        assert_eq!(counters(&conn, "p"), (0, 0, 0));
    }

    #[test]
    fn toggle_on_private_publication_of_someone_else_is_not_found() {
        let mut conn = conn_with_schema();
        seed_publication(&conn, "p", "a", "private");
        let err = toggle_publication_like(&mut conn, "p", "b").unwrap_err();
        assert!(err.is_not_found());
        assert!(toggle_publication_like(&mut conn, "p", "a").unwrap().liked);
    }

    #[test]
    fn decrement_clamps_at_zero() {
        let mut conn = conn_with_schema();
        seed_publication(&conn, "p", "a", "public");
        toggle_publication_like(&mut conn, "p", "b").unwrap();
        conn.execute("UPDATE publications SET likes_count = 0", []).unwrap();
        let off = toggle_publication_like(&mut conn, "p", "b").unwrap();
        assert_eq!(off.count, 0);
    }

    #[test]
    fn save_twice_counts_once_and_keeps_added_at() {
        let mut conn = conn_with_schema();
        seed_publication(&conn, "p", "a", "public");
        assert!(save(&mut conn, "p", "b", Some("first")).unwrap());
        let added: i64 = conn
            .query_row("SELECT added_at_ms FROM saved_items", [], |r| r.get(0))
            .unwrap();
        assert!(!save(&mut conn, "p", "b", Some("second")).unwrap());
        let (note, added_again): (String, i64) = conn
            .query_row("SELECT note, added_at_ms FROM saved_items", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(note, "second");
        assert_eq!(added, added_again);
        assert_eq!(counters(&conn, "p").2, 1);
    }

    #[test]
    fn unsave_of_unsaved_item_is_noop() {
        let mut conn = conn_with_schema();
        seed_publication(&conn, "p", "a", "public");
        assert!(!unsave(&mut conn, "p", "b").unwrap());
        assert_eq!(counters(&conn, "p").2, 0);
        save(&mut conn, "p", "b", None).unwrap();
        assert!(unsave(&mut conn, "p", "b").unwrap());
        assert!(!unsave(&mut conn, "p", "b").unwrap());
        assert_eq!(counters(&conn, "p").2, 0);
    }

    #[test]
    fn follow_moves_counters_once() {
        let mut conn = conn_with_schema();
        seed_user(&conn, "u1");
        seed_user(&conn, "u2");
        assert!(follow(&mut conn, "u1", "u2").unwrap());
        assert!(!follow(&mut conn, "u1", "u2").unwrap());
        let (followers, following): (i64, i64) = conn
            .query_row(
                "SELECT (SELECT followers_count FROM users WHERE id = 'u2'), (SELECT following_count FROM users WHERE id = 'u1')",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((followers, following), (1, 1));
        assert!(unfollow(&mut conn, "u1", "u2").unwrap());
        assert!(!unfollow(&mut conn, "u1", "u2").unwrap());
    }

    #[test]
    fn follow_rejects_self_but_accepts_users_without_local_row() {
        let mut conn = conn_with_schema();
        seed_user(&conn, "u1");
        assert!(matches!(
            follow(&mut conn, "u1", "u1").unwrap_err(),
            EngineError::Validation(_)
        ));
        assert!(follow(&mut conn, "u1", "remote").unwrap());
        let following: i64 = conn
            .query_row("SELECT following_count FROM users WHERE id = 'u1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(following, 1);
        assert!(unfollow(&mut conn, "u1", "remote").unwrap());
    }

    #[test]
    fn deleting_top_level_comment_subtracts_replies() {
        let mut conn = conn_with_schema();
        seed_publication(&conn, "p", "a", "public");
        let top = insert_comment(&mut conn, "p", "b", "hello", None).unwrap();
        insert_comment(&mut conn, "p", "c", "reply 1", Some(&top.id)).unwrap();
        insert_comment(&mut conn, "p", "a", "reply 2", Some(&top.id)).unwrap();
        assert_eq!(counters(&conn, "p").1, 3);

        let err = delete_comment(&mut conn, &top.id, "c").unwrap_err();
        assert!(matches!(err, EngineError::NotAuthor { .. }));

        assert_eq!(delete_comment(&mut conn, &top.id, "b").unwrap(), 3);
        assert_eq!(counters(&conn, "p").1, 0);
    }

    #[test]
    fn nested_reply_is_rejected() {
        let mut conn = conn_with_schema();
        seed_publication(&conn, "p", "a", "public");
        let top = insert_comment(&mut conn, "p", "b", "hello", None).unwrap();
        let reply = insert_comment(&mut conn, "p", "c", "reply", Some(&top.id)).unwrap();
        let err = insert_comment(&mut conn, "p", "d", "deeper", Some(&reply.id)).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn reconcile_repairs_drift() {
        let mut conn = conn_with_schema();
        seed_publication(&conn, "p", "a", "public");
        seed_user(&conn, "u1");
        seed_user(&conn, "u2");
        toggle_publication_like(&mut conn, "p", "b").unwrap();
        follow(&mut conn, "u1", "u2").unwrap();
        conn.execute("UPDATE publications SET likes_count = 7, saved_count = 2", [])
            .unwrap();
        conn.execute("UPDATE users SET followers_count = 4 WHERE id = 'u2'", [])
            .unwrap();

        let report = reconcile(&mut conn).unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                publications_fixed: 1,
                comments_fixed: 0,
                users_fixed: 1
            }
        );
        assert_eq!(counters(&conn, "p"), (1, 0, 0));
        assert_eq!(reconcile(&mut conn).unwrap(), ReconcileReport::default());
    }
}
