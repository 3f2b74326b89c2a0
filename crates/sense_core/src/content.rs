/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Publication and comment rows written by their authors.

use crate::error::{EngineError, EngineResult};
use crate::query::load_comment;
use crate::store::{load_publication, new_id, now_ms, publication_access, write_tx};
use rusqlite::{params, Connection, Transaction};
use sense_protocol::{Comment, NewPublication, Publication, PublicationPatch};

fn link_media(tx: &Transaction<'_>, publication_id: &str, media_ids: &[String]) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO publication_media(publication_id, media_id, ord) VALUES(?1, ?2, ?3)",
    )?;
    for (ord, media_id) in media_ids.iter().enumerate() {
        stmt.execute(params![publication_id, media_id, ord as i64])?;
    }
    Ok(())
}

/// Fails unless the publication exists and was written by `caller_id`.
fn require_author(tx: &Transaction<'_>, publication_id: &str, caller_id: &str) -> EngineResult<()> {
    match publication_access(tx, publication_id)? {
        None => Err(EngineError::not_found("publication")),
        Some((author, _)) if author != caller_id => Err(EngineError::NotAuthor {
            entity: "publication",
        }),
        Some(_) => Ok(()),
    }
}

pub(crate) fn insert_publication(
    conn: &mut Connection,
    author_id: &str,
    req: &NewPublication,
) -> EngineResult<Publication> {
    let publication = Publication {
        id: new_id(),
        author_id: author_id.to_string(),
        kind: req.kind,
        title: req.title.clone(),
        content: req.content.clone(),
        source: req.source.clone(),
        publication_date_ms: now_ms(),
        visibility: req.visibility,
        likes_count: 0,
        comments_count: 0,
        saved_count: 0,
        media_ids: req.media_ids.clone(),
    };

    let tx = write_tx(conn)?;
    tx.execute(
        r#"
        INSERT INTO publications(id, author_id, type, title, content, source, publication_date_ms, visibility)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            publication.id,
            publication.author_id,
            publication.kind.as_str(),
            publication.title,
            publication.content,
            publication.source,
            publication.publication_date_ms,
            publication.visibility.as_str(),
        ],
    )?;
    link_media(&tx, &publication.id, &publication.media_ids)?;
    tx.commit()?;
    Ok(publication)
}

/// Applies the supplied fields only. Media links are replaced when
/// `patch.media_ids` is present and kept otherwise.
pub(crate) fn update_publication(
    conn: &mut Connection,
    publication_id: &str,
    caller_id: &str,
    patch: &PublicationPatch,
) -> EngineResult<Publication> {
    let tx = write_tx(conn)?;
    require_author(&tx, publication_id, caller_id)?;

    tx.execute(
        r#"
        UPDATE publications SET
          title = COALESCE(?2, title),
          content = COALESCE(?3, content),
          source = COALESCE(?4, source),
          visibility = COALESCE(?5, visibility)
        WHERE id = ?1
        "#,
        params![
            publication_id,
            patch.title,
            patch.content,
            patch.source,
            patch.visibility.map(|v| v.as_str()),
        ],
    )?;
    if let Some(media_ids) = &patch.media_ids {
        tx.execute(
            "DELETE FROM publication_media WHERE publication_id = ?1",
            params![publication_id],
        )?;
        link_media(&tx, publication_id, media_ids)?;
    }
    let updated = load_publication(&tx, publication_id)?
        .ok_or_else(|| EngineError::not_found("publication"))?;
    tx.commit()?;
    Ok(updated)
}

/// Deletes a publication; likes, saves, comments and media links cascade.
pub(crate) fn delete_publication(conn: &mut Connection, publication_id: &str, caller_id: &str) -> EngineResult<()> {
    let tx = write_tx(conn)?;
    require_author(&tx, publication_id, caller_id)?;
    tx.execute("DELETE FROM publications WHERE id = ?1", params![publication_id])?;
    tx.commit()?;
    Ok(())
}

pub(crate) fn update_comment(
    conn: &mut Connection,
    comment_id: &str,
    caller_id: &str,
    text: &str,
) -> EngineResult<Comment> {
    let tx = write_tx(conn)?;
    let mut comment = load_comment(&tx, comment_id)?.ok_or_else(|| EngineError::not_found("comment"))?;
    if comment.author_id != caller_id {
        return Err(EngineError::NotAuthor { entity: "comment" });
    }
    tx.execute(
        "UPDATE comments SET text = ?2 WHERE id = ?1",
        params![comment_id, text],
    )?;
    tx.commit()?;
    comment.text = text.to_string();
    Ok(comment)
}
