/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Collaborators the engine consults but does not own: media ownership and
//! the user directory. Store-backed implementations read the same database.

use crate::error::{EngineError, EngineResult};
use crate::store::{new_id, now_ms, OpContext, Store};
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sense_protocol::{MediaAsset, UserSummary};

#[async_trait]
pub trait MediaOwnership: Send + Sync {
    /// `false` when the media does not exist or belongs to someone else.
    async fn is_owned_by(&self, ctx: &OpContext, media_id: &str, user_id: &str) -> EngineResult<bool>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, ctx: &OpContext, user_id: &str) -> EngineResult<bool>;
}

#[derive(Clone)]
pub struct StoreMediaOwnership {
    store: Store,
}

impl StoreMediaOwnership {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MediaOwnership for StoreMediaOwnership {
    async fn is_owned_by(&self, ctx: &OpContext, media_id: &str, user_id: &str) -> EngineResult<bool> {
        let media_id = media_id.to_string();
        let user_id = user_id.to_string();
        self.store
            .run(ctx, move |conn| {
                Ok(media_owner(conn, &media_id)?.is_some_and(|owner| owner == user_id))
            })
            .await
    }
}

#[derive(Clone)]
pub struct StoreUserDirectory {
    store: Store,
}

impl StoreUserDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UserDirectory for StoreUserDirectory {
    async fn user_exists(&self, ctx: &OpContext, user_id: &str) -> EngineResult<bool> {
        let user_id = user_id.to_string();
        self.store
            .run(ctx, move |conn| {
                let found = conn
                    .query_row("SELECT 1 FROM users WHERE id = ?1", params![user_id], |_| Ok(()))
                    .optional()?;
                Ok(found.is_some())
            })
            .await
    }
}

pub(crate) fn media_owner(conn: &Connection, media_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT owner_id FROM media_assets WHERE id = ?1",
        params![media_id],
        |r| r.get(0),
    )
    .optional()
}

pub(crate) fn load_media(conn: &Connection, media_id: &str) -> rusqlite::Result<Option<MediaAsset>> {
    conn.query_row(
        "SELECT id, owner_id, mime, filename, created_at_ms FROM media_assets WHERE id = ?1",
        params![media_id],
        |r| {
            Ok(MediaAsset {
                id: r.get(0)?,
                owner_id: r.get(1)?,
                mime: r.get(2)?,
                filename: r.get(3)?,
                created_at_ms: r.get(4)?,
            })
        },
    )
    .optional()
}

pub(crate) fn insert_media(
    conn: &Connection,
    owner_id: &str,
    mime: &str,
    filename: Option<&str>,
) -> rusqlite::Result<MediaAsset> {
    let asset = MediaAsset {
        id: new_id(),
        owner_id: owner_id.to_string(),
        mime: mime.to_string(),
        filename: filename.map(str::to_string),
        created_at_ms: now_ms(),
    };
    conn.execute(
        "INSERT INTO media_assets(id, owner_id, mime, filename, created_at_ms) VALUES(?1, ?2, ?3, ?4, ?5)",
        params![asset.id, asset.owner_id, asset.mime, asset.filename, asset.created_at_ms],
    )?;
    Ok(asset)
}

/// Deletes a media row owned by `caller_id`. Publication links go with it.
pub(crate) fn delete_media(conn: &mut Connection, media_id: &str, caller_id: &str) -> EngineResult<()> {
    let tx = crate::store::write_tx(conn)?;
    match media_owner(&tx, media_id)? {
        None => return Err(EngineError::not_found("media")),
        Some(owner) if owner != caller_id => return Err(EngineError::NotOwner { entity: "media" }),
        Some(_) => {}
    }
    tx.execute("DELETE FROM publication_media WHERE media_id = ?1", params![media_id])?;
    tx.execute("DELETE FROM media_assets WHERE id = ?1", params![media_id])?;
    tx.commit()?;
    Ok(())
}

/// Registers a user in the directory. Returns `Validation` when the username
/// is taken by a different id; re-registering the same id is a no-op.
pub(crate) fn insert_user(conn: &Connection, user_id: &str, username: &str) -> EngineResult<UserSummary> {
    let res = conn.execute(
        "INSERT INTO users(id, username, registered_at_ms) VALUES(?1, ?2, ?3) ON CONFLICT(id) DO NOTHING",
        params![user_id, username, now_ms()],
    );
    match res {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(EngineError::validation(format!("username {username:?} is taken")));
        }
        Err(e) => return Err(e.into()),
    }
    let user = conn.query_row(
        "SELECT id, username, registered_at_ms FROM users WHERE id = ?1",
        params![user_id],
        |r| {
            Ok(UserSummary {
                id: r.get(0)?,
                username: r.get(1)?,
                registered_at_ms: r.get(2)?,
            })
        },
    )?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use tempfile::TempDir;

    async fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("collab.db"), StoreOptions::default())
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn media_ownership_checks_owner() {
        let (_dir, store) = store().await;
        let ctx = OpContext::background();
        let asset = store
            .run(&ctx, |c| Ok(insert_media(c, "alice", "image/png", Some("a.png"))?))
            .await
            .unwrap();
        let media = StoreMediaOwnership::new(store.clone());
        assert!(media.is_owned_by(&ctx, &asset.id, "alice").await.unwrap());
        assert!(!media.is_owned_by(&ctx, &asset.id, "bob").await.unwrap());
        assert!(!media.is_owned_by(&ctx, "missing", "alice").await.unwrap());

        let id = asset.id.clone();
        let loaded = store.run(&ctx, move |c| Ok(load_media(c, &id)?)).await.unwrap();
        assert_eq!(loaded, Some(asset));
    }

    #[tokio::test]
    async fn directory_sees_registered_users() {
        let (_dir, store) = store().await;
        let ctx = OpContext::background();
        store
            .run(&ctx, |c| insert_user(c, "u1", "alice"))
            .await
            .unwrap();
        let users = StoreUserDirectory::new(store.clone());
        assert!(users.user_exists(&ctx, "u1").await.unwrap());
        assert!(!users.user_exists(&ctx, "u2").await.unwrap());

        let err = store
            .run(&ctx, |c| insert_user(c, "u2", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
