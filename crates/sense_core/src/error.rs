/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Error kinds surfaced by the engine.
///
/// `NotFound` and the authorization kinds stay distinct so the delivery layer
/// can choose between 404 and 403. Storage failures are passed through
/// unmodified; nothing in the engine retries them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("caller is not the author of this {entity}")]
    NotAuthor { entity: &'static str },

    #[error("caller is not the owner of this {entity}")]
    NotOwner { entity: &'static str },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("media {media_id} not found or not owned by the author")]
    MediaNotOwned { media_id: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    Timeout,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool::unmanaged::PoolError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NotAuthor { .. } => "not_author",
            Self::NotOwner { .. } => "not_owner",
            Self::Validation(_) => "validation_error",
            Self::MediaNotOwned { .. } => "media_not_owned",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Storage(_) | Self::Pool(_) | Self::Join(_) => "storage_error",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
