/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod collab;
mod content;
pub mod config;
mod counters;
pub mod engagement;
pub mod error;
pub mod http_api;
pub mod predicate;
pub mod query;
pub mod runtime;
pub mod store;

pub use engagement::{Engine, EngineOptions, PageRequest};
pub use error::{EngineError, EngineResult};
pub use store::{OpContext, Store, StoreOptions};
