/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engagement::EngineOptions;
use crate::store::StoreOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind: String,
    pub db_path: String,
    pub pool_size: usize,
    pub busy_timeout_ms: u64,
    /// Per-request deadline; 0 disables it.
    pub op_timeout_ms: u64,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            db_path: "sense.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
            op_timeout_ms: 10_000,
            default_page_limit: 20,
            max_page_limit: 100,
        }
    }
}

impl ServiceConfig {
    /// Reads the JSON file when given, then applies `SENSE_*` overrides from
    /// the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("read config {}", p.display()))?;
                Self::from_json(&text).with_context(|| format!("parse config {}", p.display()))?
            }
            None => Self::default(),
        };
        Ok(base.with_overrides(|k| std::env::var(k).ok()).clamped())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Unparseable override values are ignored and the current value kept.
    pub fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let get = |k: &str| var(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(v) = get("SENSE_BIND") {
            self.bind = v;
        }
        if let Some(v) = get("SENSE_DB_PATH") {
            self.db_path = v;
        }
        if let Some(v) = get("SENSE_POOL_SIZE").and_then(|v| v.parse().ok()) {
            self.pool_size = v;
        }
        if let Some(v) = get("SENSE_BUSY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.busy_timeout_ms = v;
        }
        if let Some(v) = get("SENSE_OP_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.op_timeout_ms = v;
        }
        if let Some(v) = get("SENSE_DEFAULT_PAGE_LIMIT").and_then(|v| v.parse().ok()) {
            self.default_page_limit = v;
        }
        if let Some(v) = get("SENSE_MAX_PAGE_LIMIT").and_then(|v| v.parse().ok()) {
            self.max_page_limit = v;
        }
        self
    }

    pub fn clamped(mut self) -> Self {
        self.pool_size = self.pool_size.clamp(1, 64);
        self.busy_timeout_ms = self.busy_timeout_ms.clamp(100, 120_000);
        self.op_timeout_ms = self.op_timeout_ms.min(600_000);
        self.max_page_limit = self.max_page_limit.clamp(1, 1_000);
        self.default_page_limit = self.default_page_limit.clamp(1, self.max_page_limit);
        self
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid bind address {:?}", self.bind))
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            pool_size: self.pool_size,
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            default_page_limit: self.default_page_limit,
            max_page_limit: self.max_page_limit,
            op_timeout: (self.op_timeout_ms > 0).then(|| Duration::from_millis(self.op_timeout_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = ServiceConfig::from_json(r#"{"bind":"127.0.0.1:9000"}"#).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:9000");
        assert_eq!(cfg.pool_size, 8);
        assert_eq!(cfg.max_page_limit, 100);
        assert_eq!(cfg.bind_addr().unwrap().port(), 9000);
    }

    #[test]
    fn env_overrides_win_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("SENSE_DB_PATH", "/tmp/other.db"),
            ("SENSE_POOL_SIZE", "lots"),
            ("SENSE_MAX_PAGE_LIMIT", "50"),
            ("SENSE_OP_TIMEOUT_MS", "0"),
        ]
        .into_iter()
        .collect();
        let cfg = ServiceConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .clamped();
        assert_eq!(cfg.db_path, "/tmp/other.db");
        assert_eq!(cfg.pool_size, 8);
        assert_eq!(cfg.max_page_limit, 50);
        assert!(cfg.engine_options().op_timeout.is_none());
    }

    #[test]
    fn clamping_keeps_default_within_max() {
        let cfg = ServiceConfig {
            pool_size: 0,
            default_page_limit: 500,
            max_page_limit: 30,
            ..Default::default()
        }
        .clamped();
        assert_eq!(cfg.pool_size, 1);
        assert_eq!(cfg.default_page_limit, 30);
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let err = ServiceConfig::load(Some(Path::new("/nonexistent/sense.json"))).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }
}
