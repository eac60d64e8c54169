//! Live status lookup for monitored rooms.
//!
//! A [`StatusClient`] answers one question per room: is it live right now,
//! and if so with which title and anchor. Errors mean "no new information"
//! and are never turned into a transition by the caller.

mod bilibili;

pub use bilibili::BilibiliClient;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::LiveObservation;

/// A failed status observation. The watcher skips the cycle and retries.
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Status request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Platform API returned code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Status request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("No status client for platform '{0}'")]
    UnsupportedPlatform(String),
}

/// Source of live observations for one platform.
#[async_trait]
pub trait StatusClient: Send + Sync {
    async fn live_status(&self, room_id: &str) -> Result<LiveObservation, StatusError>;
}

/// Status clients keyed by platform name.
#[derive(Clone, Default)]
pub struct StatusClients {
    clients: HashMap<String, Arc<dyn StatusClient>>,
}

impl StatusClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clients for every platform supported out of the box.
    pub fn with_defaults() -> Result<Self, StatusError> {
        let mut clients = Self::new();
        clients.register("bilibili", Arc::new(BilibiliClient::new()?));
        Ok(clients)
    }

    pub fn register(&mut self, platform: impl Into<String>, client: Arc<dyn StatusClient>) {
        self.clients.insert(platform.into(), client);
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn StatusClient>> {
        self.clients.get(platform).cloned()
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.clients.keys().cloned().collect();
        platforms.sort();
        platforms
    }
}
