//! Bilibili live room status client.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{StatusClient, StatusError};
use crate::models::LiveObservation;

const LIVE_API_BASE: &str = "https://api.live.bilibili.com";
const SPACE_API_BASE: &str = "https://api.bilibili.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Envelope shared by the Bilibili JSON APIs.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct RoomInfo {
    #[serde(default)]
    live_status: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    uname: String,
    #[serde(default)]
    uid: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct UserInfo {
    #[serde(default)]
    name: String,
}

/// Status client for `live.bilibili.com` rooms.
pub struct BilibiliClient {
    http: reqwest::Client,
    live_base: String,
    space_base: String,
}

impl BilibiliClient {
    pub fn new() -> Result<Self, StatusError> {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, StatusError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            live_base: LIVE_API_BASE.to_string(),
            space_base: SPACE_API_BASE.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned + Default>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, StatusError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let body: ApiResponse<T> = response.json().await?;
        unwrap_envelope(body)
    }

    async fn user_name(&self, uid: u64) -> Result<String, StatusError> {
        let url = format!("{}/x/space/acc/info", self.space_base);
        let mid = uid.to_string();
        let user: UserInfo = self.get_json(&url, &[("mid", mid.as_str())]).await?;
        Ok(user.name)
    }
}

fn unwrap_envelope<T: Default>(body: ApiResponse<T>) -> Result<T, StatusError> {
    if body.code != 0 {
        return Err(StatusError::Api {
            code: body.code,
            message: body.message,
        });
    }
    Ok(body.data.unwrap_or_default())
}

fn observation_from(info: &RoomInfo, anchor_name: String) -> LiveObservation {
    LiveObservation {
        is_live: info.live_status == 1,
        title: info.title.clone(),
        anchor_name,
    }
}

#[async_trait]
impl StatusClient for BilibiliClient {
    async fn live_status(&self, room_id: &str) -> Result<LiveObservation, StatusError> {
        let url = format!("{}/room/v1/Room/get_info", self.live_base);
        let info: RoomInfo = self.get_json(&url, &[("room_id", room_id)]).await?;

        let mut anchor_name = info.uname.clone();
        if anchor_name.is_empty() {
            if let Some(uid) = info.uid {
                // Missing anchor name is cosmetic; keep the observation
                match self.user_name(uid).await {
                    Ok(name) => anchor_name = name,
                    Err(e) => tracing::debug!(room_id, uid, "Anchor name lookup failed: {}", e),
                }
            }
        }

        Ok(observation_from(&info, anchor_name))
    }
}
