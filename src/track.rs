use std::time::Duration;

use poise::serenity_prelude::async_trait;
use songbird::input::{Compose, YoutubeDl};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("no playable audio for this item")]
    Unplayable,
    #[error("track lookup failed: {0}")]
    Lookup(String),
}

/// A resolved audio preview: the direct stream URL and the full track length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTrack {
    pub stream_url: String,
    pub duration: Duration,
}

/// Supplies playable audio for a trivia item's URL.
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<PreparedTrack, TrackError>;
}

/// Resolves page URLs through yt-dlp (via songbird) into a direct audio
/// stream URL plus duration.
pub struct YtDlSource {
    http: reqwest::Client,
}

impl YtDlSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TrackSource for YtDlSource {
    async fn resolve(&self, url: &str) -> Result<PreparedTrack, TrackError> {
        let mut source = YoutubeDl::new(self.http.clone(), url.to_string());
        let metadata = source
            .aux_metadata()
            .await
            .map_err(|err| TrackError::Lookup(err.to_string()))?;
        let duration = metadata.duration.ok_or(TrackError::Unplayable)?;
        let stream_url = metadata.source_url.ok_or(TrackError::Unplayable)?;
        Ok(PreparedTrack {
            stream_url,
            duration,
        })
    }
}
