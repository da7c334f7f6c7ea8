use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use poise::serenity_prelude::{self as serenity, async_trait};
use songbird::input::HttpRequest;
use songbird::tracks::TrackHandle;
use songbird::{Call, Songbird};
use tokio::time::sleep;

use crate::track::PreparedTrack;

const FADE_IN: Duration = Duration::from_secs(2);
const FADE_OUT: Duration = Duration::from_secs(3);
const FADE_STEP: Duration = Duration::from_millis(100);

/// The voice-channel side of a round: previews in, silence out.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Plays `length` seconds of the track starting at `offset`, fading in
    /// and out. Resolves when the preview is over.
    async fn play_preview(
        &self,
        track: &PreparedTrack,
        offset: Duration,
        length: Duration,
    ) -> anyhow::Result<()>;
    async fn stop(&self);
    fn is_playing(&self) -> bool;
    async fn disconnect(&self);
}

/// Songbird-backed voice session for one guild.
pub struct SongbirdVoice {
    manager: Arc<Songbird>,
    call: Arc<tokio::sync::Mutex<Call>>,
    guild: serenity::GuildId,
    http: reqwest::Client,
    playing: AtomicBool,
}

impl SongbirdVoice {
    pub async fn connect(
        manager: Arc<Songbird>,
        guild: serenity::GuildId,
        channel: serenity::ChannelId,
        http: reqwest::Client,
    ) -> anyhow::Result<Self> {
        let call = manager.join(guild, channel).await?;
        Ok(Self {
            manager,
            call,
            guild,
            http,
            playing: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl VoiceSession for SongbirdVoice {
    async fn play_preview(
        &self,
        track: &PreparedTrack,
        offset: Duration,
        length: Duration,
    ) -> anyhow::Result<()> {
        let request = HttpRequest::new(self.http.clone(), track.stream_url.clone());
        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(request.into())
        };
        self.playing.store(true, Ordering::SeqCst);
        let result = run_preview(&handle, offset, length).await;
        let _ = handle.stop();
        self.playing.store(false, Ordering::SeqCst);
        result
    }

    async fn stop(&self) {
        self.call.lock().await.stop();
        self.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if let Err(err) = self.manager.remove(self.guild).await {
            tracing::debug!("voice disconnect: {err}");
        }
    }
}

async fn run_preview(
    handle: &TrackHandle,
    offset: Duration,
    length: Duration,
) -> anyhow::Result<()> {
    handle.set_volume(0.0)?;
    if !offset.is_zero() {
        let _ = handle.seek(offset);
    }
    ramp(handle, 0.0, 1.0, FADE_IN).await?;
    sleep(length.saturating_sub(FADE_IN + FADE_OUT)).await;
    ramp(handle, 1.0, 0.0, FADE_OUT).await?;
    Ok(())
}

/// Steps the track volume linearly from `from` to `to` over `span`.
async fn ramp(handle: &TrackHandle, from: f32, to: f32, span: Duration) -> anyhow::Result<()> {
    let steps = (span.as_millis() / FADE_STEP.as_millis()).max(1) as u32;
    for step in 1..=steps {
        let progress = step as f32 / steps as f32;
        handle.set_volume(from + (to - from) * progress)?;
        sleep(FADE_STEP).await;
    }
    Ok(())
}
