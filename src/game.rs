use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use poise::serenity_prelude as serenity;
use songbird::Songbird;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::handler::ChannelAnnouncer;
use crate::judge::{self, Credit};
use crate::leaderboard::Leaderboard;
use crate::questions::TriviaItem;
use crate::round::{self, Announce, RoundContext, RoundState};
use crate::track::YtDlSource;
use crate::voice::SongbirdVoice;

/// Owns everything a quiz session needs across rounds: the question pool,
/// the shared round state, the leaderboard, and the handle to the round task
/// currently in flight (if any).
pub struct Game {
    pub config: Config,
    questions: Arc<Vec<TriviaItem>>,
    state: Arc<Mutex<RoundState>>,
    leaderboard: Arc<Mutex<Leaderboard>>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    http_client: reqwest::Client,
}

impl Game {
    pub fn new(config: Config, questions: Vec<TriviaItem>, leaderboard: Leaderboard) -> Self {
        Self {
            config,
            questions: Arc::new(questions),
            state: Arc::new(Mutex::new(RoundState::default())),
            leaderboard: Arc::new(Mutex::new(leaderboard)),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claims the single in-flight-round slot. `None` means a round is
    /// already running and the caller should do nothing.
    fn begin(&self) -> Option<CancellationToken> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(token.clone());
        Some(token)
    }

    fn finish(&self) {
        self.cancel.lock().unwrap().take();
        self.running.store(false, Ordering::SeqCst);
    }

    /// Spawns the round task. Returns false when a round is already in
    /// flight. A failed voice connection is reported and the round proceeds
    /// text-only.
    pub async fn start(
        self: &Arc<Self>,
        http: Arc<serenity::Http>,
        manager: Arc<Songbird>,
    ) -> bool {
        let Some(token) = self.begin() else {
            return false;
        };

        let chat = Arc::new(ChannelAnnouncer::new(
            http,
            serenity::ChannelId::new(self.config.music_text_channel),
        ));
        let source = Arc::new(YtDlSource::new(self.http_client.clone()));

        let guild = serenity::GuildId::new(self.config.guild_id);
        let voice_channel = serenity::ChannelId::new(self.config.music_voice_channel);
        let voice =
            match SongbirdVoice::connect(manager, guild, voice_channel, self.http_client.clone())
                .await
            {
                Ok(voice) => Some(Arc::new(voice)),
                Err(err) => {
                    tracing::warn!("could not connect to voice channel: {err}");
                    let _ = chat
                        .announce(
                            Some("Connection Error"),
                            &format!("⚠️ Could not connect to the voice channel: {err}"),
                        )
                        .await;
                    None
                }
            };

        let rc = RoundContext {
            source,
            chat,
            voice,
            state: self.state.clone(),
            leaderboard: self.leaderboard.clone(),
            questions: self.questions.clone(),
            cfg: self.config.round_config(),
        };
        let game = self.clone();
        tokio::spawn(async move {
            round::run_round_loop(rc, token).await;
            game.finish();
        });
        true
    }

    /// Cancels the in-flight round, if any. The window closes right away;
    /// the round task tears itself down at its next await point.
    pub fn stop(&self) -> bool {
        let token = self.cancel.lock().unwrap().take();
        match token {
            Some(token) => {
                token.cancel();
                self.state.lock().unwrap().reset();
                true
            }
            None => false,
        }
    }

    /// Entry point for the message event: scores one guess against the
    /// active item.
    pub fn judge_message(
        &self,
        author: serenity::UserId,
        display_name: &str,
        content: &str,
    ) -> Option<Credit> {
        let mut state = self.state.lock().unwrap();
        judge::judge_guess(
            &mut state,
            author,
            display_name,
            content,
            self.config.match_threshold,
        )
    }

    pub fn leaderboard_view(&self, limit: Option<usize>) -> Option<String> {
        self.leaderboard.lock().unwrap().render(limit)
    }
}
