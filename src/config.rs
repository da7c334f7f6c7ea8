use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::round::RoundConfig;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub guild_id: u64,
    pub music_text_channel: u64,
    pub music_voice_channel: u64,
    #[serde(default = "default_questions_file")]
    pub questions_file: PathBuf,
    #[serde(default = "default_leaderboard_file")]
    pub leaderboard_file: PathBuf,
    #[serde(default = "default_round_size")]
    pub round_size: usize,
    #[serde(default = "default_preview_secs")]
    pub preview_secs: u64,
    /// Zero means the answer window stays open until the preview finishes.
    #[serde(default)]
    pub answer_timeout_secs: u64,
    #[serde(default = "default_round_delay_secs")]
    pub round_delay_secs: u64,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: u8,
    #[serde(default = "default_true")]
    pub auto_repeat: bool,
    #[serde(default)]
    pub autostart: bool,
}

fn default_questions_file() -> PathBuf {
    PathBuf::from("songs.json")
}

fn default_leaderboard_file() -> PathBuf {
    PathBuf::from("leaderboard.json")
}

fn default_round_size() -> usize {
    10
}

fn default_preview_secs() -> u64 {
    12
}

fn default_round_delay_secs() -> u64 {
    30
}

fn default_match_threshold() -> u8 {
    85
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn round_config(&self) -> RoundConfig {
        RoundConfig {
            round_size: self.round_size,
            preview: Duration::from_secs(self.preview_secs),
            answer_timeout: Duration::from_secs(self.answer_timeout_secs),
            round_delay: Duration::from_secs(self.round_delay_secs),
            auto_repeat: self.auto_repeat,
            ..RoundConfig::default()
        }
    }
}

pub fn load() -> Result<Config, envy::Error> {
    envy::from_env::<Config>()
}
