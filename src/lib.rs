use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod game;
pub mod handler;
pub mod judge;
pub mod leaderboard;
pub mod questions;
pub mod round;
pub mod track;
pub mod voice;

pub use config::Config;
pub use game::Game;
pub use leaderboard::Leaderboard;

pub struct Data {
    pub game: Arc<Game>,
}
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
