use std::fs;
use std::path::Path;

use serde::Deserialize;

/// One song/question unit. Loaded once from the questions file and never
/// mutated afterwards.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TriviaItem {
    pub question: String,
    pub answer: String,
    pub url: String,
}

impl TriviaItem {
    /// The first line of the question text doubles as the category shown in
    /// the round preview.
    pub fn category(&self) -> &str {
        self.question.lines().next().unwrap_or("").trim()
    }
}

/// Loads the question file. A missing or malformed file yields an empty list
/// so the bot can still come up and report the problem at round start.
pub fn load(path: &Path) -> Vec<TriviaItem> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!("could not read {}: {err}", path.display());
            return vec![];
        }
    };
    match serde_json::from_str::<Vec<TriviaItem>>(&text) {
        Ok(items) => {
            tracing::info!("Loaded {} music questions.", items.len());
            items
        }
        Err(err) => {
            tracing::error!("{} is not valid JSON: {err}", path.display());
            vec![]
        }
    }
}
