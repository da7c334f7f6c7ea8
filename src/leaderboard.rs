use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use itertools::Itertools;

/// Discord caps messages at 2000 chars; leave room for the truncation marker.
const MESSAGE_BUDGET: usize = 1950;

/// Cumulative scores per player display name, persisted as a JSON object.
#[derive(Debug)]
pub struct Leaderboard {
    scores: BTreeMap<String, u64>,
    path: PathBuf,
}

impl Leaderboard {
    /// Loads the durable leaderboard. A missing or malformed file starts an
    /// empty board rather than failing startup.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let scores = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(scores) => scores,
                Err(err) => {
                    tracing::warn!(
                        "{} is not a valid leaderboard, starting fresh: {err}",
                        path.display()
                    );
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self { scores, path }
    }

    /// Adds each player's round total to their cumulative total.
    pub fn merge(&mut self, round_scores: &BTreeMap<String, u32>) {
        for (player, score) in round_scores {
            *self.scores.entry(player.clone()).or_insert(0) += u64::from(*score);
        }
    }

    /// Rewrites the durable file in full, via a sibling temp file and rename
    /// so a crash mid-write cannot corrupt the previous contents.
    pub fn persist(&self) -> anyhow::Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.scores)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn get(&self, player: &str) -> u64 {
        self.scores.get(player).copied().unwrap_or(0)
    }

    /// Rank-ordered view, highest first. The sort is stable, so equal scores
    /// keep the map's name order.
    pub fn render(&self, limit: Option<usize>) -> Option<String> {
        if self.scores.is_empty() {
            return None;
        }
        let mut output = self
            .scores
            .iter()
            .sorted_by(|a, b| b.1.cmp(a.1))
            .take(limit.unwrap_or(usize::MAX))
            .enumerate()
            .map(|(i, (name, score))| format!("**{}. {} ({} points)**", i + 1, name, score))
            .join("\n");

        if output.len() > MESSAGE_BUDGET {
            let mut cut = MESSAGE_BUDGET;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str("\n... (truncated)");
        }
        Some(output)
    }
}
