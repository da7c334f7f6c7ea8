use poise::serenity_prelude as serenity;

use crate::round::RoundState;

/// Points for the first, second and third correct answer on an item. Its
/// length is also the per-item credit cap.
pub const POINT_SCHEDULE: [u32; 3] = [15, 10, 5];

/// Credit awarded for an accepted answer. `rank` is zero-based acceptance
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credit {
    pub points: u32,
    pub rank: usize,
}

/// Normalized similarity between a guess and the canonical answer on a 0-100
/// scale. Both sides are trimmed and lower-cased first.
pub fn similarity(guess: &str, answer: &str) -> u8 {
    let guess = guess.trim().to_lowercase();
    let answer = answer.trim().to_lowercase();
    (strsim::normalized_levenshtein(&guess, &answer) * 100.0).round() as u8
}

/// Scores one incoming guess against the active item.
///
/// Returns `None` when the guess earns nothing: no active item, window
/// closed, sender already credited this item, credit cap reached, or the
/// guess is below the threshold. On acceptance the sender's round score and
/// the ranked credit list are updated and the sender becomes ineligible for
/// further credit on this item.
pub fn judge_guess(
    state: &mut RoundState,
    author: serenity::UserId,
    display_name: &str,
    content: &str,
    threshold: u8,
) -> Option<Credit> {
    if !state.accepting_answers {
        return None;
    }
    let answer = state.active.as_ref()?.item.answer.clone();
    if state.respondents.contains(&author) {
        return None;
    }
    if state.credited.len() >= POINT_SCHEDULE.len() {
        return None;
    }
    if similarity(content, &answer) < threshold {
        return None;
    }

    state.respondents.insert(author);
    let rank = state.credited.len();
    let points = POINT_SCHEDULE[rank];
    state.credited.push((display_name.to_string(), points));
    *state
        .round_scores
        .entry(display_name.to_string())
        .or_insert(0) += points;

    Some(Credit { points, rank })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::TriviaItem;
    use crate::round::PreparedItem;

    fn accepting_state(answer: &str) -> RoundState {
        let mut state = RoundState::default();
        state.begin_item(PreparedItem {
            item: TriviaItem {
                question: "70s Rock\nName this song.".into(),
                answer: answer.into(),
                url: "https://example.com".into(),
            },
            track: None,
        });
        state.open_window();
        state
    }

    fn uid(n: u64) -> serenity::UserId {
        serenity::UserId::new(n)
    }

    #[test]
    fn similarity_tolerates_minor_misspellings() {
        assert_eq!(similarity("Bohemian Rhapsody", "Bohemian Rhapsody"), 100);
        assert!(similarity("bohemian rapsody", "Bohemian Rhapsody") >= 85);
        assert!(similarity("  BOHEMIAN RHAPSODY  ", "Bohemian Rhapsody") == 100);
        assert!(similarity("no idea", "Bohemian Rhapsody") < 85);
    }

    #[test]
    fn first_three_correct_answers_earn_descending_points() {
        let mut state = accepting_state("Bohemian Rhapsody");

        let a = judge_guess(&mut state, uid(1), "alice", "bohemian rapsody", 85).unwrap();
        assert_eq!((a.points, a.rank), (15, 0));

        let b = judge_guess(&mut state, uid(2), "bob", "Bohemian Rhapsody", 85).unwrap();
        assert_eq!((b.points, b.rank), (10, 1));

        assert!(judge_guess(&mut state, uid(3), "carol", "no idea", 85).is_none());

        assert_eq!(
            state.credited,
            vec![("alice".to_string(), 15), ("bob".to_string(), 10)]
        );
        assert_eq!(state.round_scores.get("alice"), Some(&15));
        assert_eq!(state.round_scores.get("bob"), Some(&10));
        assert_eq!(state.round_scores.get("carol"), None);
    }

    #[test]
    fn credited_player_cannot_score_twice_on_one_item() {
        let mut state = accepting_state("Take On Me");
        assert!(judge_guess(&mut state, uid(1), "alice", "take on me", 85).is_some());
        assert!(judge_guess(&mut state, uid(1), "alice", "take on me", 85).is_none());
        assert_eq!(state.round_scores.get("alice"), Some(&15));
        assert_eq!(state.credited.len(), 1);
    }

    #[test]
    fn credit_cap_is_three() {
        let mut state = accepting_state("Take On Me");
        for n in 1..=3 {
            assert!(judge_guess(&mut state, uid(n), &format!("p{n}"), "take on me", 85).is_some());
        }
        assert!(judge_guess(&mut state, uid(4), "p4", "take on me", 85).is_none());
        assert_eq!(
            state.credited.iter().map(|(_, pts)| *pts).collect::<Vec<_>>(),
            vec![15, 10, 5]
        );
    }

    #[test]
    fn closed_window_awards_nothing() {
        let mut state = accepting_state("Take On Me");
        state.close_window();
        assert!(judge_guess(&mut state, uid(1), "alice", "take on me", 85).is_none());
    }

    #[test]
    fn no_active_item_awards_nothing() {
        let mut state = RoundState::default();
        state.accepting_answers = true;
        assert!(judge_guess(&mut state, uid(1), "alice", "anything", 85).is_none());
    }

    #[test]
    fn wrong_guess_does_not_block_a_later_correct_one() {
        let mut state = accepting_state("Take On Me");
        assert!(judge_guess(&mut state, uid(1), "alice", "africa", 85).is_none());
        let credit = judge_guess(&mut state, uid(1), "alice", "take on me", 85).unwrap();
        assert_eq!(credit.points, 15);
    }
}
