use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use itertools::Itertools;
use poise::serenity_prelude::{async_trait, UserId};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::leaderboard::Leaderboard;
use crate::questions::TriviaItem;
use crate::track::{PreparedTrack, TrackSource};
use crate::voice::VoiceSession;

/// How many replacement candidates to try before presenting an item without
/// audio.
pub const MAX_RESOLVE_ATTEMPTS: usize = 5;

/// Posts round announcements to the channel members watch.
#[async_trait]
pub trait Announce: Send + Sync {
    async fn announce(&self, title: Option<&str>, body: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    RoundStarting,
    PresentingItem,
    AcceptingAnswers,
    ItemResolved,
    RoundEnding,
}

/// An item ready for presentation. `track` is `None` when no playable audio
/// could be resolved and the item runs text-only.
#[derive(Debug, Clone)]
pub struct PreparedItem {
    pub item: TriviaItem,
    pub track: Option<PreparedTrack>,
}

/// Everything announced when an item's answer window closes.
#[derive(Debug)]
pub struct ItemReport {
    pub answer: String,
    pub credited: Vec<(String, u32)>,
}

/// Mutable state for the round in progress. Only the orchestrator task and
/// the judge touch it, always through the surrounding mutex and never across
/// an await point.
#[derive(Debug, Default)]
pub struct RoundState {
    pub phase: Phase,
    pub active: Option<PreparedItem>,
    pub accepting_answers: bool,
    pub respondents: HashSet<UserId>,
    pub credited: Vec<(String, u32)>,
    pub round_scores: BTreeMap<String, u32>,
}

impl RoundState {
    /// Installs the next item and clears the per-item bookkeeping. The answer
    /// window stays closed until [`open_window`](Self::open_window).
    pub fn begin_item(&mut self, item: PreparedItem) {
        self.phase = Phase::PresentingItem;
        self.active = Some(item);
        self.accepting_answers = false;
        self.respondents.clear();
        self.credited.clear();
    }

    pub fn open_window(&mut self) {
        self.phase = Phase::AcceptingAnswers;
        self.accepting_answers = true;
    }

    /// Closes the window and hands back the ranked results for the item.
    pub fn close_window(&mut self) -> ItemReport {
        self.accepting_answers = false;
        self.phase = Phase::ItemResolved;
        let answer = self
            .active
            .take()
            .map(|prepared| prepared.item.answer)
            .unwrap_or_default();
        ItemReport {
            answer,
            credited: std::mem::take(&mut self.credited),
        }
    }

    pub fn take_round_scores(&mut self) -> BTreeMap<String, u32> {
        std::mem::take(&mut self.round_scores)
    }

    pub fn reset(&mut self) {
        *self = RoundState::default();
    }
}

#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub round_size: usize,
    pub preview: Duration,
    /// Zero gates the answer window on playback completion; anything else is
    /// a strict timer with playback fire-and-forget.
    pub answer_timeout: Duration,
    pub round_delay: Duration,
    pub lead_in: Duration,
    pub between_items: Duration,
    pub auto_repeat: bool,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            round_size: 10,
            preview: Duration::from_secs(12),
            answer_timeout: Duration::ZERO,
            round_delay: Duration::from_secs(30),
            lead_in: Duration::from_secs(7),
            between_items: Duration::from_secs(7),
            auto_repeat: true,
        }
    }
}

/// Shared handles the round task works with. Everything is behind an `Arc`
/// so the judge and the commands see the same state.
#[derive(Clone)]
pub struct RoundContext<S, A, V> {
    pub source: Arc<S>,
    pub chat: Arc<A>,
    pub voice: Option<Arc<V>>,
    pub state: Arc<Mutex<RoundState>>,
    pub leaderboard: Arc<Mutex<Leaderboard>>,
    pub questions: Arc<Vec<TriviaItem>>,
    pub cfg: RoundConfig,
}

/// Drives rounds until cancelled or, without auto-repeat, for a single
/// round. Cancellation may land on any await point; the cleanup below always
/// leaves the state idle with the window closed.
pub async fn run_round_loop<S, A, V>(rc: RoundContext<S, A, V>, cancel: CancellationToken)
where
    S: TrackSource + 'static,
    A: Announce + 'static,
    V: VoiceSession + 'static,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = run_single_round(&rc) => {
                if let Err(err) = result {
                    tracing::error!("round aborted: {err}");
                    break;
                }
            }
        }
        if !rc.cfg.auto_repeat {
            break;
        }
        let _ = rc
            .chat
            .announce(
                Some("⏳ Waiting"),
                &format!(
                    "Next round starts in {} seconds…",
                    rc.cfg.round_delay.as_secs()
                ),
            )
            .await;
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(rc.cfg.round_delay) => {}
        }
    }

    if let Some(voice) = &rc.voice {
        if voice.is_playing() {
            voice.stop().await;
        }
        voice.disconnect().await;
    }
    rc.state.lock().unwrap().reset();
}

async fn run_single_round<S, A, V>(rc: &RoundContext<S, A, V>) -> anyhow::Result<()>
where
    S: TrackSource,
    A: Announce,
    V: VoiceSession + 'static,
{
    rc.state.lock().unwrap().phase = Phase::RoundStarting;
    tracing::info!("starting a new round");

    let items = prepare_items(
        rc.source.as_ref(),
        &rc.questions,
        rc.cfg.round_size,
        rc.cfg.preview,
    )
    .await;
    if items.is_empty() {
        rc.chat
            .announce(
                Some("🧐 Quiz Starting!"),
                "No questions are available, cannot start a round.",
            )
            .await?;
        rc.state.lock().unwrap().reset();
        return Ok(());
    }

    let categories = items.iter().map(|p| p.item.category()).join("\n");
    rc.chat
        .announce(Some("🎯 Next Round Preview"), &categories)
        .await?;
    rc.chat
        .announce(
            Some("🧐 Quiz Starting!"),
            &format!(
                "New round about to begin... ⏱️ {} new questions!\n\n\
                 **Make sure you are connected to the voice channel to hear the songs** 🎵",
                items.len()
            ),
        )
        .await?;
    sleep(rc.cfg.lead_in).await;

    for (index, prepared) in items.into_iter().enumerate() {
        present_item(rc, index + 1, prepared).await?;
        sleep(rc.cfg.between_items).await;
    }

    finish_round(rc).await
}

async fn present_item<S, A, V>(
    rc: &RoundContext<S, A, V>,
    number: usize,
    prepared: PreparedItem,
) -> anyhow::Result<()>
where
    S: TrackSource,
    A: Announce,
    V: VoiceSession + 'static,
{
    let question = prepared.item.question.clone();
    let track = prepared.track.clone();

    rc.state.lock().unwrap().begin_item(prepared);
    rc.chat
        .announce(None, &format!("**Question {number}:**\n{question}"))
        .await?;

    rc.state.lock().unwrap().open_window();
    answer_window(rc, track.as_ref()).await;
    let report = rc.state.lock().unwrap().close_window();

    if report.credited.is_empty() {
        rc.chat
            .announce(
                Some("⏰ Time's Up!"),
                &format!("No one got it! Correct answer: **{}**", report.answer),
            )
            .await?;
    } else {
        let results = report
            .credited
            .iter()
            .enumerate()
            .map(|(i, (player, points))| format!("{}. {} (+{} pts)", i + 1, player, points))
            .join("\n");
        rc.chat
            .announce(
                Some("✅ Results"),
                &format!("Correct answer: **{}**\n\n{}", report.answer, results),
            )
            .await?;

        let standings = {
            let state = rc.state.lock().unwrap();
            state
                .round_scores
                .iter()
                .sorted_by(|a, b| b.1.cmp(a.1))
                .enumerate()
                .map(|(i, (name, score))| format!("{}. {} (+{})", i + 1, name, score))
                .join("\n")
        };
        rc.chat.announce(Some("📊 Round Scores"), &standings).await?;
    }
    Ok(())
}

/// Keeps the answer window open for the active item. With a zero timeout the
/// window follows preview playback; otherwise it is a fixed timer and the
/// preview plays alongside it.
async fn answer_window<S, A, V>(rc: &RoundContext<S, A, V>, track: Option<&PreparedTrack>)
where
    S: TrackSource,
    A: Announce,
    V: VoiceSession + 'static,
{
    let preview = rc.cfg.preview;
    let timeout = rc.cfg.answer_timeout;

    match (&rc.voice, track) {
        (Some(voice), Some(track)) => {
            let offset = preview_offset(track.duration, preview);
            if timeout.is_zero() {
                let started = Instant::now();
                if let Err(err) = voice.play_preview(track, offset, preview).await {
                    tracing::warn!("preview playback failed: {err}");
                    sleep(preview.saturating_sub(started.elapsed())).await;
                }
            } else {
                let voice = voice.clone();
                let track = track.clone();
                tokio::spawn(async move {
                    if let Err(err) = voice.play_preview(&track, offset, preview).await {
                        tracing::warn!("preview playback failed: {err}");
                    }
                });
                sleep(timeout).await;
            }
        }
        _ => {
            sleep(if timeout.is_zero() { preview } else { timeout }).await;
        }
    }
}

/// Where in the track the preview starts: 20% in, clamped so the preview
/// still fits before the end.
pub fn preview_offset(duration: Duration, preview: Duration) -> Duration {
    duration.mul_f64(0.2).min(duration.saturating_sub(preview))
}

async fn finish_round<S, A, V>(rc: &RoundContext<S, A, V>) -> anyhow::Result<()>
where
    S: TrackSource,
    A: Announce,
    V: VoiceSession,
{
    let round_scores = {
        let mut state = rc.state.lock().unwrap();
        state.phase = Phase::RoundEnding;
        state.take_round_scores()
    };

    let top = round_scores.values().copied().max().unwrap_or(0);
    if top > 0 {
        let winners = round_scores
            .iter()
            .filter(|(_, score)| **score == top)
            .map(|(name, _)| name.as_str())
            .join(", ");
        rc.chat
            .announce(
                Some("🏁 Round Over!"),
                &format!("Winner: {winners} ({top} points)"),
            )
            .await?;
    } else {
        rc.chat
            .announce(Some("🏁 Round Over!"), "No winners this round.")
            .await?;
    }

    let rendered = {
        let mut leaderboard = rc.leaderboard.lock().unwrap();
        leaderboard.merge(&round_scores);
        if let Err(err) = leaderboard.persist() {
            tracing::error!("could not persist leaderboard: {err}");
        }
        leaderboard.render(None)
    };
    match rendered {
        Some(rows) => rc.chat.announce(Some("🏆 Leaderboard 🏆"), &rows).await?,
        None => {
            rc.chat
                .announce(Some("Leaderboard"), "Nobody has scored yet.")
                .await?
        }
    }

    rc.state.lock().unwrap().reset();
    Ok(())
}

/// Samples `round_size` items without replacement and resolves audio for
/// each, swapping in random unused candidates for unplayable ones. A track
/// must be longer than the preview to count. After the attempt budget, or
/// with the pool dry, the originally sampled item runs text-only.
pub async fn prepare_items<S>(
    source: &S,
    questions: &[TriviaItem],
    round_size: usize,
    preview: Duration,
) -> Vec<PreparedItem>
where
    S: TrackSource + ?Sized,
{
    let sampled: Vec<TriviaItem> = {
        let mut rng = rand::thread_rng();
        questions
            .choose_multiple(&mut rng, round_size.min(questions.len()))
            .cloned()
            .collect()
    };
    let mut pool: Vec<TriviaItem> = questions
        .iter()
        .filter(|q| !sampled.contains(q))
        .cloned()
        .collect();

    let mut prepared = Vec::with_capacity(sampled.len());
    for item in sampled {
        let mut candidate = item.clone();
        let mut attempts = 0;
        loop {
            match source.resolve(&candidate.url).await {
                Ok(track) if track.duration > preview => {
                    prepared.push(PreparedItem {
                        item: candidate,
                        track: Some(track),
                    });
                    break;
                }
                other => {
                    if let Err(err) = other {
                        tracing::debug!("resolve failed for {}: {err}", candidate.url);
                    }
                    attempts += 1;
                    if attempts >= MAX_RESOLVE_ATTEMPTS || pool.is_empty() {
                        tracing::warn!(
                            "no playable audio for \"{}\", presenting text-only",
                            item.answer
                        );
                        prepared.push(PreparedItem { item, track: None });
                        break;
                    }
                    let index = rand::thread_rng().gen_range(0..pool.len());
                    candidate = pool.swap_remove(index);
                }
            }
        }
    }
    prepared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::judge_guess;
    use crate::track::TrackError;
    use std::collections::HashSet as StdHashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        fail: StdHashSet<String>,
        duration: Duration,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(fail: &[&str], duration: Duration) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                duration,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_everything() -> Self {
            Self {
                fail: StdHashSet::new(),
                duration: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TrackSource for FakeSource {
        async fn resolve(&self, url: &str) -> Result<PreparedTrack, TrackError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.contains(url) || self.duration.is_zero() {
                Err(TrackError::Unplayable)
            } else {
                Ok(PreparedTrack {
                    stream_url: format!("{url}/stream"),
                    duration: self.duration,
                })
            }
        }
    }

    #[derive(Default)]
    struct FakeChat {
        sent: Mutex<Vec<(Option<String>, String)>>,
    }

    impl FakeChat {
        fn titles(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(title, _)| title.clone())
                .collect()
        }

        fn bodies(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, body)| body.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Announce for FakeChat {
        async fn announce(&self, title: Option<&str>, body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((title.map(str::to_string), body.to_string()));
            Ok(())
        }
    }

    struct NullVoice;

    #[async_trait]
    impl VoiceSession for NullVoice {
        async fn play_preview(
            &self,
            _track: &PreparedTrack,
            _offset: Duration,
            _length: Duration,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) {}
        fn is_playing(&self) -> bool {
            false
        }
        async fn disconnect(&self) {}
    }

    fn item(answer: &str, url: &str) -> TriviaItem {
        TriviaItem {
            question: format!("Some Category\nGuess: {answer}"),
            answer: answer.to_string(),
            url: url.to_string(),
        }
    }

    fn test_context(
        questions: Vec<TriviaItem>,
        source: FakeSource,
        dir: &tempfile::TempDir,
        cfg: RoundConfig,
    ) -> RoundContext<FakeSource, FakeChat, NullVoice> {
        RoundContext {
            source: Arc::new(source),
            chat: Arc::new(FakeChat::default()),
            voice: None,
            state: Arc::new(Mutex::new(RoundState::default())),
            leaderboard: Arc::new(Mutex::new(Leaderboard::load(
                dir.path().join("leaderboard.json"),
            ))),
            questions: Arc::new(questions),
            cfg,
        }
    }

    fn quick_config() -> RoundConfig {
        RoundConfig {
            round_size: 2,
            preview: Duration::from_secs(2),
            answer_timeout: Duration::ZERO,
            round_delay: Duration::from_secs(5),
            lead_in: Duration::from_secs(1),
            between_items: Duration::from_secs(1),
            auto_repeat: false,
        }
    }

    async fn wait_until<F>(state: &Arc<Mutex<RoundState>>, what: &str, check: F)
    where
        F: Fn(&RoundState) -> bool,
    {
        for _ in 0..100_000 {
            if check(&state.lock().unwrap()) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("never reached: {what}");
    }

    #[test]
    fn preview_offset_starts_a_fifth_in() {
        assert_eq!(
            preview_offset(Duration::from_secs(100), Duration::from_secs(12)),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn preview_offset_is_clamped_near_the_end() {
        // 20% of 13s is past the last spot a 12s preview can start from.
        assert_eq!(
            preview_offset(Duration::from_secs(13), Duration::from_secs(12)),
            Duration::from_secs(1)
        );
        assert_eq!(
            preview_offset(Duration::from_secs(5), Duration::from_secs(12)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn prepare_items_substitutes_unplayable_items() {
        let questions = vec![
            item("A", "bad-1"),
            item("B", "bad-2"),
            item("C", "good-1"),
            item("D", "good-2"),
        ];
        let source = FakeSource::new(&["bad-1", "bad-2"], Duration::from_secs(180));

        let prepared = prepare_items(&source, &questions, 2, Duration::from_secs(12)).await;
        assert_eq!(prepared.len(), 2);
        for p in &prepared {
            let track = p.track.as_ref().expect("replacements were available");
            assert!(track.stream_url.starts_with("good-"));
        }
    }

    #[tokio::test]
    async fn prepare_items_falls_back_to_text_only_when_nothing_plays() {
        let questions = vec![item("A", "u1"), item("B", "u2")];
        let source = FakeSource::failing_everything();

        let prepared = prepare_items(&source, &questions, 2, Duration::from_secs(12)).await;
        assert_eq!(prepared.len(), 2);
        assert!(prepared.iter().all(|p| p.track.is_none()));
    }

    #[tokio::test]
    async fn prepare_items_respects_the_attempt_budget() {
        let questions: Vec<TriviaItem> =
            (0..20).map(|i| item(&format!("S{i}"), &format!("u{i}"))).collect();
        let source = FakeSource::failing_everything();

        let prepared = prepare_items(&source, &questions, 1, Duration::from_secs(12)).await;
        assert_eq!(prepared.len(), 1);
        assert!(prepared[0].track.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), MAX_RESOLVE_ATTEMPTS);
    }

    #[tokio::test]
    async fn prepare_items_rejects_tracks_shorter_than_the_preview() {
        let questions = vec![item("A", "u1")];
        let source = FakeSource::new(&[], Duration::from_secs(8));

        let prepared = prepare_items(&source, &questions, 1, Duration::from_secs(12)).await;
        assert!(prepared[0].track.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn full_round_awards_and_merges_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let questions = vec![item("Alpha Beta", "u1"), item("Gamma Delta", "u2")];
        let rc = test_context(
            questions,
            FakeSource::failing_everything(),
            &dir,
            quick_config(),
        );
        let state = rc.state.clone();
        let chat = rc.chat.clone();
        let leaderboard = rc.leaderboard.clone();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_round_loop(rc, cancel));

        // First item: three guesses, one wrong, one duplicate.
        wait_until(&state, "first window open", |s| s.accepting_answers).await;
        let answer = {
            let s = state.lock().unwrap();
            s.active.as_ref().unwrap().item.answer.clone()
        };
        {
            let mut s = state.lock().unwrap();
            assert!(judge_guess(&mut s, UserId::new(1), "alice", &answer, 85).is_some());
            assert!(judge_guess(&mut s, UserId::new(2), "bob", &answer, 85).is_some());
            assert!(judge_guess(&mut s, UserId::new(3), "carol", "way off", 85).is_none());
            assert!(judge_guess(&mut s, UserId::new(1), "alice", &answer, 85).is_none());
        }
        wait_until(&state, "first window closed", |s| !s.accepting_answers).await;

        // Second item: nobody answers.
        wait_until(&state, "second window open", |s| s.accepting_answers).await;
        task.await.unwrap();

        {
            let lb = leaderboard.lock().unwrap();
            assert_eq!(lb.get("alice"), 15);
            assert_eq!(lb.get("bob"), 10);
            assert_eq!(lb.get("carol"), 0);
        }
        // The merge also reached disk.
        let reloaded = Leaderboard::load(dir.path().join("leaderboard.json"));
        assert_eq!(reloaded.get("alice"), 15);
        assert_eq!(reloaded.get("bob"), 10);

        let titles = chat.titles();
        assert!(titles.iter().any(|t| t == "✅ Results"));
        assert!(titles.iter().any(|t| t == "⏰ Time's Up!"));
        assert!(titles.iter().any(|t| t == "🏁 Round Over!"));
        let bodies = chat.bodies();
        assert!(bodies.iter().any(|b| b.contains("alice (+15 pts)")));
        assert!(bodies.iter().any(|b| b.contains("bob (+10 pts)")));
        assert!(bodies.iter().any(|b| b.contains("Winner: alice (15 points)")));

        let s = state.lock().unwrap();
        assert_eq!(s.phase, Phase::Idle);
        assert!(!s.accepting_answers);
        assert!(s.round_scores.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn round_with_no_correct_answers_leaves_leaderboard_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = quick_config();
        cfg.round_size = 1;
        let rc = test_context(
            vec![item("Alpha Beta", "u1")],
            FakeSource::failing_everything(),
            &dir,
            cfg,
        );
        let chat = rc.chat.clone();
        let leaderboard = rc.leaderboard.clone();

        let task = tokio::spawn(run_round_loop(rc, CancellationToken::new()));
        task.await.unwrap();

        assert!(leaderboard.lock().unwrap().is_empty());
        let bodies = chat.bodies();
        assert!(bodies.iter().any(|b| b.contains("No one got it!")));
        assert!(bodies.iter().any(|b| b.contains("No winners this round.")));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resets_state_and_abandons_timers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = quick_config();
        cfg.auto_repeat = true;
        let rc = test_context(
            vec![item("Alpha Beta", "u1"), item("Gamma Delta", "u2")],
            FakeSource::failing_everything(),
            &dir,
            cfg,
        );
        let state = rc.state.clone();
        let leaderboard = rc.leaderboard.clone();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_round_loop(rc, cancel.clone()));

        wait_until(&state, "window open", |s| s.accepting_answers).await;
        cancel.cancel();
        task.await.unwrap();

        let s = state.lock().unwrap();
        assert_eq!(s.phase, Phase::Idle);
        assert!(!s.accepting_answers);
        assert!(s.active.is_none());
        // Nothing was merged for the abandoned round.
        assert!(leaderboard.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_question_list_aborts_the_round_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let rc = test_context(
            vec![],
            FakeSource::failing_everything(),
            &dir,
            quick_config(),
        );
        let state = rc.state.clone();
        let chat = rc.chat.clone();

        let task = tokio::spawn(run_round_loop(rc, CancellationToken::new()));
        task.await.unwrap();

        assert_eq!(state.lock().unwrap().phase, Phase::Idle);
        assert!(chat
            .bodies()
            .iter()
            .any(|b| b.contains("No questions are available")));
    }
}
