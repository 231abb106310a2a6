//! Outbound matchmaking.
//!
//! One long-lived loop that keeps the game slots fed: admission control
//! against the shared registry, a periodically refreshed and shuffled
//! candidate directory, an exclusion table so the same opponent is not
//! hammered, a mandatory settle period after every challenge, and a growing
//! backoff whenever the service signals a rate limit.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::MatchmakingConfig;
use crate::game::registry::GameRegistry;
use crate::network::client::{with_retries, ActionClient, ApiError};
use crate::network::protocol::{BotProfile, ChallengeRequest};

/// Retry policy for directory fetches.
const DIRECTORY_ATTEMPTS: u32 = 2;
const DIRECTORY_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Time-bounded denylist of opponents.
///
/// Entries are pruned lazily: one past its expiry is treated as absent and
/// removed when encountered. A bot appears at most once; re-excluding
/// replaces the old entry.
#[derive(Debug, Default)]
pub struct ExclusionTable {
    entries: Mutex<BTreeMap<String, Instant>>,
}

impl ExclusionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude a bot until `ttl` from now.
    pub fn exclude(&self, bot_id: &str, ttl: Duration) {
        self.lock().insert(bot_id.to_string(), Instant::now() + ttl);
    }

    /// Whether the bot is currently excluded.
    pub fn contains(&self, bot_id: &str) -> bool {
        let mut entries = self.lock();
        match entries.get(bot_id) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                entries.remove(bot_id);
                false
            }
            None => false,
        }
    }

    /// Unexpired entry count.
    pub fn len(&self) -> usize {
        let mut entries = self.lock();
        let now = Instant::now();
        entries.retain(|_, expiry| *expiry > now);
        entries.len()
    }

    /// Whether the table holds no unexpired entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Instant>> {
        self.entries.lock().expect("exclusion lock poisoned")
    }
}

/// One iteration's outcome. [`Matchmaker::run`] turns these into sleeps;
/// tests assert on them directly.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// At or over the concurrency cap; no API call was made.
    AtCapacity,
    /// No eligible candidate this cycle.
    NoCandidate,
    /// Challenge issued; settle before the next one.
    Challenged {
        /// Who was challenged.
        opponent: String,
    },
    /// The service rate limited us.
    RateLimited {
        /// How long to back off.
        wait: Duration,
    },
    /// The challenge failed for an ordinary reason; retry at once with a
    /// new candidate.
    Failed {
        /// Who the failed challenge targeted.
        opponent: String,
    },
}

/// The outbound challenge loop.
pub struct Matchmaker {
    client: ActionClient,
    registry: Arc<GameRegistry>,
    exclusions: Arc<ExclusionTable>,
    config: MatchmakingConfig,
    max_games: usize,
    my_id: String,
    candidates: Vec<BotProfile>,
    last_refresh: Option<Instant>,
    rate_limit_hits: u32,
}

impl Matchmaker {
    /// Build the loop around the shared handles.
    pub fn new(
        client: ActionClient,
        registry: Arc<GameRegistry>,
        exclusions: Arc<ExclusionTable>,
        config: MatchmakingConfig,
        max_games: usize,
        my_id: String,
    ) -> Self {
        Self {
            client,
            registry,
            exclusions,
            config,
            max_games,
            my_id,
            candidates: Vec::new(),
            last_refresh: None,
            rate_limit_hits: 0,
        }
    }

    /// Drive the loop until shutdown. Every pause is interruptible.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(max_games = self.max_games, "matchmaker started");
        loop {
            let step = self.step().await;
            let pause = match &step {
                Step::AtCapacity | Step::NoCandidate => self.config.idle_delay(),
                Step::Challenged { opponent } => {
                    info!(opponent = %opponent, "challenge issued, settling");
                    self.config.settle_delay()
                }
                Step::RateLimited { wait } => {
                    warn!(
                        wait_secs = wait.as_secs(),
                        consecutive_hits = self.rate_limit_hits,
                        "rate limited, backing off"
                    );
                    *wait
                }
                Step::Failed { opponent } => {
                    debug!(opponent = %opponent, "challenge failed, trying another candidate");
                    Duration::ZERO
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.recv() => {
                    info!("matchmaker stopped");
                    return;
                }
            }
        }
    }

    /// One scheduling decision.
    pub async fn step(&mut self) -> Step {
        // Admission control first: at capacity nothing is allowed to touch
        // the network, protecting the rate budget.
        if self.registry.load() >= self.max_games {
            return Step::AtCapacity;
        }

        if self.directory_stale() {
            self.refresh_directory().await;
        }

        let Some(candidate) = self.pick_candidate() else {
            return Step::NoCandidate;
        };
        let opponent = candidate.id;

        // Claim the candidate before the request goes out, so a concurrent
        // retry cannot re-target it while the call is in flight.
        self.exclusions
            .exclude(&opponent, self.config.challenge_cooldown());
        self.registry
            .note_challenge(&opponent, self.config.pending_ttl());

        let request = self.challenge_request(&opponent);
        debug!(
            opponent = %opponent,
            limit_secs = request.clock_limit_secs,
            increment_secs = request.clock_increment_secs,
            "issuing challenge"
        );
        match self.client.create_challenge(request).await {
            Ok(()) => {
                self.rate_limit_hits = 0;
                Step::Challenged { opponent }
            }
            Err(ApiError::RateLimited { retry_after }) => {
                self.registry.settle_challenge(&opponent);
                self.rate_limit_hits += 1;
                let computed = self.config.backoff_base() * self.rate_limit_hits;
                let wait = retry_after.map_or(computed, |hint| hint.max(computed));
                Step::RateLimited { wait }
            }
            Err(err) => {
                self.registry.settle_challenge(&opponent);
                warn!(opponent = %opponent, %err, "challenge not delivered");
                // Shorter cooldown than a delivered challenge: the
                // candidate may come back soon.
                self.exclusions
                    .exclude(&opponent, self.config.failure_cooldown());
                Step::Failed { opponent }
            }
        }
    }

    fn directory_stale(&self) -> bool {
        self.last_refresh
            .map_or(true, |at| at.elapsed() >= self.config.directory_refresh())
    }

    async fn refresh_directory(&mut self) {
        let page_size = self.config.directory_page_size;
        let client = self.client.clone();
        let fetched = with_retries(DIRECTORY_ATTEMPTS, DIRECTORY_RETRY_DELAY, || {
            client.online_bots(page_size)
        })
        .await;
        // Stamp the attempt either way; a failing directory endpoint must
        // not be polled every cycle.
        self.last_refresh = Some(Instant::now());
        match fetched {
            Ok(mut bots) => {
                bots.shuffle(&mut rand::thread_rng());
                info!(candidates = bots.len(), "candidate directory refreshed");
                self.candidates = bots;
            }
            Err(err) => warn!(%err, "directory refresh failed"),
        }
    }

    /// First candidate passing the exclusion table and the eligibility
    /// rules. Unsuitable candidates are parked for a long cooldown so they
    /// are not re-examined every cycle.
    fn pick_candidate(&self) -> Option<BotProfile> {
        for bot in &self.candidates {
            if bot.id == self.my_id || self.exclusions.contains(&bot.id) {
                continue;
            }
            if !self.eligible(bot) {
                debug!(bot_id = %bot.id, "candidate unsuitable, long cooldown");
                self.exclusions
                    .exclude(&bot.id, self.config.unsuitable_cooldown());
                continue;
            }
            return Some(bot.clone());
        }
        None
    }

    fn eligible(&self, bot: &BotProfile) -> bool {
        if bot.disabled || bot.flagged || bot.provisional {
            return false;
        }
        if bot.rated_games < self.config.min_rated_games {
            return false;
        }
        bot.rating.is_some_and(|rating| {
            rating >= self.config.min_rating && rating <= self.config.max_rating
        })
    }

    fn challenge_request(&self, opponent: &str) -> ChallengeRequest {
        let control = self
            .config
            .time_controls
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_default();
        ChallengeRequest {
            opponent: opponent.to_string(),
            rated: self.config.rated,
            clock_limit_secs: control.limit_secs,
            clock_increment_secs: control.increment_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{AckError, Action, ActionAck, ClientFrame, ErrorCode};
    use tokio::sync::mpsc;

    fn bot(id: &str, rating: u32) -> BotProfile {
        BotProfile {
            id: id.to_string(),
            rating: Some(rating),
            rated_games: 500,
            provisional: false,
            disabled: false,
            flagged: false,
        }
    }

    fn config() -> MatchmakingConfig {
        MatchmakingConfig {
            backoff_base_secs: 60,
            ..MatchmakingConfig::default()
        }
    }

    /// Responder answering the directory with `bots` and challenges with
    /// the scripted outcomes (then acks forever).
    fn spawn_responder(
        client: &ActionClient,
        mut rx: mpsc::Receiver<ClientFrame>,
        bots: Vec<BotProfile>,
        mut challenge_errors: Vec<Option<ErrorCode>>,
    ) {
        let pending = client.pending_acks();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let ClientFrame::Action { id, action } = frame else {
                    continue;
                };
                let ack = match action {
                    Action::ListBots { .. } => ActionAck {
                        id,
                        ok: true,
                        error: None,
                        bots: Some(bots.clone()),
                    },
                    Action::CreateChallenge(_) => {
                        let outcome = if challenge_errors.is_empty() {
                            None
                        } else {
                            challenge_errors.remove(0)
                        };
                        match outcome {
                            None => ActionAck { id, ok: true, error: None, bots: None },
                            Some(code) => ActionAck {
                                id,
                                ok: false,
                                error: Some(AckError {
                                    code,
                                    message: "scripted".to_string(),
                                    retry_after_secs: None,
                                }),
                                bots: None,
                            },
                        }
                    }
                    _ => ActionAck { id, ok: true, error: None, bots: None },
                };
                ActionClient::complete(&pending, ack).await;
            }
        });
    }

    fn matchmaker(
        bots: Vec<BotProfile>,
        challenge_errors: Vec<Option<ErrorCode>>,
        max_games: usize,
    ) -> (Matchmaker, Arc<GameRegistry>, Arc<ExclusionTable>) {
        let (client, rx) = ActionClient::channel(32);
        spawn_responder(&client, rx, bots, challenge_errors);
        let registry = Arc::new(GameRegistry::new());
        let exclusions = Arc::new(ExclusionTable::new());
        let mm = Matchmaker::new(
            client,
            registry.clone(),
            exclusions.clone(),
            config(),
            max_games,
            "us".to_string(),
        );
        (mm, registry, exclusions)
    }

    #[tokio::test]
    async fn at_capacity_makes_no_api_call() {
        let (mut mm, registry, _) = matchmaker(vec![bot("a", 2000)], vec![], 1);
        registry.register("g1");
        assert_eq!(mm.step().await, Step::AtCapacity);
        // The directory was never fetched.
        assert!(mm.candidates.is_empty());
    }

    #[tokio::test]
    async fn pending_challenges_count_toward_the_cap() {
        let (mut mm, registry, _) = matchmaker(vec![bot("a", 2000)], vec![], 1);
        registry.note_challenge("someone", Duration::from_secs(60));
        assert_eq!(mm.step().await, Step::AtCapacity);
    }

    #[tokio::test]
    async fn challenge_excludes_the_target_first() {
        let (mut mm, registry, exclusions) = matchmaker(vec![bot("a", 2000)], vec![], 4);
        let step = mm.step().await;
        assert_eq!(step, Step::Challenged { opponent: "a".to_string() });
        assert!(exclusions.contains("a"), "target is on cooldown");
        assert_eq!(registry.load(), 1, "pending challenge counts");
    }

    #[tokio::test]
    async fn unsuitable_candidates_get_a_long_cooldown() {
        let out_of_band = bot("weak", 900);
        let fresh = BotProfile { rated_games: 3, ..bot("fresh", 2000) };
        let banned = BotProfile { flagged: true, ..bot("banned", 2000) };
        let (mut mm, _, exclusions) = matchmaker(vec![out_of_band, fresh, banned], vec![], 4);

        assert_eq!(mm.step().await, Step::NoCandidate);
        assert!(exclusions.contains("weak"));
        assert!(exclusions.contains("fresh"));
        assert!(exclusions.contains("banned"));
    }

    #[tokio::test]
    async fn excluded_candidates_come_back_after_expiry() {
        let (mut mm, _, exclusions) = matchmaker(vec![bot("a", 2000)], vec![], 4);
        exclusions.exclude("a", Duration::from_millis(5));
        assert_eq!(mm.step().await, Step::NoCandidate);

        std::thread::sleep(Duration::from_millis(10));
        assert!(!exclusions.contains("a"));
        assert_eq!(mm.step().await, Step::Challenged { opponent: "a".to_string() });
    }

    #[tokio::test]
    async fn backoff_grows_with_consecutive_rate_limits() {
        let bots = vec![bot("a", 2000), bot("b", 2000), bot("c", 2000)];
        let errors = vec![
            Some(ErrorCode::RateLimited),
            Some(ErrorCode::RateLimited),
            None,
        ];
        let (mut mm, _, _) = matchmaker(bots, errors, 4);

        let Step::RateLimited { wait: first } = mm.step().await else {
            panic!("expected rate limit");
        };
        let Step::RateLimited { wait: second } = mm.step().await else {
            panic!("expected rate limit");
        };
        assert_eq!(first, mm.config.backoff_base());
        assert_eq!(second, mm.config.backoff_base() * 2);
        assert!(second >= first * 2, "backoff must grow");

        // A successful cycle resets the counter.
        assert!(matches!(mm.step().await, Step::Challenged { .. }));
        assert_eq!(mm.rate_limit_hits, 0);
    }

    #[tokio::test]
    async fn rate_limited_challenge_frees_the_pending_slot() {
        let (mut mm, registry, _) =
            matchmaker(vec![bot("a", 2000)], vec![Some(ErrorCode::RateLimited)], 4);
        let Step::RateLimited { .. } = mm.step().await else {
            panic!("expected rate limit");
        };
        assert_eq!(registry.load(), 0);
    }

    #[tokio::test]
    async fn ordinary_failure_moves_to_the_next_candidate() {
        let bots = vec![bot("a", 2000), bot("b", 2000)];
        let errors = vec![Some(ErrorCode::OpponentUnavailable), None];
        let (mut mm, _, exclusions) = matchmaker(bots, errors, 4);

        let Step::Failed { opponent: first } = mm.step().await else {
            panic!("expected failure");
        };
        assert!(exclusions.contains(&first));
        // Immediate retry targets the other candidate.
        let Step::Challenged { opponent: second } = mm.step().await else {
            panic!("expected challenge");
        };
        assert_ne!(first, second);
        assert_eq!(mm.rate_limit_hits, 0);
    }

    #[tokio::test]
    async fn directory_is_not_refetched_every_cycle() {
        let (mut mm, _, _) = matchmaker(vec![], vec![], 4);
        assert_eq!(mm.step().await, Step::NoCandidate);
        let stamp = mm.last_refresh;
        assert!(stamp.is_some());
        assert_eq!(mm.step().await, Step::NoCandidate);
        assert_eq!(mm.last_refresh, stamp, "refresh runs on its timer only");
    }

    #[test]
    fn exclusion_entries_are_single_and_replaceable() {
        let table = ExclusionTable::new();
        table.exclude("a", Duration::from_secs(60));
        table.exclude("a", Duration::from_secs(120));
        assert_eq!(table.len(), 1);
        assert!(table.contains("a"));
    }

    #[test]
    fn expired_entries_prune_on_lookup() {
        let table = ExclusionTable::new();
        table.exclude("a", Duration::from_millis(5));
        assert!(table.contains("a"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(!table.contains("a"));
        assert!(table.is_empty());
    }
}
