//! Tempo Bot binary.
//!
//! Startup is fail-fast: config, engine pool, and authentication must all
//! succeed before any game is served. After that the supervisor routes
//! lobby events — spawning one session task per started game — while the
//! matchmaker keeps the slots fed, until ctrl-c or a torn connection
//! broadcasts shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tempo_bot::config::BotConfig;
use tempo_bot::engine::pool::EnginePool;
use tempo_bot::engine::probe::{EndgameProbe, NoProbe, PositionProbe};
use tempo_bot::engine::uci::UciEngine;
use tempo_bot::game::registry::GameRegistry;
use tempo_bot::game::session::{GameSession, SessionContext};
use tempo_bot::matchmaking::{ExclusionTable, Matchmaker};
use tempo_bot::network::client::ActionClient;
use tempo_bot::network::protocol::{ChallengeInfo, LobbyEvent};
use tempo_bot::network::transport::{self, GameRouter};
use tempo_bot::time::allocator::TimeAllocator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tempo-bot.json"));
    let config = BotConfig::load(&config_path)?;
    info!(
        version = tempo_bot::VERSION,
        config = %config_path.display(),
        "starting"
    );

    // Engine units are created once, up front. A binary that cannot be
    // spawned or configured means no game can be served: exit non-zero.
    let pool_size = config.engine.pool_size();
    let mut units = Vec::with_capacity(pool_size);
    for index in 0..pool_size {
        let unit = UciEngine::spawn(&config.engine.binary, &config.engine.options)
            .await
            .with_context(|| format!("spawning engine unit {index}"))?;
        units.push(unit);
    }
    let pool = Arc::new(EnginePool::new(units));
    info!(units = pool.size(), "engine pool ready");

    let probe: Arc<dyn PositionProbe> = match &config.engine.tablebase_dir {
        Some(dir) => match EndgameProbe::new(dir, config.engine.tablebase_max_pieces) {
            Some(probe) => Arc::new(probe),
            None => {
                warn!(dir = %dir.display(), "no usable tablebases, probing disabled");
                Arc::new(NoProbe)
            }
        },
        None => Arc::new(NoProbe),
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let connection = transport::connect(&config.hosting, shutdown_tx.clone())
        .await
        .context("connecting to the hosting service")?;
    let transport::Connection {
        account_id,
        mut lobby,
        client,
        router,
    } = connection;

    let registry = Arc::new(GameRegistry::new());
    let exclusions = Arc::new(ExclusionTable::new());

    let context = SessionContext {
        client: client.clone(),
        pool: Arc::clone(&pool),
        registry: Arc::clone(&registry),
        probe,
        allocator: TimeAllocator::new(config.allocator.clone()),
        adjudication: config.adjudication.clone(),
        my_id: account_id.clone(),
    };

    if config.matchmaking.enabled {
        let matchmaker = Matchmaker::new(
            client.clone(),
            Arc::clone(&registry),
            Arc::clone(&exclusions),
            config.matchmaking.clone(),
            config.engine.max_games,
            account_id.clone(),
        );
        tokio::spawn(matchmaker.run(shutdown_tx.subscribe()));
    } else {
        info!("matchmaking disabled, serving incoming challenges only");
    }

    loop {
        tokio::select! {
            event = lobby.recv() => match event {
                Some(event) => {
                    handle_lobby_event(event, &config, &context, &client, &registry, &router, &shutdown_tx).await;
                }
                None => {
                    error!("lobby stream ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    // Sessions finish their in-flight move attempt, the matchmaker stops
    // at its next pause, idle engines get a clean quit.
    let _ = shutdown_tx.send(());
    pool.shutdown().await;
    info!("stopped");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_lobby_event(
    event: LobbyEvent,
    config: &BotConfig,
    context: &SessionContext<UciEngine>,
    client: &ActionClient,
    registry: &Arc<GameRegistry>,
    router: &GameRouter,
    shutdown_tx: &broadcast::Sender<()>,
) {
    match event {
        LobbyEvent::GameStart { game } => {
            if let Some(opponent) = &game.opponent {
                registry.settle_challenge(opponent);
            }
            if !registry.register(&game.id) {
                warn!(game_id = %game.id, "duplicate game start ignored");
                return;
            }
            let events = router.subscribe(&game.id).await;
            let session = GameSession::new(
                game.id.clone(),
                events,
                context.clone(),
                shutdown_tx.subscribe(),
            );
            tokio::spawn(session.run());
            info!(
                game_id = %game.id,
                active = registry.active_games(),
                "session spawned"
            );
        }
        LobbyEvent::GameFinish { game } => {
            // The session retires itself off its own terminal event;
            // closing the channel covers streams that end without one.
            router.unsubscribe(&game.id).await;
        }
        LobbyEvent::Challenge { challenge } => {
            handle_challenge(challenge, config, client, registry).await;
        }
        LobbyEvent::ChallengeCanceled { id } => {
            debug!(challenge_id = %id, "incoming challenge withdrawn");
        }
        LobbyEvent::ChallengeDeclined { id } => {
            debug!(challenge_id = %id, "our challenge was declined");
        }
    }
}

/// Accept an incoming challenge when a slot is free and its rules match
/// the configured set; decline otherwise.
async fn handle_challenge(
    challenge: ChallengeInfo,
    config: &BotConfig,
    client: &ActionClient,
    registry: &Arc<GameRegistry>,
) {
    let standard_variant = challenge
        .variant
        .as_deref()
        .map_or(true, |v| v == "standard");
    let known_control = config.matchmaking.time_controls.iter().any(|tc| {
        tc.limit_secs == challenge.clock_limit_secs
            && tc.increment_secs == challenge.clock_increment_secs
    });
    let acceptable = registry.load() < config.engine.max_games
        && challenge.rated == config.matchmaking.rated
        && standard_variant
        && known_control;

    if !acceptable {
        info!(
            challenger = %challenge.challenger,
            rated = challenge.rated,
            limit_secs = challenge.clock_limit_secs,
            "declining challenge"
        );
        if let Err(err) = client.decline_challenge(&challenge.id).await {
            debug!(challenge_id = %challenge.id, %err, "decline not delivered");
        }
        return;
    }

    match client.accept_challenge(&challenge.id).await {
        Ok(()) => {
            registry.note_challenge(&challenge.challenger, config.matchmaking.pending_ttl());
            info!(challenger = %challenge.challenger, "challenge accepted");
        }
        Err(err) => {
            // The challenger may have withdrawn in the meantime; that is
            // their prerogative, not an error of ours.
            warn!(challenger = %challenge.challenger, %err, "challenge accept failed");
        }
    }
}
