use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use latejoin::config::LateJoinConfig;
use latejoin::game::snapshot::ParticipantId;
use latejoin::game::state::Platform;
use latejoin::game::world::World;
use latejoin::host::SessionHost;
use latejoin::latejoin::join::JoinOutcome;
use latejoin::metrics::{self, Metrics};
use latejoin::util::vec3::Vec3;

/// Scripted demo session: a few peers spread over uneven ground, a late
/// joiner, a death, a drop and a rejoin on the same stage, then a stage change
struct DemoScript {
    peers: Vec<ParticipantId>,
    latecomer: ParticipantId,
}

impl DemoScript {
    fn setup(host: &mut SessionHost) -> Self {
        host.world.add_platform(Platform::new(Vec3::ZERO, 60.0, 60.0));
        host.world.add_platform(Platform::new(Vec3::new(25.0, 4.0, 0.0), 6.0, 6.0));
        host.world.add_platform(Platform::new(Vec3::new(-25.0, 12.0, 10.0), 3.0, 3.0));

        let mut rng = rand::thread_rng();
        let spots = [
            Vec3::new(25.0, 4.0, 0.0),
            Vec3::new(-25.0, 12.0, 10.0),
            Vec3::new(rng.gen_range(-20.0..20.0), 0.0, rng.gen_range(-20.0..20.0)),
        ];

        let peers: Vec<ParticipantId> = spots
            .iter()
            .enumerate()
            .map(|(i, spot)| {
                let id = Uuid::new_v4();
                host.world.spawn_grounded(id, &format!("Peer{}", i + 1), *spot, false);
                id
            })
            .collect();

        Self {
            peers,
            latecomer: Uuid::new_v4(),
        }
    }

    /// Fire the scripted events scheduled for `second`
    fn at(&self, second: u64, host: &mut SessionHost) {
        let id = self.latecomer;
        match second {
            2 => {
                info!("Demo: {} joins late", id);
                host.join(id);
                host.world.spawn_grounded(id, "Latecomer", Vec3::new(0.0, 0.0, -50.0), false);
            }
            8 => {
                info!("Demo: {} dies", id);
                host.world.set_dead(id, true);
            }
            9 => {
                info!("Demo: {} drops", id);
                host.leave(id);
            }
            11 => {
                info!("Demo: {} rejoins on the same stage", id);
                host.world.spawn_grounded(id, "Latecomer", Vec3::new(0.0, 0.0, -50.0), false);
                host.join(id);
            }
            16 => {
                host.leave(id);
                host.set_stage("Stage2");
                // Lowest peer dies so placement picks someone else
                if let Some(low) = self.peers.last() {
                    host.world.set_dead(*low, true);
                }
            }
            17 => {
                info!("Demo: {} rejoins on a new stage", id);
                host.world.spawn_grounded(id, "Latecomer", Vec3::new(0.0, 0.0, -50.0), true);
                host.join(id);
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Late-join host v{}", env!("CARGO_PKG_VERSION"));

    let config = LateJoinConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("Invalid configuration: {}", e);
    }
    info!(
        "Configuration loaded: {} Hz, settle {:?}, lobby stages {:?}",
        config.tick_rate_hz, config.settle_delay, config.lobby_stages
    );

    let metrics = Arc::new(Metrics::new());
    let metrics_port = config.metrics_port;
    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let tick_duration = config.tick_duration();
    let mut host = SessionHost::new(config, metrics.clone(), "Stage1");
    let script = DemoScript::setup(&mut host);

    let session = async {
        let mut interval = tokio::time::interval(tick_duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        let mut last = Instant::now();
        let mut last_second = None;

        loop {
            interval.tick().await;

            let now = Instant::now();
            let dt = now - last;
            last = now;

            let second = started.elapsed().as_secs();
            if last_second != Some(second) {
                last_second = Some(second);
                script.at(second, &mut host);
            }

            let tick_start = Instant::now();
            for report in host.tick(dt) {
                match report.outcome {
                    JoinOutcome::Placed { target, arrival, .. } => info!(
                        "{} placed next to {} at ({:.2}, {:.2}, {:.2})",
                        report.participant, target, arrival.x, arrival.y, arrival.z
                    ),
                    JoinOutcome::RestoredDead => {
                        info!("{} kept dead on stage {}", report.participant, host.stage())
                    }
                    JoinOutcome::Aborted(reason) => {
                        info!("{} not placed: {}", report.participant, reason)
                    }
                }
            }
            metrics.record_tick_time(tick_start.elapsed());

            if second >= 25 && host.manager().in_flight() == 0 {
                info!("Demo session finished");
                break;
            }
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = session => {}
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Host stopped");

    Ok(())
}
