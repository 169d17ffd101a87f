use anyhow::{Context, Result};
use frame_kiosk::cache::MediaCache;
use frame_kiosk::display::NullSink;
use frame_kiosk::player::Player;
use frame_kiosk::pool::SurfacePool;
use frame_kiosk::provider::{HttpFolderProvider, MirrorCommandProvider, RemoteProvider};
use frame_kiosk::scheduler::{ActiveWindow, Scheduler};
use frame_kiosk::settings::Settings;
use frame_kiosk::supervisor::Supervisor;
use frame_kiosk::sync::SyncEngine;
use frame_kiosk::video::VideoPlayer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Buffers held free per frame shape; two is enough for decode/present
/// ping-pong.
const POOL_FREE_PER_DIMS: usize = 2;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::load("settings")?;
    tracing::info!(
        cache_dir = %settings.sync.local_cache_dir.display(),
        interval = settings.slideshow.interval_seconds,
        "starting frame kiosk"
    );

    tokio::fs::create_dir_all(&settings.sync.local_cache_dir)
        .await
        .context("could not create cache directory")?;

    VideoPlayer::init()?;

    let supervisor = Arc::new(Supervisor::new());
    let provider = build_provider(&settings, Arc::clone(&supervisor))?;
    let engine = Arc::new(SyncEngine::new(
        provider,
        settings.sync.local_cache_dir.clone(),
        settings.supported_formats.clone(),
        Arc::clone(&supervisor),
        settings.sync.sync_system_time,
        Duration::from_secs(settings.helpers.normal_timeout_secs),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (generation_tx, generation_rx) = watch::channel(0u64);

    if settings.sync.download_on_start {
        match engine.synchronize().await {
            Ok(result) => {
                if result.fetched + result.deleted > 0 {
                    generation_tx.send_modify(|g| *g += 1);
                }
            }
            Err(e) => tracing::warn!("initial sync failed, playing cached media: {e}"),
        }
    }

    let sync_task = tokio::spawn(sync_loop(
        Arc::clone(&engine),
        Duration::from_secs(settings.sync.check_interval_minutes * 60),
        generation_tx,
        shutdown_rx.clone(),
    ));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let cache = Arc::new(MediaCache::new(
        settings.cache.max_count,
        settings.max_cache_bytes(),
    ));
    let pool = SurfacePool::new(POOL_FREE_PER_DIMS);
    let window = ActiveWindow::from_settings(&settings.schedule, settings.sync.timezone_offset)?;
    let scheduler = Scheduler::new(window);

    let mut player = Player::new(
        &settings,
        cache,
        pool,
        Box::new(NullSink::new()),
        scheduler,
        supervisor,
        shutdown_rx,
        generation_rx,
    );
    player.run().await?;

    sync_task.abort();
    Ok(())
}

fn build_provider(
    settings: &Settings,
    supervisor: Arc<Supervisor>,
) -> Result<Arc<dyn RemoteProvider>> {
    if !settings.mirror_command.is_empty() {
        tracing::info!(
            command = settings.mirror_command,
            remote = settings.mirror_remote,
            "using mirror command provider"
        );
        return Ok(Arc::new(MirrorCommandProvider::new(
            supervisor,
            settings.mirror_command.clone(),
            settings.mirror_remote.clone(),
            Duration::from_secs(settings.helpers.long_timeout_secs),
        )));
    }

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(300))
        .build()
        .context("could not build http client")?;
    Ok(Arc::new(HttpFolderProvider::new(client, &settings.remote_url)?))
}

/// Periodic sync: one pass per interval, bumping the playlist generation
/// whenever the cache directory changed.
async fn sync_loop(
    engine: Arc<SyncEngine>,
    interval: Duration,
    generation: watch::Sender<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }

        match engine.synchronize().await {
            Ok(result) => {
                if result.fetched + result.deleted > 0 {
                    generation.send_modify(|g| *g += 1);
                }
            }
            Err(e) => tracing::warn!("sync pass failed: {e}"),
        }
    }
}
