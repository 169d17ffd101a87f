//! Playback loop: walks the playlist under the scheduler's direction.
//!
//! Each tick re-evaluates the schedule state machine, then either dwells on
//! an image, plays a video to its natural end, shows the pre-sleep countdown,
//! or blanks the display. Sync passes signal through a generation counter;
//! the loop reloads the manifest on the next tick and clamps its position if
//! the playlist shrank. Shutdown is honored at every suspension point.

use crate::cache::MediaCache;
use crate::display::DisplaySink;
use crate::manifest::{self, LocalEntry};
use crate::media::{self, DecodedImage, MediaKind, Rect, ScaleMode};
use crate::pool::SurfacePool;
use crate::scheduler::{frame_wait, ScheduleState, Scheduler};
use crate::settings::Settings;
use crate::supervisor::{AudioHandle, SignalMonitor, Supervisor};
use crate::video::VideoPlayer;
use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Poll granularity while not actively presenting media.
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Dwell after a skipped (undecodable) item, so a playlist of nothing but
/// broken files cannot spin the loop hot.
const SKIP_BACKOFF: Duration = Duration::from_millis(250);

/// What ended a wait.
enum Interruption {
    Elapsed,
    MediaChanged,
    Shutdown,
}

pub struct Player {
    cache_dir: PathBuf,
    supported_formats: Vec<String>,
    interval: Duration,
    scale_mode: ScaleMode,
    audio_command: String,
    cache: Arc<MediaCache>,
    pool: Arc<SurfacePool>,
    sink: Box<dyn DisplaySink>,
    scheduler: Scheduler,
    supervisor: Arc<Supervisor>,
    signal: SignalMonitor,
    playlist: Vec<LocalEntry>,
    index: usize,
    shutdown: watch::Receiver<bool>,
    /// Bumped by the sync task after each pass that changed the cache dir.
    media_generation: watch::Receiver<u64>,
    seen_generation: u64,
}

impl Player {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &Settings,
        cache: Arc<MediaCache>,
        pool: Arc<SurfacePool>,
        sink: Box<dyn DisplaySink>,
        scheduler: Scheduler,
        supervisor: Arc<Supervisor>,
        shutdown: watch::Receiver<bool>,
        media_generation: watch::Receiver<u64>,
    ) -> Self {
        let signal = SignalMonitor::new(
            Duration::from_secs(settings.helpers.signal_refresh_secs),
            Duration::from_secs(settings.helpers.quick_timeout_secs),
        );
        Self {
            cache_dir: settings.sync.local_cache_dir.clone(),
            supported_formats: settings.supported_formats.clone(),
            interval: Duration::from_secs(settings.slideshow.interval_seconds),
            scale_mode: ScaleMode::from_str(&settings.slideshow.scale_mode),
            audio_command: settings.helpers.audio_command.clone(),
            cache,
            pool,
            sink,
            scheduler,
            supervisor,
            signal,
            playlist: Vec::new(),
            index: 0,
            shutdown,
            media_generation,
            seen_generation: 0,
        }
    }

    /// Run until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.reload_playlist();

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.maybe_reload_playlist();

            let state =
                self.scheduler
                    .evaluate(Utc::now(), Instant::now(), self.playlist.is_empty());

            match state {
                ScheduleState::WaitingForMedia => {
                    tracing::debug!("waiting for media");
                    self.sink.blank()?;
                    if matches!(self.wait(IDLE_TICK).await, Interruption::Shutdown) {
                        break;
                    }
                }
                ScheduleState::Countdown { .. } => {
                    let remaining = self
                        .scheduler
                        .countdown_remaining(Instant::now())
                        .unwrap_or_default();
                    self.sink.show_countdown(remaining.as_secs())?;
                    if matches!(self.wait(IDLE_TICK).await, Interruption::Shutdown) {
                        break;
                    }
                }
                ScheduleState::Sleeping => {
                    self.sink.blank()?;
                    if matches!(self.wait(IDLE_TICK).await, Interruption::Shutdown) {
                        break;
                    }
                }
                ScheduleState::Active => {
                    if let Some(resume) = self.scheduler.take_resume_index() {
                        self.index = clamp_index(resume, self.playlist.len());
                        tracing::info!("resuming playback at position {}", self.index);
                    }
                    if let Interruption::Shutdown = self.present_current().await? {
                        break;
                    }
                }
            }

            if let Some(dbm) = self.signal.signal_dbm(&self.supervisor).await {
                tracing::debug!(dbm, "wifi signal");
            }
        }

        tracing::info!("playback loop stopped");
        Ok(())
    }

    /// Show the current playlist entry, then advance. A failed decode skips
    /// the item; the playlist keeps going.
    async fn present_current(&mut self) -> Result<Interruption> {
        let Some(entry) = self.playlist.get(self.index).cloned() else {
            return Ok(Interruption::Elapsed);
        };
        self.scheduler.note_position(self.index);

        let outcome = match media::media_kind(&entry.path) {
            MediaKind::Image => self.present_image(&entry).await?,
            MediaKind::Video => self.present_video(&entry).await?,
        };

        self.index = advance(self.index, self.playlist.len());
        Ok(outcome)
    }

    async fn present_image(&mut self, entry: &LocalEntry) -> Result<Interruption> {
        let key = cache_key(entry);
        let path = entry.path.clone();
        let decoded = match self
            .cache
            .get_or_load(&key, move || Ok(media::decode_image(&path)?))
        {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("skipping {}: {e}", entry.name);
                return Ok(self.wait(SKIP_BACKOFF).await);
            }
        };

        self.present_pixels(&decoded)?;
        tracing::debug!("showing {}", entry.name);
        Ok(self.wait(self.interval).await)
    }

    fn present_pixels(&mut self, decoded: &DecodedImage) -> Result<()> {
        let (screen_w, screen_h) = self.sink.dimensions();
        let (src, dest) =
            plan_scaling(decoded.width, decoded.height, screen_w, screen_h, self.scale_mode);
        self.sink
            .present(&decoded.pixels, decoded.width, decoded.height, src, dest)
    }

    /// Play a video to its natural end, pacing frames against the stream's
    /// frame interval. Frames arrive in pooled surfaces; each presented lease
    /// drops back into the pool before the next frame. The schedule is
    /// re-checked every frame, so a video spanning the window's close stops
    /// at the edge instead of playing out.
    async fn present_video(&mut self, entry: &LocalEntry) -> Result<Interruption> {
        let player = match VideoPlayer::new(&entry.path, Arc::clone(&self.pool)) {
            Ok(player) => player,
            Err(e) => {
                tracing::warn!("skipping {}: {e:#}", entry.name);
                return Ok(self.wait(SKIP_BACKOFF).await);
            }
        };
        if let Err(e) = player.play() {
            tracing::warn!("skipping {}: {e:#}", entry.name);
            return Ok(self.wait(SKIP_BACKOFF).await);
        }
        tracing::debug!("playing {}", entry.name);

        let audio = self.spawn_audio(entry);
        let (screen_w, screen_h) = self.sink.dimensions();
        while !player.is_eos() {
            let tick_start = Instant::now();

            let state = self
                .scheduler
                .evaluate(Utc::now(), tick_start, self.playlist.is_empty());
            if playback_interrupted(state) {
                tracing::info!("stopping {} at the schedule edge", entry.name);
                player.stop()?;
                terminate_audio(audio).await;
                return Ok(Interruption::Elapsed);
            }

            if let Some(frame) = player.take_frame() {
                let (src, dest) =
                    plan_scaling(frame.width, frame.height, screen_w, screen_h, self.scale_mode);
                self.sink
                    .present(&frame.surface, frame.width, frame.height, src, dest)?;
            }

            let wait = frame_wait(player.frame_interval(), tick_start.elapsed());
            if matches!(self.wait(wait).await, Interruption::Shutdown) {
                player.stop()?;
                terminate_audio(audio).await;
                return Ok(Interruption::Shutdown);
            }
        }

        player.stop()?;
        terminate_audio(audio).await;
        Ok(Interruption::Elapsed)
    }

    /// Start the configured audio helper for a video, if any. Audio trouble
    /// never blocks the video.
    fn spawn_audio(&self, entry: &LocalEntry) -> Option<AudioHandle> {
        if self.audio_command.is_empty() {
            return None;
        }
        match AudioHandle::spawn(&self.audio_command, &entry.path) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("audio helper failed for {}: {e}", entry.name);
                None
            }
        }
    }

    /// Sleep for `duration` unless shutdown or a media-change notification
    /// arrives first.
    async fn wait(&mut self, duration: Duration) -> Interruption {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Interruption::Elapsed,
            _ = self.shutdown.changed() => Interruption::Shutdown,
            _ = self.media_generation.changed() => Interruption::MediaChanged,
        }
    }

    fn maybe_reload_playlist(&mut self) {
        let generation = *self.media_generation.borrow();
        if generation != self.seen_generation {
            self.seen_generation = generation;
            self.reload_playlist();
        }
    }

    fn reload_playlist(&mut self) {
        let previous = self.playlist.len();
        self.playlist = manifest::scan(&self.cache_dir, &self.supported_formats);
        self.index = clamp_index(self.index, self.playlist.len());
        if self.playlist.len() != previous {
            tracing::info!(items = self.playlist.len(), "playlist reloaded");
        }
    }
}

/// Cache key carrying the size so a re-synced file of the same name is not
/// served from a stale decode.
fn cache_key(entry: &LocalEntry) -> String {
    format!("{}:{}", entry.name, entry.size)
}

fn advance(index: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        (index + 1) % len
    }
}

/// Keep the position valid after the playlist shrank.
fn clamp_index(index: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        index.min(len - 1)
    }
}

async fn terminate_audio(audio: Option<AudioHandle>) {
    if let Some(handle) = audio {
        handle.terminate().await;
    }
}

/// A video in progress stops as soon as the machine leaves ACTIVE.
fn playback_interrupted(state: ScheduleState) -> bool {
    !matches!(state, ScheduleState::Active)
}

/// Resolve a scale mode into the source crop and destination rectangle
/// handed to the sink.
fn plan_scaling(
    img_w: u32,
    img_h: u32,
    screen_w: u32,
    screen_h: u32,
    mode: ScaleMode,
) -> (Rect, Rect) {
    let full_image = Rect { x: 0, y: 0, width: img_w, height: img_h };
    let full_screen = Rect { x: 0, y: 0, width: screen_w, height: screen_h };
    match mode {
        ScaleMode::Fit => (full_image, media::fit_rect(img_w, img_h, screen_w, screen_h)),
        ScaleMode::Fill => (media::fill_crop(img_w, img_h, screen_w, screen_h), full_screen),
        ScaleMode::Stretch => (full_image, full_screen),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_wraps_and_handles_empty() {
        assert_eq!(advance(0, 3), 1);
        assert_eq!(advance(2, 3), 0);
        assert_eq!(advance(5, 0), 0);
    }

    #[test]
    fn clamp_keeps_index_in_shrunk_playlist() {
        assert_eq!(clamp_index(7, 20), 7);
        assert_eq!(clamp_index(7, 5), 4);
        assert_eq!(clamp_index(7, 0), 0);
    }

    #[test]
    fn fit_letterboxes_the_destination() {
        let (src, dest) = plan_scaling(4000, 1000, 1920, 1080, ScaleMode::Fit);
        assert_eq!((src.width, src.height), (4000, 1000));
        assert_eq!((dest.width, dest.height), (1920, 480));
    }

    #[test]
    fn fill_crops_the_source_stretch_does_not() {
        // Fill: centered source crop covering the screen after scaling.
        let (src, dest) = plan_scaling(4000, 1000, 1920, 1080, ScaleMode::Fill);
        assert_eq!(src, media::fill_crop(4000, 1000, 1920, 1080));
        assert!(src.width < 4000, "wide image must be cropped at the sides");
        assert!(src.x > 0, "crop must be centered");
        assert_eq!((dest.width, dest.height), (1920, 1080));

        // Stretch: whole image, whole screen, aspect ignored.
        let (src, dest) = plan_scaling(4000, 1000, 1920, 1080, ScaleMode::Stretch);
        assert_eq!((src.x, src.width, src.height), (0, 4000, 1000));
        assert_eq!((dest.width, dest.height), (1920, 1080));
    }

    #[test]
    fn any_state_but_active_interrupts_a_video() {
        // A long video crossing the window's close must stop at the edge.
        assert!(!playback_interrupted(ScheduleState::Active));
        assert!(playback_interrupted(ScheduleState::Sleeping));
        assert!(playback_interrupted(ScheduleState::WaitingForMedia));
        assert!(playback_interrupted(ScheduleState::Countdown {
            deadline: Instant::now(),
        }));
    }

    #[test]
    fn cache_key_includes_size() {
        let a = LocalEntry {
            name: "x.jpg".into(),
            size: 10,
            modified: std::time::SystemTime::UNIX_EPOCH,
            path: "x.jpg".into(),
        };
        let mut b = a.clone();
        b.size = 11;
        assert_ne!(cache_key(&a), cache_key(&b));
    }
}
