//! GStreamer-based video playback.
//!
//! Decodes video into RGBA frames, each copied into a buffer acquired from
//! the surface pool so steady-state playback performs no per-frame heap
//! allocation. The playback loop takes the latest pooled frame, presents it,
//! and dropping the lease recycles the buffer.

use crate::pool::{SurfaceLease, SurfacePool};
use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One decoded frame backed by a pooled surface.
pub struct PooledFrame {
    pub surface: SurfaceLease,
    pub width: u32,
    pub height: u32,
}

/// Video player feeding pooled RGBA frames to the playback loop.
pub struct VideoPlayer {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
    latest_frame: Arc<Mutex<Option<PooledFrame>>>,
    frame_interval: Arc<Mutex<Duration>>,
    eos_reached: AtomicBool,
}

impl VideoPlayer {
    /// Initialize GStreamer (once at startup).
    pub fn init() -> Result<()> {
        gst::init().context("failed to initialize GStreamer")?;
        tracing::info!("GStreamer initialized: {}", gst::version_string());
        Ok(())
    }

    /// Build a pipeline for the given file and start decoding into pooled
    /// surfaces.
    pub fn new(path: &Path, pool: Arc<SurfacePool>) -> Result<Self> {
        let uri = format!("file://{}", std::fs::canonicalize(path)?.display());
        tracing::debug!("creating video pipeline for {uri}");

        let pipeline = gst::Pipeline::new();

        let src = gst::ElementFactory::make("uridecodebin")
            .name("source")
            .property("uri", &uri)
            .build()
            .context("failed to create uridecodebin")?;
        let convert = gst::ElementFactory::make("videoconvert")
            .name("convert")
            .build()
            .context("failed to create videoconvert")?;
        let scale = gst::ElementFactory::make("videoscale")
            .name("scale")
            .build()
            .context("failed to create videoscale")?;
        let appsink = gst_app::AppSink::builder()
            .name("sink")
            .caps(
                &gst_video::VideoCapsBuilder::new()
                    .format(gst_video::VideoFormat::Rgba)
                    .build(),
            )
            .build();

        pipeline
            .add_many([&src, &convert, &scale, appsink.upcast_ref()])
            .context("failed to add elements to pipeline")?;
        gst::Element::link_many([&convert, &scale, appsink.upcast_ref()])
            .context("failed to link elements")?;

        // uridecodebin exposes pads dynamically; link only the video pad.
        let convert_weak = convert.downgrade();
        src.connect_pad_added(move |_src, src_pad| {
            let Some(convert) = convert_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = convert.static_pad("sink") else {
                return;
            };
            if sink_pad.is_linked() {
                return;
            }
            let caps = src_pad
                .current_caps()
                .unwrap_or_else(|| src_pad.query_caps(None));
            let is_video = caps
                .structure(0)
                .map(|s| s.name().starts_with("video/"))
                .unwrap_or(false);
            if is_video {
                if let Err(e) = src_pad.link(&sink_pad) {
                    tracing::error!("failed to link video pad: {e:?}");
                }
            }
        });

        let latest_frame = Arc::new(Mutex::new(None::<PooledFrame>));
        let frame_interval = Arc::new(Mutex::new(Duration::from_millis(33)));
        let frame_slot = latest_frame.clone();
        let interval_slot = frame_interval.clone();
        let frame_pool = pool.clone();

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let caps = sample.caps().ok_or(gst::FlowError::Error)?;
                    let info = gst_video::VideoInfo::from_caps(caps)
                        .map_err(|_| gst::FlowError::Error)?;

                    let fps = info.fps();
                    if fps.numer() > 0 {
                        *interval_slot.lock().unwrap() =
                            Duration::from_secs_f64(fps.denom() as f64 / fps.numer() as f64);
                    }

                    let width = info.width();
                    let height = info.height();
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                    // Copy into a pooled surface; the previous frame's lease
                    // is dropped here and its buffer returns to the pool.
                    let mut surface = frame_pool.acquire(width, height);
                    let len = surface.len().min(map.len());
                    surface[..len].copy_from_slice(&map.as_slice()[..len]);
                    *frame_slot.lock().unwrap() = Some(PooledFrame {
                        surface,
                        width,
                        height,
                    });

                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let bus = pipeline.bus().context("pipeline has no bus")?;

        Ok(Self {
            pipeline,
            bus,
            latest_frame,
            frame_interval,
            eos_reached: AtomicBool::new(false),
        })
    }

    pub fn play(&self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .context("failed to set pipeline to playing")?;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Null)
            .context("failed to set pipeline to null")?;
        // Release the last frame's surface back to the pool.
        self.latest_frame.lock().unwrap().take();
        Ok(())
    }

    /// Take the newest decoded frame, if one arrived since the last take.
    /// The caller presents it and drops the lease.
    pub fn take_frame(&self) -> Option<PooledFrame> {
        self.latest_frame.lock().unwrap().take()
    }

    /// Target interval between frames, from the negotiated caps.
    pub fn frame_interval(&self) -> Duration {
        *self.frame_interval.lock().unwrap()
    }

    /// End of stream or a fatal pipeline error.
    ///
    /// Drains pending bus messages on each call; no glib main loop runs in
    /// this process, so the bus is polled rather than watched.
    pub fn is_eos(&self) -> bool {
        while let Some(msg) = self.bus.pop() {
            match msg.view() {
                gst::MessageView::Eos(_) => {
                    self.eos_reached.store(true, Ordering::SeqCst);
                }
                gst::MessageView::Error(err) => {
                    tracing::error!("GStreamer error: {} ({:?})", err.error(), err.debug());
                    self.eos_reached.store(true, Ordering::SeqCst);
                }
                _ => {}
            }
        }
        self.eos_reached.load(Ordering::SeqCst)
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
