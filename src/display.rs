//! Display sink capability.
//!
//! The compositor is an external collaborator: the core only hands it
//! decoded pixel buffers plus fully resolved source and destination
//! rectangles. Scale-mode math (letterbox, crop) happens before this seam.

use crate::media::Rect;
use anyhow::Result;

pub trait DisplaySink: Send {
    /// Present the `src` region of a tightly packed RGBA buffer at `dest`.
    fn present(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        src: Rect,
        dest: Rect,
    ) -> Result<()>;

    /// Blank the screen (SLEEPING state).
    fn blank(&mut self) -> Result<()>;

    /// Show the pre-sleep countdown to the user.
    fn show_countdown(&mut self, remaining_secs: u64) -> Result<()>;

    fn dimensions(&self) -> (u32, u32);
}

/// Headless sink recording what was presented. Used by tests and when no
/// compositor is attached.
#[derive(Debug, Default)]
pub struct NullSink {
    pub presented: Vec<(Rect, Rect)>,
    pub blanks: usize,
    pub countdowns: Vec<u64>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySink for NullSink {
    fn present(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        src: Rect,
        dest: Rect,
    ) -> Result<()> {
        self.presented.push((src, dest));
        Ok(())
    }

    fn blank(&mut self) -> Result<()> {
        self.blanks += 1;
        Ok(())
    }

    fn show_countdown(&mut self, remaining_secs: u64) -> Result<()> {
        self.countdowns.push(remaining_secs);
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        (1920, 1080)
    }
}
