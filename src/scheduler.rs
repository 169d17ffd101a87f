//! Playback scheduler: the state machine governing when media is shown.
//!
//! States: WAITING_FOR_MEDIA (cache dir empty), COUNTDOWN (startup outside
//! the active window, fixed 60 s grace shown to the user), ACTIVE (playing),
//! SLEEPING (display blanked outside the window). The machine has no terminal
//! state; it runs for the process lifetime and a SLEEPING period preserves
//! the playback position so waking resumes rather than restarts.

use crate::settings::{parse_clock_time, parse_day, ScheduleSettings};
use anyhow::Result;
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Timelike, Utc, Weekday};
use std::time::{Duration, Instant};

/// Grace period shown before sleeping when the kiosk starts outside the
/// active window.
pub const COUNTDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    WaitingForMedia,
    Countdown { deadline: Instant },
    Active,
    Sleeping,
}

/// The configured time-of-day/day-of-week range during which playback runs.
#[derive(Debug, Clone)]
pub struct ActiveWindow {
    enabled: bool,
    days: Vec<Weekday>,
    start: NaiveTime,
    stop: NaiveTime,
    offset: FixedOffset,
}

impl ActiveWindow {
    pub fn from_settings(schedule: &ScheduleSettings, timezone_offset_hours: i32) -> Result<Self> {
        let days = schedule
            .days
            .iter()
            .map(|d| parse_day(d))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            enabled: schedule.enabled,
            days,
            start: parse_clock_time(&schedule.start)?,
            stop: parse_clock_time(&schedule.stop)?,
            offset: FixedOffset::east_opt(timezone_offset_hours * 3600)
                .ok_or_else(|| anyhow::anyhow!("timezone offset out of range"))?,
        })
    }

    /// An always-open window (scheduling disabled).
    pub fn always(timezone_offset_hours: i32) -> Self {
        Self {
            enabled: false,
            days: Vec::new(),
            start: NaiveTime::MIN,
            stop: NaiveTime::MIN,
            offset: FixedOffset::east_opt(timezone_offset_hours * 3600)
                .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap()),
        }
    }

    /// Whether `now` falls inside the window. A stop before start wraps past
    /// midnight and is keyed on the start day; a disabled schedule is always
    /// inside.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let local = now.with_timezone(&self.offset);
        let time = local.time();
        let today = local.weekday();

        if self.start <= self.stop {
            self.days.contains(&today) && time >= self.start && time < self.stop
        } else {
            // Overnight span: tonight's leg on the start day, this morning's
            // leg on the day after a configured start day.
            (self.days.contains(&today) && time >= self.start)
                || (self.days.contains(&today.pred()) && time < self.stop)
        }
    }
}

/// State machine over the schedule, wall clock, and manifest emptiness.
pub struct Scheduler {
    window: ActiveWindow,
    state: ScheduleState,
    /// Latest playback position, reported by the playback loop.
    position: usize,
    /// Position captured on the ACTIVE -> SLEEPING edge; consumed on wake.
    resume_index: Option<usize>,
}

impl Scheduler {
    pub fn new(window: ActiveWindow) -> Self {
        Self {
            window,
            state: ScheduleState::WaitingForMedia,
            position: 0,
            resume_index: None,
        }
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Record the current playback position so a later sleep can resume it.
    pub fn note_position(&mut self, index: usize) {
        self.position = index;
    }

    /// Take the resume position recorded when the window last closed.
    pub fn take_resume_index(&mut self) -> Option<usize> {
        self.resume_index.take()
    }

    /// Seconds left on the countdown, surfaced to the display.
    pub fn countdown_remaining(&self, mono_now: Instant) -> Option<Duration> {
        match self.state {
            ScheduleState::Countdown { deadline } => {
                Some(deadline.saturating_duration_since(mono_now))
            }
            _ => None,
        }
    }

    /// Advance the machine one tick. Pure with respect to its inputs:
    /// wall-clock time, monotonic time, and manifest emptiness.
    pub fn evaluate(
        &mut self,
        now: DateTime<Utc>,
        mono_now: Instant,
        manifest_empty: bool,
    ) -> ScheduleState {
        self.state = match self.state {
            ScheduleState::WaitingForMedia => {
                if manifest_empty {
                    ScheduleState::WaitingForMedia
                } else if self.window.contains(now) {
                    ScheduleState::Active
                } else {
                    ScheduleState::Countdown { deadline: mono_now + COUNTDOWN }
                }
            }
            ScheduleState::Countdown { deadline } => {
                if manifest_empty {
                    ScheduleState::WaitingForMedia
                } else if self.window.contains(now) {
                    ScheduleState::Active
                } else if mono_now >= deadline {
                    ScheduleState::Sleeping
                } else {
                    ScheduleState::Countdown { deadline }
                }
            }
            ScheduleState::Active => {
                if manifest_empty {
                    ScheduleState::WaitingForMedia
                } else if self.window.contains(now) {
                    ScheduleState::Active
                } else {
                    self.resume_index = Some(self.position);
                    ScheduleState::Sleeping
                }
            }
            ScheduleState::Sleeping => {
                if manifest_empty {
                    ScheduleState::WaitingForMedia
                } else if self.window.contains(now) {
                    ScheduleState::Active
                } else {
                    ScheduleState::Sleeping
                }
            }
        };
        self.state
    }
}

/// Wait between video frames, clamped to a minimum positive sleep.
///
/// When decoding a frame overruns the target interval the loop must not
/// busy-spin with a zero wait, nor sleep a full interval and stall playback.
pub fn frame_wait(target: Duration, elapsed: Duration) -> Duration {
    const MIN_WAIT: Duration = Duration::from_millis(1);
    target.saturating_sub(elapsed).max(MIN_WAIT)
}
