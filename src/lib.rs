//! Media kiosk core: keeps a local mirror of a remote media folder and plays
//! it on a schedule.
//!
//! The pieces compose left to right: a [`provider::RemoteProvider`] feeds the
//! [`sync::SyncEngine`], which maintains the cache directory scanned by
//! [`manifest`]; the [`player::Player`] walks that manifest under the
//! [`scheduler::Scheduler`]'s state machine, decoding through the
//! [`cache::MediaCache`] and recycling video frame buffers through the
//! [`pool::SurfacePool`].

pub mod cache;
pub mod display;
pub mod error;
pub mod manifest;
pub mod media;
pub mod player;
pub mod pool;
pub mod provider;
pub mod scheduler;
pub mod settings;
pub mod supervisor;
pub mod sync;
pub mod timesync;
pub mod video;
