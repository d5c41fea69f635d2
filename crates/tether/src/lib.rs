//! Playback continuity for segmented streams.
//!
//! ```text
//! ┌──────────────┐  Command   ┌───────────────────────────────────────────┐
//! │  UI / page   ├────────────►                  Player                   │
//! └──────────────┘            │  ┌─────────────────────────────────────┐  │
//! ┌──────────────┐  Signal    │  │ Controller                          │  │
//! │   Surface    ├────────────►  │   ContinuityEngine (one per item)   │  │
//! │ (decoder)    ◄────────────┤  │   Timeline · MotionGuard · Stall    │  │
//! └──────────────┘  attach/   │  │   SessionManager                    │  │
//!                   seek/...  │  └──────────────┬──────────────────────┘  │
//!                             │                 │ Effect                  │
//!                             │         ┌───────▼────────┐                │
//!                             │         │  spawned I/O   ├──► RemoteApi   │
//!                             │         └───────┬────────┘                │
//!                             │                 │ Completion              │
//!                             └─────────────────┴─────────────────────────┘
//! ```
//!
//! The engine itself never awaits anything; the [`player::Player`] runs it on
//! a single task and turns its effects into network calls.

pub mod api;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod guard;
pub mod player;
pub mod progress;
pub mod session;
pub mod stall;
pub mod surface;
pub mod timeline;

pub use api::{HttpApi, HttpClient, MediaInfo, ProbeApi, ProgressApi, RemoteApi, TranscodeApi};
pub use config::ContinuityConfig;
pub use controller::{Completion, Controller, Disposition, PlaybackId};
pub use engine::{ContinuityEngine, Effect, Event, PlaybackItem, PlaybackStatus};
pub use error::{TetherError, TetherResult};
pub use player::{Command, Player, PlayerHandle, PlayerState};
pub use session::{SessionHandle, SessionOptions};
pub use surface::{LoadToken, PlaybackError, Signal, Surface};
