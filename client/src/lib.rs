//! # Arena Client Library
//!
//! Client half of a real-time arena game: everything between the local
//! player's input devices and the server's authoritative snapshots. Rendering,
//! animation, audio and HUD live outside this crate and only read the poses it
//! exposes.
//!
//! ## Architecture Overview
//!
//! The server is the sole authority for health, stamina, combat, scoring and
//! the action tag of every entity. The client only speculates about one thing:
//! where the local player is standing.
//!
//! ### Client-Side Prediction
//! Every frame the sampled movement is applied to the local pose immediately,
//! using the same kinematics the server runs (`shared::step_horizontal`),
//! and recorded with a fresh sequence number.
//!
//! ### Server Reconciliation
//! When a snapshot arrives, inputs the server has already consumed (sequence
//! `<= lastSeq`) are discarded, the pose is rebased on the authoritative
//! position and the remaining inputs are replayed with their recorded facing
//! and duration.
//!
//! ### Remote Interpolation
//! Other players are never predicted. Their visual pose chases the latest
//! snapshot exponentially to hide the broadcast rate.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - One WebSocket link carrying JSON text frames, owned by a tokio task
//! - Reconnect with doubling backoff, reset on a successful open
//! - Type-routed inbound handlers, malformed frames dropped
//! - Best-effort sends and a throttled path for `move`
//!
//! ### Input Module (`input`)
//! - Smoothed, unit-bounded movement axes
//! - Edge-triggered one-shot intents consumed exactly once
//!
//! ### Game Module (`game`)
//! - Predicted pose and pending-input queue
//! - `tick` / `reconcile` / `respawn`
//!
//! ### Remote Module (`remote`)
//! - Latest snapshot per remote entity and its smoothed visual pose
//!
//! ### Session Module (`session`)
//! - Routes server messages into the game and remote modules
//! - Per-frame update and the headless run loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::RawInput;
//! use client::network::TransportConfig;
//! use client::session::{Session, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut session = Session::new(
//!         TransportConfig::default(),
//!         SessionOptions::default(),
//!         tokio::runtime::Handle::current(),
//!     );
//!     session.start();
//!
//!     loop {
//!         session.pump();
//!         session.frame(&RawInput::default(), 1.0 / 60.0);
//!         for pose in session.poses() {
//!             // hand to the renderer
//!             let _ = pose;
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//!     }
//! }
//! ```
//!
//! ## Design Philosophy
//!
//! ### Responsiveness First
//! Input is applied locally before anything is sent, and a jump lifts the
//! player on the same frame the key is pressed.
//!
//! ### Never Authoritative
//! Predicted state is provisional. It is rebuilt from every snapshot and never
//! merged into server values.
//!
//! ### Graceful Degradation
//! - Link loss: sends become no-ops, prediction continues, reconnect in background
//! - Corrupt frames: dropped without reaching any handler
//! - No identity yet: the frame skips prediction

pub mod game;
pub mod input;
pub mod network;
pub mod remote;
pub mod session;
