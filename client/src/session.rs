//! Per-process client session: routes server messages into the prediction
//! engine and remote cache, and drives one frame of local simulation.

use crate::game::PredictionEngine;
use crate::input::{InputSampler, RawInput};
use crate::network::{Transport, TransportConfig};
use crate::remote::RemoteCache;
use log::{debug, info};
use rand::Rng;
use shared::{Action, ArenaBounds, ClientMessage, EntityId, EntitySnapshot, ServerMessage};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::time::{interval, MissedTickBehavior};

/// Upper bound on the elapsed time fed into a single frame.
pub const MAX_FRAME_DT: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub name: Option<String>,
    pub prediction_enabled: bool,
    pub reconciliation_enabled: bool,
    pub interpolation_enabled: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            name: None,
            prediction_enabled: true,
            reconciliation_enabled: true,
            interpolation_enabled: true,
        }
    }
}

/// Read-only pose handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPose {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub facing: f32,
    pub action: Action,
    pub local: bool,
}

pub struct Session {
    pub transport: Transport,
    pub sampler: InputSampler,
    pub engine: PredictionEngine,
    pub remotes: RemoteCache,
    local_id: Option<EntityId>,
    options: SessionOptions,
    last_open_count: u64,
}

impl Session {
    pub fn new(config: TransportConfig, options: SessionOptions, runtime: Handle) -> Self {
        let mut engine = PredictionEngine::new(ArenaBounds::default());
        engine.prediction_enabled = options.prediction_enabled;
        engine.reconciliation_enabled = options.reconciliation_enabled;

        let mut remotes = RemoteCache::new();
        remotes.interpolation_enabled = options.interpolation_enabled;

        Self {
            transport: Transport::new(config, runtime),
            sampler: InputSampler::new(),
            engine,
            remotes,
            local_id: None,
            options,
            last_open_count: 0,
        }
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn start(&mut self) {
        self.transport.connect();
    }

    /// Drains the transport and applies every inbound message.
    pub fn pump(&mut self) {
        let messages = self.transport.pump();

        if self.transport.opened_count() != self.last_open_count {
            self.last_open_count = self.transport.opened_count();
            if let Some(name) = self.options.name.clone() {
                self.transport.send(&ClientMessage::SetName { name });
            }
        }

        for message in &messages {
            self.handle_message(message);
        }
    }

    pub fn handle_message(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Welcome {
                id,
                players,
                arena_radius,
            } => {
                info!("Welcome! Player ID: {}", id);
                self.local_id = Some(id.clone());
                self.engine.arena = ArenaBounds::new(*arena_radius);
                self.remotes.clear();
                if let Some(local) = players.iter().find(|p| &p.id == id) {
                    self.engine.reset_to(local);
                }
                self.remotes.apply_broadcast(players, Some(id.as_str()));
            }

            ServerMessage::State { players } => {
                if let Some(local) = self.local_snapshot(players) {
                    self.engine.reconcile(local);
                }
                self.remotes
                    .apply_broadcast(players, self.local_id.as_deref());
            }

            ServerMessage::PlayerJoined { player } => {
                if Some(player.id.as_str()) != self.local_id.as_deref() {
                    debug!("Player joined: {}", player.id);
                    self.remotes.upsert(player);
                }
            }

            ServerMessage::PlayerLeft { id } => {
                if Some(id.as_str()) == self.local_id.as_deref() {
                    debug!("Ignoring playerLeft for the local player");
                } else {
                    debug!("Player left: {}", id);
                    self.remotes.remove(id);
                }
            }

            ServerMessage::Respawn { id, x, y, z } => {
                if Some(id.as_str()) == self.local_id.as_deref() {
                    info!("Respawned at ({:.1}, {:.1}, {:.1})", x, y, z);
                    self.engine.respawn(*x, *y, *z);
                } else {
                    self.remotes.snap(id, *x, *y, *z);
                }
            }

            // Effects are only routed to registered handlers.
            ServerMessage::Hit { .. } | ServerMessage::Kill { .. } => {}
        }
    }

    fn local_snapshot<'a>(&self, players: &'a [EntitySnapshot]) -> Option<&'a EntitySnapshot> {
        let id = self.local_id.as_deref()?;
        players.iter().find(|p| p.id == id)
    }

    /// Runs one frame: prediction for the local player, then remote smoothing.
    pub fn frame(&mut self, raw: &RawInput, dt: f32) {
        let dt = dt.clamp(0.0, MAX_FRAME_DT);
        let sample = self.sampler.sample(raw, dt);

        if self.local_id.is_some() {
            let intents = self.sampler.take_intents();
            if !intents.is_empty() {
                debug!("Intents {:?}", intents);
            }
            let output = self.engine.tick(sample, intents, dt);
            self.transport.send_throttled(&output.movement);
            for intent in &output.intents {
                self.transport.send(intent);
            }
        }

        self.remotes.interpolate(dt);
    }

    /// Current poses, local player first.
    pub fn poses(&self) -> Vec<EntityPose> {
        let mut poses = Vec::with_capacity(self.remotes.len() + 1);

        if let Some(id) = &self.local_id {
            let pose = &self.engine.pose;
            poses.push(EntityPose {
                id: id.clone(),
                x: pose.x,
                y: pose.y,
                z: pose.z,
                facing: pose.facing,
                action: self.engine.action(),
                local: true,
            });
        }

        for (id, entity) in self.remotes.iter() {
            poses.push(EntityPose {
                id: id.clone(),
                x: entity.pose.x,
                y: entity.pose.y,
                z: entity.pose.z,
                facing: entity.pose.facing,
                action: entity.action(),
                local: false,
            });
        }

        poses
    }

    /// Headless frame loop driven by `bot`. Runs until `duration` elapses,
    /// or forever when it is `None`.
    pub async fn run(&mut self, bot: &mut Bot, tick_rate: u32, duration: Option<Duration>) {
        let mut frame_interval = interval(Duration::from_secs_f32(1.0 / tick_rate.max(1) as f32));
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut status_interval = interval(Duration::from_secs(5));

        self.start();
        let started = Instant::now();
        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                _ = frame_interval.tick() => {
                    let now = Instant::now();
                    let dt = (now - last_frame).as_secs_f32();
                    last_frame = now;

                    self.pump();
                    let raw = bot.next(dt);
                    self.frame(&raw, dt);
                },

                _ = status_interval.tick() => {
                    let pose = &self.engine.pose;
                    info!(
                        "link={:?} pos=({:.2}, {:.2}, {:.2}) pending={} remotes={}",
                        self.transport.state(),
                        pose.x,
                        pose.y,
                        pose.z,
                        self.engine.pending.len(),
                        self.remotes.len()
                    );
                },
            }

            if duration.is_some_and(|limit| started.elapsed() >= limit) {
                break;
            }
        }
    }
}

/// Wandering input source standing in for a human at the keyboard.
pub struct Bot {
    raw: RawInput,
    until_change: f32,
}

impl Bot {
    pub fn new() -> Self {
        Self {
            raw: RawInput::default(),
            until_change: 0.0,
        }
    }

    pub fn next(&mut self, dt: f32) -> RawInput {
        let mut rng = rand::thread_rng();

        self.until_change -= dt;
        if self.until_change <= 0.0 {
            self.until_change = rng.gen_range(1.0..4.0);
            self.raw.forward = rng.gen_bool(0.7);
            self.raw.back = !self.raw.forward && rng.gen_bool(0.3);
            self.raw.left = rng.gen_bool(0.25);
            self.raw.right = !self.raw.left && rng.gen_bool(0.25);
            self.raw.block = rng.gen_bool(0.15);
        }

        self.raw.yaw += rng.gen_range(-1.0..1.0) * dt;
        self.raw.attack = rng.gen_bool(0.02);
        self.raw.jump = rng.gen_bool(0.01);
        self.raw.dodge = rng.gen_bool(0.005);

        self.raw
    }
}

impl Default for Bot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn session() -> Session {
        let config = TransportConfig {
            url: "ws://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        Session::new(config, SessionOptions::default(), Handle::current())
    }

    fn welcome() -> ServerMessage {
        ServerMessage::Welcome {
            id: "me".into(),
            players: vec![
                EntitySnapshot::new("me", 1.0, 0.0, 1.0),
                EntitySnapshot::new("other", -3.0, 0.0, 2.0),
            ],
            arena_radius: 30.0,
        }
    }

    fn forward() -> RawInput {
        RawInput {
            forward: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_no_prediction_before_identity() {
        let mut session = session();
        session.frame(&forward(), 0.016);
        assert!(session.engine.pending.is_empty());
        assert!(session.poses().is_empty());
    }

    #[tokio::test]
    async fn test_welcome_establishes_identity() {
        let mut session = session();
        session.handle_message(&welcome());

        assert_eq!(session.local_id(), Some("me"));
        assert_eq!(session.engine.arena.radius, 30.0);
        assert_eq!((session.engine.pose.x, session.engine.pose.z), (1.0, 1.0));
        assert_eq!(session.remotes.len(), 1);

        let poses = session.poses();
        assert_eq!(poses.len(), 2);
        assert!(poses[0].local);
        assert_eq!(poses[1].id, "other");
    }

    #[tokio::test]
    async fn test_frames_predict_while_disconnected() {
        let mut session = session();
        session.handle_message(&welcome());

        for _ in 0..10 {
            session.frame(&forward(), 0.05);
        }
        assert_eq!(session.engine.pending.len(), 10);
        assert!(session.engine.pose.z < 1.0);
    }

    #[tokio::test]
    async fn test_state_reconciles_local_and_updates_remotes() {
        let mut session = session();
        session.handle_message(&welcome());

        for _ in 0..4 {
            session.frame(&forward(), 0.1);
        }

        let mut me = EntitySnapshot::new("me", 0.0, 0.0, 0.0);
        me.last_seq = 4;
        let other = EntitySnapshot::new("other", 5.0, 0.0, 5.0);
        session.handle_message(&ServerMessage::State {
            players: vec![me, other],
        });

        assert!(session.engine.pending.is_empty());
        assert_eq!((session.engine.pose.x, session.engine.pose.z), (0.0, 0.0));
        assert_eq!(session.remotes.get("other").unwrap().snapshot.x, 5.0);
    }

    #[tokio::test]
    async fn test_local_respawn_resets_prediction() {
        let mut session = session();
        session.handle_message(&welcome());
        for _ in 0..5 {
            session.frame(&forward(), 0.05);
        }

        session.handle_message(&ServerMessage::Respawn {
            id: "me".into(),
            x: 4.0,
            y: 0.0,
            z: -4.0,
        });
        assert!(session.engine.pending.is_empty());
        assert_approx_eq!(session.engine.pose.x, 4.0);
        assert_approx_eq!(session.engine.pose.z, -4.0);
    }

    #[tokio::test]
    async fn test_player_join_and_leave() {
        let mut session = session();
        session.handle_message(&welcome());

        session.handle_message(&ServerMessage::PlayerJoined {
            player: EntitySnapshot::new("new", 0.0, 0.0, 0.0),
        });
        assert!(session.remotes.get("new").is_some());

        session.handle_message(&ServerMessage::PlayerLeft { id: "new".into() });
        assert!(session.remotes.get("new").is_none());
    }

    #[tokio::test]
    async fn test_local_player_left_keeps_identity() {
        let mut session = session();
        session.handle_message(&welcome());

        session.handle_message(&ServerMessage::PlayerLeft { id: "me".into() });
        assert_eq!(session.local_id(), Some("me"));
        assert_eq!(session.remotes.len(), 1);
        assert_eq!(session.poses().len(), 2);
    }

    #[test]
    fn test_bot_produces_bounded_input() {
        let mut bot = Bot::new();
        for _ in 0..600 {
            let raw = bot.next(1.0 / 60.0);
            assert!(!(raw.forward && raw.back));
            assert!(!(raw.left && raw.right));
        }
    }
}
