use crate::input::{InputSample, Intents};
use log::{debug, trace};
use shared::{
    step_horizontal, step_vertical, Action, ArenaBounds, ClientMessage, EntitySnapshot, MoveAxes,
    GROUND_Y, JUMP_EPSILON, JUMP_VELOCITY,
};
use std::collections::VecDeque;

/// Pending inputs kept when acknowledgements stop arriving (~2 s at 60 Hz).
pub const MAX_PENDING_INPUTS: usize = 120;

/// One sampled tick of local input, kept until the server acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputRecord {
    pub sequence: u32,
    pub axes: MoveAxes,
    pub facing: f32,
    pub dt: f32,
}

impl InputRecord {
    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::Move {
            seq: self.sequence,
            forward: self.axes.forward,
            right: self.axes.right,
            facing: self.facing,
            dt: self.dt,
        }
    }
}

/// Speculative pose of the local player.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PredictedPose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub facing: f32,
    pub vel_y: f32,
}

impl PredictedPose {
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> Self {
        Self {
            x: snapshot.x,
            y: snapshot.y,
            z: snapshot.z,
            facing: snapshot.rotation,
            vel_y: 0.0,
        }
    }

    pub fn is_airborne(&self) -> bool {
        self.vel_y != 0.0 || self.y > GROUND_Y
    }
}

/// Messages produced by one prediction tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    /// Goes through the throttled send path.
    pub movement: ClientMessage,
    /// One-shot intents, sent unthrottled.
    pub intents: Vec<ClientMessage>,
}

/// Local-player prediction state: owned exclusively by the frame loop.
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    pub pose: PredictedPose,
    pub pending: VecDeque<InputRecord>,
    pub next_sequence: u32,
    /// Latest authoritative snapshot of the local player.
    pub authoritative: Option<EntitySnapshot>,
    pub arena: ArenaBounds,
    pub prediction_enabled: bool,
    pub reconciliation_enabled: bool,
}

impl PredictionEngine {
    pub fn new(arena: ArenaBounds) -> Self {
        Self {
            pose: PredictedPose::default(),
            pending: VecDeque::with_capacity(MAX_PENDING_INPUTS),
            next_sequence: 1,
            authoritative: None,
            arena,
            prediction_enabled: true,
            reconciliation_enabled: true,
        }
    }

    /// Server action tag currently applied to the local player.
    pub fn action(&self) -> Action {
        self.authoritative
            .as_ref()
            .map(|s| s.action)
            .unwrap_or_default()
    }

    /// Advances the speculative pose by one frame of input and records it.
    pub fn tick(&mut self, sample: InputSample, intents: Intents, dt: f32) -> TickOutput {
        let action = self.action();
        self.pose.facing = sample.facing;

        if self.prediction_enabled {
            let (x, z) = step_horizontal(
                self.pose.x,
                self.pose.z,
                sample.axes,
                sample.facing,
                dt,
                action,
                &self.arena,
            );
            self.pose.x = x;
            self.pose.z = z;

            if self.pose.is_airborne() {
                let (y, vel_y) = step_vertical(self.pose.y, self.pose.vel_y, dt);
                self.pose.y = y;
                self.pose.vel_y = vel_y;
            }

            if intents.jump && !self.pose.is_airborne() && action.permits_movement() {
                self.pose.vel_y = JUMP_VELOCITY;
                self.pose.y = GROUND_Y + JUMP_EPSILON;
            }
        }

        let record = InputRecord {
            sequence: self.next_sequence,
            axes: sample.axes,
            facing: sample.facing,
            dt,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.pending.push_back(record);
        while self.pending.len() > MAX_PENDING_INPUTS {
            self.pending.pop_front();
        }

        trace!(
            "Tick seq={} pos=({:.2}, {:.2}, {:.2}) pending={}",
            record.sequence,
            self.pose.x,
            self.pose.y,
            self.pose.z,
            self.pending.len()
        );

        TickOutput {
            movement: record.to_message(),
            intents: intents.messages(),
        }
    }

    /// Rebases the prediction on a fresh authoritative snapshot and replays
    /// every input the server has not consumed yet.
    pub fn reconcile(&mut self, snapshot: &EntitySnapshot) {
        self.pending.retain(|input| input.sequence > snapshot.last_seq);
        self.authoritative = Some(snapshot.clone());

        if !self.prediction_enabled {
            self.pose.x = snapshot.x;
            self.pose.z = snapshot.z;
            self.pose.y = snapshot.y;
            self.pose.vel_y = 0.0;
            return;
        }
        if !self.reconciliation_enabled {
            return;
        }

        let before = (self.pose.x, self.pose.z);
        let (x, z) = replay(
            snapshot.x,
            snapshot.z,
            self.pending.iter(),
            snapshot.action,
            &self.arena,
        );
        self.pose.x = x;
        self.pose.z = z;

        if self.pose.vel_y == 0.0 {
            self.pose.y = snapshot.y;
        }

        let correction = ((before.0 - x).powi(2) + (before.1 - z).powi(2)).sqrt();
        if correction > 1.0 {
            debug!(
                "Large correction {:.2} after lastSeq={}",
                correction, snapshot.last_seq
            );
        }
    }

    /// Hard reset to a respawn (or welcome) position. Stale inputs are dropped.
    pub fn respawn(&mut self, x: f32, y: f32, z: f32) {
        self.pending.clear();
        let facing = self.pose.facing;
        self.pose = PredictedPose {
            x,
            y,
            z,
            facing,
            vel_y: 0.0,
        };
    }

    /// Identity established: adopt the snapshot wholesale.
    pub fn reset_to(&mut self, snapshot: &EntitySnapshot) {
        self.pending.clear();
        self.pose = PredictedPose::from_snapshot(snapshot);
        self.authoritative = Some(snapshot.clone());
    }
}

/// Replays inputs in order from an authoritative baseline.
pub fn replay<'a, I>(x: f32, z: f32, inputs: I, action: Action, arena: &ArenaBounds) -> (f32, f32)
where
    I: IntoIterator<Item = &'a InputRecord>,
{
    let (mut x, mut z) = arena.clamp(x, z);
    if !action.permits_movement() {
        return (x, z);
    }
    for input in inputs {
        (x, z) = step_horizontal(x, z, input.axes, input.facing, input.dt, action, arena);
    }
    (x, z)
}
