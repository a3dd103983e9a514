//! Input sampling: smoothed movement axes and one-shot action intents

use shared::{ClientMessage, MoveAxes};

/// How quickly the smoothed axes chase the raw device target, per second.
pub const AXIS_SMOOTHING_RATE: f32 = 12.0;

/// Raw device state for one frame, as produced by whatever polls the keyboard,
/// gamepad or a scripted bot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawInput {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub attack: bool,
    pub block: bool,
    pub jump: bool,
    pub dodge: bool,
    /// Camera yaw in radians.
    pub yaw: f32,
}

/// Discrete intents gathered since the last [`InputSampler::take_intents`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Intents {
    pub attack: bool,
    pub block_start: bool,
    pub block_end: bool,
    pub jump: bool,
    pub dodge: bool,
}

impl Intents {
    pub fn is_empty(&self) -> bool {
        *self == Intents::default()
    }

    /// Outbound messages for these intents, in a fixed order.
    pub fn messages(&self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        if self.block_start {
            messages.push(ClientMessage::BlockStart);
        }
        if self.attack {
            messages.push(ClientMessage::Attack);
        }
        if self.jump {
            messages.push(ClientMessage::Jump);
        }
        if self.dodge {
            messages.push(ClientMessage::Dodge);
        }
        if self.block_end {
            messages.push(ClientMessage::BlockEnd);
        }
        messages
    }
}

/// One tick worth of sampled input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSample {
    pub axes: MoveAxes,
    pub facing: f32,
}

/// Turns raw device state into smoothed axes and edge-triggered intents
pub struct InputSampler {
    axes: MoveAxes,
    facing: f32,
    pending: Intents,

    // Previous frame button states for edge detection
    prev_attack: bool,
    prev_block: bool,
    prev_jump: bool,
    prev_dodge: bool,
}

impl InputSampler {
    pub fn new() -> Self {
        Self {
            axes: MoveAxes::default(),
            facing: 0.0,
            pending: Intents::default(),
            prev_attack: false,
            prev_block: false,
            prev_jump: false,
            prev_dodge: false,
        }
    }

    /// Feeds one frame of raw state and returns the smoothed sample.
    pub fn sample(&mut self, raw: &RawInput, dt: f32) -> InputSample {
        let target = Self::target_axes(raw);
        let alpha = (AXIS_SMOOTHING_RATE * dt).clamp(0.0, 1.0);
        self.axes = MoveAxes::new(
            self.axes.forward + (target.forward - self.axes.forward) * alpha,
            self.axes.right + (target.right - self.axes.right) * alpha,
        )
        .clamped();

        // Snap tiny residuals so an idle player stops sending motion.
        if target.is_zero() && self.axes.magnitude() < 1e-3 {
            self.axes = MoveAxes::default();
        }

        self.facing = raw.yaw;

        // Detect press/release events (current && !previous)
        if raw.attack && !self.prev_attack {
            self.pending.attack = true;
        }
        if raw.block && !self.prev_block {
            self.pending.block_start = true;
        }
        if !raw.block && self.prev_block {
            self.pending.block_end = true;
        }
        if raw.jump && !self.prev_jump {
            self.pending.jump = true;
        }
        if raw.dodge && !self.prev_dodge {
            self.pending.dodge = true;
        }

        self.prev_attack = raw.attack;
        self.prev_block = raw.block;
        self.prev_jump = raw.jump;
        self.prev_dodge = raw.dodge;

        InputSample {
            axes: self.axes,
            facing: self.facing,
        }
    }

    /// Returns the pending intents and clears them; each is delivered once.
    pub fn take_intents(&mut self) -> Intents {
        std::mem::take(&mut self.pending)
    }

    fn target_axes(raw: &RawInput) -> MoveAxes {
        let axis = |pos: bool, neg: bool| (pos as i8 - neg as i8) as f32;
        MoveAxes::new(axis(raw.forward, raw.back), axis(raw.right, raw.left)).clamped()
    }
}

impl Default for InputSampler {
    fn default() -> Self {
        Self::new()
    }
}
