use serde::{Deserialize, Serialize};

pub const PLAYER_SPEED: f32 = 8.0;
pub const BLOCK_SPEED_FACTOR: f32 = 0.4;
pub const GRAVITY: f32 = 25.0;
pub const JUMP_VELOCITY: f32 = 9.0;
pub const GROUND_Y: f32 = 0.0;
pub const JUMP_EPSILON: f32 = 0.01;
pub const ARENA_MARGIN: f32 = 0.5;
pub const DEFAULT_ARENA_RADIUS: f32 = 20.0;

pub type EntityId = String;

/// Server-authoritative action tag carried by every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    #[default]
    Idle,
    Moving,
    Attacking,
    Blocking,
    Dodging,
    Jumping,
    /// Any tag this client does not know about yet.
    #[serde(other)]
    Other,
}

impl Action {
    /// Attacking and dodging lock translation on the server.
    pub fn is_commit(self) -> bool {
        matches!(self, Action::Attacking | Action::Dodging)
    }

    pub fn permits_movement(self) -> bool {
        !self.is_commit()
    }

    pub fn speed_factor(self) -> f32 {
        match self {
            Action::Blocking => BLOCK_SPEED_FACTOR,
            Action::Attacking | Action::Dodging => 0.0,
            _ => 1.0,
        }
    }
}

/// Authoritative state of one entity at one server tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub health: f32,
    #[serde(default)]
    pub stamina: f32,
    #[serde(default)]
    pub kills: u32,
    #[serde(default)]
    pub deaths: u32,
    #[serde(default)]
    pub last_seq: u32,
}

impl EntitySnapshot {
    pub fn new(id: impl Into<EntityId>, x: f32, y: f32, z: f32) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            x,
            y,
            z,
            rotation: 0.0,
            action: Action::Idle,
            health: 100.0,
            stamina: 100.0,
            kills: 0,
            deaths: 0,
            last_seq: 0,
        }
    }
}

/// Messages pushed by the arena server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Welcome {
        id: EntityId,
        players: Vec<EntitySnapshot>,
        arena_radius: f32,
    },
    State {
        players: Vec<EntitySnapshot>,
    },
    PlayerJoined {
        player: EntitySnapshot,
    },
    PlayerLeft {
        id: EntityId,
    },
    Respawn {
        id: EntityId,
        x: f32,
        y: f32,
        z: f32,
    },
    #[serde(rename_all = "camelCase")]
    Hit {
        attacker_id: EntityId,
        target_id: EntityId,
        #[serde(default)]
        damage: f32,
        #[serde(default)]
        blocked: bool,
    },
    #[serde(rename_all = "camelCase")]
    Kill {
        killer_id: EntityId,
        victim_id: EntityId,
    },
}

/// Type tag of a [`ServerMessage`], used as the routing key for handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Welcome,
    State,
    PlayerJoined,
    PlayerLeft,
    Respawn,
    Hit,
    Kill,
}

impl ServerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::Welcome { .. } => MessageKind::Welcome,
            ServerMessage::State { .. } => MessageKind::State,
            ServerMessage::PlayerJoined { .. } => MessageKind::PlayerJoined,
            ServerMessage::PlayerLeft { .. } => MessageKind::PlayerLeft,
            ServerMessage::Respawn { .. } => MessageKind::Respawn,
            ServerMessage::Hit { .. } => MessageKind::Hit,
            ServerMessage::Kill { .. } => MessageKind::Kill,
        }
    }

    /// Decodes one text frame. Returns `None` for anything malformed.
    pub fn decode(frame: &str) -> Option<Self> {
        serde_json::from_str(frame).ok()
    }
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Move {
        seq: u32,
        forward: f32,
        right: f32,
        facing: f32,
        dt: f32,
    },
    Attack,
    BlockStart,
    BlockEnd,
    Jump,
    Dodge,
    SetName {
        name: String,
    },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Movement intent relative to the facing direction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveAxes {
    pub forward: f32,
    pub right: f32,
}

impl MoveAxes {
    pub fn new(forward: f32, right: f32) -> Self {
        Self { forward, right }
    }

    pub fn magnitude(&self) -> f32 {
        (self.forward * self.forward + self.right * self.right).sqrt()
    }

    /// Scales the vector back onto the unit circle if it lies outside it.
    pub fn clamped(&self) -> Self {
        let mag = self.magnitude();
        if mag > 1.0 {
            Self {
                forward: self.forward / mag,
                right: self.right / mag,
            }
        } else {
            *self
        }
    }

    /// World-space (x, z) direction for the given facing. Facing 0 looks down -z.
    pub fn to_world(&self, facing: f32) -> (f32, f32) {
        let (sin, cos) = facing.sin_cos();
        let dx = -sin * self.forward + cos * self.right;
        let dz = -cos * self.forward - sin * self.right;
        (dx, dz)
    }

    pub fn is_zero(&self) -> bool {
        self.forward == 0.0 && self.right == 0.0
    }
}

/// Circular arena centred on the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaBounds {
    pub radius: f32,
    pub margin: f32,
}

impl Default for ArenaBounds {
    fn default() -> Self {
        Self::new(DEFAULT_ARENA_RADIUS)
    }
}

impl ArenaBounds {
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            margin: ARENA_MARGIN,
        }
    }

    pub fn limit(&self) -> f32 {
        (self.radius - self.margin).max(0.0)
    }

    pub fn clamp(&self, x: f32, z: f32) -> (f32, f32) {
        let limit = self.limit();
        let dist = (x * x + z * z).sqrt();
        if dist > limit && dist > 0.0 {
            let scale = limit / dist;
            (x * scale, z * scale)
        } else {
            (x, z)
        }
    }
}

/// Horizontal integration shared by live prediction and replay.
pub fn step_horizontal(
    x: f32,
    z: f32,
    axes: MoveAxes,
    facing: f32,
    dt: f32,
    action: Action,
    arena: &ArenaBounds,
) -> (f32, f32) {
    if !action.permits_movement() || axes.is_zero() {
        return arena.clamp(x, z);
    }

    let (dx, dz) = axes.clamped().to_world(facing);
    let speed = PLAYER_SPEED * action.speed_factor();

    arena.clamp(x + dx * speed * dt, z + dz * speed * dt)
}

/// Integrates height under gravity. Returns the new `(y, vel_y)`.
pub fn step_vertical(y: f32, vel_y: f32, dt: f32) -> (f32, f32) {
    if vel_y == 0.0 && y <= GROUND_Y {
        return (GROUND_Y, 0.0);
    }

    let vel_y = vel_y - GRAVITY * dt;
    let y = y + vel_y * dt;

    if y <= GROUND_Y {
        (GROUND_Y, 0.0)
    } else {
        (y, vel_y)
    }
}
