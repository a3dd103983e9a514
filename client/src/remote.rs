//! Remote entity cache: latest authoritative snapshot per remote player and an
//! exponentially smoothed visual pose chasing it.

use log::debug;
use shared::{Action, EntityId, EntitySnapshot};
use std::collections::HashMap;
use std::f32::consts::{PI, TAU};

pub const REMOTE_LERP_RATE: f32 = 10.0;
/// Consecutive broadcasts an entity may be missing from before teardown.
pub const REMOTE_MISS_LIMIT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VisualPose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub facing: f32,
}

impl VisualPose {
    fn from_snapshot(snapshot: &EntitySnapshot) -> Self {
        Self {
            x: snapshot.x,
            y: snapshot.y,
            z: snapshot.z,
            facing: snapshot.rotation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteEntity {
    pub snapshot: EntitySnapshot,
    pub pose: VisualPose,
    missed: u32,
}

impl RemoteEntity {
    pub fn action(&self) -> Action {
        self.snapshot.action
    }
}

pub struct RemoteCache {
    entities: HashMap<EntityId, RemoteEntity>,
    lerp_rate: f32,
    pub interpolation_enabled: bool,
}

impl RemoteCache {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            lerp_rate: REMOTE_LERP_RATE,
            interpolation_enabled: true,
        }
    }

    pub fn get(&self, id: &str) -> Option<&RemoteEntity> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &RemoteEntity)> {
        self.entities.iter()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    /// Stores a snapshot, creating the entity on first sight.
    pub fn upsert(&mut self, snapshot: &EntitySnapshot) {
        match self.entities.get_mut(&snapshot.id) {
            Some(entity) => {
                entity.snapshot = snapshot.clone();
                entity.missed = 0;
            }
            None => {
                debug!("Tracking remote entity {}", snapshot.id);
                self.entities.insert(
                    snapshot.id.clone(),
                    RemoteEntity {
                        snapshot: snapshot.clone(),
                        pose: VisualPose::from_snapshot(snapshot),
                        missed: 0,
                    },
                );
            }
        }
    }

    /// Applies a full broadcast. `local_id` is skipped; entities missing from
    /// [`REMOTE_MISS_LIMIT`] consecutive broadcasts are torn down.
    pub fn apply_broadcast(&mut self, players: &[EntitySnapshot], local_id: Option<&str>) {
        for entity in self.entities.values_mut() {
            entity.missed += 1;
        }

        for snapshot in players {
            if Some(snapshot.id.as_str()) == local_id {
                continue;
            }
            self.upsert(snapshot);
        }

        self.entities.retain(|id, entity| {
            let keep = entity.missed < REMOTE_MISS_LIMIT;
            if !keep {
                debug!("Remote entity {} vanished", id);
            }
            keep
        });
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entities.remove(id).is_some()
    }

    /// Teleports an entity's visual pose (respawn).
    pub fn snap(&mut self, id: &str, x: f32, y: f32, z: f32) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.snapshot.x = x;
            entity.snapshot.y = y;
            entity.snapshot.z = z;
            entity.pose.x = x;
            entity.pose.y = y;
            entity.pose.z = z;
        }
    }

    /// Moves every visual pose toward its latest snapshot.
    pub fn interpolate(&mut self, dt: f32) {
        let alpha = if self.interpolation_enabled {
            (self.lerp_rate * dt).min(1.0)
        } else {
            1.0
        };

        for entity in self.entities.values_mut() {
            let target = &entity.snapshot;
            let pose = &mut entity.pose;
            pose.x += (target.x - pose.x) * alpha;
            pose.y += (target.y - pose.y) * alpha;
            pose.z += (target.z - pose.z) * alpha;
            pose.facing += shortest_angle(pose.facing, target.rotation) * alpha;
        }
    }
}

impl Default for RemoteCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Signed angular difference `to - from` wrapped into [-PI, PI).
fn shortest_angle(from: f32, to: f32) -> f32 {
    (to - from + PI).rem_euclid(TAU) - PI
}
