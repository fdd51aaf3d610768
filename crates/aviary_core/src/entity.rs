//! # Entity Model
//!
//! A bird is a plain record: identifier, kind, integer position and the
//! two timestamps that decide when it expires. Everything that differs
//! between adults and chicks lives on [`Kind`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Simulation time in milliseconds.
///
/// Signed so that a clock running backwards is accepted without underflow.
pub type Millis = i64;

/// The two entity kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Long-lived, fast bird.
    Adult,
    /// Short-lived, slow bird.
    Chick,
}

impl Kind {
    /// Both kinds, in their canonical order.
    pub const ALL: [Kind; 2] = [Kind::Adult, Kind::Chick];

    /// Displacement per tick while flocking.
    #[inline]
    #[must_use]
    pub const fn flock_speed(self) -> f64 {
        match self {
            Self::Adult => 5.0,
            Self::Chick => 3.0,
        }
    }

    /// Half-width of the random jitter applied per axis when not flocking.
    #[inline]
    #[must_use]
    pub const fn jitter(self) -> i32 {
        match self {
            Self::Adult => 2,
            Self::Chick => 1,
        }
    }

    /// Typical lifetime in milliseconds.
    #[inline]
    #[must_use]
    pub const fn default_lifetime(self) -> Millis {
        match self {
            Self::Adult => 10_000,
            Self::Chick => 5_000,
        }
    }

    /// Stable lowercase name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adult => "adult",
            Self::Chick => "chick",
        }
    }

    /// Index into per-kind arrays.
    #[inline]
    #[must_use]
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Adult => 0,
            Self::Chick => 1,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adult" | "adults" => Ok(Self::Adult),
            "chick" | "chicks" => Ok(Self::Chick),
            other => Err(format!("unknown kind: {other}")),
        }
    }
}

/// Identifier of a live entity.
///
/// Drawn from `[EntityId::MIN, EntityId::MAX]`; unique among live entities
/// only, so ids are reused after expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u16);

impl EntityId {
    /// Smallest valid id.
    pub const MIN: u16 = 1000;
    /// Largest valid id.
    pub const MAX: u16 = 9999;
    /// Number of distinct ids.
    pub const SPACE: usize = (Self::MAX - Self::MIN + 1) as usize;

    /// Returns true if the id lies inside the valid range.
    #[inline]
    #[must_use]
    pub const fn in_range(self) -> bool {
        self.0 >= Self::MIN && self.0 <= Self::MAX
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live bird.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique among live entities.
    pub id: EntityId,
    /// Adult or chick.
    pub kind: Kind,
    /// Horizontal position; may drift outside the spawn area.
    pub x: i32,
    /// Vertical position; may drift outside the spawn area.
    pub y: i32,
    /// Simulation time of the spawn.
    pub birth_time: Millis,
    /// How long the entity lives.
    pub lifetime: Millis,
}

impl Entity {
    /// Returns true once `now - birth_time >= lifetime`.
    #[inline]
    #[must_use]
    pub const fn is_expired(&self, now: Millis) -> bool {
        now.saturating_sub(self.birth_time) >= self.lifetime
    }
}
