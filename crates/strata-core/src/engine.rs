//! Backend engines and engine bitmaps.
//!
//! Placement is tracked as a bitmap per table so that routing reduces to
//! intersecting bitmaps. Bit values are fixed and persisted in blueprints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Index, IndexMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Engine {
    /// Transactional engine (one writer plus optional read replicas).
    Aurora,
    /// Provisioned analytical cluster.
    Redshift,
    /// Serverless analytical engine; never provisioned.
    Athena,
}

impl Engine {
    /// Fixed iteration order used wherever ties must break deterministically.
    pub const ALL: [Engine; 3] = [Engine::Aurora, Engine::Redshift, Engine::Athena];

    pub const fn bit(self) -> u8 {
        match self {
            Engine::Aurora => 0b001,
            Engine::Redshift => 0b010,
            Engine::Athena => 0b100,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Engine::Aurora => 0,
            Engine::Redshift => 1,
            Engine::Athena => 2,
        }
    }

    /// Whether the engine has a `Provisioning` (and can be switched off).
    pub const fn is_provisioned(self) -> bool {
        !matches!(self, Engine::Athena)
    }

    pub fn from_name(name: &str) -> Option<Engine> {
        match name.to_ascii_lowercase().as_str() {
            "aurora" => Some(Engine::Aurora),
            "redshift" => Some(Engine::Redshift),
            "athena" => Some(Engine::Athena),
            _ => None,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Engine::Aurora => "Aurora",
            Engine::Redshift => "Redshift",
            Engine::Athena => "Athena",
        };
        f.write_str(s)
    }
}

/// Set of engines encoded as bits (see [`Engine::bit`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineBitmap(u8);

impl EngineBitmap {
    pub const EMPTY: EngineBitmap = EngineBitmap(0);
    pub const ALL: EngineBitmap = EngineBitmap(0b111);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn of(engine: Engine) -> Self {
        Self(engine.bit())
    }

    pub fn from_engines<I: IntoIterator<Item = Engine>>(engines: I) -> Self {
        engines
            .into_iter()
            .fold(Self::EMPTY, |acc, e| acc | Self::of(e))
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, engine: Engine) -> bool {
        self.0 & engine.bit() != 0
    }

    pub fn insert(&mut self, engine: Engine) {
        self.0 |= engine.bit();
    }

    pub fn remove(&mut self, engine: Engine) {
        self.0 &= !engine.bit();
    }

    /// Engines present in `self` but not in `other`.
    pub const fn difference(self, other: EngineBitmap) -> EngineBitmap {
        EngineBitmap(self.0 & !other.0)
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// The engine, if exactly one bit is set.
    pub fn single(self) -> Option<Engine> {
        if self.0 != 0 && self.0 & (self.0 - 1) == 0 {
            Engine::ALL.into_iter().find(|e| self.contains(*e))
        } else {
            None
        }
    }

    /// Engines in the fixed `Engine::ALL` order.
    pub fn engines(self) -> impl Iterator<Item = Engine> {
        Engine::ALL.into_iter().filter(move |e| self.contains(*e))
    }
}

impl BitOr for EngineBitmap {
    type Output = EngineBitmap;
    fn bitor(self, rhs: Self) -> Self::Output {
        EngineBitmap(self.0 | rhs.0)
    }
}

impl BitAnd for EngineBitmap {
    type Output = EngineBitmap;
    fn bitand(self, rhs: Self) -> Self::Output {
        EngineBitmap(self.0 & rhs.0)
    }
}

impl fmt::Display for EngineBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.engines().map(|e| e.to_string()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Dense per-engine storage, indexable by [`Engine`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMap<T> {
    pub aurora: T,
    pub redshift: T,
    pub athena: T,
}

impl<T> EngineMap<T> {
    pub fn from_fn(mut f: impl FnMut(Engine) -> T) -> Self {
        Self {
            aurora: f(Engine::Aurora),
            redshift: f(Engine::Redshift),
            athena: f(Engine::Athena),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Engine, &T)> {
        [
            (Engine::Aurora, &self.aurora),
            (Engine::Redshift, &self.redshift),
            (Engine::Athena, &self.athena),
        ]
        .into_iter()
    }
}

impl<T> Index<Engine> for EngineMap<T> {
    type Output = T;
    fn index(&self, engine: Engine) -> &T {
        match engine {
            Engine::Aurora => &self.aurora,
            Engine::Redshift => &self.redshift,
            Engine::Athena => &self.athena,
        }
    }
}

impl<T> IndexMut<Engine> for EngineMap<T> {
    fn index_mut(&mut self, engine: Engine) -> &mut T {
        match engine {
            Engine::Aurora => &mut self.aurora,
            Engine::Redshift => &mut self.redshift,
            Engine::Athena => &mut self.athena,
        }
    }
}
