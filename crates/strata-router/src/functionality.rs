//! Which engine supports which SQL features.

use serde::{Deserialize, Serialize};
use std::ops::BitOr;

use strata_core::engine::{Engine, EngineBitmap, EngineMap};

/// Bitmap of features a query needs or an engine offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Functionality(u8);

impl Functionality {
    pub const NONE: Functionality = Functionality(0);
    pub const GEOSPATIAL: Functionality = Functionality(0b01);
    pub const TRANSACTIONS: Functionality = Functionality(0b10);

    pub const fn contains(self, other: Functionality) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        names.into_iter().try_fold(Self::NONE, |acc, n| {
            let f = match n {
                "geospatial" => Self::GEOSPATIAL,
                "transactions" => Self::TRANSACTIONS,
                _ => return None,
            };
            Some(acc | f)
        })
    }
}

impl BitOr for Functionality {
    type Output = Functionality;
    fn bitor(self, rhs: Self) -> Self {
        Functionality(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalityCatalog {
    pub engines: EngineMap<Functionality>,
}

impl Default for FunctionalityCatalog {
    fn default() -> Self {
        Self {
            engines: EngineMap {
                aurora: Functionality::GEOSPATIAL | Functionality::TRANSACTIONS,
                redshift: Functionality::NONE,
                athena: Functionality::GEOSPATIAL,
            },
        }
    }
}

impl FunctionalityCatalog {
    /// Engines that offer everything in `required`.
    pub fn supporting(&self, required: Functionality) -> EngineBitmap {
        EngineBitmap::from_engines(
            Engine::ALL
                .into_iter()
                .filter(|e| self.engines[*e].contains(required)),
        )
    }
}
