//! Production stages

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One discrete production step
///
/// Declaration order is production order, so `Ord` sorts stages the way
/// they appear on the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Madera,
    Produccion,
    Pintura,
    Armado,
    Tapiceria,
    Empaque,
}

impl Stage {
    /// Every stage, in production order
    pub const ALL: [Stage; 6] = [
        Stage::Madera,
        Stage::Produccion,
        Stage::Pintura,
        Stage::Armado,
        Stage::Tapiceria,
        Stage::Empaque,
    ];

    /// Stable ASCII key used in record ids and on the wire
    pub fn key(&self) -> &'static str {
        match self {
            Self::Madera => "madera",
            Self::Produccion => "produccion",
            Self::Pintura => "pintura",
            Self::Armado => "armado",
            Self::Tapiceria => "tapiceria",
            Self::Empaque => "empaque",
        }
    }

    /// Name shown to operators
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Madera => "Madera",
            Self::Produccion => "Producción",
            Self::Pintura => "Pintura",
            Self::Armado => "Armado",
            Self::Tapiceria => "Tapicería",
            Self::Empaque => "Empaque",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "Stage::from_str: called");
        let folded: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'á' => 'a',
                'é' => 'e',
                'í' => 'i',
                'ó' => 'o',
                'ú' => 'u',
                other => other,
            })
            .collect();

        Stage::ALL
            .into_iter()
            .find(|stage| stage.key() == folded)
            .ok_or_else(|| {
                format!(
                    "Unknown stage: {}. Use one of: madera, produccion, pintura, armado, tapiceria, empaque",
                    s
                )
            })
    }
}
