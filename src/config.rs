use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fp31::format::DEFAULT_BITS_BEFORE_BINARY_POINT;
use crate::fp31::FixedPointFormat;
use crate::generator::request::{MapCalcSettings, SizeInt, DEFAULT_BLOCK_SIZE};

/// Heuristiques pour écarter un bloc sans le calculer. Désactivées par défaut :
/// un bloc écarté garde des compteurs nuls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipHeuristics {
    /// Écarte les blocs dont l'origine est dans le quadrant x >= 0, y >= 0.
    pub skip_positive_blocks: bool,
    /// Écarte les blocs entièrement hors du disque de rayon 2.
    pub skip_low_detail_blocks: bool,
}

/// Paramètres d'un générateur de blocs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub block_size: SizeInt,
    pub bits_before_binary_point: u8,
    pub limb_count: usize,
    pub map_calc_settings: MapCalcSettings,
    pub skip_heuristics: SkipHeuristics,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            bits_before_binary_point: DEFAULT_BITS_BEFORE_BINARY_POINT,
            limb_count: 2,
            map_calc_settings: MapCalcSettings::default(),
            skip_heuristics: SkipHeuristics::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn format(&self) -> Result<FixedPointFormat> {
        FixedPointFormat::new(self.bits_before_binary_point, self.limb_count)
    }

    /// Vérifie la cohérence complète (format, bloc, seuil, cible).
    pub fn validate(&self) -> Result<()> {
        let format = self.format()?;
        self.map_calc_settings.validate(format)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| Error::Json {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}
