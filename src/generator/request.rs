use num_complex::Complex64;
use rug::Integer;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};
use crate::fp31::format::DEFAULT_BITS_BEFORE_BINARY_POINT;
use crate::fp31::{FixedPointFormat, Fp31Val, MathOpCounts, RValue};

/// Taille en pixels (ou en blocs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SizeInt {
    pub width: usize,
    pub height: usize,
}

impl SizeInt {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn number_of_cells(&self) -> usize {
        self.width * self.height
    }
}

pub const DEFAULT_BLOCK_SIZE: SizeInt = SizeInt::new(128, 128);

/// Position entière (en blocs) sur la carte.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigVector {
    pub x: Integer,
    pub y: Integer,
}

impl BigVector {
    pub fn new(x: impl Into<Integer>, y: impl Into<Integer>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
        }
    }
}

/// Écart entre échantillons voisins : `width · 2^exponent` en x, `height · 2^exponent` en y.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RSize {
    pub width: Integer,
    pub height: Integer,
    pub exponent: i32,
}

impl RSize {
    pub fn square(value: Integer, exponent: i32) -> Self {
        Self {
            width: value.clone(),
            height: value,
            exponent,
        }
    }

    pub fn power_of_two(exponent: i32) -> Self {
        Self::square(Integer::from(1), exponent)
    }

    pub fn width_value(&self) -> RValue {
        RValue::new(self.width.clone(), self.exponent)
    }

    pub fn height_value(&self) -> RValue {
        RValue::new(self.height.clone(), self.exponent)
    }
}

/// Point de la carte (coin inférieur gauche d'un bloc).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RPoint {
    pub x: RValue,
    pub y: RValue,
}

impl RPoint {
    pub fn new(x: RValue, y: RValue) -> Self {
        Self { x, y }
    }

    /// `block_position · block_size · delta`
    pub fn for_block(block_position: &BigVector, block_size: SizeInt, delta: &RSize) -> Self {
        let x = Integer::from(&block_position.x * &delta.width) * block_size.width as u64;
        let y = Integer::from(&block_position.y * &delta.height) * block_size.height as u64;
        Self {
            x: RValue::new(x, delta.exponent),
            y: RValue::new(y, delta.exponent),
        }
    }
}

/// Les compteurs montent jusqu'à cible + 1 et sont comparés en i32.
pub const MAX_TARGET_ITERATIONS: u32 = i32::MAX as u32 - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapCalcSettings {
    pub target_iterations: u32,
    /// Seuil d'échappement sur |z|² (rayon au carré).
    pub threshold: u32,
}

impl MapCalcSettings {
    pub fn new(target_iterations: u32, threshold: u32) -> Self {
        Self {
            target_iterations,
            threshold,
        }
    }

    pub fn validate(&self, format: FixedPointFormat) -> Result<()> {
        if self.target_iterations > MAX_TARGET_ITERATIONS {
            return Err(ConfigurationError::TargetIterationsOutOfRange(
                self.target_iterations,
            ));
        }
        format.check_threshold(self.threshold)
    }
}

impl Default for MapCalcSettings {
    fn default() -> Self {
        Self::new(1000, 4)
    }
}

/// Résumé des drapeaux d'échappement d'un bloc.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscapedFlagsSummary {
    AllEscaped,
    NoneEscaped,
    Mixed,
}

/// Compteurs et drapeaux d'échappement, un par pixel, ligne par ligne.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSectionVectors {
    pub block_size: SizeInt,
    pub counts: Vec<u32>,
    pub has_escaped_flags: Vec<bool>,
}

impl MapSectionVectors {
    pub fn new(block_size: SizeInt) -> Self {
        let cells = block_size.number_of_cells();
        Self {
            block_size,
            counts: vec![0; cells],
            has_escaped_flags: vec![false; cells],
        }
    }

    pub fn validate(&self, block_size: SizeInt) -> Result<()> {
        check_block_size(self.block_size, block_size)?;
        let cells = block_size.number_of_cells();
        for (what, got) in [
            ("count vector length", self.counts.len()),
            ("escape flag vector length", self.has_escaped_flags.len()),
        ] {
            if got != cells {
                return Err(ConfigurationError::Mismatch {
                    what,
                    expected: cells,
                    got,
                });
            }
        }
        Ok(())
    }

    pub fn row_counts(&self, row: usize) -> &[u32] {
        let width = self.block_size.width;
        &self.counts[row * width..(row + 1) * width]
    }

    pub fn row_escaped_flags(&self, row: usize) -> &[bool] {
        let width = self.block_size.width;
        &self.has_escaped_flags[row * width..(row + 1) * width]
    }

    /// Compteurs et drapeaux d'une ligne, en écriture.
    pub fn row_mut(&mut self, row: usize) -> (&mut [u32], &mut [bool]) {
        let range = row * self.block_size.width..(row + 1) * self.block_size.width;
        (
            &mut self.counts[range.clone()],
            &mut self.has_escaped_flags[range],
        )
    }

    pub fn escaped_flags_summary(&self) -> EscapedFlagsSummary {
        if self.has_escaped_flags.iter().all(|&f| f) {
            EscapedFlagsSummary::AllEscaped
        } else if self.has_escaped_flags.iter().all(|&f| !f) {
            EscapedFlagsSummary::NoneEscaped
        } else {
            EscapedFlagsSummary::Mixed
        }
    }
}

/// Les accès par ligne découpent les vecteurs selon leur propre `block_size`.
fn check_block_size(stored: SizeInt, expected: SizeInt) -> Result<()> {
    for (what, expected, got) in [
        ("stored block width", expected.width, stored.width),
        ("stored block height", expected.height, stored.height),
    ] {
        if expected != got {
            return Err(ConfigurationError::Mismatch {
                what,
                expected,
                got,
            });
        }
    }
    Ok(())
}

/// Dernier z connu de chaque pixel : `limb_count` limbes par pixel pour zr et zi.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSectionZVectors {
    pub block_size: SizeInt,
    pub limb_count: usize,
    pub zrs: Vec<u32>,
    pub zis: Vec<u32>,
}

impl MapSectionZVectors {
    pub fn new(block_size: SizeInt, limb_count: usize) -> Self {
        let len = block_size.number_of_cells() * limb_count;
        Self {
            block_size,
            limb_count,
            zrs: vec![0; len],
            zis: vec![0; len],
        }
    }

    pub fn validate(&self, block_size: SizeInt, limb_count: usize) -> Result<()> {
        check_block_size(self.block_size, block_size)?;
        if self.limb_count != limb_count {
            return Err(ConfigurationError::Mismatch {
                what: "z vector limb count",
                expected: limb_count,
                got: self.limb_count,
            });
        }
        let len = block_size.number_of_cells() * limb_count;
        for (what, got) in [("zr vector length", self.zrs.len()), ("zi vector length", self.zis.len())] {
            if got != len {
                return Err(ConfigurationError::Mismatch {
                    what,
                    expected: len,
                    got,
                });
            }
        }
        Ok(())
    }

    /// Plage des limbes du pixel `index` (indice dans le bloc).
    pub fn pixel_range(&self, index: usize) -> std::ops::Range<usize> {
        index * self.limb_count..(index + 1) * self.limb_count
    }

    pub fn pixel_limbs(&self, index: usize) -> (&[u32], &[u32]) {
        let range = self.pixel_range(index);
        (&self.zrs[range.clone()], &self.zis[range])
    }

    pub fn pixel_limbs_mut(&mut self, index: usize) -> (&mut [u32], &mut [u32]) {
        let range = self.pixel_range(index);
        (&mut self.zrs[range.clone()], &mut self.zis[range])
    }

    pub fn clear_row(&mut self, row: usize) {
        let width = self.block_size.width;
        let range = row * width * self.limb_count..(row + 1) * width * self.limb_count;
        self.zrs[range.clone()].fill(0);
        self.zis[range].fill(0);
    }

    /// Approximation f64 de z pour un pixel.
    pub fn z_value(&self, index: usize, format: FixedPointFormat) -> Result<Complex64> {
        let (zr, zi) = self.pixel_limbs(index);
        let zr = Fp31Val::from_limbs(format, zr.to_vec())?;
        let zi = Fp31Val::from_limbs(format, zi.to_vec())?;
        Ok(Complex64::new(zr.to_f64(), zi.to_f64()))
    }
}

/// Demande de calcul d'un bloc.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSectionRequest {
    pub block_position: BigVector,
    pub map_position: RPoint,
    pub sample_point_delta: RSize,
    pub block_size: SizeInt,
    pub limb_count: usize,
    /// Nécessaire pour relire les z sauvegardés dans le même format.
    #[serde(default = "default_bits_before_binary_point")]
    pub bits_before_binary_point: u8,
    pub map_calc_settings: MapCalcSettings,
    pub increasing_iterations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_section_vectors: Option<MapSectionVectors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_section_z_vectors: Option<MapSectionZVectors>,
}

impl MapSectionRequest {
    /// Bloc repéré par sa position entière ; la position carte en est déduite.
    pub fn new(
        block_position: BigVector,
        sample_point_delta: RSize,
        block_size: SizeInt,
        format: FixedPointFormat,
        map_calc_settings: MapCalcSettings,
    ) -> Self {
        let map_position = RPoint::for_block(&block_position, block_size, &sample_point_delta);
        Self {
            block_position,
            map_position,
            sample_point_delta,
            block_size,
            limb_count: format.limb_count(),
            bits_before_binary_point: format.bits_before_binary_point(),
            map_calc_settings,
            increasing_iterations: false,
            map_section_vectors: None,
            map_section_z_vectors: None,
        }
    }

    /// Bloc dont le coin inférieur gauche est donné directement.
    pub fn at_map_position(
        map_position: RPoint,
        sample_point_delta: RSize,
        block_size: SizeInt,
        format: FixedPointFormat,
        map_calc_settings: MapCalcSettings,
    ) -> Self {
        Self {
            block_position: BigVector::default(),
            map_position,
            sample_point_delta,
            block_size,
            limb_count: format.limb_count(),
            bits_before_binary_point: format.bits_before_binary_point(),
            map_calc_settings,
            increasing_iterations: false,
            map_section_vectors: None,
            map_section_z_vectors: None,
        }
    }

    /// Format virgule fixe du bloc.
    pub fn format(&self) -> Result<FixedPointFormat> {
        FixedPointFormat::new(self.bits_before_binary_point, self.limb_count)
    }

    /// Reprend un bloc déjà calculé avec une nouvelle cible d'itérations.
    /// Les vecteurs de la réponse sont déplacés dans la demande.
    pub fn resume(mut self, previous: MapSectionResponse, target_iterations: u32) -> Self {
        self.map_calc_settings.target_iterations = target_iterations;
        self.increasing_iterations = true;
        self.map_section_vectors = Some(previous.map_section_vectors);
        self.map_section_z_vectors = Some(previous.map_section_z_vectors);
        self
    }

    /// Copie de la demande sans ses vecteurs.
    pub fn header(&self) -> Self {
        Self {
            map_section_vectors: None,
            map_section_z_vectors: None,
            ..self.clone()
        }
    }
}

fn default_bits_before_binary_point() -> u8 {
    DEFAULT_BITS_BEFORE_BINARY_POINT
}

/// Résultat du calcul d'un bloc.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSectionResponse {
    pub block_position: BigVector,
    pub map_calc_settings: MapCalcSettings,
    pub map_section_vectors: MapSectionVectors,
    pub map_section_z_vectors: MapSectionZVectors,
    /// Faux si le calcul a été annulé avant la dernière ligne.
    pub request_completed: bool,
    /// Vrai si le bloc a été écarté par une heuristique (aucun calcul).
    pub skipped: bool,
    pub all_rows_have_escaped: bool,
    pub row_used_calcs: Vec<u64>,
    pub row_unused_calcs: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math_op_counts: Option<MathOpCounts>,
}

impl MapSectionResponse {
    pub fn escaped_flags_summary(&self) -> EscapedFlagsSummary {
        self.map_section_vectors.escaped_flags_summary()
    }
}
