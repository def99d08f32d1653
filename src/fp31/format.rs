use crate::error::{ConfigurationError, Result};

/// Bits significatifs par limbe. Le bit 31 de chaque limbe stockée est réservé (toujours 0).
pub const BITS_PER_LIMB: u32 = 31;
pub const LOW31_BITS_SET: u32 = 0x7FFF_FFFF;
/// Bit de signe, porté par la limbe de poids fort.
pub const TEST_BIT_30: u32 = 0x4000_0000;
/// Masque qui retire le bit de signe et le bit réservé.
pub const SIGN_STRIPPED_MASK: u32 = 0x3FFF_FFFF;

pub const DEFAULT_BITS_BEFORE_BINARY_POINT: u8 = 8;
pub const MAX_LIMB_COUNT: usize = 64;

/// Format virgule fixe partagé par toutes les valeurs d'un calcul :
/// `limb_count` limbes de 31 bits, dont `bits_before_binary_point` bits
/// avant la virgule (bit de signe compris).
///
/// Plage représentable : `|v| < 2^(bits_before_binary_point - 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixedPointFormat {
    bits_before_binary_point: u8,
    limb_count: usize,
}

impl FixedPointFormat {
    pub fn new(bits_before_binary_point: u8, limb_count: usize) -> Result<Self> {
        if !(2..=31).contains(&bits_before_binary_point) {
            return Err(ConfigurationError::InvalidBitsBeforeBinaryPoint(
                bits_before_binary_point,
            ));
        }
        if limb_count == 0 || limb_count > MAX_LIMB_COUNT {
            return Err(ConfigurationError::InvalidLimbCount {
                got: limb_count,
                max: MAX_LIMB_COUNT,
            });
        }
        Ok(Self {
            bits_before_binary_point,
            limb_count,
        })
    }

    /// Plus petit format qui offre au moins `min_fractional_bits` bits après la virgule.
    pub fn for_precision(bits_before_binary_point: u8, min_fractional_bits: u32) -> Result<Self> {
        let total = bits_before_binary_point as u32 + min_fractional_bits;
        let limb_count = total.div_ceil(BITS_PER_LIMB).max(1) as usize;
        Self::new(bits_before_binary_point, limb_count)
    }

    pub fn limb_count(&self) -> usize {
        self.limb_count
    }

    pub fn bits_before_binary_point(&self) -> u8 {
        self.bits_before_binary_point
    }

    pub fn total_bits(&self) -> u32 {
        BITS_PER_LIMB * self.limb_count as u32
    }

    pub fn fractional_bits(&self) -> u32 {
        self.total_bits() - self.bits_before_binary_point as u32
    }

    /// Exposant binaire commun : une valeur vaut `entier * 2^target_exponent`.
    pub fn target_exponent(&self) -> i32 {
        -(self.fractional_bits() as i32)
    }

    /// Vérifie qu'un seuil entier tient dans la limbe de poids fort.
    pub fn check_threshold(&self, threshold: u32) -> Result<()> {
        let max_exponent = self.bits_before_binary_point as u32 - 1;
        if threshold == 0 || (threshold as u64) >= (1u64 << max_exponent) {
            return Err(ConfigurationError::ThresholdOutOfRange {
                threshold,
                max_exponent,
            });
        }
        Ok(())
    }

    /// Vérifie que les carrés calculés pendant l'itération tiennent dans le format.
    ///
    /// Tant qu'une voie est en jeu |z|² < T, donc |z²+c| < T + |c| : zr², zi²,
    /// leur somme et (zr + zi)² restent sous 2·(T + |c|)². Au-delà, le carré
    /// déborde et l'échappement n'est plus détecté.
    pub fn check_iteration_range(&self, threshold: u32, max_modulus: f64) -> Result<()> {
        let bound = 2.0 * (threshold as f64 + max_modulus).powi(2);
        let bits = bound.log2().floor() as i64 + 2;
        let available = self.bits_before_binary_point as u32;
        if !bound.is_finite() || bits > available as i64 {
            return Err(ConfigurationError::ValueOutOfRange { bits, available });
        }
        Ok(())
    }

    /// Limbe de poids fort du seuil entier `threshold` (ses autres limbes sont nulles).
    pub fn threshold_msl(&self, threshold: u32) -> u32 {
        threshold << (BITS_PER_LIMB - self.bits_before_binary_point as u32)
    }
}

impl Default for FixedPointFormat {
    fn default() -> Self {
        Self {
            bits_before_binary_point: DEFAULT_BITS_BEFORE_BINARY_POINT,
            limb_count: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_exponent() {
        let format = FixedPointFormat::new(8, 2).unwrap();
        assert_eq!(format.total_bits(), 62);
        assert_eq!(format.fractional_bits(), 54);
        assert_eq!(format.target_exponent(), -54);
    }

    #[test]
    fn precision_picks_smallest_limb_count() {
        assert_eq!(FixedPointFormat::for_precision(8, 23).unwrap().limb_count(), 1);
        assert_eq!(FixedPointFormat::for_precision(8, 24).unwrap().limb_count(), 2);
        assert_eq!(FixedPointFormat::for_precision(8, 100).unwrap().limb_count(), 4);
    }

    #[test]
    fn rejects_bad_formats() {
        assert!(FixedPointFormat::new(8, 0).is_err());
        assert!(FixedPointFormat::new(1, 2).is_err());
        assert!(FixedPointFormat::new(32, 2).is_err());
        assert!(FixedPointFormat::new(8, MAX_LIMB_COUNT + 1).is_err());
    }

    #[test]
    fn threshold_fits_in_most_significant_limb() {
        let format = FixedPointFormat::new(8, 3).unwrap();
        assert!(format.check_threshold(4).is_ok());
        assert!(format.check_threshold(127).is_ok());
        assert!(format.check_threshold(128).is_err());
        assert!(format.check_threshold(0).is_err());
        // 4 * 2^(31 - 8)
        assert_eq!(format.threshold_msl(4), 4 << 23);
        assert!(FixedPointFormat::new(3, 1).unwrap().check_threshold(4).is_err());
    }

    #[test]
    fn iteration_squares_must_fit_before_the_binary_point() {
        let format = FixedPointFormat::new(8, 2).unwrap();
        // 2·(4 + 2.5)² = 84.5 < 128
        assert!(format.check_iteration_range(4, 2.5).is_ok());
        // 2·(4 + 4)² = 128
        assert_eq!(
            format.check_iteration_range(4, 4.0),
            Err(ConfigurationError::ValueOutOfRange {
                bits: 9,
                available: 8
            })
        );
        assert!(format.check_iteration_range(4, 16.0).is_err());
        assert!(format.check_iteration_range(100, 1.9).is_err());
        assert!(FixedPointFormat::new(16, 2)
            .unwrap()
            .check_iteration_range(100, 1.9)
            .is_ok());
    }
}
