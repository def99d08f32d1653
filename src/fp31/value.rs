use rug::{Float, Integer};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};
use crate::fp31::format::{FixedPointFormat, BITS_PER_LIMB, LOW31_BITS_SET, TEST_BIT_30};

/// Précision (en bits) par défaut pour les valeurs lues depuis du texte ou un f64.
pub const DEFAULT_PRECISION: u32 = 64;

/// Rationnel dyadique de précision arbitraire : `value * 2^exponent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RValue {
    pub value: Integer,
    pub exponent: i32,
    pub precision: u32,
}

impl RValue {
    pub fn new(value: Integer, exponent: i32) -> Self {
        let precision = value.significant_bits().max(DEFAULT_PRECISION);
        Self {
            value,
            exponent,
            precision,
        }
    }

    pub fn zero() -> Self {
        Self::new(Integer::new(), 0)
    }

    /// `2^exponent`
    pub fn power_of_two(exponent: i32) -> Self {
        Self::new(Integer::from(1), exponent)
    }

    pub fn from_f64(x: f64) -> Result<Self> {
        Self::from_float(&Float::with_val(53, x), &x.to_string())
    }

    /// Lit un décimal (`"-0.75"`, `"1e-30"`...) avec `precision` bits de mantisse.
    pub fn parse(input: &str, precision: u32) -> Result<Self> {
        let parsed = Float::parse(input.trim()).map_err(|e| ConfigurationError::InvalidCoordinate {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        let mut rvalue = Self::from_float(&Float::with_val(precision, parsed), input)?;
        rvalue.precision = precision;
        Ok(rvalue)
    }

    fn from_float(f: &Float, input: &str) -> Result<Self> {
        match f.to_integer_exp() {
            Some((value, exponent)) => Ok(Self::new(value, exponent)),
            None => Err(ConfigurationError::InvalidCoordinate {
                input: input.to_string(),
                reason: "not a finite number".to_string(),
            }),
        }
    }

    pub fn to_float(&self) -> Float {
        let mut f = Float::with_val(self.precision.max(self.value.significant_bits()).max(2), &self.value);
        f <<= self.exponent;
        f
    }

    pub fn to_f64(&self) -> f64 {
        self.to_float().to_f64()
    }

    /// Produit par un entier (exposant inchangé).
    pub fn mul_integer(&self, factor: &Integer) -> Self {
        Self {
            value: Integer::from(&self.value * factor),
            exponent: self.exponent,
            precision: self.precision,
        }
    }

    /// Somme exacte : on ramène les deux valeurs au plus petit exposant.
    pub fn add(&self, other: &Self) -> Self {
        let exponent = self.exponent.min(other.exponent);
        let a = Integer::from(&self.value << (self.exponent - exponent) as u32);
        let b = Integer::from(&other.value << (other.exponent - exponent) as u32);
        Self {
            value: a + b,
            exponent,
            precision: self.precision.max(other.precision),
        }
    }
}

/// Valeur virgule fixe : limbes de 31 bits, poids faible en tête,
/// complément à deux sur toute la largeur.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fp31Val {
    limbs: Vec<u32>,
    format: FixedPointFormat,
}

impl Fp31Val {
    pub fn zero(format: FixedPointFormat) -> Self {
        Self {
            limbs: vec![0; format.limb_count()],
            format,
        }
    }

    pub fn from_limbs(format: FixedPointFormat, limbs: Vec<u32>) -> Result<Self> {
        if limbs.len() != format.limb_count() {
            return Err(ConfigurationError::Mismatch {
                what: "limb count",
                expected: format.limb_count(),
                got: limbs.len(),
            });
        }
        let limbs = limbs.into_iter().map(|l| l & LOW31_BITS_SET).collect();
        Ok(Self { limbs, format })
    }

    /// Convertit un rationnel vers le format. Les bits sous la limbe de poids
    /// faible sont tronqués (vers zéro). Erreur si la valeur ne tient pas.
    pub fn from_rvalue(rvalue: &RValue, format: FixedPointFormat) -> Result<Self> {
        let shift = rvalue.exponent as i64 - format.target_exponent() as i64;
        let magnitude = Integer::from(rvalue.value.abs_ref());
        let magnitude = if shift >= 0 {
            let bits = magnitude.significant_bits() as i64 + shift;
            if bits >= format.total_bits() as i64 {
                return Err(out_of_range(bits, format));
            }
            magnitude << shift as u32
        } else {
            magnitude >> (-shift).min(u32::MAX as i64) as u32
        };
        let scaled = if rvalue.value < 0 { -magnitude } else { magnitude };
        Self::from_scaled_integer(&scaled, format)
    }

    /// `raw` est la valeur déjà exprimée en unités de `2^target_exponent`.
    pub fn from_scaled_integer(raw: &Integer, format: FixedPointFormat) -> Result<Self> {
        let magnitude = Integer::from(raw.abs_ref());
        let bits = magnitude.significant_bits() as i64;
        if bits >= format.total_bits() as i64 {
            return Err(out_of_range(bits, format));
        }

        let limbs: Vec<u32> = (0..format.limb_count())
            .map(|i| {
                let shifted = Integer::from(&magnitude >> (BITS_PER_LIMB * i as u32));
                shifted.to_u32_wrapping() & LOW31_BITS_SET
            })
            .collect();

        let limbs = if *raw < 0 { negate_limbs(&limbs) } else { limbs };
        Ok(Self { limbs, format })
    }

    /// Valeur signée en unités de `2^target_exponent`.
    pub fn to_scaled_integer(&self) -> Integer {
        let negative = self.is_negative();
        let magnitude = if negative {
            negate_limbs(&self.limbs)
        } else {
            self.limbs.clone()
        };
        let mut acc = Integer::new();
        for limb in magnitude.iter().rev() {
            acc <<= BITS_PER_LIMB;
            acc += *limb;
        }
        if negative {
            -acc
        } else {
            acc
        }
    }

    pub fn to_rvalue(&self) -> RValue {
        let mut rvalue = RValue::new(self.to_scaled_integer(), self.format.target_exponent());
        rvalue.precision = rvalue.precision.max(self.format.total_bits());
        rvalue
    }

    pub fn to_f64(&self) -> f64 {
        self.to_rvalue().to_f64()
    }

    pub fn limbs(&self) -> &[u32] {
        &self.limbs
    }

    pub fn format(&self) -> FixedPointFormat {
        self.format
    }

    pub fn is_negative(&self) -> bool {
        self.limbs
            .last()
            .is_some_and(|msl| msl & TEST_BIT_30 != 0)
    }

    /// Addition limbe par limbe ; la retenue sortant de la limbe de poids fort est perdue.
    pub fn add(&self, other: &Self) -> Self {
        let mut carry = 0u32;
        let limbs = self
            .limbs
            .iter()
            .zip(&other.limbs)
            .map(|(&a, &b)| {
                let sum = a + b + carry;
                carry = sum >> BITS_PER_LIMB;
                sum & LOW31_BITS_SET
            })
            .collect();
        Self {
            limbs,
            format: self.format,
        }
    }

    pub fn negate(&self) -> Self {
        Self {
            limbs: negate_limbs(&self.limbs),
            format: self.format,
        }
    }
}

/// Complément à deux : inversion des 31 bits puis chaîne de retenue amorcée à 1.
pub(crate) fn negate_limbs(limbs: &[u32]) -> Vec<u32> {
    let mut carry = 1u32;
    limbs
        .iter()
        .map(|&limb| {
            let v = (limb ^ LOW31_BITS_SET) + carry;
            carry = v >> BITS_PER_LIMB;
            v & LOW31_BITS_SET
        })
        .collect()
}

fn out_of_range(magnitude_bits: i64, format: FixedPointFormat) -> ConfigurationError {
    ConfigurationError::ValueOutOfRange {
        bits: magnitude_bits - format.fractional_bits() as i64 + 1,
        available: format.bits_before_binary_point() as u32,
    }
}
