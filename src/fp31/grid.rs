use rug::Integer;

use crate::error::Result;
use crate::fp31::format::FixedPointFormat;
use crate::fp31::value::{Fp31Val, RValue};

/// Points d'échantillonnage d'un bloc sur un axe : `origin + i * delta`,
/// calculés par additions successives de `delta` en virgule fixe.
#[derive(Clone, Debug)]
pub struct SamplePoints {
    origin: Fp31Val,
    delta: Fp31Val,
    points: Vec<Fp31Val>,
}

impl SamplePoints {
    pub fn build(origin: &RValue, delta: &RValue, extent: usize, format: FixedPointFormat) -> Result<Self> {
        if extent > 1 {
            // le dernier point doit lui aussi tenir dans le format
            let last = origin.add(&delta.mul_integer(&Integer::from(extent - 1)));
            Fp31Val::from_rvalue(&last, format)?;
        }
        let origin = Fp31Val::from_rvalue(origin, format)?;
        let delta = Fp31Val::from_rvalue(delta, format)?;

        let offsets = build_sample_point_offsets(&delta, extent);
        let points = offsets.iter().map(|offset| origin.add(offset)).collect();

        Ok(Self {
            origin,
            delta,
            points,
        })
    }

    pub fn origin(&self) -> &Fp31Val {
        &self.origin
    }

    pub fn delta(&self) -> &Fp31Val {
        &self.delta
    }

    pub fn points(&self) -> &[Fp31Val] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Décalages `0, d, 2d, ...` (un par pixel de l'axe).
pub fn build_sample_point_offsets(delta: &Fp31Val, extent: usize) -> Vec<Fp31Val> {
    let mut offsets = Vec::with_capacity(extent);
    let mut current = Fp31Val::zero(delta.format());
    for _ in 0..extent {
        let next = current.add(delta);
        offsets.push(current);
        current = next;
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_exact_multiples_of_delta() {
        let format = FixedPointFormat::new(8, 2).unwrap();
        let delta = Fp31Val::from_rvalue(&RValue::power_of_two(-40), format).unwrap();
        let offsets = build_sample_point_offsets(&delta, 16);
        assert_eq!(offsets.len(), 16);
        for (i, offset) in offsets.iter().enumerate() {
            let expected = Integer::from(i) << (format.fractional_bits() - 40);
            assert_eq!(offset.to_scaled_integer(), expected);
        }
    }

    #[test]
    fn points_cross_zero_from_negative_origin() {
        let format = FixedPointFormat::new(8, 1).unwrap();
        let origin = RValue::from_f64(-2.0).unwrap();
        let delta = RValue::power_of_two(-2);
        let axis = SamplePoints::build(&origin, &delta, 16, format).unwrap();
        let values: Vec<f64> = axis.points().iter().map(Fp31Val::to_f64).collect();
        assert_eq!(values[0], -2.0);
        assert_eq!(values[8], 0.0);
        assert_eq!(values[15], 1.75);
        assert!(!axis.is_empty());
        assert_eq!(axis.delta().to_f64(), 0.25);
    }

    #[test]
    fn grid_leaving_the_format_is_rejected() {
        let format = FixedPointFormat::new(4, 1).unwrap();
        // 0 + 15 * 1 dépasse 2^3
        let result = SamplePoints::build(&RValue::zero(), &RValue::from_f64(1.0).unwrap(), 16, format);
        assert!(result.is_err());
    }
}
