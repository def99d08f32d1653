use crate::error::Result;
use crate::fp31::{FixedPointFormat, Fp31Deck, Fp31Val, Fp31VecMath, MathOpCounts, U32x8};

/// Nature du pas effectué par `Fp31Iterator::iterate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterationStep {
    /// Premier pas d'un calcul neuf : z := c (compte pour une itération).
    Seeded,
    /// Premier pas d'une reprise : z chargé tel quel, rien n'avance.
    Resumed,
    /// z := z² + c
    Advanced,
}

impl IterationStep {
    pub fn is_counted(self) -> bool {
        !matches!(self, IterationStep::Resumed)
    }
}

/// Itération z ← z² + c sur une ligne de valeurs.
///
/// zi' = (zr + zi)² - zr² - zi² + ci, zr' = zr² - zi² + cr : zr² et zi²
/// viennent du test d'échappement du pas précédent.
#[derive(Clone, Debug)]
pub struct Fp31Iterator {
    math: Fp31VecMath,
    threshold: Option<u32>,
    threshold_vector: U32x8,
    increasing_iterations: bool,
    is_reset: bool,

    crs: Fp31Deck,
    cis: Fp31Deck,
    zrs: Fp31Deck,
    zis: Fp31Deck,

    zr_sqrs: Fp31Deck,
    zi_sqrs: Fp31Deck,
    sum_of_sqrs: Fp31Deck,
    zr_zi_sqrs: Fp31Deck,
    temp: Fp31Deck,

    escaped_flags: Vec<U32x8>,
}

impl Fp31Iterator {
    pub fn new(format: FixedPointFormat, value_count: usize) -> Result<Self> {
        let math = Fp31VecMath::new(format, value_count)?;
        let deck = Fp31Deck::new(format.limb_count(), value_count)?;
        let group_count = deck.group_count();
        Ok(Self {
            math,
            threshold: None,
            threshold_vector: U32x8::ZERO,
            increasing_iterations: false,
            is_reset: true,
            crs: deck.clone(),
            cis: deck.clone(),
            zrs: deck.clone(),
            zis: deck.clone(),
            zr_sqrs: deck.clone(),
            zi_sqrs: deck.clone(),
            sum_of_sqrs: deck.clone(),
            zr_zi_sqrs: deck.clone(),
            temp: deck,
            escaped_flags: vec![U32x8::ZERO; group_count],
        })
    }

    /// Le vecteur de comparaison n'est recalculé que si le seuil change.
    pub fn set_threshold(&mut self, threshold: u32) -> Result<()> {
        if self.threshold != Some(threshold) {
            self.threshold_vector = self.math.create_threshold_vector(threshold)?;
            self.threshold = Some(threshold);
        }
        Ok(())
    }

    pub fn threshold(&self) -> Option<u32> {
        self.threshold
    }

    pub fn set_increasing_iterations(&mut self, increasing_iterations: bool) {
        self.increasing_iterations = increasing_iterations;
    }

    pub fn set_crs(&mut self, values: &[Fp31Val]) {
        self.crs.set_values(values);
    }

    /// Toute la ligne partage la même partie imaginaire de c.
    pub fn set_ci(&mut self, value: &Fp31Val) {
        self.cis.fill(value);
    }

    pub fn load_z(&mut self, index: usize, zr: &[u32], zi: &[u32]) {
        self.zrs.set_lane_limbs(index, zr);
        self.zis.set_lane_limbs(index, zi);
    }

    pub fn store_z(&self, index: usize, zr_out: &mut [u32], zi_out: &mut [u32]) {
        self.zrs.lane_limbs_into(index, zr_out);
        self.zis.lane_limbs_into(index, zi_out);
    }

    pub fn reset(&mut self) {
        self.is_reset = true;
    }

    pub fn iterate(&mut self, in_play: &[usize]) -> IterationStep {
        let step = if self.is_reset {
            self.is_reset = false;
            if self.increasing_iterations {
                IterationStep::Resumed
            } else {
                self.zrs.copy_groups_from(&self.crs, in_play);
                self.zis.copy_groups_from(&self.cis, in_play);
                IterationStep::Seeded
            }
        } else {
            // zi = (zr + zi)² - zr² - zi² + ci
            self.math
                .add_then_square(&self.zrs, &self.zis, &mut self.zr_zi_sqrs, in_play);
            self.math
                .sub(&self.zr_zi_sqrs, &self.zr_sqrs, &mut self.temp, in_play);
            self.math
                .sub(&self.temp, &self.zi_sqrs, &mut self.zr_zi_sqrs, in_play);
            self.math
                .add(&self.zr_zi_sqrs, &self.cis, &mut self.zis, in_play);

            // zr = zr² - zi² + cr
            self.math
                .sub(&self.zr_sqrs, &self.zi_sqrs, &mut self.temp, in_play);
            self.math.add(&self.temp, &self.crs, &mut self.zrs, in_play);
            IterationStep::Advanced
        };

        self.math.square(&self.zrs, &mut self.zr_sqrs, in_play);
        self.math.square(&self.zis, &mut self.zi_sqrs, in_play);
        self.math
            .add(&self.zr_sqrs, &self.zi_sqrs, &mut self.sum_of_sqrs, in_play);
        self.math.is_greater_or_equal_than(
            &self.sum_of_sqrs,
            self.threshold_vector,
            &mut self.escaped_flags,
            in_play,
        );

        step
    }

    pub fn escaped_flags(&self) -> &[U32x8] {
        &self.escaped_flags
    }

    pub fn zrs(&self) -> &Fp31Deck {
        &self.zrs
    }

    pub fn zis(&self) -> &Fp31Deck {
        &self.zis
    }

    pub fn math_op_counts(&self) -> &MathOpCounts {
        self.math.math_op_counts()
    }

    pub fn math_op_counts_mut(&mut self) -> &mut MathOpCounts {
        self.math.math_op_counts_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fp31::RValue;

    fn val(format: FixedPointFormat, x: f64) -> Fp31Val {
        Fp31Val::from_rvalue(&RValue::from_f64(x).unwrap(), format).unwrap()
    }

    fn lane_f64(format: FixedPointFormat, deck: &Fp31Deck, index: usize) -> f64 {
        Fp31Val::from_limbs(format, deck.value(index)).unwrap().to_f64()
    }

    #[test]
    fn first_steps_follow_the_recurrence() {
        let format = FixedPointFormat::new(8, 2).unwrap();
        let mut iterator = Fp31Iterator::new(format, 8).unwrap();
        iterator.set_threshold(4).unwrap();
        let crs: Vec<Fp31Val> = [-0.5, 0.25, 1.0, -2.0, 0.0, 0.5, -1.0, 1.5]
            .iter()
            .map(|&x| val(format, x))
            .collect();
        iterator.set_crs(&crs);
        iterator.set_ci(&val(format, 0.5));
        iterator.reset();

        assert_eq!(iterator.iterate(&[0]), IterationStep::Seeded);
        assert_eq!(lane_f64(format, iterator.zrs(), 0), -0.5);
        assert_eq!(lane_f64(format, iterator.zis(), 0), 0.5);
        // |c|² = 4.25 pour c = -2 + 0.5i
        assert_eq!(iterator.escaped_flags()[0].move_mask(), 0b0000_1000);

        assert_eq!(iterator.iterate(&[0]), IterationStep::Advanced);
        // c = -0.5 + 0.5i : z² + c = (0.25 - 0.25 - 0.5) + (2·(-0.25) + 0.5)i
        assert_eq!(lane_f64(format, iterator.zrs(), 0), -0.5);
        assert_eq!(lane_f64(format, iterator.zis(), 0), 0.0);
        // c = 1 + 0.5i : z² + c = (1 - 0.25 + 1) + (1 + 0.5)i
        assert_eq!(lane_f64(format, iterator.zrs(), 2), 1.75);
        assert_eq!(lane_f64(format, iterator.zis(), 2), 1.5);
    }

    #[test]
    fn resume_step_keeps_loaded_z() {
        let format = FixedPointFormat::new(8, 1).unwrap();
        let mut iterator = Fp31Iterator::new(format, 8).unwrap();
        iterator.set_threshold(4).unwrap();
        iterator.set_increasing_iterations(true);
        iterator.set_crs(&vec![val(format, 0.25); 8]);
        iterator.set_ci(&val(format, 0.0));
        let zr = val(format, 1.5);
        let zi = val(format, 1.5);
        iterator.load_z(4, zr.limbs(), zi.limbs());
        iterator.reset();

        assert_eq!(iterator.iterate(&[0]), IterationStep::Resumed);
        assert!(!IterationStep::Resumed.is_counted());
        assert_eq!(lane_f64(format, iterator.zrs(), 4), 1.5);
        // 1.5² + 1.5² = 4.5 >= 4
        assert_eq!(iterator.escaped_flags()[0].move_mask(), 0b0001_0000);

        let mut zr_out = [0u32; 1];
        let mut zi_out = [0u32; 1];
        iterator.store_z(4, &mut zr_out, &mut zi_out);
        assert_eq!(&zr_out, zr.limbs());
    }

    #[test]
    fn threshold_is_validated() {
        let format = FixedPointFormat::new(4, 1).unwrap();
        let mut iterator = Fp31Iterator::new(format, 8).unwrap();
        assert!(iterator.set_threshold(4).is_ok());
        assert!(iterator.set_threshold(8).is_err());
        assert_eq!(iterator.threshold(), Some(4));
    }
}
