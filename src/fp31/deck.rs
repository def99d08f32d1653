use crate::error::{ConfigurationError, Result};
use crate::fp31::format::LOW31_BITS_SET;
use crate::fp31::simd::{U32x8, U64x8, LANES};
use crate::fp31::value::Fp31Val;

/// Paquet de valeurs virgule fixe rangées « limbe d'abord » :
/// la cellule `(limbe, groupe)` contient la même limbe de 8 valeurs.
///
/// Le nombre de limbes est fixé à la construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fp31Deck {
    limb_count: usize,
    group_count: usize,
    cells: Vec<U32x8>,
}

impl Fp31Deck {
    pub fn new(limb_count: usize, value_count: usize) -> Result<Self> {
        if value_count % LANES != 0 {
            return Err(ConfigurationError::BlockWidthNotLaneAligned(value_count));
        }
        let group_count = value_count / LANES;
        Ok(Self {
            limb_count,
            group_count,
            cells: vec![U32x8::ZERO; limb_count * group_count],
        })
    }

    pub fn limb_count(&self) -> usize {
        self.limb_count
    }

    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn value_count(&self) -> usize {
        self.group_count * LANES
    }

    #[inline(always)]
    pub fn cell(&self, limb: usize, group: usize) -> U32x8 {
        self.cells[limb * self.group_count + group]
    }

    #[inline(always)]
    pub fn set_cell(&mut self, limb: usize, group: usize, value: U32x8) {
        self.cells[limb * self.group_count + group] = value;
    }

    /// Toutes les cellules d'une limbe, une par groupe.
    pub fn limb(&self, limb: usize) -> &[U32x8] {
        let start = limb * self.group_count;
        &self.cells[start..start + self.group_count]
    }

    pub fn clear(&mut self) {
        self.cells.fill(U32x8::ZERO);
    }

    pub fn copy_from(&mut self, other: &Fp31Deck) {
        self.cells.copy_from_slice(&other.cells);
    }

    /// Copie seulement les groupes listés.
    pub fn copy_groups_from(&mut self, other: &Fp31Deck, groups: &[usize]) {
        for limb in 0..self.limb_count {
            for &group in groups {
                self.set_cell(limb, group, other.cell(limb, group));
            }
        }
    }

    /// Écrit les limbes d'une valeur dans la voie `index`.
    pub fn set_lane_limbs(&mut self, index: usize, limbs: &[u32]) {
        let (group, lane) = (index / LANES, index % LANES);
        for (limb, &value) in limbs.iter().enumerate().take(self.limb_count) {
            self.cells[limb * self.group_count + group].set_lane(lane, value & LOW31_BITS_SET);
        }
    }

    /// Recopie les limbes de la voie `index` dans `out`.
    pub fn lane_limbs_into(&self, index: usize, out: &mut [u32]) {
        let (group, lane) = (index / LANES, index % LANES);
        for (limb, slot) in out.iter_mut().enumerate().take(self.limb_count) {
            *slot = self.cell(limb, group).lane(lane);
        }
    }

    pub fn set_value(&mut self, index: usize, value: &Fp31Val) {
        self.set_lane_limbs(index, value.limbs());
    }

    pub fn value(&self, index: usize) -> Vec<u32> {
        let mut limbs = vec![0; self.limb_count];
        self.lane_limbs_into(index, &mut limbs);
        limbs
    }

    pub fn set_values(&mut self, values: &[Fp31Val]) {
        for (index, value) in values.iter().enumerate().take(self.value_count()) {
            self.set_value(index, value);
        }
    }

    /// Même valeur dans toutes les voies.
    pub fn fill(&mut self, value: &Fp31Val) {
        for (limb, &v) in value.limbs().iter().enumerate().take(self.limb_count) {
            let start = limb * self.group_count;
            self.cells[start..start + self.group_count].fill(U32x8::splat(v));
        }
    }
}

/// Paquet élargi (voies 64 bits) utilisé pendant l'élévation au carré :
/// sommes partielles non réduites. Jamais persisté.
#[derive(Clone, Debug)]
pub struct Fp31WideDeck {
    limb_count: usize,
    group_count: usize,
    cells: Vec<U64x8>,
}

impl Fp31WideDeck {
    pub fn new(limb_count: usize, group_count: usize) -> Self {
        Self {
            limb_count,
            group_count,
            cells: vec![U64x8::ZERO; limb_count * group_count],
        }
    }

    pub fn limb_count(&self) -> usize {
        self.limb_count
    }

    #[inline(always)]
    pub fn cell(&self, limb: usize, group: usize) -> U64x8 {
        self.cells[limb * self.group_count + group]
    }

    #[inline(always)]
    pub fn set_cell(&mut self, limb: usize, group: usize, value: U64x8) {
        self.cells[limb * self.group_count + group] = value;
    }

    #[inline(always)]
    pub fn add_to_cell(&mut self, limb: usize, group: usize, value: U64x8) {
        let cell = &mut self.cells[limb * self.group_count + group];
        *cell = *cell + value;
    }

    /// Remet à zéro les groupes listés.
    pub fn clear_groups(&mut self, groups: &[usize]) {
        for limb in 0..self.limb_count {
            for &group in groups {
                self.set_cell(limb, group, U64x8::ZERO);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fp31::format::FixedPointFormat;
    use crate::fp31::value::RValue;

    #[test]
    fn value_count_must_fill_whole_groups() {
        assert!(Fp31Deck::new(2, 12).is_err());
        let deck = Fp31Deck::new(2, 16).unwrap();
        assert_eq!(deck.group_count(), 2);
        assert_eq!(deck.value_count(), 16);
    }

    #[test]
    fn lanes_are_independent() {
        let format = FixedPointFormat::new(8, 3).unwrap();
        let mut deck = Fp31Deck::new(3, 16).unwrap();
        let v = Fp31Val::from_rvalue(&RValue::from_f64(-1.5).unwrap(), format).unwrap();
        deck.set_value(9, &v);
        assert_eq!(deck.value(9), v.limbs());
        assert_eq!(deck.value(8), vec![0, 0, 0]);
        assert_eq!(deck.cell(2, 1).lane(1), v.limbs()[2]);
    }

    #[test]
    fn fill_and_copy_groups() {
        let format = FixedPointFormat::new(8, 2).unwrap();
        let v = Fp31Val::from_rvalue(&RValue::from_f64(0.5).unwrap(), format).unwrap();
        let mut source = Fp31Deck::new(2, 24).unwrap();
        source.fill(&v);
        let mut target = Fp31Deck::new(2, 24).unwrap();
        target.copy_groups_from(&source, &[2]);
        assert_eq!(target.value(0), vec![0, 0]);
        assert_eq!(target.value(23), v.limbs());
        target.copy_from(&source);
        assert_eq!(target, source);
    }
}
