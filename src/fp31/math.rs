//! Noyau arithmétique vectoriel : addition, négation, soustraction,
//! carré et comparaison au seuil, sur des paquets `Fp31Deck`.
//!
//! Chaque opération ne traite que les groupes listés dans `in_play` ;
//! les autres groupes du paquet résultat ne sont pas modifiés.
//!
//! La retenue qui sort de la limbe de poids fort (addition, négation) est
//! abandonnée : c'est l'arithmétique modulo 2^(31·L) du complément à deux.
//! Les voies déjà terminées d'un groupe encore actif peuvent déborder,
//! leur contenu n'est alors plus significatif mais reste défini.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fp31::deck::{Fp31Deck, Fp31WideDeck};
use crate::fp31::format::{FixedPointFormat, BITS_PER_LIMB, LOW31_BITS_SET, SIGN_STRIPPED_MASK, TEST_BIT_30};
use crate::fp31::simd::{U32x8, U64x8, LANES};

const LOW31: U32x8 = U32x8::splat(LOW31_BITS_SET);
const LOW31_WIDE: U64x8 = U64x8::splat(LOW31_BITS_SET as u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MathOp {
    Multiplication,
    Addition,
    Negation,
    Conversion,
    Comparison,
    Split,
    UnusedCalc,
}

/// Compteurs d'opérations vectorielles. Ne sont incrémentés qu'avec la feature `diagnostics`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathOpCounts {
    pub multiplications: u64,
    pub additions: u64,
    pub negations: u64,
    pub conversions: u64,
    pub comparisons: u64,
    pub splits: u64,
    pub unused_calcs: u64,
}

impl MathOpCounts {
    #[inline(always)]
    pub fn record(&mut self, op: MathOp, vectors: usize) {
        #[cfg(feature = "diagnostics")]
        {
            let n = vectors as u64;
            match op {
                MathOp::Multiplication => self.multiplications += n,
                MathOp::Addition => self.additions += n,
                MathOp::Negation => self.negations += n,
                MathOp::Conversion => self.conversions += n,
                MathOp::Comparison => self.comparisons += n,
                MathOp::Split => self.splits += n,
                MathOp::UnusedCalc => self.unused_calcs += n,
            }
        }
        #[cfg(not(feature = "diagnostics"))]
        let _ = (op, vectors);
    }

    pub fn merge(&mut self, other: &MathOpCounts) {
        self.multiplications += other.multiplications;
        self.additions += other.additions;
        self.negations += other.negations;
        self.conversions += other.conversions;
        self.comparisons += other.comparisons;
        self.splits += other.splits;
        self.unused_calcs += other.unused_calcs;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Tampons de l'élévation au carré, dimensionnés une fois à la construction.
#[derive(Clone, Debug)]
struct SquareScratch {
    limb_count: usize,
    shift_left: u32,
    shift_right: u32,
    // valeurs absolues élargies (L limbes)
    source: Fp31WideDeck,
    // accumulateur double longueur (2L limbes)
    partials: Fp31WideDeck,
}

impl SquareScratch {
    fn new(format: FixedPointFormat, group_count: usize) -> Self {
        let limb_count = format.limb_count();
        let shift_left = format.bits_before_binary_point() as u32;
        Self {
            limb_count,
            shift_left,
            shift_right: BITS_PER_LIMB - shift_left,
            source: Fp31WideDeck::new(limb_count, group_count),
            partials: Fp31WideDeck::new(limb_count * 2, group_count),
        }
    }

    fn square(&mut self, a: &Fp31Deck, result: &mut Fp31Deck, in_play: &[usize], counts: &mut MathOpCounts) {
        self.convert_to_magnitude(a, in_play, counts);
        self.multiply(in_play, counts);
        self.resolve_carries(in_play);
        self.shift_and_trim(result, in_play);
    }

    /// Étape 1 : valeur absolue de chaque voie, élargie à 64 bits.
    fn convert_to_magnitude(&mut self, a: &Fp31Deck, in_play: &[usize], counts: &mut MathOpCounts) {
        let msl = self.limb_count - 1;
        let sign_bit = U32x8::splat(TEST_BIT_30);

        for &group in in_play {
            let sign_mask = (a.cell(msl, group) & sign_bit).cmp_gt_i32(U32x8::ZERO);

            if !sign_mask.any_set() {
                for limb in 0..self.limb_count {
                    self.source.set_cell(limb, group, (a.cell(limb, group) & LOW31).widen());
                }
                continue;
            }

            counts.record(MathOp::Conversion, 1);
            let mut carry = U32x8::splat(1);
            for limb in 0..self.limb_count {
                let cell = a.cell(limb, group) & LOW31;
                let flipped = (cell ^ LOW31) + carry;
                carry = flipped >> BITS_PER_LIMB;
                let magnitude = U32x8::select(sign_mask, flipped & LOW31, cell);
                self.source.set_cell(limb, group, magnitude.widen());
            }
            counts.record(MathOp::Negation, self.limb_count);
        }
    }

    /// Étape 2 : produits partiels j <= i, doublés hors diagonale,
    /// répartis en moitié basse (position j+i) et haute (j+i+1).
    fn multiply(&mut self, in_play: &[usize], counts: &mut MathOpCounts) {
        self.partials.clear_groups(in_play);

        for j in 0..self.limb_count {
            for i in j..self.limb_count {
                for &group in in_play {
                    let mut product = self.source.cell(j, group).mul_lo32(self.source.cell(i, group));
                    if i != j {
                        product = product << 1;
                    }
                    self.partials.add_to_cell(j + i, group, product & LOW31_WIDE);
                    self.partials.add_to_cell(j + i + 1, group, product >> BITS_PER_LIMB);
                }
                counts.record(MathOp::Multiplication, in_play.len());
                counts.record(MathOp::Split, in_play.len());
            }
        }
    }

    /// Étape 3 : propagation des retenues, du poids faible vers le poids fort.
    fn resolve_carries(&mut self, in_play: &[usize]) {
        for &group in in_play {
            let mut carry = U64x8::ZERO;
            for limb in 0..self.limb_count * 2 {
                let v = self.partials.cell(limb, group) + carry;
                self.partials.set_cell(limb, group, v & LOW31_WIDE);
                carry = v >> BITS_PER_LIMB;
            }
            // |a|^2 < 2^(62·L) : rien ne peut sortir de la dernière position.
            debug_assert_eq!(carry, U64x8::ZERO, "carry out of the square accumulator");
        }
    }

    /// Étape 4 : décalage à droite du nombre de bits fractionnaires,
    /// on garde les L limbes utiles.
    fn shift_and_trim(&self, result: &mut Fp31Deck, in_play: &[usize]) {
        let l = self.limb_count;
        for &group in in_play {
            for limb in 0..l {
                let low = self.partials.cell(l + limb - 1, group) >> self.shift_right;
                let high = (self.partials.cell(l + limb, group) << self.shift_left) & LOW31_WIDE;
                result.set_cell(limb, group, (high | low).narrow());
            }
        }
    }
}

/// Opérations vectorielles pour un format et une largeur de paquet donnés.
/// Les tampons internes sont réutilisés d'un appel à l'autre (non réentrant).
#[derive(Clone, Debug)]
pub struct Fp31VecMath {
    format: FixedPointFormat,
    group_count: usize,
    carries: Vec<U32x8>,
    square: SquareScratch,
    negation_result: Fp31Deck,
    addition_result: Fp31Deck,
    counts: MathOpCounts,
}

impl Fp31VecMath {
    pub fn new(format: FixedPointFormat, value_count: usize) -> Result<Self> {
        let negation_result = Fp31Deck::new(format.limb_count(), value_count)?;
        let addition_result = negation_result.clone();
        let group_count = value_count / LANES;
        Ok(Self {
            format,
            group_count,
            carries: vec![U32x8::ZERO; group_count],
            square: SquareScratch::new(format, group_count),
            negation_result,
            addition_result,
            counts: MathOpCounts::default(),
        })
    }

    pub fn format(&self) -> FixedPointFormat {
        self.format
    }

    pub fn value_count(&self) -> usize {
        self.group_count * LANES
    }

    pub fn math_op_counts(&self) -> &MathOpCounts {
        &self.counts
    }

    pub fn math_op_counts_mut(&mut self) -> &mut MathOpCounts {
        &mut self.counts
    }

    pub fn add(&mut self, a: &Fp31Deck, b: &Fp31Deck, c: &mut Fp31Deck, in_play: &[usize]) {
        add_into(a, b, c, &mut self.carries, in_play);
        self.counts.record(MathOp::Addition, in_play.len() * a.limb_count());
    }

    pub fn sub(&mut self, a: &Fp31Deck, b: &Fp31Deck, c: &mut Fp31Deck, in_play: &[usize]) {
        negate_into(b, &mut self.negation_result, &mut self.carries, in_play);
        add_into(a, &self.negation_result, c, &mut self.carries, in_play);
        let vectors = in_play.len() * a.limb_count();
        self.counts.record(MathOp::Negation, vectors);
        self.counts.record(MathOp::Addition, vectors);
    }

    pub fn negate(&mut self, a: &Fp31Deck, result: &mut Fp31Deck, in_play: &[usize]) {
        negate_into(a, result, &mut self.carries, in_play);
        self.counts.record(MathOp::Negation, in_play.len() * a.limb_count());
    }

    /// `result = a²`, tronqué à la précision du format.
    pub fn square(&mut self, a: &Fp31Deck, result: &mut Fp31Deck, in_play: &[usize]) {
        self.square.square(a, result, in_play, &mut self.counts);
    }

    /// `c = (a + b)²`
    pub fn add_then_square(&mut self, a: &Fp31Deck, b: &Fp31Deck, c: &mut Fp31Deck, in_play: &[usize]) {
        add_into(a, b, &mut self.addition_result, &mut self.carries, in_play);
        self.counts.record(MathOp::Addition, in_play.len() * a.limb_count());
        self.square.square(&self.addition_result, c, in_play, &mut self.counts);
    }

    /// Vecteur de comparaison pour un seuil entier : limbe de poids fort du seuil moins un,
    /// pour obtenir `>=` avec une comparaison stricte.
    pub fn create_threshold_vector(&self, threshold: u32) -> Result<U32x8> {
        self.format.check_threshold(threshold)?;
        Ok(U32x8::splat(self.format.threshold_msl(threshold) - 1))
    }

    /// `escaped[g]` reçoit, par voie, `a >= seuil`. `a` doit être positif (somme de carrés) :
    /// seule la limbe de poids fort est comparée.
    pub fn is_greater_or_equal_than(
        &mut self,
        a: &Fp31Deck,
        threshold_vector: U32x8,
        escaped: &mut [U32x8],
        in_play: &[usize],
    ) {
        let msl = a.limb_count() - 1;
        let sign_stripped = U32x8::splat(SIGN_STRIPPED_MASK);
        for &group in in_play {
            let top = a.cell(msl, group) & sign_stripped;
            escaped[group] = top.cmp_gt_i32(threshold_vector);
        }
        self.counts.record(MathOp::Comparison, in_play.len());
    }
}

fn add_into(a: &Fp31Deck, b: &Fp31Deck, c: &mut Fp31Deck, carries: &mut [U32x8], in_play: &[usize]) {
    for &group in in_play {
        carries[group] = U32x8::ZERO;
    }
    for limb in 0..a.limb_count() {
        for &group in in_play {
            let sum = a.cell(limb, group) + b.cell(limb, group) + carries[group];
            c.set_cell(limb, group, sum & LOW31);
            carries[group] = sum >> BITS_PER_LIMB;
        }
    }
}

fn negate_into(a: &Fp31Deck, result: &mut Fp31Deck, carries: &mut [U32x8], in_play: &[usize]) {
    for &group in in_play {
        carries[group] = U32x8::splat(1);
    }
    for limb in 0..a.limb_count() {
        for &group in in_play {
            let flipped = (a.cell(limb, group) ^ LOW31) + carries[group];
            result.set_cell(limb, group, flipped & LOW31);
            carries[group] = flipped >> BITS_PER_LIMB;
        }
    }
}
