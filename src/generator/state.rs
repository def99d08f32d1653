use crate::fp31::simd::{U32x8, LANES};

/// État d'itération d'une ligne du bloc : compteurs, drapeaux d'échappement,
/// drapeaux « terminé » et liste des groupes encore en jeu.
///
/// Une ligne est active tant que `in_play` n'est pas vide. L'état d'une voie
/// est porté par des masques (0 ou `u32::MAX`) plutôt que par une énumération.
#[derive(Clone, Debug)]
pub struct IterationState {
    group_count: usize,
    target_iterations: u32,
    // une voie est terminée quand `count > target_iterations`
    target_vector: U32x8,
    increasing_iterations: bool,
    row_number: Option<usize>,

    counts: Vec<U32x8>,
    has_escaped: Vec<U32x8>,
    done: Vec<U32x8>,
    just_done: Vec<U32x8>,
    unused_calcs: Vec<U32x8>,
    in_play: Vec<usize>,

    loaded_count_total: u64,
    row_used_calcs: Vec<u64>,
    row_unused_calcs: Vec<u64>,
}

impl IterationState {
    pub fn new(value_count: usize, row_count: usize) -> Self {
        let group_count = value_count / LANES;
        Self {
            group_count,
            target_iterations: 0,
            target_vector: U32x8::ZERO,
            increasing_iterations: false,
            row_number: None,
            counts: vec![U32x8::ZERO; group_count],
            has_escaped: vec![U32x8::ZERO; group_count],
            done: vec![U32x8::ZERO; group_count],
            just_done: vec![U32x8::ZERO; group_count],
            unused_calcs: vec![U32x8::ZERO; group_count],
            in_play: Vec::with_capacity(group_count),
            loaded_count_total: 0,
            row_used_calcs: vec![0; row_count],
            row_unused_calcs: vec![0; row_count],
        }
    }

    /// Prépare un nouveau bloc.
    pub fn prepare(&mut self, target_iterations: u32, increasing_iterations: bool) {
        self.target_iterations = target_iterations;
        self.target_vector = U32x8::splat(target_iterations);
        self.increasing_iterations = increasing_iterations;
        self.row_number = None;
        self.in_play.clear();
        self.row_used_calcs.fill(0);
        self.row_unused_calcs.fill(0);
    }

    pub fn target_iterations(&self) -> u32 {
        self.target_iterations
    }

    pub fn row_number(&self) -> Option<usize> {
        self.row_number
    }

    /// Charge une ligne. En mode reprise les compteurs et drapeaux sauvegardés
    /// sont repris ; sinon la ligne part de zéro.
    pub fn load_row(&mut self, row: usize, counts: &[u32], escaped: &[bool]) {
        self.row_number = Some(row);
        self.loaded_count_total = 0;

        for group in 0..self.group_count {
            let base = group * LANES;
            let (group_counts, group_escaped) = if self.increasing_iterations {
                (
                    U32x8(std::array::from_fn(|lane| counts[base + lane])),
                    U32x8(std::array::from_fn(|lane| {
                        if escaped[base + lane] {
                            u32::MAX
                        } else {
                            0
                        }
                    })),
                )
            } else {
                (U32x8::ZERO, U32x8::ZERO)
            };

            self.loaded_count_total += group_counts.0.iter().map(|&c| c as u64).sum::<u64>();
            self.counts[group] = group_counts;
            self.has_escaped[group] = group_escaped;
            self.done[group] = group_escaped | group_counts.cmp_gt_i32(self.target_vector);
            self.just_done[group] = U32x8::ZERO;
            self.unused_calcs[group] = U32x8::ZERO;
        }

        let done = &self.done;
        self.in_play.clear();
        self.in_play
            .extend((0..self.group_count).filter(|&group| !done[group].all_set()));
    }

    /// Met à jour compteurs et drapeaux après un pas d'itération compté.
    ///
    /// Les voies déjà terminées ne changent plus : ni compteur, ni drapeau.
    pub fn update_counts(&mut self, escaped: &[U32x8]) {
        let one = U32x8::splat(1);
        for &group in &self.in_play {
            let done = self.done[group];

            let counts = U32x8::select(done, self.counts[group], self.counts[group] + one);
            self.counts[group] = counts;

            let unused = self.unused_calcs[group];
            self.unused_calcs[group] = U32x8::select(done, unused + one, unused);

            let has_escaped = U32x8::select(done, self.has_escaped[group], escaped[group]);
            self.has_escaped[group] = has_escaped;

            let now_done = done | has_escaped | counts.cmp_gt_i32(self.target_vector);
            self.just_done[group] = now_done.and_not(done);
            self.done[group] = now_done;
        }
    }

    /// Voies passées à « terminé » lors du dernier `update_counts`.
    pub fn just_done(&self, group: usize) -> U32x8 {
        self.just_done[group]
    }

    /// Retire de la liste les groupes entièrement terminés. Compactage sur place.
    pub fn retire_done_groups(&mut self) -> usize {
        let before = self.in_play.len();
        let done = &self.done;
        self.in_play.retain(|&group| !done[group].all_set());
        before - self.in_play.len()
    }

    pub fn in_play(&self) -> &[usize] {
        &self.in_play
    }

    pub fn is_row_done(&self) -> bool {
        self.in_play.is_empty()
    }

    pub fn counts(&self) -> &[U32x8] {
        &self.counts
    }

    pub fn has_escaped_flags(&self) -> &[U32x8] {
        &self.has_escaped
    }

    pub fn done_flags(&self) -> &[U32x8] {
        &self.done
    }

    /// Recopie la ligne courante dans le stockage du bloc.
    /// Retourne le nombre de calculs inutiles (voies terminées encore calculées).
    pub fn flush_row(&mut self, counts_out: &mut [u32], escaped_out: &mut [bool]) -> u64 {
        let mut count_total = 0u64;
        let mut unused_total = 0u64;
        for group in 0..self.group_count {
            for lane in 0..LANES {
                let index = group * LANES + lane;
                let count = self.counts[group].lane(lane);
                counts_out[index] = count;
                escaped_out[index] = self.has_escaped[group].lane(lane) != 0;
                count_total += count as u64;
                unused_total += self.unused_calcs[group].lane(lane) as u64;
            }
        }

        if let Some(row) = self.row_number {
            self.row_used_calcs[row] = count_total.saturating_sub(self.loaded_count_total);
            self.row_unused_calcs[row] = unused_total;
        }
        unused_total
    }

    pub fn row_used_calcs(&self) -> &[u64] {
        &self.row_used_calcs
    }

    pub fn row_unused_calcs(&self) -> &[u64] {
        &self.row_unused_calcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lanes(mask: u8) -> U32x8 {
        U32x8(std::array::from_fn(|lane| if mask & (1 << lane) != 0 { u32::MAX } else { 0 }))
    }

    #[test]
    fn done_lanes_never_change_again() {
        let mut state = IterationState::new(16, 1);
        state.prepare(1000, false);
        state.load_row(0, &[0; 16], &[false; 16]);
        assert_eq!(state.in_play(), &[0, 1]);

        // les voies 0..3 du groupe 0 s'échappent au premier pas
        state.update_counts(&[lanes(0b0000_0111), U32x8::ZERO]);
        assert_eq!(state.just_done(0).move_mask(), 0b0000_0111);
        assert_eq!(state.retire_done_groups(), 0);

        for step in 0..40 {
            let flip = if step % 2 == 0 { U32x8::ZERO } else { lanes(0b0000_0111) };
            state.update_counts(&[flip, U32x8::ZERO]);
            assert_eq!(state.just_done(0), U32x8::ZERO);
            state.retire_done_groups();

            for lane in 0..3 {
                assert_eq!(state.counts()[0].lane(lane), 1);
                assert_eq!(state.has_escaped_flags()[0].lane(lane), u32::MAX);
            }
        }
        assert_eq!(state.counts()[0].lane(5), 41);
        assert_eq!(state.has_escaped_flags()[0].lane(5), 0);

        let mut counts = [0u32; 16];
        let mut escaped = [false; 16];
        let unused = state.flush_row(&mut counts, &mut escaped);
        assert_eq!(unused, 3 * 40);
        assert_eq!(state.row_used_calcs()[0], 3 + 13 * 41);
        assert_eq!(&escaped[..4], &[true, true, true, false]);
        assert_eq!(counts[15], 41);
    }

    #[test]
    fn target_reached_retires_group() {
        let mut state = IterationState::new(8, 1);
        state.prepare(3, false);
        state.load_row(0, &[0; 8], &[false; 8]);
        for _ in 0..3 {
            state.update_counts(&[U32x8::ZERO]);
            assert_eq!(state.retire_done_groups(), 0);
        }
        // terminé au pas qui dépasse la cible
        state.update_counts(&[U32x8::ZERO]);
        assert!(state.just_done(0).all_set());
        assert_eq!(state.retire_done_groups(), 1);
        assert!(state.is_row_done());
        assert_eq!(state.counts()[0], U32x8::splat(4));
        assert_eq!(state.has_escaped_flags()[0], U32x8::ZERO);
    }

    #[test]
    fn resumed_rows_start_from_stored_counts() {
        let mut state = IterationState::new(16, 2);
        state.prepare(10, true);
        let mut counts = [4u32; 16];
        let mut escaped = [false; 16];
        // groupe 0 : tout est déjà terminé ; 10 n'atteint pas encore la cible
        counts[..8].fill(11);
        escaped[3] = true;
        counts[3] = 2;
        counts[9] = 11;
        counts[10] = 10;
        state.load_row(1, &counts, &escaped);

        assert_eq!(state.in_play(), &[1]);
        assert_eq!(state.done_flags()[1].move_mask(), 0b0000_0010);

        state.update_counts(&[U32x8::ZERO, U32x8::ZERO]);
        assert_eq!(state.counts()[1].lane(0), 5);
        assert_eq!(state.counts()[1].lane(1), 11);
        assert_eq!(state.counts()[1].lane(2), 11);
        assert!(state.just_done(1).move_mask() & 0b0000_0100 != 0);
        assert_eq!(state.counts()[0].lane(3), 2);
    }

    #[test]
    fn fresh_rows_ignore_stored_counts() {
        let mut state = IterationState::new(8, 1);
        state.prepare(5, false);
        state.load_row(0, &[7; 8], &[true; 8]);
        assert_eq!(state.in_play(), &[0]);
        assert_eq!(state.counts()[0], U32x8::ZERO);
    }

    #[test]
    fn zero_target_still_takes_the_seeding_step() {
        let mut state = IterationState::new(8, 1);
        state.prepare(0, false);
        state.load_row(0, &[0; 8], &[false; 8]);
        assert_eq!(state.in_play(), &[0]);
        state.update_counts(&[U32x8::ZERO]);
        assert_eq!(state.retire_done_groups(), 1);
        assert_eq!(state.counts()[0], U32x8::splat(1));
    }

    #[test]
    fn lane_escaping_on_the_step_past_the_target_is_flagged() {
        let mut state = IterationState::new(8, 1);
        state.prepare(2, false);
        state.load_row(0, &[0; 8], &[false; 8]);
        state.update_counts(&[U32x8::ZERO]);
        state.update_counts(&[U32x8::ZERO]);
        assert!(!state.is_row_done());
        state.update_counts(&[lanes(0b0000_0001)]);
        assert!(state.just_done(0).all_set());
        assert_eq!(state.counts()[0], U32x8::splat(3));
        assert_eq!(state.has_escaped_flags()[0].move_mask(), 0b0000_0001);
    }
}
