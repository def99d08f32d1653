use std::time::Instant;

use log::{debug, trace};

use crate::config::{GeneratorConfig, SkipHeuristics};
use crate::error::{ConfigurationError, Result};
use crate::fp31::{FixedPointFormat, Fp31Val, MathOp, SamplePoints, LANES};
use crate::generator::cancel::Cancellation;
use crate::generator::iterator::Fp31Iterator;
use crate::generator::request::{
    MapSectionRequest, MapSectionResponse, MapSectionVectors, MapSectionZVectors, SizeInt,
};
use crate::generator::state::IterationState;

/// Calcule un bloc (« section ») de la carte, ligne par ligne.
///
/// Un générateur possède ses tampons et n'est pas réentrant : un calcul à la fois.
/// Pour paralléliser, un générateur par thread (voir `pool`).
#[derive(Clone, Debug)]
pub struct MapSectionGenerator {
    block_size: SizeInt,
    format: FixedPointFormat,
    skip_heuristics: SkipHeuristics,
    iterator: Fp31Iterator,
    state: IterationState,
}

impl MapSectionGenerator {
    pub fn new(block_size: SizeInt, format: FixedPointFormat) -> Result<Self> {
        if block_size.width == 0 || block_size.height == 0 {
            return Err(ConfigurationError::EmptyBlock {
                width: block_size.width,
                height: block_size.height,
            });
        }
        let iterator = Fp31Iterator::new(format, block_size.width)?;
        let state = IterationState::new(block_size.width, block_size.height);
        Ok(Self {
            block_size,
            format,
            skip_heuristics: SkipHeuristics::default(),
            iterator,
            state,
        })
    }

    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        Ok(Self::new(config.block_size, config.format()?)?.with_skip_heuristics(config.skip_heuristics))
    }

    pub fn with_skip_heuristics(mut self, skip_heuristics: SkipHeuristics) -> Self {
        self.skip_heuristics = skip_heuristics;
        self
    }

    pub fn block_size(&self) -> SizeInt {
        self.block_size
    }

    pub fn format(&self) -> FixedPointFormat {
        self.format
    }

    /// Calcule le bloc demandé. Les vecteurs de la demande sont consommés.
    ///
    /// L'annulation est testée avant chaque ligne : les lignes terminées sont
    /// à jour, les suivantes restent telles qu'elles étaient en entrée, et
    /// `request_completed` vaut faux. Seule une configuration incohérente
    /// produit une erreur.
    pub fn generate_map_section<C: Cancellation + ?Sized>(
        &mut self,
        mut request: MapSectionRequest,
        cancel: &C,
    ) -> Result<MapSectionResponse> {
        self.validate(&request)?;
        let (mut vectors, mut z_vectors) = self.take_vectors(&mut request)?;

        let samples_x = SamplePoints::build(
            &request.map_position.x,
            &request.sample_point_delta.width_value(),
            self.block_size.width,
            self.format,
        )?;
        let samples_y = SamplePoints::build(
            &request.map_position.y,
            &request.sample_point_delta.height_value(),
            self.block_size.height,
            self.format,
        )?;

        self.state.prepare(
            request.map_calc_settings.target_iterations,
            request.increasing_iterations,
        );
        self.iterator.math_op_counts_mut().reset();

        if self.should_skip(&samples_x, &samples_y) {
            debug!(
                "block ({}, {}) skipped by heuristics",
                request.block_position.x, request.block_position.y
            );
            return Ok(self.build_response(&request, vectors, z_vectors, true, true));
        }
        self.format.check_iteration_range(
            request.map_calc_settings.threshold,
            max_modulus(&samples_x, &samples_y),
        )?;

        self.iterator.set_threshold(request.map_calc_settings.threshold)?;
        self.iterator.set_increasing_iterations(request.increasing_iterations);
        self.iterator.set_crs(samples_x.points());

        let start = Instant::now();
        let mut completed = true;
        for (row, ci) in samples_y.points().iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(
                    "block ({}, {}) cancelled at row {}",
                    request.block_position.x, request.block_position.y, row
                );
                completed = false;
                break;
            }
            self.generate_row(row, ci, request.increasing_iterations, &mut vectors, &mut z_vectors);
        }

        debug!(
            "block ({}, {}) target {} in {:?}",
            request.block_position.x,
            request.block_position.y,
            request.map_calc_settings.target_iterations,
            start.elapsed()
        );
        Ok(self.build_response(&request, vectors, z_vectors, completed, false))
    }

    fn validate(&self, request: &MapSectionRequest) -> Result<()> {
        for (what, expected, got) in [
            ("block width", self.block_size.width, request.block_size.width),
            ("block height", self.block_size.height, request.block_size.height),
            ("limb count", self.format.limb_count(), request.limb_count),
            (
                "bits before the binary point",
                self.format.bits_before_binary_point() as usize,
                request.bits_before_binary_point as usize,
            ),
        ] {
            if expected != got {
                return Err(ConfigurationError::Mismatch {
                    what,
                    expected,
                    got,
                });
            }
        }
        request.map_calc_settings.validate(self.format)
    }

    /// Sort les vecteurs de la demande (ou en crée de neufs pour un calcul initial).
    fn take_vectors(
        &self,
        request: &mut MapSectionRequest,
    ) -> Result<(MapSectionVectors, MapSectionZVectors)> {
        let increasing = request.increasing_iterations;

        let vectors = match request.map_section_vectors.take() {
            Some(vectors) => {
                vectors.validate(self.block_size)?;
                vectors
            }
            None if increasing => {
                return Err(ConfigurationError::MissingResumeData("counts and escape flags"))
            }
            None => MapSectionVectors::new(self.block_size),
        };

        let z_vectors = match request.map_section_z_vectors.take() {
            Some(z_vectors) => {
                z_vectors.validate(self.block_size, self.format.limb_count())?;
                z_vectors
            }
            None if increasing => return Err(ConfigurationError::MissingResumeData("z values")),
            None => MapSectionZVectors::new(self.block_size, self.format.limb_count()),
        };

        Ok((vectors, z_vectors))
    }

    fn should_skip(&self, samples_x: &SamplePoints, samples_y: &SamplePoints) -> bool {
        let heuristics = self.skip_heuristics;
        if heuristics.skip_positive_blocks
            && !samples_x.origin().is_negative()
            && !samples_y.origin().is_negative()
        {
            return true;
        }
        if heuristics.skip_low_detail_blocks {
            let (x0, x1) = axis_range(samples_x);
            let (y0, y1) = axis_range(samples_y);
            // point du rectangle le plus proche de l'origine
            let nx = 0.0f64.clamp(x0, x1);
            let ny = 0.0f64.clamp(y0, y1);
            if nx * nx + ny * ny > 4.0 {
                return true;
            }
        }
        false
    }

    fn generate_row(
        &mut self,
        row: usize,
        ci: &Fp31Val,
        increasing_iterations: bool,
        vectors: &mut MapSectionVectors,
        z_vectors: &mut MapSectionZVectors,
    ) {
        let width = self.block_size.width;
        let first_pixel = row * width;

        self.state
            .load_row(row, vectors.row_counts(row), vectors.row_escaped_flags(row));
        self.iterator.set_ci(ci);
        if increasing_iterations {
            for index in 0..width {
                let (zr, zi) = z_vectors.pixel_limbs(first_pixel + index);
                self.iterator.load_z(index, zr, zi);
            }
        } else {
            z_vectors.clear_row(row);
        }
        self.iterator.reset();

        let mut steps = 0usize;
        while !self.state.is_row_done() {
            let step = self.iterator.iterate(self.state.in_play());
            if !step.is_counted() {
                continue;
            }
            self.state.update_counts(self.iterator.escaped_flags());
            self.store_finished_lanes(first_pixel, z_vectors);
            self.state.retire_done_groups();
            steps += 1;
        }

        let (counts, escaped) = vectors.row_mut(row);
        let unused = self.state.flush_row(counts, escaped);
        self.iterator
            .math_op_counts_mut()
            .record(MathOp::UnusedCalc, unused as usize);
        trace!("row {row}: {steps} steps, {unused} unused lane calculations");
    }

    /// Sauvegarde z pour les voies qui viennent de se terminer.
    fn store_finished_lanes(&self, first_pixel: usize, z_vectors: &mut MapSectionZVectors) {
        for &group in self.state.in_play() {
            let mut mask = self.state.just_done(group).move_mask();
            while mask != 0 {
                let lane = mask.trailing_zeros() as usize;
                mask &= mask - 1;
                let index = group * LANES + lane;
                let (zr, zi) = z_vectors.pixel_limbs_mut(first_pixel + index);
                self.iterator.store_z(index, zr, zi);
            }
        }
    }

    fn build_response(
        &self,
        request: &MapSectionRequest,
        vectors: MapSectionVectors,
        z_vectors: MapSectionZVectors,
        completed: bool,
        skipped: bool,
    ) -> MapSectionResponse {
        let all_rows_have_escaped =
            completed && !skipped && vectors.has_escaped_flags.iter().all(|&f| f);
        MapSectionResponse {
            block_position: request.block_position.clone(),
            map_calc_settings: request.map_calc_settings,
            map_section_vectors: vectors,
            map_section_z_vectors: z_vectors,
            request_completed: completed,
            skipped,
            all_rows_have_escaped,
            row_used_calcs: self.state.row_used_calcs().to_vec(),
            row_unused_calcs: self.state.row_unused_calcs().to_vec(),
            math_op_counts: cfg!(feature = "diagnostics")
                .then(|| self.iterator.math_op_counts().clone()),
        }
    }
}

/// Majorant de |c| sur le bloc.
fn max_modulus(samples_x: &SamplePoints, samples_y: &SamplePoints) -> f64 {
    let (x0, x1) = axis_range(samples_x);
    let (y0, y1) = axis_range(samples_y);
    x0.abs().max(x1.abs()).hypot(y0.abs().max(y1.abs()))
}

fn axis_range(samples: &SamplePoints) -> (f64, f64) {
    let first = samples.origin().to_f64();
    let last = samples.points().last().map_or(first, Fp31Val::to_f64);
    (first.min(last), first.max(last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fp31::RValue;
    use crate::generator::cancel::NeverCancel;
    use crate::generator::request::{BigVector, MapCalcSettings, RPoint, RSize};
    use crate::reference::{iterate_point_f64, reference_section};
    use num_complex::Complex64;
    use rug::Integer;
    use std::cell::Cell;
    use std::sync::atomic::AtomicBool;

    /// Annule après `rows` lignes.
    struct CancelAfterRows {
        remaining: Cell<usize>,
    }

    impl Cancellation for CancelAfterRows {
        fn is_cancelled(&self) -> bool {
            let remaining = self.remaining.get();
            if remaining == 0 {
                return true;
            }
            self.remaining.set(remaining - 1);
            false
        }
    }

    fn request_at(
        x: &str,
        y: &str,
        delta_exponent: i32,
        block_size: SizeInt,
        limb_count: usize,
        settings: MapCalcSettings,
    ) -> MapSectionRequest {
        let position = RPoint::new(RValue::parse(x, 128).unwrap(), RValue::parse(y, 128).unwrap());
        let format = FixedPointFormat::new(8, limb_count).unwrap();
        MapSectionRequest::at_map_position(
            position,
            RSize::power_of_two(delta_exponent),
            block_size,
            format,
            settings,
        )
    }

    #[test]
    fn deep_zoom_block_matches_fixed_point_reference() {
        let size = SizeInt::new(8, 8);
        let settings = MapCalcSettings::new(500, 4);
        let format = FixedPointFormat::new(8, 2).unwrap();
        let request = request_at("-0.75", "0.1", -40, size, 2, settings);
        let expected = reference_section(&request, format).unwrap();

        let mut generator = MapSectionGenerator::new(size, format).unwrap();
        let first = generator.generate_map_section(request.clone(), &NeverCancel).unwrap();
        let second = generator.generate_map_section(request, &NeverCancel).unwrap();

        assert!(first.request_completed);
        assert_eq!(first.map_section_vectors, expected);
        assert_eq!(first.map_section_vectors, second.map_section_vectors);
        assert_eq!(first.map_section_z_vectors, second.map_section_z_vectors);
    }

    #[test]
    fn overview_matches_fixed_point_reference_and_f64() {
        // [-2, 1] x [-1.5, 1.5], 96 x 96 points, une seule limbe
        let size = SizeInt::new(96, 96);
        let settings = MapCalcSettings::new(100, 4);
        let format = FixedPointFormat::new(8, 1).unwrap();
        let request = request_at("-2", "-1.5", -5, size, 1, settings);
        let expected = reference_section(&request, format).unwrap();

        let mut generator = MapSectionGenerator::new(size, format).unwrap();
        let response = generator.generate_map_section(request, &NeverCancel).unwrap();
        let counts = &response.map_section_vectors.counts;

        assert_eq!(response.map_section_vectors, expected);

        let mut agreeing = 0;
        for row in 0..size.height {
            for col in 0..size.width {
                let c = Complex64::new(-2.0 + col as f64 / 32.0, -1.5 + row as f64 / 32.0);
                let (count, _) = iterate_point_f64(c, settings);
                if count == counts[row * size.width + col] {
                    agreeing += 1;
                }
            }
        }
        let ratio = agreeing as f64 / size.number_of_cells() as f64;
        assert!(ratio > 0.9, "only {ratio} of the points agree with f64");
        // c = 0 ne s'échappe jamais : arrêt au pas qui dépasse la cible
        assert_eq!(counts[48 * 96 + 64], 101);
        assert!(!response.map_section_vectors.has_escaped_flags[48 * 96 + 64]);
        // c = -2 - 1.5i s'échappe au premier pas
        assert_eq!(counts[0], 1);
    }

    #[test]
    fn two_limbs_agree_with_f64_reference() {
        let size = SizeInt::new(48, 48);
        let settings = MapCalcSettings::new(200, 4);
        let format = FixedPointFormat::new(8, 2).unwrap();
        let request = request_at("-2", "-1.5", -4, size, 2, settings);

        let mut generator = MapSectionGenerator::new(size, format).unwrap();
        let response = generator.generate_map_section(request, &NeverCancel).unwrap();

        let mut agreeing = 0;
        for row in 0..size.height {
            for col in 0..size.width {
                let c = Complex64::new(-2.0 + col as f64 / 16.0, -1.5 + row as f64 / 16.0);
                let (count, escaped) = iterate_point_f64(c, settings);
                let index = row * size.width + col;
                if count == response.map_section_vectors.counts[index]
                    && escaped == response.map_section_vectors.has_escaped_flags[index]
                {
                    agreeing += 1;
                }
            }
        }
        let ratio = agreeing as f64 / size.number_of_cells() as f64;
        assert!(ratio > 0.97, "only {ratio} of the points agree with f64");
    }

    #[test]
    fn resuming_to_a_higher_target_equals_a_direct_run() {
        let size = SizeInt::new(16, 16);
        let format = FixedPointFormat::new(8, 2).unwrap();
        // vallée des hippocampes : temps d'échappement proches de pi / y
        let request = request_at("-0.755", "0.02", -10, size, 2, MapCalcSettings::new(100, 4));

        let mut generator = MapSectionGenerator::new(size, format).unwrap();
        let first_pass = generator.generate_map_section(request.clone(), &NeverCancel).unwrap();
        let resumed_request = request.header().resume(first_pass, 200);
        let resumed = generator.generate_map_section(resumed_request, &NeverCancel).unwrap();

        let mut direct_request = request;
        direct_request.map_calc_settings.target_iterations = 200;
        let direct = generator.generate_map_section(direct_request, &NeverCancel).unwrap();

        assert_eq!(resumed.map_section_vectors, direct.map_section_vectors);
        assert_eq!(resumed.map_section_z_vectors, direct.map_section_z_vectors);
        assert!(resumed.map_section_vectors.counts.iter().any(|&c| c > 100 && c < 200));
    }

    #[test]
    fn cancellation_leaves_remaining_rows_untouched() {
        let size = SizeInt::new(8, 6);
        let format = FixedPointFormat::new(8, 1).unwrap();
        let mut request = request_at("-1.5", "-0.2", -4, size, 1, MapCalcSettings::new(50, 4));

        let mut generator = MapSectionGenerator::new(size, format).unwrap();
        let full = generator.generate_map_section(request.clone(), &NeverCancel).unwrap();

        let mut input = MapSectionVectors::new(size);
        input.counts.fill(7);
        request.map_section_vectors = Some(input.clone());
        let cancel = CancelAfterRows {
            remaining: Cell::new(2),
        };
        let partial = generator.generate_map_section(request, &cancel).unwrap();

        assert!(!partial.request_completed);
        assert!(!partial.all_rows_have_escaped);
        for row in 0..size.height {
            let got = partial.map_section_vectors.row_counts(row);
            if row < 2 {
                assert_eq!(got, full.map_section_vectors.row_counts(row));
            } else {
                assert_eq!(got, input.row_counts(row));
            }
        }
    }

    #[test]
    fn cancelled_before_start_returns_input() {
        let size = SizeInt::new(8, 2);
        let format = FixedPointFormat::new(8, 1).unwrap();
        let request = request_at("0", "0", -3, size, 1, MapCalcSettings::new(10, 4));
        let mut generator = MapSectionGenerator::new(size, format).unwrap();
        let cancel = AtomicBool::new(true);

        let response = generator.generate_map_section(request, &cancel).unwrap();

        assert!(!response.request_completed);
        assert!(response.map_section_vectors.counts.iter().all(|&c| c == 0));
    }

    #[test]
    fn misconfigured_requests_are_rejected() {
        let size = SizeInt::new(8, 8);
        let format = FixedPointFormat::new(8, 2).unwrap();
        let mut generator = MapSectionGenerator::new(size, format).unwrap();

        let wrong_limbs = request_at("0", "0", -3, size, 3, MapCalcSettings::default());
        assert!(generator.generate_map_section(wrong_limbs, &NeverCancel).is_err());

        let mut resume_without_data = request_at("0", "0", -3, size, 2, MapCalcSettings::default());
        resume_without_data.increasing_iterations = true;
        assert_eq!(
            generator.generate_map_section(resume_without_data, &NeverCancel).unwrap_err(),
            ConfigurationError::MissingResumeData("counts and escape flags")
        );

        let too_far = request_at("200", "0", -3, size, 2, MapCalcSettings::default());
        assert!(generator.generate_map_section(too_far, &NeverCancel).is_err());

        assert!(MapSectionGenerator::new(SizeInt::new(12, 8), format).is_err());
    }

    #[test]
    fn low_detail_blocks_can_be_skipped() {
        let size = SizeInt::new(8, 8);
        let format = FixedPointFormat::new(8, 2).unwrap();
        let skip = SkipHeuristics {
            skip_positive_blocks: false,
            skip_low_detail_blocks: true,
        };
        let mut generator = MapSectionGenerator::new(size, format)
            .unwrap()
            .with_skip_heuristics(skip);

        let far = MapSectionRequest::new(
            BigVector::new(Integer::from(10), Integer::from(10)),
            RSize::power_of_two(-3),
            size,
            format,
            MapCalcSettings::default(),
        );
        let response = generator.generate_map_section(far, &NeverCancel).unwrap();
        assert!(response.skipped);
        assert!(response.request_completed);

        let near = request_at("-0.5", "-0.5", -4, size, 2, MapCalcSettings::new(20, 4));
        let response = generator.generate_map_section(near, &NeverCancel).unwrap();
        assert!(!response.skipped);
    }

    #[test]
    fn cancelled_block_resumes_to_the_same_result_as_a_direct_run() {
        let size = SizeInt::new(16, 8);
        let format = FixedPointFormat::new(8, 2).unwrap();
        let request = request_at("-0.8", "0.1", -6, size, 2, MapCalcSettings::new(150, 4));
        let mut generator = MapSectionGenerator::new(size, format).unwrap();

        let direct = generator.generate_map_section(request.clone(), &NeverCancel).unwrap();
        let cancel = CancelAfterRows {
            remaining: Cell::new(3),
        };
        let partial = generator.generate_map_section(request.clone(), &cancel).unwrap();
        assert!(!partial.request_completed);

        let resumed_request = request.header().resume(partial, 150);
        let resumed = generator.generate_map_section(resumed_request, &NeverCancel).unwrap();

        assert!(resumed.request_completed);
        assert_eq!(resumed.map_section_vectors, direct.map_section_vectors);
        assert_eq!(resumed.map_section_z_vectors, direct.map_section_z_vectors);
        // les lignes déjà faites ne coûtent rien à la reprise
        assert!(resumed.row_used_calcs[..3].iter().all(|&used| used == 0));
        assert!(resumed.row_used_calcs[3..].iter().all(|&used| used > 0));
    }

    #[test]
    fn blocks_whose_squares_overflow_the_format_are_rejected() {
        let size = SizeInt::new(8, 8);
        let format = FixedPointFormat::new(8, 1).unwrap();
        let mut generator = MapSectionGenerator::new(size, format).unwrap();

        // c = 16 : représentable, mais 16² ne l'est pas avec 8 bits avant la virgule
        let far = request_at("16", "0", -3, size, 1, MapCalcSettings::new(50, 4));
        assert!(matches!(
            generator.generate_map_section(far, &NeverCancel),
            Err(ConfigurationError::ValueOutOfRange { available: 8, .. })
        ));

        // seuil 100 : |z|² jusqu'à ~10^4 avant l'échappement
        let high_threshold = request_at("1.9", "0", -3, size, 1, MapCalcSettings::new(50, 100));
        assert!(generator.generate_map_section(high_threshold, &NeverCancel).is_err());

        let wide = FixedPointFormat::new(16, 1).unwrap();
        let mut wide_generator = MapSectionGenerator::new(size, wide).unwrap();
        let mut request = request_at("1.9", "0", -3, size, 1, MapCalcSettings::new(50, 100));
        request.bits_before_binary_point = 16;
        let response = wide_generator.generate_map_section(request, &NeverCancel).unwrap();
        // c = 1.9 : 1.9, 5.51, 32.26 ; |z3|² ≈ 1040 >= 100
        assert_eq!(response.map_section_vectors.counts[0], 3);
        assert!(response.map_section_vectors.has_escaped_flags[0]);
    }

    #[test]
    fn requests_in_another_fixed_point_format_are_rejected() {
        let size = SizeInt::new(8, 8);
        let format = FixedPointFormat::new(8, 2).unwrap();
        let mut generator = MapSectionGenerator::new(size, format).unwrap();

        let mut request = request_at("-0.5", "0", -4, size, 2, MapCalcSettings::new(20, 4));
        request.bits_before_binary_point = 12;
        assert_eq!(
            generator.generate_map_section(request, &NeverCancel).unwrap_err(),
            ConfigurationError::Mismatch {
                what: "bits before the binary point",
                expected: 8,
                got: 12,
            }
        );
    }

    #[test]
    fn resume_data_with_a_different_stored_shape_is_rejected() {
        let size = SizeInt::new(8, 8);
        let format = FixedPointFormat::new(8, 1).unwrap();
        let mut generator = MapSectionGenerator::new(size, format).unwrap();
        let request = request_at("-0.5", "0", -4, size, 1, MapCalcSettings::new(20, 4));
        let first = generator.generate_map_section(request.clone(), &NeverCancel).unwrap();

        let mut resumed = request.header().resume(first, 40);
        if let Some(vectors) = resumed.map_section_vectors.as_mut() {
            vectors.block_size = SizeInt::new(16, 4);
        }
        assert!(matches!(
            generator.generate_map_section(resumed, &NeverCancel),
            Err(ConfigurationError::Mismatch { .. })
        ));
    }
}
