//! Itérations de référence, point par point, pour valider le moteur vectorisé.
//!
//! `FixedPointReference` reproduit exactement l'arithmétique du moteur (mêmes
//! troncatures) sur des entiers rug ; `iterate_point_f64` donne une référence
//! indépendante du format.

use num_complex::Complex64;
use rug::Integer;

use crate::error::Result;
use crate::fp31::{FixedPointFormat, SamplePoints};
use crate::generator::request::{MapCalcSettings, MapSectionRequest, MapSectionVectors};

/// État final d'un point : compteur, échappement et dernier z calculé
/// (entiers mis à l'échelle 2^frac).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferencePoint {
    pub count: u32,
    pub escaped: bool,
    pub zr: Integer,
    pub zi: Integer,
}

/// Émulation exacte du moteur : carré tronqué vers le bas après décalage de
/// `frac` bits, additions exactes, test `zr² + zi² >= seuil`.
///
/// Un point qui ne s'échappe pas s'arrête à `cible + 1`.
#[derive(Clone, Debug)]
pub struct FixedPointReference {
    fractional_bits: u32,
    settings: MapCalcSettings,
    threshold: Integer,
}

impl FixedPointReference {
    pub fn new(format: FixedPointFormat, settings: MapCalcSettings) -> Self {
        let fractional_bits = format.fractional_bits();
        Self {
            fractional_bits,
            settings,
            threshold: Integer::from(settings.threshold) << fractional_bits,
        }
    }

    fn square(&self, value: &Integer) -> Integer {
        Integer::from(value.square_ref()) >> self.fractional_bits
    }

    /// Calcul neuf : z1 = c compte pour une itération.
    pub fn iterate(&self, cr: &Integer, ci: &Integer) -> ReferencePoint {
        let start = ReferencePoint {
            count: 1,
            escaped: false,
            zr: cr.clone(),
            zi: ci.clone(),
        };
        self.run(start, cr, ci)
    }

    /// Reprise d'un point déjà calculé jusqu'à la cible courante.
    pub fn resume(&self, previous: ReferencePoint, cr: &Integer, ci: &Integer) -> ReferencePoint {
        if previous.escaped || previous.count > self.settings.target_iterations {
            return previous;
        }
        self.run(previous, cr, ci)
    }

    fn run(&self, mut point: ReferencePoint, cr: &Integer, ci: &Integer) -> ReferencePoint {
        loop {
            let zr2 = self.square(&point.zr);
            let zi2 = self.square(&point.zi);
            if Integer::from(&zr2 + &zi2) >= self.threshold {
                point.escaped = true;
                return point;
            }
            if point.count > self.settings.target_iterations {
                return point;
            }
            let sum = Integer::from(&point.zr + &point.zi);
            let cross = self.square(&sum) - &zr2 - &zi2;
            point.zi = cross + ci;
            point.zr = zr2 - zi2 + cr;
            point.count += 1;
        }
    }
}

/// Compteurs et drapeaux attendus pour un bloc, calculés point par point.
pub fn reference_section(
    request: &MapSectionRequest,
    format: FixedPointFormat,
) -> Result<MapSectionVectors> {
    let samples_x = SamplePoints::build(
        &request.map_position.x,
        &request.sample_point_delta.width_value(),
        request.block_size.width,
        format,
    )?;
    let samples_y = SamplePoints::build(
        &request.map_position.y,
        &request.sample_point_delta.height_value(),
        request.block_size.height,
        format,
    )?;
    let reference = FixedPointReference::new(format, request.map_calc_settings);

    let mut vectors = MapSectionVectors::new(request.block_size);
    let crs: Vec<Integer> = samples_x.points().iter().map(|x| x.to_scaled_integer()).collect();
    for (row, y) in samples_y.points().iter().enumerate() {
        let ci = y.to_scaled_integer();
        let (counts, escaped) = vectors.row_mut(row);
        for (col, cr) in crs.iter().enumerate() {
            let point = reference.iterate(cr, &ci);
            counts[col] = point.count;
            escaped[col] = point.escaped;
        }
    }
    Ok(vectors)
}

/// Mandelbrot en f64, même convention de comptage.
pub fn iterate_point_f64(c: Complex64, settings: MapCalcSettings) -> (u32, bool) {
    let bailout_sqr = settings.threshold as f64;
    let mut z = Complex64::new(0.0, 0.0);
    let mut i = 0u32;
    while i <= settings.target_iterations && z.norm_sqr() < bailout_sqr {
        z = z * z + c;
        i += 1;
    }
    (i, z.norm_sqr() >= bailout_sqr)
}

/// Part des points d'un bloc calculé dont compteur et drapeau coïncident avec
/// la référence f64. Utile loin de la frontière de l'ensemble et à faible zoom.
pub fn f64_agreement(
    request: &MapSectionRequest,
    vectors: &MapSectionVectors,
    format: FixedPointFormat,
) -> Result<f64> {
    vectors.validate(request.block_size)?;
    let samples_x = SamplePoints::build(
        &request.map_position.x,
        &request.sample_point_delta.width_value(),
        request.block_size.width,
        format,
    )?;
    let samples_y = SamplePoints::build(
        &request.map_position.y,
        &request.sample_point_delta.height_value(),
        request.block_size.height,
        format,
    )?;

    let crs: Vec<f64> = samples_x.points().iter().map(|x| x.to_f64()).collect();
    let mut agreeing = 0usize;
    for (row, y) in samples_y.points().iter().enumerate() {
        let ci = y.to_f64();
        let (counts, escaped) = (vectors.row_counts(row), vectors.row_escaped_flags(row));
        for (col, &cr) in crs.iter().enumerate() {
            let expected = iterate_point_f64(Complex64::new(cr, ci), request.map_calc_settings);
            if expected == (counts[col], escaped[col]) {
                agreeing += 1;
            }
        }
    }
    Ok(agreeing as f64 / request.block_size.number_of_cells().max(1) as f64)
}
