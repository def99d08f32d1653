use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use clap::{ArgAction, Parser};
use log::{error, info};
use serde::{Deserialize, Serialize};

use mset_fp31::error::{ConfigurationError, Error};
use mset_fp31::fp31::{FixedPointFormat, MathOpCounts, RValue};
use mset_fp31::generator::{
    generate_map_sections, BigVector, MapSectionRequest, MapSectionResponse, NeverCancel, RPoint,
    RSize,
};
use mset_fp31::reference::{f64_agreement, reference_section};
use mset_fp31::GeneratorConfig;

/// Calcul de blocs Mandelbrot en virgule fixe multi-limbes.
///
/// Exemple d'utilisation :
///   mset-fp31 --x -0.75 --y 0.1 --delta-exponent -40 --limbs 2 --iterations 5000 --output blocs.json
#[derive(Parser, Debug)]
#[command(
    name = "mset-fp31",
    about = "Temps d'échappement Mandelbrot en virgule fixe 31 bits, vectorisé",
    version
)]
struct Cli {
    /// Partie réelle du coin inférieur gauche du premier bloc (décimal)
    #[arg(long, default_value = "-2", allow_hyphen_values = true)]
    x: String,

    /// Partie imaginaire du coin inférieur gauche du premier bloc (décimal)
    #[arg(long, default_value = "-1.5", allow_hyphen_values = true)]
    y: String,

    /// Écart entre échantillons voisins : 2^delta_exponent
    #[arg(long, default_value_t = -6, allow_hyphen_values = true)]
    delta_exponent: i32,

    /// Écart décimal entre échantillons (prioritaire sur delta_exponent)
    #[arg(long)]
    delta: Option<String>,

    /// Largeur d'un bloc en pixels (multiple de 8)
    #[arg(long)]
    block_width: Option<usize>,

    /// Hauteur d'un bloc en pixels
    #[arg(long)]
    block_height: Option<usize>,

    /// Nombre de blocs en x
    #[arg(long, default_value_t = 1)]
    blocks_x: usize,

    /// Nombre de blocs en y
    #[arg(long, default_value_t = 1)]
    blocks_y: usize,

    /// Nombre de limbes de 31 bits
    #[arg(long)]
    limbs: Option<usize>,

    /// Bits fractionnaires minimum (calcule le nombre de limbes)
    #[arg(long, conflicts_with = "limbs")]
    precision: Option<u32>,

    /// Bits avant la virgule, signe compris (2 à 31)
    #[arg(long)]
    bits_before_binary_point: Option<u8>,

    /// Nombre cible d'itérations
    #[arg(long)]
    iterations: Option<u32>,

    /// Seuil d'échappement sur |z|²
    #[arg(long)]
    threshold: Option<u32>,

    /// Configuration JSON du générateur
    #[arg(long, value_name = "FICHIER")]
    config: Option<PathBuf>,

    /// Reprend les blocs d'une sortie précédente jusqu'à la nouvelle cible
    #[arg(long, value_name = "FICHIER")]
    increase_from: Option<PathBuf>,

    /// Fichier de sortie JSON (demandes et réponses)
    #[arg(long, value_name = "FICHIER")]
    output: Option<PathBuf>,

    /// Compare le premier bloc à l'émulation exacte point par point
    #[arg(long)]
    verify: bool,

    /// Verbosité (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Un bloc calculé, tel qu'il est écrit dans la sortie JSON.
#[derive(Serialize, Deserialize)]
struct SectionRecord {
    request: MapSectionRequest,
    response: MapSectionResponse,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => {
            error!("block 0 differs from the fixed-point reference");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Erreur : {e}");
            process::exit(1);
        }
    }
}

/// Renvoie faux si la vérification demandée échoue.
fn run(cli: &Cli) -> Result<bool, Error> {
    let mut config = match &cli.config {
        Some(path) => GeneratorConfig::from_json_file(path)?,
        None => GeneratorConfig::default(),
    };
    apply_overrides(cli, &mut config)?;

    let requests = match &cli.increase_from {
        Some(path) => resumed_requests(path, &mut config)?,
        None => fresh_requests(cli, &config)?,
    };
    config.validate()?;
    let format = config.format()?;
    info!(
        "{} blocks of {}x{}, {} limbs ({} fractional bits), target {}",
        requests.len(),
        config.block_size.width,
        config.block_size.height,
        format.limb_count(),
        format.fractional_bits(),
        config.map_calc_settings.target_iterations
    );

    let headers: Vec<MapSectionRequest> = requests.iter().map(MapSectionRequest::header).collect();
    let start = Instant::now();
    let results = generate_map_sections(&config, requests, &NeverCancel);
    info!("computed in {:?}", start.elapsed());

    let mut records = Vec::with_capacity(results.len());
    for (request, result) in headers.into_iter().zip(results) {
        let response = result?;
        println!(
            "block ({}, {}): {:?}, {} used / {} unused lane calculations",
            response.block_position.x,
            response.block_position.y,
            response.escaped_flags_summary(),
            response.row_used_calcs.iter().sum::<u64>(),
            response.row_unused_calcs.iter().sum::<u64>()
        );
        records.push(SectionRecord { request, response });
    }

    if cfg!(feature = "diagnostics") {
        let mut totals = MathOpCounts::default();
        for record in &records {
            if let Some(counts) = &record.response.math_op_counts {
                totals.merge(counts);
            }
        }
        info!("operation counts: {totals:?}");
    }

    let verified = match (cli.verify, records.first()) {
        (true, Some(record)) => verify(record, format)?,
        _ => true,
    };

    if let Some(path) = &cli.output {
        write_records(path, &records)?;
        info!("{} blocks written to {}", records.len(), path.display());
    }
    Ok(verified)
}

fn apply_overrides(cli: &Cli, config: &mut GeneratorConfig) -> Result<(), ConfigurationError> {
    if let Some(width) = cli.block_width {
        config.block_size.width = width;
    }
    if let Some(height) = cli.block_height {
        config.block_size.height = height;
    }
    if let Some(bits) = cli.bits_before_binary_point {
        config.bits_before_binary_point = bits;
    }
    if let Some(limbs) = cli.limbs {
        config.limb_count = limbs;
    }
    if let Some(precision) = cli.precision {
        let format = FixedPointFormat::for_precision(config.bits_before_binary_point, precision)?;
        config.limb_count = format.limb_count();
    }
    if let Some(iterations) = cli.iterations {
        config.map_calc_settings.target_iterations = iterations;
    }
    if let Some(threshold) = cli.threshold {
        config.map_calc_settings.threshold = threshold;
    }
    Ok(())
}

/// Grille `blocks_x` x `blocks_y` de blocs accolés à partir de l'origine.
fn fresh_requests(cli: &Cli, config: &GeneratorConfig) -> Result<Vec<MapSectionRequest>, Error> {
    let format = config.format()?;
    let precision = format.total_bits().max(64);
    let origin_x = RValue::parse(&cli.x, precision)?;
    let origin_y = RValue::parse(&cli.y, precision)?;
    let delta = match &cli.delta {
        Some(text) => {
            let value = RValue::parse(text, precision)?;
            if value.value <= 0 {
                return Err(ConfigurationError::InvalidCoordinate {
                    input: text.clone(),
                    reason: "delta must be positive".to_string(),
                }
                .into());
            }
            RSize::square(value.value, value.exponent)
        }
        None => RSize::power_of_two(cli.delta_exponent),
    };

    let block_size = config.block_size;
    let mut requests = Vec::with_capacity(cli.blocks_x * cli.blocks_y);
    for by in 0..cli.blocks_y {
        for bx in 0..cli.blocks_x {
            let offset = BigVector::new(bx as u64, by as u64);
            let corner = RPoint::for_block(&offset, block_size, &delta);
            let position = RPoint::new(origin_x.add(&corner.x), origin_y.add(&corner.y));
            let mut request = MapSectionRequest::at_map_position(
                position,
                delta.clone(),
                block_size,
                format,
                config.map_calc_settings,
            );
            request.block_position = offset;
            requests.push(request);
        }
    }
    Ok(requests)
}

/// Relit une sortie précédente ; taille de bloc, format et seuil en sont repris.
fn resumed_requests(
    path: &Path,
    config: &mut GeneratorConfig,
) -> Result<Vec<MapSectionRequest>, Error> {
    let records = read_records(path)?;
    if let Some(first) = records.first() {
        config.block_size = first.request.block_size;
        config.limb_count = first.request.limb_count;
        config.bits_before_binary_point = first.request.bits_before_binary_point;
        config.map_calc_settings.threshold = first.request.map_calc_settings.threshold;
    }
    let target = config.map_calc_settings.target_iterations;
    info!("resuming {} blocks from {} to target {target}", records.len(), path.display());
    Ok(records
        .into_iter()
        .map(|record| record.request.resume(record.response, target))
        .collect())
}

fn verify(record: &SectionRecord, format: FixedPointFormat) -> Result<bool, ConfigurationError> {
    let expected = reference_section(&record.request, format)?;
    let got = &record.response.map_section_vectors;
    let mismatches = expected
        .counts
        .iter()
        .zip(&got.counts)
        .zip(expected.has_escaped_flags.iter().zip(&got.has_escaped_flags))
        .filter(|((a, b), (c, d))| a != b || c != d)
        .count();
    let agreement = f64_agreement(&record.request, got, format)?;
    info!(
        "verification of block ({}, {}): {mismatches} mismatching points, {:.1}% agree with f64",
        record.request.block_position.x,
        record.request.block_position.y,
        agreement * 100.0
    );
    Ok(mismatches == 0 && record.response.request_completed)
}

fn read_records(path: &Path) -> Result<Vec<SectionRecord>, Error> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| Error::Json {
        path: path.display().to_string(),
        source,
    })
}

fn write_records(path: &Path, records: &[SectionRecord]) -> Result<(), Error> {
    let file = File::create(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, records).map_err(|source| Error::Json {
        path: path.display().to_string(),
        source,
    })?;
    writer.flush().map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })
}
