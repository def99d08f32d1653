use log::debug;
use rayon::prelude::*;

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::fp31::simd::backend_name;
use crate::generator::cancel::Cancellation;
use crate::generator::request::{MapSectionRequest, MapSectionResponse};
use crate::generator::section::MapSectionGenerator;

/// Calcule plusieurs blocs en parallèle (rayon), un générateur par thread.
///
/// Les blocs sont indépendants ; seul le signal d'annulation est partagé.
/// L'ordre des réponses suit celui des demandes.
pub fn generate_map_sections<C>(
    config: &GeneratorConfig,
    requests: Vec<MapSectionRequest>,
    cancel: &C,
) -> Vec<Result<MapSectionResponse>>
where
    C: Cancellation + Sync + ?Sized,
{
    debug!(
        "{} sections on {} threads ({} backend)",
        requests.len(),
        rayon::current_num_threads(),
        backend_name()
    );

    requests
        .into_par_iter()
        .map_init(
            || MapSectionGenerator::from_config(config),
            |generator, request| match generator {
                Ok(generator) => generator.generate_map_section(request, cancel),
                Err(err) => Err(err.clone()),
            },
        )
        .collect()
}
