//! Génération des blocs de la carte : itérateur, état des lignes, section, pool.

pub mod cancel;
pub mod iterator;
pub mod pool;
pub mod request;
pub mod section;
pub mod state;

pub use cancel::{Cancellation, NeverCancel};
pub use iterator::{Fp31Iterator, IterationStep};
pub use pool::generate_map_sections;
pub use request::{
    BigVector, EscapedFlagsSummary, MapCalcSettings, MapSectionRequest, MapSectionResponse,
    MapSectionVectors, MapSectionZVectors, RPoint, RSize, SizeInt, DEFAULT_BLOCK_SIZE,
};
pub use section::MapSectionGenerator;
pub use state::IterationState;
