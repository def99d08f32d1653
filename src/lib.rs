//! Moteur escape-time Mandelbrot en virgule fixe multi-limbes (31 bits par
//! limbe), vectorisé sur 8 voies.

pub mod config;
pub mod error;
pub mod fp31;
pub mod generator;
pub mod reference;

pub use config::{GeneratorConfig, SkipHeuristics};
pub use error::{ConfigurationError, Error};
pub use generator::{
    generate_map_sections, Cancellation, MapSectionGenerator, MapSectionRequest,
    MapSectionResponse, NeverCancel,
};
