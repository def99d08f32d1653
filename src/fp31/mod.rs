//! Virgule fixe multi-limbes (31 bits par limbe) et son arithmétique vectorielle.

pub mod deck;
pub mod format;
pub mod grid;
pub mod math;
pub mod simd;
pub mod value;

pub use deck::{Fp31Deck, Fp31WideDeck};
pub use format::FixedPointFormat;
pub use grid::{build_sample_point_offsets, SamplePoints};
pub use math::{Fp31VecMath, MathOp, MathOpCounts};
pub use simd::{U32x8, U64x8, LANES};
pub use value::{Fp31Val, RValue};
