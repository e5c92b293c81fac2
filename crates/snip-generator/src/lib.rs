pub mod alpha;
pub mod unique;

pub use alpha::AlphaGenerator;
pub use unique::{generate_unique, DrawBudget, GenerateError, Result, DEFAULT_MAX_ATTEMPTS};

use snip_core::ShortCode;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage;
/// see [`generate_unique`] for the store-checked variant.
pub trait Generator: Send + Sync + 'static {
    type Output: Into<ShortCode>;

    /// Generates a candidate short code. Collisions are possible.
    fn generate(&self) -> Self::Output;
}
