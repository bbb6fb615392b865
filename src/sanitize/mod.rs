//! Deduplication & sanitization layer (C2, spec.md §4.1).

mod glucose;
mod therapy;

pub use glucose::sanitize_glucose;
pub use therapy::sanitize_therapy;
