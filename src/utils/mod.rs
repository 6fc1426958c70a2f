//! Text helpers shared by output classification and reporting.

mod text;

pub use text::{excerpt_around, tail_chars, truncate_with_marker};
