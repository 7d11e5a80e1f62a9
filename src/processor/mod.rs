//! Pure text processing: intent, entities, composition rules and styles.

pub mod classifier;
pub mod compose;
pub mod datetime;
pub mod extract;
pub mod style;
