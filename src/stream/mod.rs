//! Stream utilities

mod pace;

pub use pace::{Pace, PaceExt};
