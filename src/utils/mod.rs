// src/utils/mod.rs
pub mod error;
pub mod html_debug;
pub mod logging;

pub use error::AppError; // Re-export main error type for convenience
