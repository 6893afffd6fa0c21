//! # Utilities Module
//!
//! ## Purpose
//! Common utility functions and helpers used throughout the biodiversity
//! search platform for performance monitoring and coordinate handling.
//!
//! ## Input/Output Specification
//! - **Input**: Various data types requiring common operations
//! - **Output**: Processed data, performance metrics
//! - **Functions**: Timing helpers, coordinate rounding

use std::time::Instant;

/// Performance timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start a new timer with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("Timer '{}' completed in {}ms", self.name, elapsed);
        elapsed
    }
}

/// Round a coordinate to the given number of decimal places.
///
/// Five decimals corresponds to roughly one metre of precision, which is the
/// granularity used for position-cache keys.
pub fn round_coordinate(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Integer cache-key component for a rounded coordinate.
///
/// Scaling before truncation keeps the key exact where an f64 map key
/// would be bitwise-fragile.
pub fn coordinate_key(value: f64, decimals: u32) -> i64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() as i64
}
