//! Serial number assignment for issued certificates

use rand::Rng;
use std::sync::{Mutex, PoisonError};

/// Largest serial number handed out (largest 63-bit signed integer)
pub const MAX_SERIAL: u64 = i64::MAX as u64;

/// Thread-safe serial counter owned by one CA.
///
/// Values are strictly increasing until the counter would pass
/// [`MAX_SERIAL`]; it then reseeds to a fresh random value in `(0, MAX]`
/// instead of wrapping to a predictable sequence.
#[derive(Debug)]
pub struct SerialNumberGenerator {
    last: Mutex<u64>,
}

impl SerialNumberGenerator {
    /// Start from a random point in `[0, MAX)`.
    pub fn new() -> Self {
        Self::starting_after(rand::thread_rng().gen_range(0..MAX_SERIAL))
    }

    /// The first call to [`next`](Self::next) returns `last + 1`
    /// (or a reseeded value if that exceeds `MAX_SERIAL`).
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }

    /// Hand out the next serial number. Linearizable across threads.
    pub fn next(&self) -> u64 {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let candidate = last.saturating_add(1);
        let serial = if candidate > MAX_SERIAL {
            let reseeded = rand::thread_rng().gen_range(1..=MAX_SERIAL);
            tracing::warn!(reseeded, "serial number space exhausted, reseeding");
            reseeded
        } else {
            candidate
        };
        *last = serial;
        serial
    }
}

impl Default for SerialNumberGenerator {
    fn default() -> Self {
        Self::new()
    }
}
