//! Atomic floating-point storage.
//!
//! The standard library has no atomic `f64`, so values are stored as their bit pattern in an
//! `AtomicU64` and updated with compare-and-swap loops.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        AtomicF64(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    pub fn swap(&self, value: f64) -> f64 {
        f64::from_bits(self.0.swap(value.to_bits(), Ordering::AcqRel))
    }

    pub fn add(&self, value: f64) {
        // The closure never declines, so this only returns once the update has landed.
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |curr| {
            Some((f64::from_bits(curr) + value).to_bits())
        });
    }
}
