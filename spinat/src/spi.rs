// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Public SPI allocation

use net::esp::{SPI_RESERVED, random_spi};
use std::collections::HashSet;
use tracectl::trace_target;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};

use crate::errors::SpinatError;

trace_target!("spinat-spi", LevelFilter::INFO, &["spinat"]);

/// Default number of draws before giving up on finding an unused SPI
pub const DEFAULT_SPI_RETRY_CAP: usize = 64;

/// Draws public SPIs at random above the reserved range, avoiding those in use
#[derive(Debug, Clone, Copy)]
pub struct SpiAllocator {
    cap: usize,
    source: fn() -> u32,
}

impl Default for SpiAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_SPI_RETRY_CAP)
    }
}

impl SpiAllocator {
    /// An allocator that draws at most `cap` times per allocation (at least once)
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self::with_source(cap, random_spi)
    }

    /// An allocator drawing its candidates from `source`
    #[must_use]
    pub fn with_source(cap: usize, source: fn() -> u32) -> Self {
        Self {
            cap: cap.max(1),
            source,
        }
    }

    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Allocate a public SPI not in `in_use`
    ///
    /// # Errors
    ///
    /// Fails with [`SpinatError::SpiExhausted`] if every draw collided.
    pub fn allocate(&self, in_use: &HashSet<u32>) -> Result<u32, SpinatError> {
        self.allocate_with(in_use, self.source)
    }

    /// Allocate a public SPI using `draw` as source of candidates. Candidates in the
    /// reserved range count as collisions.
    pub fn allocate_with<F>(&self, in_use: &HashSet<u32>, mut draw: F) -> Result<u32, SpinatError>
    where
        F: FnMut() -> u32,
    {
        for attempt in 1..=self.cap {
            let spi = draw();
            if spi > SPI_RESERVED && !in_use.contains(&spi) {
                debug!("Allocated public SPI {spi:#x} after {attempt} draw(s)");
                return Ok(spi);
            }
        }
        error!("Public SPI space exhausted: {} draws collided", self.cap);
        Err(SpinatError::SpiExhausted { attempts: self.cap })
    }
}
