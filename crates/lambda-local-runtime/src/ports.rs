// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loopback port pool for handler processes.
//!
//! Not synchronized on its own: the registry keeps it under the same lock as
//! the instance map, so a port is held exactly as long as its instance is.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct PortAllocator {
    range: Range<u16>,
    held: BTreeSet<u16>,
}

impl PortAllocator {
    pub fn new(range: Range<u16>) -> Self {
        Self {
            range,
            held: BTreeSet::new(),
        }
    }

    /// Hand out the lowest port in the range that is not held.
    pub fn allocate(&mut self) -> Result<u16> {
        let port = self
            .range
            .clone()
            .find(|port| !self.held.contains(port))
            .ok_or(Error::NoPortAvailable {
                start: self.range.start,
                end: self.range.end,
            })?;
        self.held.insert(port);
        Ok(port)
    }

    /// Return a port to the pool. Releasing a free port is a no-op.
    pub fn release(&mut self, port: u16) {
        self.held.remove(&port);
    }

    pub fn is_held(&self, port: u16) -> bool {
        self.held.contains(&port)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}
