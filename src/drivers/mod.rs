// SPDX-License-Identifier: MIT
//! Driver interface and built-in drivers.
//!
//! A driver is the unit a node wraps: it exports operations into the node's
//! method registry at composition time and releases its hardware exactly
//! once at teardown. Concrete hardware drivers live in their own crates and
//! register factories into a [`DriverRegistry`](crate::tree::DriverRegistry);
//! the built-ins here (`composite`, `mock-power`) are the ones every
//! deployment carries.

pub mod composite;
pub mod power;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::{DuplicateOperationError, MethodRegistry};

/// Common interface for all drivers.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Stable type name, as referenced by tree descriptions.
    fn driver_type(&self) -> &'static str;

    /// Export this driver's remotely callable operations.
    ///
    /// Called once per node during composition. Handlers typically capture
    /// an `Arc` of the driver so they can reach its state.
    fn export(self: Arc<Self>, registry: &mut MethodRegistry)
        -> Result<(), DuplicateOperationError>;

    /// Release the underlying hardware resource.
    ///
    /// The tree guarantees this runs at most once per node, children before
    /// parents.
    async fn release(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Driver-specific labels merged into the node's report.
    fn extra_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}
