//! Composite driver — a node whose only job is to own child nodes.
//!
//! Tree descriptions that give `children` but no `type` compose as this
//! driver. It exports no operations of its own; its children are addressed
//! by path.

use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::{DuplicateOperationError, MethodRegistry};

use super::Driver;

#[derive(Debug, Default)]
pub struct Composite;

#[async_trait]
impl Driver for Composite {
    fn driver_type(&self) -> &'static str {
        "composite"
    }

    fn export(
        self: Arc<Self>,
        _registry: &mut MethodRegistry,
    ) -> Result<(), DuplicateOperationError> {
        Ok(())
    }
}
