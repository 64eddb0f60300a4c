// SPDX-License-Identifier: MIT
//! Driver node tree — composition target and path-resolution surface.
//!
//! The tree owns every node top-down. A node's `parent` field is a weak
//! back-reference used only for path formatting and shared-resource
//! coordination; it never carries ownership. Nodes are immutable after
//! composition: there is no public API to add children or operations once
//! [`compose`](crate::tree::compose::compose) returns.

pub mod compose;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::drivers::Driver;
use crate::registry::MethodRegistry;

pub use compose::{compose, ComposeError, DriverRegistry, NodeSpec};

/// Label key carrying the node's sibling-unique name.
pub const LABEL_NAME: &str = "rig.host/name";
/// Label key carrying the node's dotted path from the root.
pub const LABEL_PATH: &str = "rig.host/path";
/// Label key carrying the driver type name.
pub const LABEL_TYPE: &str = "rig.host/type";

/// Render a node path for logs and errors. The root is the empty path.
pub fn format_path(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}

/// A named unit in the composed hardware-abstraction tree.
///
/// Each node wraps one driver instance, the registry of operations that
/// driver exported, an exclusivity lock serializing calls to the node, and
/// its child nodes.
pub struct DriverNode {
    uuid: Uuid,
    name: String,
    labels: BTreeMap<String, String>,
    driver: Arc<dyn Driver>,
    registry: MethodRegistry,
    children: BTreeMap<String, Arc<DriverNode>>,
    parent: OnceLock<Weak<DriverNode>>,
    /// Per-node exclusivity lock. `tokio::sync::Mutex` is FIFO-fair, which
    /// gives queued calls strict arrival-order service.
    lock: Arc<Mutex<()>>,
    released: AtomicBool,
}

impl DriverNode {
    /// Build a node and wire up its children's parent back-references.
    /// Only the composer constructs nodes.
    pub(crate) fn new(
        name: String,
        driver: Arc<dyn Driver>,
        registry: MethodRegistry,
        children: BTreeMap<String, Arc<DriverNode>>,
        mut labels: BTreeMap<String, String>,
    ) -> Arc<Self> {
        labels.insert(LABEL_NAME.to_string(), name.clone());
        labels.insert(LABEL_TYPE.to_string(), driver.driver_type().to_string());
        let node = Arc::new(Self {
            uuid: Uuid::new_v4(),
            name,
            labels,
            driver,
            registry,
            children,
            parent: OnceLock::new(),
            lock: Arc::new(Mutex::new(())),
            released: AtomicBool::new(false),
        });
        for child in node.children.values() {
            // Each node has exactly one parent; the composer builds every
            // child exactly once, so this never collides.
            let _ = child.parent.set(Arc::downgrade(&node));
        }
        node
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &Arc<DriverNode>)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn child(&self, name: &str) -> Option<&Arc<DriverNode>> {
        self.children.get(name)
    }

    /// The owning node, or `None` for the root (or after tree teardown).
    pub fn parent(&self) -> Option<Arc<DriverNode>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// Child names from the root to this node. Empty for the root.
    pub fn path(&self) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = self.parent();
        segments.push(self.name.clone());
        while let Some(node) = current {
            segments.push(node.name.clone());
            current = node.parent();
        }
        // The walk includes the root's own name; the root is addressed by
        // the empty path, so pop it off.
        segments.pop();
        segments.reverse();
        segments
    }

    /// Dotted path for logs and error context.
    pub fn path_string(&self) -> String {
        format_path(&self.path())
    }

    /// Walk `path` from this node, failing on the first missing segment.
    pub fn resolve(
        self: &Arc<Self>,
        path: &[String],
    ) -> Result<Arc<DriverNode>, PathResolutionError> {
        let mut current = Arc::clone(self);
        for segment in path {
            let next = current
                .children
                .get(segment)
                .ok_or_else(|| PathResolutionError {
                    at: current.path_string(),
                    segment: segment.clone(),
                })?
                .clone();
            current = next;
        }
        Ok(current)
    }

    /// Acquire this node's exclusivity lock, keeping the guard alive
    /// independently of the borrow (stream handles hold it across calls).
    pub(crate) async fn lock_owned(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.lock).lock_owned().await
    }

    /// Run the driver's release hook, at most once.
    ///
    /// Idempotent: a second call is a no-op and never re-runs the hardware
    /// release action.
    pub async fn release(&self) -> anyhow::Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(node = %self.path_string(), "releasing node");
        self.driver.release().await
    }
}

impl std::fmt::Debug for DriverNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverNode")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("driver", &self.driver.driver_type())
            .field("operations", &self.registry.operation_names())
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Node path does not exist in the tree.
#[derive(Debug, Error)]
#[error("no child {segment:?} under {at}")]
pub struct PathResolutionError {
    /// Path of the deepest node that was resolved.
    pub at: String,
    /// The missing segment.
    pub segment: String,
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// Flattened view of one node, shipped to clients by the transport layer so
/// they can rebuild the tree remotely. `parent_uuid` is empty for the root.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeReport {
    pub uuid: String,
    pub parent_uuid: String,
    pub labels: BTreeMap<String, String>,
    pub operations: Vec<OperationReport>,
}

/// One exported operation in a node report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OperationReport {
    pub name: String,
    pub kind: crate::registry::OperationKind,
}

/// Flatten the tree into reports, parents strictly before children, so a
/// client can rebuild it in one forward pass.
pub fn report(root: &Arc<DriverNode>) -> Vec<NodeReport> {
    let mut reports = Vec::new();
    let mut stack = vec![Arc::clone(root)];
    while let Some(node) = stack.pop() {
        let mut labels = node.labels.clone();
        labels.insert(LABEL_PATH.to_string(), node.path_string());
        labels.extend(node.driver.extra_labels());
        let operations = node
            .registry
            .operation_names()
            .into_iter()
            .map(|name| OperationReport {
                name: name.to_string(),
                // kind() is Some for every registered name.
                kind: node.registry.kind(name).unwrap_or(crate::registry::OperationKind::Unary),
            })
            .collect();
        reports.push(NodeReport {
            uuid: node.uuid.to_string(),
            parent_uuid: node
                .parent()
                .map(|p| p.uuid.to_string())
                .unwrap_or_default(),
            labels,
            operations,
        });
        // Reverse so children pop in name order.
        for child in node.children.values().rev() {
            stack.push(Arc::clone(child));
        }
    }
    reports
}

// ─── Teardown ────────────────────────────────────────────────────────────────

/// One failed release hook, with the node path for remote diagnosis.
#[derive(Debug)]
pub struct TeardownFailure {
    pub path: String,
    pub source: anyhow::Error,
}

/// One or more release hooks failed. Collected, never silently swallowed.
#[derive(Debug, Error)]
#[error("teardown failed for {} node(s): {}", failures.len(), summarize(failures))]
pub struct TeardownError {
    pub failures: Vec<TeardownFailure>,
}

fn summarize(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.path, f.source))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Release every node in the tree, depth-first, children before parents.
///
/// Best-effort: a failing child never prevents its siblings or ancestors
/// from being attempted. All failures are collected into one error.
pub async fn teardown(root: &Arc<DriverNode>) -> Result<(), TeardownError> {
    let mut order = Vec::new();
    collect_post_order(root, &mut order);

    let mut failures = Vec::new();
    for node in order {
        if let Err(source) = node.release().await {
            let path = node.path_string();
            warn!(node = %path, err = %source, "release hook failed");
            failures.push(TeardownFailure { path, source });
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(TeardownError { failures })
    }
}

fn collect_post_order(node: &Arc<DriverNode>, out: &mut Vec<Arc<DriverNode>>) {
    for child in node.children.values() {
        collect_post_order(child, out);
    }
    out.push(Arc::clone(node));
}
