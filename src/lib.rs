// SPDX-License-Identifier: MIT
//! rigd — the Rig Host remote driver invocation core.
//!
//! A rig exporter publishes a tree of hardware drivers (power relays, serial
//! ports, DUT controllers) so remote clients can invoke their exported
//! operations transparently. This crate is the exporter-side core of that
//! protocol:
//!
//! - [`registry`] — per-node table of exported operations (unary + stream),
//!   with positional-argument invocation.
//! - [`dispatch`] — routes a call by node path and operation name, enforces
//!   at-most-one in-flight call per node, and drives streams with explicit
//!   cancellation.
//! - [`tree`] — composes the driver node hierarchy from a YAML/JSON
//!   description, resolves paths, flattens reports, and tears the tree down
//!   children-before-parents.
//! - [`wire`] — the closed set of serializable values that may cross the
//!   call boundary, plus the call envelope.
//! - [`drivers`] — the driver trait and the built-in `composite` and
//!   `mock-power` drivers.
//!
//! The network transport, lease orchestration, and CLI surfaces live in
//! sibling crates; they hand this core JSON envelopes and ship back wire
//! values and node reports.
//!
//! ```no_run
//! use rigd::dispatch::Dispatcher;
//! use rigd::tree::{compose, DriverRegistry, NodeSpec};
//! use rigd::wire::CallRequest;
//!
//! # #[tokio::main] async fn main() -> anyhow::Result<()> {
//! let spec = NodeSpec::from_yaml(
//!     "children:\n  power:\n    type: mock-power\n",
//! )?;
//! let root = compose(&DriverRegistry::builtin(), &spec)?;
//! let dispatcher = Dispatcher::new(root.clone());
//!
//! let reply = dispatcher
//!     .dispatch(CallRequest::new(["power"], "on", vec![]))
//!     .await?;
//! let _value = reply.into_unary()?;
//!
//! rigd::tree::teardown(&root).await?;
//! # Ok(()) }
//! ```

pub mod dispatch;
pub mod drivers;
pub mod observability;
pub mod registry;
pub mod tree;
pub mod wire;

pub use dispatch::{CallError, CallReply, CallState, Dispatcher, StreamHandle};
pub use drivers::Driver;
pub use registry::{MethodRegistry, OperationKind};
pub use tree::{compose, teardown, DriverNode, DriverRegistry, NodeSpec};
pub use wire::{CallRequest, Value};
