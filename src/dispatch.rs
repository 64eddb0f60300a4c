// SPDX-License-Identifier: MIT
//! Call dispatcher — the remote-invocation boundary.
//!
//! Routes a [`CallRequest`] through the tree, enforces per-node exclusivity,
//! and produces either a unary reply or a drainable [`StreamHandle`]. The
//! transport in front of this (gRPC, WebSocket, test harness) only ever sees
//! wire values and the error taxonomy below.
//!
//! # Call state machine
//!
//! ```text
//! Pending ─► ResolvingPath ─► ResolutionFailed (terminal)
//!                        └──► Invoking ─► UnaryComplete (terminal)
//!                                    └──► Streaming ─► StreamItem (self-loop)
//!                                                 ├──► StreamComplete (terminal)
//!                                                 ├──► StreamError (terminal)
//!                                                 └──► Cancelled (terminal)
//! ```
//!
//! # Exclusivity
//!
//! At most one call is in flight per node. Queued calls are served in strict
//! arrival order (the per-node `tokio::sync::Mutex` is FIFO-fair); calls to
//! disjoint nodes proceed concurrently. A unary call holds the node lock for
//! the duration of the handler; a stream call holds it for the lifetime of
//! the [`StreamHandle`], so a slow consumer keeps the node busy by design —
//! hardware that is mid-stream is not safely shareable.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::observability::LatencyTracker;
use crate::registry::{Invocation, InvokeError, OperationStream};
use crate::tree::{DriverNode, PathResolutionError};
use crate::wire::{CallRequest, SerializationError, Value};

/// Phases a single call moves through. Used for structured logs and exposed
/// on stream handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    ResolvingPath,
    ResolutionFailed,
    Invoking,
    UnaryComplete,
    Streaming,
    StreamComplete,
    StreamError,
    Cancelled,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallState::Pending => "pending",
            CallState::ResolvingPath => "resolving_path",
            CallState::ResolutionFailed => "resolution_failed",
            CallState::Invoking => "invoking",
            CallState::UnaryComplete => "unary_complete",
            CallState::Streaming => "streaming",
            CallState::StreamComplete => "stream_complete",
            CallState::StreamError => "stream_error",
            CallState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Call failure taxonomy. Every variant carries enough context (node path,
/// operation) to diagnose remotely; none are retried by this core.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    PathResolution(#[from] PathResolutionError),

    #[error("unknown operation {operation:?} on {path}")]
    UnknownOperation { path: String, operation: String },

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Domain failure raised by the driver, wrapped with the call context.
    #[error("operation {operation:?} on {path} failed: {source}")]
    Handler {
        path: String,
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// The call waited past its deadline for the node's exclusivity lock.
    /// The queue position has been relinquished.
    #[error("timed out waiting for exclusive access to {path} (operation {operation:?})")]
    ResourceBusyTimeout { path: String, operation: String },
}

/// A unary result or a drainable stream — never both.
#[derive(Debug)]
pub enum CallReply {
    Unary(Value),
    Stream(StreamHandle),
}

impl CallReply {
    /// Unwrap a unary reply, erroring on streams. Convenience for callers
    /// that know the operation kind.
    pub fn into_unary(self) -> anyhow::Result<Value> {
        match self {
            CallReply::Unary(value) => Ok(value),
            CallReply::Stream(_) => anyhow::bail!("expected unary reply, got stream"),
        }
    }

    pub fn into_stream(self) -> anyhow::Result<StreamHandle> {
        match self {
            CallReply::Stream(handle) => Ok(handle),
            CallReply::Unary(_) => anyhow::bail!("expected stream reply, got unary value"),
        }
    }
}

/// Dispatches call requests against a composed driver tree.
///
/// Cheaply cloneable; all clones dispatch into the same tree.
#[derive(Clone)]
pub struct Dispatcher {
    root: Arc<DriverNode>,
}

impl Dispatcher {
    pub fn new(root: Arc<DriverNode>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Arc<DriverNode> {
        &self.root
    }

    /// Flatten the tree into reports for the transport layer.
    pub fn report(&self) -> Vec<crate::tree::NodeReport> {
        crate::tree::report(&self.root)
    }

    /// Dispatch a transport-level JSON envelope. Argument validation against
    /// the wire set happens here, before any handler runs.
    pub async fn dispatch_json(&self, json: &serde_json::Value) -> Result<CallReply, CallError> {
        let request = CallRequest::from_json(json)?;
        self.dispatch(request).await
    }

    /// Dispatch one call: resolve the path, queue on the node's exclusivity
    /// lock, invoke, and reply.
    pub async fn dispatch(&self, request: CallRequest) -> Result<CallReply, CallError> {
        let CallRequest {
            node_path,
            operation,
            args,
            timeout_ms,
        } = request;
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));

        debug!(
            path = %crate::tree::format_path(&node_path),
            operation = %operation,
            state = %CallState::Pending,
            "call accepted"
        );

        debug!(
            path = %crate::tree::format_path(&node_path),
            operation = %operation,
            state = %CallState::ResolvingPath,
            "resolving path"
        );

        let node = match self.root.resolve(&node_path) {
            Ok(node) => node,
            Err(e) => {
                debug!(
                    path = %crate::tree::format_path(&node_path),
                    operation = %operation,
                    state = %CallState::ResolutionFailed,
                    err = %e,
                    "path resolution failed"
                );
                return Err(e.into());
            }
        };
        let path = node.path_string();

        // Reject unknown operations before touching the node's queue, so a
        // bad call never perturbs callers already waiting on the lock.
        if node.registry().kind(&operation).is_none() {
            return Err(CallError::UnknownOperation {
                path,
                operation,
            });
        }

        let guard = self
            .acquire(&node, &path, &operation, deadline)
            .await?;

        debug!(path = %path, operation = %operation, state = %CallState::Invoking, "invoking");
        let tracker = LatencyTracker::start(format!("{path}/{operation}"));

        let invoke = node.registry().invoke(&operation, args);
        let invocation = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, invoke).await {
                Ok(result) => result,
                Err(_) => {
                    // The handler future is dropped, which cancels it at its
                    // next suspension point. A handler blocked outside of
                    // await cannot be stopped from here; say so loudly.
                    warn!(
                        path = %path,
                        operation = %operation,
                        "call deadline exceeded during handler execution; handler future cancelled"
                    );
                    return Err(CallError::Handler {
                        path: path.clone(),
                        operation: operation.clone(),
                        source: anyhow::anyhow!(
                            "call deadline exceeded during handler execution"
                        ),
                    });
                }
            },
            None => invoke.await,
        };

        match invocation {
            Ok(Invocation::Unary(value)) => {
                value.validate()?;
                tracker.finish();
                debug!(path = %path, operation = %operation, state = %CallState::UnaryComplete, "unary call complete");
                Ok(CallReply::Unary(value))
            }
            Ok(Invocation::Stream(stream)) => {
                debug!(path = %path, operation = %operation, state = %CallState::Streaming, "stream opened");
                Ok(CallReply::Stream(StreamHandle {
                    stream,
                    state: CallState::Streaming,
                    path,
                    operation,
                    _guard: guard,
                }))
            }
            Err(InvokeError::UnknownOperation { name }) => Err(CallError::UnknownOperation {
                path,
                operation: name,
            }),
            Err(InvokeError::Handler(source)) => {
                debug!(path = %path, operation = %operation, err = %source, "handler error");
                Err(CallError::Handler {
                    path,
                    operation,
                    source,
                })
            }
        }
    }

    /// Queue on the node's exclusivity lock, relinquishing the queue
    /// position if the deadline passes first.
    async fn acquire(
        &self,
        node: &Arc<DriverNode>,
        path: &str,
        operation: &str,
        deadline: Option<Instant>,
    ) -> Result<OwnedMutexGuard<()>, CallError> {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, node.lock_owned())
                .await
                .map_err(|_| {
                    debug!(path = %path, operation = %operation, "gave up waiting for node lock");
                    CallError::ResourceBusyTimeout {
                        path: path.to_string(),
                        operation: operation.to_string(),
                    }
                }),
            None => Ok(node.lock_owned().await),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("root", &self.root).finish()
    }
}

/// Caller-side handle on an open stream operation.
///
/// Holds the target node's exclusivity lock until dropped, so queued calls
/// to the same node wait for the stream to finish. Each [`next`] call yields
/// exactly one of: an item, end-of-stream (`Ok(None)`), or an error; after a
/// terminal the handle is fused and `next` keeps returning `Ok(None)`.
///
/// Abandoning a stream should go through [`cancel`], which runs the
/// handler's cancellation hook so the hardware is not left half-configured.
/// Dropping without cancelling releases the lock but skips the hook; the
/// dispatcher logs a warning when that happens.
///
/// [`next`]: StreamHandle::next
/// [`cancel`]: StreamHandle::cancel
pub struct StreamHandle {
    stream: Box<dyn OperationStream>,
    state: CallState,
    path: String,
    operation: String,
    _guard: OwnedMutexGuard<()>,
}

impl StreamHandle {
    /// Pull the next element off the stream.
    pub async fn next(&mut self) -> Result<Option<Value>, CallError> {
        if self.state != CallState::Streaming {
            return Ok(None);
        }
        match self.stream.next().await {
            Some(Ok(value)) => {
                if let Err(source) = value.validate() {
                    self.state = CallState::StreamError;
                    debug!(path = %self.path, operation = %self.operation, state = %self.state, err = %source, "stream element outside wire set");
                    return Err(source.into());
                }
                Ok(Some(value))
            }
            None => {
                self.state = CallState::StreamComplete;
                debug!(path = %self.path, operation = %self.operation, state = %self.state, "stream complete");
                Ok(None)
            }
            Some(Err(source)) => {
                self.state = CallState::StreamError;
                debug!(path = %self.path, operation = %self.operation, state = %self.state, err = %source, "stream error");
                Err(CallError::Handler {
                    path: self.path.clone(),
                    operation: self.operation.clone(),
                    source,
                })
            }
        }
    }

    /// Stop consuming and run the handler's cancellation hook.
    ///
    /// Idempotent: cancelling a finished or already-cancelled stream is a
    /// no-op.
    pub async fn cancel(&mut self) -> Result<(), CallError> {
        if self.state != CallState::Streaming {
            return Ok(());
        }
        self.state = CallState::Cancelled;
        debug!(path = %self.path, operation = %self.operation, state = %self.state, "stream cancelled");
        self.stream
            .cancel()
            .await
            .map_err(|source| CallError::Handler {
                path: self.path.clone(),
                operation: self.operation.clone(),
                source,
            })
    }

    /// Current terminal/non-terminal state of the stream.
    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn node_path(&self) -> &str {
        &self.path
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.state == CallState::Streaming {
            warn!(
                path = %self.path,
                operation = %self.operation,
                "live stream dropped without cancel; handler cancellation hook skipped"
            );
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("path", &self.path)
            .field("operation", &self.operation)
            .field("state", &self.state)
            .finish()
    }
}
