// SPDX-License-Identifier: MIT
//! Method registry — the per-node table of exported operations.
//!
//! A driver exports operations into its node's registry at composition time.
//! The registry performs name lookup and invocation only: it does not
//! validate argument shapes (handlers validate their own inputs and fail
//! with a domain error), and it holds no mutable call state beyond the
//! name→handler map itself.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;

use crate::wire::Value;

/// Whether an exported operation returns one value or a sequence of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Unary,
    Stream,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Unary => write!(f, "unary"),
            OperationKind::Stream => write!(f, "stream"),
        }
    }
}

/// Handler for a unary operation: consumes positional arguments, produces
/// exactly one wire value.
#[async_trait]
pub trait UnaryHandler: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Value>;
}

/// A live stream produced by a [`StreamHandler`].
///
/// `cancel` is a required capability, not an optional hook: a consumer that
/// abandons the stream mid-iteration must be able to tell the driver to put
/// the hardware back in a known state. Dropping the stream without
/// cancelling still runs Rust drop glue, but gives the driver no chance to
/// perform async release work.
#[async_trait]
pub trait OperationStream: Send {
    /// Produce the next element, an error, or `None` at end-of-stream.
    async fn next(&mut self) -> Option<anyhow::Result<Value>>;

    /// Stop producing and release anything the stream holds open.
    /// Called at most once by the dispatcher; must tolerate a stream that
    /// has already finished naturally.
    async fn cancel(&mut self) -> anyhow::Result<()>;
}

/// Handler for a stream operation: consumes positional arguments, opens a
/// lazy sequence of wire values. The sequence is never materialized by the
/// registry — the dispatcher drains it one element at a time.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn open(&self, args: Vec<Value>) -> anyhow::Result<Box<dyn OperationStream>>;
}

/// Bridge an ordinary boxed [`Stream`](futures_util::Stream) (channel
/// receivers, generators built with `async_stream`, hardware read loops)
/// into an [`OperationStream`], with an explicit cancel action.
pub struct StreamedOperation {
    stream: BoxStream<'static, anyhow::Result<Value>>,
    on_cancel: Option<BoxFuture<'static, anyhow::Result<()>>>,
}

impl StreamedOperation {
    pub fn new(stream: BoxStream<'static, anyhow::Result<Value>>) -> Self {
        Self {
            stream,
            on_cancel: None,
        }
    }

    /// Attach the cancel action run when a consumer abandons the stream.
    pub fn with_cancel(mut self, on_cancel: BoxFuture<'static, anyhow::Result<()>>) -> Self {
        self.on_cancel = Some(on_cancel);
        self
    }
}

#[async_trait]
impl OperationStream for StreamedOperation {
    async fn next(&mut self) -> Option<anyhow::Result<Value>> {
        self.stream.next().await
    }

    async fn cancel(&mut self) -> anyhow::Result<()> {
        // Drop the source first so the producer side unblocks, then run the
        // driver's release action.
        self.stream = futures_util::stream::empty().boxed();
        match self.on_cancel.take() {
            Some(on_cancel) => on_cancel.await,
            None => Ok(()),
        }
    }
}

/// Adapter so plain async closures can serve as unary handlers.
pub struct UnaryFn<F>(pub F);

#[async_trait]
impl<F, Fut> UnaryHandler for UnaryFn<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Value> {
        (self.0)(args).await
    }
}

enum Handler {
    Unary(Arc<dyn UnaryHandler>),
    Stream(Arc<dyn StreamHandler>),
}

impl Handler {
    fn kind(&self) -> OperationKind {
        match self {
            Handler::Unary(_) => OperationKind::Unary,
            Handler::Stream(_) => OperationKind::Stream,
        }
    }
}

/// Result of a successful invocation: one value, or the still-lazy stream.
pub enum Invocation {
    Unary(Value),
    Stream(Box<dyn OperationStream>),
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invocation::Unary(value) => f.debug_tuple("Unary").field(value).finish(),
            Invocation::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Operation name collision at registration time. Fatal to composition.
#[derive(Debug, Error)]
#[error("operation {name:?} is already registered")]
pub struct DuplicateOperationError {
    pub name: String,
}

/// Invocation failure, before path/operation context is attached.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("unknown operation {name:?}")]
    UnknownOperation { name: String },
    /// Domain failure raised by the driver handler itself.
    #[error(transparent)]
    Handler(anyhow::Error),
}

/// Name→handler table for one driver node.
#[derive(Default)]
pub struct MethodRegistry {
    operations: HashMap<String, Handler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unary operation.
    pub fn register_unary(
        &mut self,
        name: impl Into<String>,
        handler: impl UnaryHandler + 'static,
    ) -> Result<(), DuplicateOperationError> {
        self.insert(name.into(), Handler::Unary(Arc::new(handler)))
    }

    /// Register a stream operation.
    pub fn register_stream(
        &mut self,
        name: impl Into<String>,
        handler: impl StreamHandler + 'static,
    ) -> Result<(), DuplicateOperationError> {
        self.insert(name.into(), Handler::Stream(Arc::new(handler)))
    }

    fn insert(&mut self, name: String, handler: Handler) -> Result<(), DuplicateOperationError> {
        if self.operations.contains_key(&name) {
            return Err(DuplicateOperationError { name });
        }
        self.operations.insert(name, handler);
        Ok(())
    }

    /// Kind of a registered operation, or `None` if absent.
    pub fn kind(&self, name: &str) -> Option<OperationKind> {
        self.operations.get(name).map(Handler::kind)
    }

    /// Names of all exported operations, sorted for stable reporting.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Invoke `name` with positional arguments.
    ///
    /// Unary handlers run to completion here; stream handlers only open the
    /// stream — draining it is the caller's job.
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Invocation, InvokeError> {
        match self.operations.get(name) {
            None => Err(InvokeError::UnknownOperation {
                name: name.to_string(),
            }),
            Some(Handler::Unary(handler)) => handler
                .call(args)
                .await
                .map(Invocation::Unary)
                .map_err(InvokeError::Handler),
            Some(Handler::Stream(handler)) => handler
                .open(args)
                .await
                .map(Invocation::Stream)
                .map_err(InvokeError::Handler),
        }
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("operations", &self.operation_names())
            .finish()
    }
}
