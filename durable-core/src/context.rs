//! The handler bridge.
//!
//! A workflow handler never talks to the journal directly. It receives a
//! [`StepContext`], and every step call becomes a [`StepRequest`] handed to the
//! step executor over a zero-buffer channel. The call then suspends until the
//! executor resolves or rejects the request's completion pair.
//!
//! The sender sits behind an async mutex that stays locked until the reply
//! arrives, so a handler can never have two step requests outstanding, even
//! when it joins several step futures.
//!
//! The context is also the handler's only source of time: [`StepContext::now`]
//! reads a logical clock derived from the persisted workflow and journal, which
//! keeps handlers deterministic across replays.

use crate::codec::{Codec, sealed};
use crate::error::StepError;
use crate::journal::FunctionKind;
use crate::primitives::WorkflowId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::SinkExt;
use futures::channel::{mpsc, oneshot};
use futures::lock::Mutex;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

/// The step a handler asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepRequestKind {
    Function {
        kind: FunctionKind,
        operation_handle: String,
        args: Bytes,
    },
    Sleep {
        duration_ms: u64,
    },
}

/// A live step call waiting on the executor. Never persisted.
#[derive(Debug)]
pub struct StepRequest {
    pub kind: StepRequestKind,
    reply: oneshot::Sender<Result<Bytes, StepError>>,
}

impl StepRequest {
    pub fn new(kind: StepRequestKind) -> (Self, oneshot::Receiver<Result<Bytes, StepError>>) {
        let (reply, receiver) = oneshot::channel();
        (Self { kind, reply }, receiver)
    }

    /// Hand a result back to the suspended handler.
    pub fn resolve(self, value: Bytes) {
        // The handler may already be gone; nothing to deliver to then.
        let _ = self.reply.send(Ok(value));
    }

    pub fn reject(self, error: StepError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Receiving half of the bridge, owned by the step executor.
pub type StepReceiver = mpsc::Receiver<StepRequest>;

/// Replay-stable time for one poll.
///
/// Starts at the workflow's start time and only moves forward as the executor
/// replays completed entries.
#[derive(Debug, Clone)]
pub struct LogicalClock(Arc<std::sync::Mutex<DateTime<Utc>>>);

impl LogicalClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(std::sync::Mutex::new(start)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn advance_to(&self, at: DateTime<Utc>) {
        let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if at > *now {
            *now = at;
        }
    }
}

/// Codec-independent sending half of the bridge.
///
/// Registries wrap it into a typed [`StepContext`] before calling a handler.
#[derive(Debug)]
pub struct StepChannel {
    workflow_id: WorkflowId,
    sender: Mutex<mpsc::Sender<StepRequest>>,
    clock: LogicalClock,
}

/// Create both ends of the bridge for one poll.
pub fn step_channel(workflow_id: WorkflowId, clock: LogicalClock) -> (StepChannel, StepReceiver) {
    let (sender, receiver) = mpsc::channel(0);
    let channel = StepChannel {
        workflow_id,
        sender: Mutex::new(sender),
        clock,
    };
    (channel, receiver)
}

impl StepChannel {
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Send one request and wait for its resolution.
    pub async fn request(&self, kind: StepRequestKind) -> Result<Bytes, StepError> {
        let mut sender = self.sender.lock().await;
        let (request, reply) = StepRequest::new(kind);
        sender
            .send(request)
            .await
            .map_err(|_| StepError::Abandoned)?;
        reply.await.map_err(|_| StepError::Abandoned)?
    }
}

/// The capability object passed to workflow handlers.
///
/// Exposes only journaled operations: remote calls, durable sleeps and a
/// replay-stable clock.
pub struct StepContext<C> {
    channel: StepChannel,
    codec: Arc<C>,
}

impl<C: Codec> StepContext<C> {
    pub fn new(channel: StepChannel, codec: Arc<C>) -> Self {
        Self { channel, codec }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        self.channel.workflow_id()
    }

    /// Logical time: the workflow's start time, advanced by every step
    /// completion replayed so far.
    pub fn now(&self) -> DateTime<Utc> {
        self.channel.now()
    }

    /// Call a read-only operation.
    pub async fn run_read_only<I, O>(
        &self,
        operation_handle: &str,
        args: &I,
    ) -> Result<O, StepError>
    where
        C: sealed::EncodeValue<I> + sealed::DecodeValue<O>,
    {
        self.run(FunctionKind::ReadOnly, operation_handle, args).await
    }

    /// Call a transactional operation.
    pub async fn run_transactional<I, O>(
        &self,
        operation_handle: &str,
        args: &I,
    ) -> Result<O, StepError>
    where
        C: sealed::EncodeValue<I> + sealed::DecodeValue<O>,
    {
        self.run(FunctionKind::Transactional, operation_handle, args)
            .await
    }

    /// Call an untransacted operation.
    ///
    /// If its execution is lost without reporting back, the call fails with a
    /// transient error once the heartbeat notices.
    pub async fn run_untransacted<I, O>(
        &self,
        operation_handle: &str,
        args: &I,
    ) -> Result<O, StepError>
    where
        C: sealed::EncodeValue<I> + sealed::DecodeValue<O>,
    {
        self.run(FunctionKind::Untransacted, operation_handle, args)
            .await
    }

    /// Call an operation with already-encoded arguments.
    pub async fn run_raw(
        &self,
        kind: FunctionKind,
        operation_handle: &str,
        args: Bytes,
    ) -> Result<Bytes, StepError> {
        self.channel
            .request(StepRequestKind::Function {
                kind,
                operation_handle: operation_handle.to_string(),
                args,
            })
            .await
    }

    /// Durably wait for `duration`.
    pub async fn sleep(&self, duration: Duration) -> Result<(), StepError> {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.channel
            .request(StepRequestKind::Sleep { duration_ms })
            .await
            .map(|_| ())
    }

    async fn run<I, O>(
        &self,
        kind: FunctionKind,
        operation_handle: &str,
        args: &I,
    ) -> Result<O, StepError>
    where
        C: sealed::EncodeValue<I> + sealed::DecodeValue<O>,
    {
        let args = self
            .codec
            .encode(args)
            .map_err(|e| StepError::Codec(e.to_string()))?;
        let result = self.run_raw(kind, operation_handle, args).await?;
        self.codec
            .decode(result)
            .map_err(|e| StepError::Codec(e.to_string()))
    }
}
