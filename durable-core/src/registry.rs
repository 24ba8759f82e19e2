//! Registries for workflow handlers and step operations.
//!
//! Workflows and journal entries only store string handles. The registries
//! resolve those handles back to code on every poll, so the process that
//! polls a workflow must register the same handlers and operations as the
//! process that started it.
//!
//! ```rust,ignore
//! let codec = Arc::new(JsonCodec);
//!
//! let workflows = WorkflowRegistry::with_codec(Arc::clone(&codec))
//!     .register_fn("checkout", |ctx: StepContext<JsonCodec>, cart: Cart| async move {
//!         let receipt: Receipt = ctx.run_transactional("charge", &cart).await?;
//!         ctx.sleep(Duration::from_secs(60)).await?;
//!         Ok(receipt)
//!     })
//!     .build();
//!
//! let functions = FunctionRegistry::with_codec(codec)
//!     .transactional("charge", |cart: Cart| async move { charge(cart).await })
//!     .build();
//! ```

use crate::codec::{Codec, sealed};
use crate::context::{StepChannel, StepContext};
use crate::journal::FunctionKind;
use anyhow::Result;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased workflow handler operating on encoded arguments and output.
pub type WorkflowHandler =
    Arc<dyn Fn(StepChannel, Bytes) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;

/// Checks that encoded start arguments decode to the handler's input type.
pub type ArgsValidator = Arc<dyn Fn(&Bytes) -> Result<()> + Send + Sync>;

/// Type-erased step operation.
pub type Operation = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;

/// A registered workflow handler.
#[derive(Clone)]
pub struct WorkflowEntry {
    handler: WorkflowHandler,
    validator: ArgsValidator,
}

impl WorkflowEntry {
    pub fn validate(&self, args: &Bytes) -> Result<()> {
        (self.validator)(args)
    }

    /// Run the handler against one poll's bridge.
    pub fn run(&self, channel: StepChannel, args: Bytes) -> BoxFuture<'static, Result<Bytes>> {
        (self.handler)(channel, args)
    }
}

/// Maps workflow handles to handlers.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, WorkflowEntry>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler taking a typed input and producing a typed output.
    ///
    /// Start arguments are validated by decoding them with `codec`.
    pub fn register_fn<I, O, F, Fut, C>(&mut self, handle: &str, codec: Arc<C>, func: F)
    where
        F: Fn(StepContext<C>, I) -> Fut + Send + Sync + 'static,
        I: Send + 'static,
        O: Send + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        C: Codec + sealed::DecodeValue<I> + sealed::EncodeValue<O>,
    {
        let func = Arc::new(func);
        let validator_codec = Arc::clone(&codec);
        let validator: ArgsValidator = Arc::new(move |args: &Bytes| {
            validator_codec.decode::<I>(args.clone()).map(|_| ())
        });
        let handler: WorkflowHandler = Arc::new(
            move |channel: StepChannel, args: Bytes| -> BoxFuture<'static, Result<Bytes>> {
                let func = Arc::clone(&func);
                let codec = Arc::clone(&codec);
                Box::pin(async move {
                    let input = codec.decode::<I>(args)?;
                    let ctx = StepContext::new(channel, Arc::clone(&codec));
                    let output = func(ctx, input).await?;
                    codec.encode(&output)
                })
            },
        );
        self.workflows
            .insert(handle.to_string(), WorkflowEntry { handler, validator });
    }

    pub fn get(&self, handle: &str) -> Option<&WorkflowEntry> {
        self.workflows.get(handle)
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.workflows.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(|s| s.as_str())
    }

    /// Create a builder that registers every handler with `codec`.
    pub fn with_codec<C: Codec>(codec: Arc<C>) -> WorkflowRegistryBuilder<C> {
        WorkflowRegistryBuilder {
            codec,
            registry: WorkflowRegistry::new(),
        }
    }
}

pub struct WorkflowRegistryBuilder<C> {
    codec: Arc<C>,
    registry: WorkflowRegistry,
}

impl<C: Codec> WorkflowRegistryBuilder<C> {
    pub fn register_fn<I, O, F, Fut>(mut self, handle: &str, func: F) -> Self
    where
        F: Fn(StepContext<C>, I) -> Fut + Send + Sync + 'static,
        I: Send + 'static,
        O: Send + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        C: sealed::DecodeValue<I> + sealed::EncodeValue<O>,
    {
        self.registry
            .register_fn(handle, Arc::clone(&self.codec), func);
        self
    }

    pub fn build(self) -> WorkflowRegistry {
        self.registry
    }
}

#[derive(Clone)]
struct FunctionEntry {
    kind: FunctionKind,
    operation: Operation,
}

/// Maps operation handles to step operations and their declared kind.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation of the given kind.
    pub fn register_fn<I, O, F, Fut, C>(
        &mut self,
        handle: &str,
        kind: FunctionKind,
        codec: Arc<C>,
        func: F,
    ) where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        I: Send + 'static,
        O: Send + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        C: Codec + sealed::DecodeValue<I> + sealed::EncodeValue<O>,
    {
        let func = Arc::new(func);
        let operation: Operation =
            Arc::new(move |args: Bytes| -> BoxFuture<'static, Result<Bytes>> {
                let func = Arc::clone(&func);
                let codec = Arc::clone(&codec);
                Box::pin(async move {
                    let input = codec.decode::<I>(args)?;
                    let output = func(input).await?;
                    codec.encode(&output)
                })
            });
        self.functions
            .insert(handle.to_string(), FunctionEntry { kind, operation });
    }

    /// Declared kind of a registered operation.
    pub fn kind(&self, handle: &str) -> Option<FunctionKind> {
        self.functions.get(handle).map(|entry| entry.kind)
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.functions.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Invoke `handle`, checking that the step's kind matches the registration.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown, the kind differs from the registered
    /// one, or the operation itself fails.
    pub async fn invoke(&self, kind: FunctionKind, handle: &str, args: Bytes) -> Result<Bytes> {
        let entry = self
            .functions
            .get(handle)
            .ok_or_else(|| anyhow::anyhow!("Operation '{}' is not registered", handle))?;
        if entry.kind != kind {
            anyhow::bail!(
                "Operation '{}' is registered as {} but was called as {}",
                handle,
                entry.kind,
                kind
            );
        }
        (entry.operation)(args).await
    }

    pub fn with_codec<C: Codec>(codec: Arc<C>) -> FunctionRegistryBuilder<C> {
        FunctionRegistryBuilder {
            codec,
            registry: FunctionRegistry::new(),
        }
    }
}

pub struct FunctionRegistryBuilder<C> {
    codec: Arc<C>,
    registry: FunctionRegistry,
}

impl<C: Codec> FunctionRegistryBuilder<C> {
    pub fn read_only<I, O, F, Fut>(self, handle: &str, func: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        I: Send + 'static,
        O: Send + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        C: sealed::DecodeValue<I> + sealed::EncodeValue<O>,
    {
        self.register_fn(handle, FunctionKind::ReadOnly, func)
    }

    pub fn transactional<I, O, F, Fut>(self, handle: &str, func: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        I: Send + 'static,
        O: Send + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        C: sealed::DecodeValue<I> + sealed::EncodeValue<O>,
    {
        self.register_fn(handle, FunctionKind::Transactional, func)
    }

    pub fn untransacted<I, O, F, Fut>(self, handle: &str, func: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        I: Send + 'static,
        O: Send + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        C: sealed::DecodeValue<I> + sealed::EncodeValue<O>,
    {
        self.register_fn(handle, FunctionKind::Untransacted, func)
    }

    pub fn register_fn<I, O, F, Fut>(mut self, handle: &str, kind: FunctionKind, func: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        I: Send + 'static,
        O: Send + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        C: sealed::DecodeValue<I> + sealed::EncodeValue<O>,
    {
        self.registry
            .register_fn(handle, kind, Arc::clone(&self.codec), func);
        self
    }

    pub fn build(self) -> FunctionRegistry {
        self.registry
    }
}
