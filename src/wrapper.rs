//! The client-side entry point.
//!
//! A [`WrapperBuilder`] collects the configuration and the method table,
//! spawns the server thread, and freezes everything into a [`Wrapper`] that
//! is cheap to clone and safe to hand to any thread. Each [`Wrapper::call`]
//! drives the per-call reply protocol, including the yield loop for blocks
//! relayed back from the server.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::unbounded;
use parking_lot::Mutex;

use crate::error::{WrapperError, WrapperResult};
use crate::invocation::{Handler, Invocation, MethodTable, RESPOND_TO};
use crate::logging::DiagLog;
use crate::mailbox::Mailbox;
use crate::message::{BlockFn, BlockSlot, CallRequest, Reply, ServerMessage, TransactionId};
use crate::payload::{Arguments, Payload};
use crate::policy::{MethodPolicy, PolicySettings};
use crate::server::{ObjectCell, Server};
use crate::stub::Stub;

/// Shareable method-call façade over an object owned by a server thread.
pub struct Wrapper<O> {
    inner: Arc<WrapperInner<O>>,
}

struct WrapperInner<O> {
    name: Arc<str>,
    threads: usize,
    logging: bool,
    local: bool,
    default_policy: MethodPolicy,
    policies: HashMap<String, MethodPolicy>,
    port: Arc<Mailbox<ServerMessage>>,
    link: Mutex<ServerLink<O>>,
    diag: DiagLog,
}

struct ServerLink<O> {
    handle: Option<JoinHandle<ObjectCell<O>>>,
    /// Recovered object of an isolated wrapper, parked between `join` and
    /// `recover_object`.
    parked: Option<O>,
}

impl<O> Clone for Wrapper<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O> fmt::Debug for Wrapper<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("name", &self.inner.name)
            .field("threads", &self.inner.threads)
            .field("local", &self.inner.local)
            .finish()
    }
}

impl<O: Send + Sync + 'static> Wrapper<O> {
    /// Start building an isolated wrapper: the object moves into the server
    /// thread and comes back only through [`Wrapper::recover_object`].
    pub fn builder(object: O) -> WrapperBuilder<O> {
        WrapperBuilder::with_cell(ObjectCell::Owned(object), false)
    }

    /// Start building a locally hosted wrapper: the constructing thread keeps
    /// shared access through its own `Arc` clone, and recovery is refused.
    pub fn shared(object: Arc<O>) -> WrapperBuilder<O> {
        WrapperBuilder::with_cell(ObjectCell::Shared(object), true)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    pub fn logging_enabled(&self) -> bool {
        self.inner.logging
    }

    /// True when the wrapped object is shared with the constructing thread
    /// rather than owned by the server.
    pub fn is_local(&self) -> bool {
        self.inner.local
    }

    pub fn stub(&self) -> Stub<O> {
        Stub::new(self.clone())
    }

    /// Per-method policy, falling back to the wrapper-wide default.
    pub fn method_settings(&self, method: &str) -> MethodPolicy {
        self.inner
            .policies
            .get(method)
            .copied()
            .unwrap_or(self.inner.default_policy)
    }

    /// Invoke `method` on the wrapped object and wait for its result.
    pub fn call(&self, method: &str, arguments: Arguments) -> WrapperResult<Payload> {
        self.drive(method, arguments, None)
    }

    /// Invoke `method` with a block. Under the default policy the block runs
    /// on the calling thread, once per yield; with `execute_blocks_in_place`
    /// it ships to the server instead.
    pub fn call_with_block<F>(
        &self,
        method: &str,
        arguments: Arguments,
        block: F,
    ) -> WrapperResult<Payload>
    where
        F: FnMut(Arguments) -> WrapperResult<Payload> + Send + 'static,
    {
        self.drive(method, arguments, Some(Box::new(block)))
    }

    fn drive(
        &self,
        method: &str,
        arguments: Arguments,
        block: Option<BlockFn>,
    ) -> WrapperResult<Payload> {
        let policy = self.method_settings(method);
        let transaction = TransactionId::generate();
        let (reply_tx, reply_rx) = unbounded();
        let mut local_block = None;
        let slot = match block {
            None => BlockSlot::Absent,
            Some(block) if policy.execute_blocks_in_place() => BlockSlot::InPlace(block),
            Some(block) => {
                local_block = Some(block);
                BlockSlot::Relay
            }
        };
        self.inner
            .diag
            .call(&transaction, method, None, "sending call");
        self.inner.port.send_with(|| {
            Ok(ServerMessage::Call(CallRequest {
                method: method.to_string(),
                arguments: arguments.export(policy.move_arguments())?,
                block: slot,
                transaction: transaction.clone(),
                policy,
                reply: reply_tx,
            }))
        })?;

        loop {
            match reply_rx.recv() {
                Ok(Reply::Yield {
                    arguments: yielded,
                    reply,
                }) => {
                    self.inner
                        .diag
                        .call(&transaction, method, None, "yield received");
                    let outcome = match local_block.as_mut() {
                        Some(block) => block(yielded),
                        None => Err(WrapperError::method(
                            "yield received but no block was supplied",
                        )),
                    };
                    let answer = match outcome {
                        Ok(value) => match value.export(policy.move_block_results()) {
                            Ok(exported) => Reply::Return(exported),
                            Err(err) => Reply::Exception(err),
                        },
                        Err(err) => Reply::Exception(err),
                    };
                    if reply.send(answer).is_err() {
                        self.inner.diag.dropped(
                            &transaction,
                            method,
                            "block reply channel closed, dropping answer",
                        );
                    }
                }
                Ok(Reply::Return(value)) => {
                    self.inner
                        .diag
                        .call(&transaction, method, None, "call returned");
                    return Ok(value);
                }
                Ok(Reply::Exception(err)) => {
                    self.inner
                        .diag
                        .call(&transaction, method, None, "call raised");
                    return Err(err);
                }
                Err(_) => {
                    return Err(WrapperError::disconnected(
                        "server terminated without a reply",
                    ))
                }
            }
        }
    }

    /// Ask the server to shut down once in-flight work has drained.
    /// Idempotent and safe from any thread, including after full teardown.
    pub fn async_stop(&self) -> &Self {
        if self.inner.port.send(ServerMessage::Stop).is_err() {
            self.inner.diag.lifecycle("stop after close ignored");
        }
        self
    }

    /// Block until the server has terminated. A no-op once it has.
    pub fn join(&self) -> &Self {
        if self.inner.local {
            self.join_local();
        } else {
            self.join_isolated();
        }
        self
    }

    fn join_isolated(&self) {
        let mut link = self.inner.link.lock();
        if let Some(handle) = link.handle.take() {
            match handle.join() {
                Ok(cell) => link.parked = cell.into_owned(),
                Err(_) => self
                    .inner
                    .diag
                    .lifecycle("server thread panicked before returning the object"),
            }
        }
    }

    fn join_local(&self) {
        let (reply_tx, reply_rx) = unbounded();
        if self.inner.port.send(ServerMessage::Join(reply_tx)).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    /// Take the object back from a terminated isolated server. Blocks until
    /// the server exits; succeeds at most once.
    pub fn recover_object(&self) -> WrapperResult<O> {
        if self.inner.local {
            return Err(WrapperError::RecoveryNotPermitted);
        }
        self.join_isolated();
        self.inner
            .link
            .lock()
            .parked
            .take()
            .ok_or(WrapperError::AlreadyRecovered)
    }
}

/// Collects configuration and the method table, then spawns the server.
/// The wrapper is not observable until [`WrapperBuilder::start`] returns, so
/// no configuration can race a running server.
pub struct WrapperBuilder<O> {
    object: ObjectCell<O>,
    local: bool,
    name: Option<String>,
    threads: usize,
    logging: bool,
    default_policy: PolicySettings,
    policies: HashMap<String, PolicySettings>,
    table: MethodTable<O>,
}

impl<O: Send + Sync + 'static> WrapperBuilder<O> {
    fn with_cell(object: ObjectCell<O>, local: bool) -> Self {
        Self {
            object,
            local,
            name: None,
            threads: 0,
            logging: false,
            default_policy: PolicySettings::new(),
            policies: HashMap::new(),
            table: MethodTable::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Worker-pool size; 0 keeps execution on the dispatch thread, one call
    /// at a time.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Transport settings applied to methods without their own entry.
    pub fn default_policy(mut self, settings: PolicySettings) -> Self {
        self.default_policy = settings;
        self
    }

    /// Per-method transport override.
    pub fn method_policy(mut self, method: impl Into<String>, settings: PolicySettings) -> Self {
        self.policies.insert(method.into(), settings);
        self
    }

    /// Register a method of the wrapped object.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&O, Invocation) -> WrapperResult<Payload> + Send + Sync + 'static,
    {
        self.table.insert(name.into(), Box::new(handler));
        self
    }

    /// Freeze the configuration, spawn the server thread, and return the
    /// shareable wrapper.
    pub fn start(mut self) -> WrapperResult<Wrapper<O>> {
        let name: Arc<str> = self
            .name
            .take()
            .unwrap_or_else(default_name::<O>)
            .into();
        let diag = DiagLog::new(self.logging, Arc::clone(&name));
        self.register_capability_query();

        let default_policy = self.default_policy.resolve();
        let policies = self
            .policies
            .iter()
            .map(|(method, settings)| (method.clone(), settings.resolve()))
            .collect();

        let (inbox_tx, inbox_rx) = unbounded();
        let port = Arc::new(Mailbox::new(inbox_tx.clone()));
        let server = Server::new(
            inbox_rx,
            inbox_tx,
            Arc::clone(&port),
            self.threads,
            diag.clone(),
        );
        let object = self.object;
        let table = self.table;
        let handle = thread::Builder::new()
            .name(format!("{name}-server"))
            .spawn(move || server.run(object, table))
            .map_err(WrapperError::spawn)?;

        Ok(Wrapper {
            inner: Arc::new(WrapperInner {
                name,
                threads: self.threads,
                logging: self.logging,
                local: self.local,
                default_policy,
                policies,
                port,
                link: Mutex::new(ServerLink {
                    handle: Some(handle),
                    parked: None,
                }),
                diag,
            }),
        })
    }

    /// The capability query is dispatched through the server like any other
    /// call; its handler closes over the frozen set of registered names. A
    /// user-registered handler under the same key wins.
    fn register_capability_query(&mut self) {
        if self.table.contains(RESPOND_TO) {
            return;
        }
        let mut known: HashSet<String> = self.table.names().map(str::to_string).collect();
        known.insert(RESPOND_TO.to_string());
        let handler: Handler<O> = Box::new(move |_object, invocation| {
            let name: String = invocation.arg(0)?.extract()?;
            Ok(Payload::new(known.contains(&name)))
        });
        self.table.insert(RESPOND_TO.to_string(), handler);
    }
}

fn default_name<O>() -> String {
    let tail = std::any::type_name::<O>()
        .rsplit("::")
        .next()
        .unwrap_or("object");
    format!(
        "{}-{:06x}",
        tail.to_lowercase(),
        rand::random::<u32>() & 0x00ff_ffff
    )
}
