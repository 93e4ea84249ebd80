//! The object-owning actor.
//!
//! One server thread runs the inbox dispatch loop; with `threads > 0` a
//! scoped worker pool shares a FIFO job queue and invokes the object in
//! parallel. The loop walks init → running → draining → cleanup and finally
//! returns the object cell to whoever joins the thread.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::error::WrapperError;
use crate::invocation::{Block, Invocation, MethodTable};
use crate::logging::DiagLog;
use crate::mailbox::Mailbox;
use crate::message::{BlockSlot, CallRequest, Reply, ServerMessage};

/// How the server holds the wrapped object: exclusively (isolated wrapper)
/// or shared with the constructing thread (local wrapper).
pub(crate) enum ObjectCell<O> {
    Owned(O),
    Shared(Arc<O>),
}

impl<O> ObjectCell<O> {
    fn get(&self) -> &O {
        match self {
            ObjectCell::Owned(object) => object,
            ObjectCell::Shared(object) => object,
        }
    }

    pub(crate) fn into_owned(self) -> Option<O> {
        match self {
            ObjectCell::Owned(object) => Some(object),
            ObjectCell::Shared(_) => None,
        }
    }
}

pub(crate) struct Server {
    inbox: Receiver<ServerMessage>,
    /// Raw sender handed to workers for their stop notifications; kept here
    /// so the inbox never disconnects while the server runs.
    loopback: Sender<ServerMessage>,
    port: Arc<Mailbox<ServerMessage>>,
    threads: usize,
    workers_alive: usize,
    join_waiters: Vec<Sender<()>>,
    diag: DiagLog,
}

impl Server {
    pub(crate) fn new(
        inbox: Receiver<ServerMessage>,
        loopback: Sender<ServerMessage>,
        port: Arc<Mailbox<ServerMessage>>,
        threads: usize,
        diag: DiagLog,
    ) -> Self {
        Self {
            inbox,
            loopback,
            port,
            threads,
            workers_alive: 0,
            join_waiters: Vec::new(),
            diag,
        }
    }

    /// Run the whole lifecycle and hand the object back. A panic escaping the
    /// dispatch loop is logged; the machine still exits through cleanup.
    pub(crate) fn run<O: Send + Sync>(
        mut self,
        object: ObjectCell<O>,
        table: MethodTable<O>,
    ) -> ObjectCell<O> {
        self.diag.lifecycle("server started");
        {
            let runner = Runner {
                cell: &object,
                table: &table,
                diag: self.diag.clone(),
            };
            let runner = &runner;
            if self.threads == 0 {
                if catch_unwind(AssertUnwindSafe(|| self.dispatch(None, runner))).is_err() {
                    self.diag.lifecycle("dispatch loop aborted by panic");
                }
            } else {
                let (jobs_tx, jobs_rx) = unbounded();
                self.workers_alive = self.threads;
                thread::scope(|scope| {
                    for worker in 1..=self.threads {
                        let jobs = jobs_rx.clone();
                        let stopped = self.loopback.clone();
                        scope.spawn(move || worker_loop(worker, runner, jobs, stopped));
                    }
                    drop(jobs_rx);
                    if catch_unwind(AssertUnwindSafe(|| self.dispatch(Some(jobs_tx), runner)))
                        .is_err()
                    {
                        self.diag
                            .lifecycle("dispatch loop aborted by panic, draining workers");
                    }
                });
            }
        }
        self.cleanup();
        object
    }

    /// Running, then (pooled only) draining.
    fn dispatch<O: Send + Sync>(&mut self, mut queue: Option<Sender<CallRequest>>, runner: &Runner<'_, O>) {
        loop {
            let message = match self.inbox.recv() {
                Ok(message) => message,
                Err(_) => return,
            };
            match message {
                ServerMessage::Call(request) => match &queue {
                    Some(jobs) => {
                        self.diag
                            .call(&request.transaction, &request.method, None, "call queued");
                        if let Err(err) = jobs.send(request) {
                            self.refuse(err.0);
                        }
                    }
                    None => runner.execute(request, None),
                },
                ServerMessage::Join(reply) => {
                    self.diag.lifecycle("join request recorded");
                    self.join_waiters.push(reply);
                }
                ServerMessage::Stop => {
                    self.diag.lifecycle("stop received");
                    match queue.take() {
                        // Dropping the sender closes the queue; workers exit
                        // after their current job.
                        Some(jobs) => {
                            drop(jobs);
                            break;
                        }
                        None => return,
                    }
                }
                ServerMessage::WorkerStopped(worker) => {
                    self.diag.worker(worker, "worker stopped unexpectedly");
                    self.workers_alive = self.workers_alive.saturating_sub(1);
                    queue = None;
                    break;
                }
            }
        }

        self.diag.lifecycle("draining");
        while self.workers_alive > 0 {
            match self.inbox.recv() {
                Ok(ServerMessage::Call(request)) => self.refuse(request),
                Ok(ServerMessage::Join(reply)) => self.join_waiters.push(reply),
                Ok(ServerMessage::Stop) => {}
                Ok(ServerMessage::WorkerStopped(worker)) => {
                    self.diag.worker(worker, "worker stopped");
                    self.workers_alive -= 1;
                }
                Err(_) => break,
            }
        }
    }

    /// Close the inbox, flush join waiters, refuse whatever is still
    /// buffered.
    fn cleanup(&mut self) {
        self.diag.lifecycle("cleanup");
        self.port.close();
        for waiter in self.join_waiters.drain(..) {
            if waiter.send(()).is_err() {
                self.diag.lifecycle("join reply channel closed, dropping signal");
            }
        }
        loop {
            match self.inbox.try_recv() {
                Ok(ServerMessage::Call(request)) => refuse_with(&self.diag, request),
                Ok(ServerMessage::Join(reply)) => {
                    let _ = reply.send(());
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        self.diag.lifecycle("server terminated");
    }

    fn refuse(&self, request: CallRequest) {
        refuse_with(&self.diag, request);
    }
}

/// Best-effort refusal: the reply channel may already be gone.
fn refuse_with(diag: &DiagLog, request: CallRequest) {
    diag.call(
        &request.transaction,
        &request.method,
        None,
        "refusing call, wrapper is shutting down",
    );
    if request
        .reply
        .send(Reply::Exception(WrapperError::Closed))
        .is_err()
    {
        diag.dropped(
            &request.transaction,
            &request.method,
            "reply channel closed, dropping refusal",
        );
    }
}

/// Shared execution context borrowed by the dispatch loop and every worker.
struct Runner<'env, O> {
    cell: &'env ObjectCell<O>,
    table: &'env MethodTable<O>,
    diag: DiagLog,
}

impl<O> Runner<'_, O> {
    fn execute(&self, request: CallRequest, worker: Option<usize>) {
        let CallRequest {
            method,
            arguments,
            block,
            transaction,
            policy,
            reply,
        } = request;
        self.diag.call(&transaction, &method, worker, "executing");
        let block = match block {
            BlockSlot::Absent => None,
            BlockSlot::InPlace(block) => Some(Block::direct(block)),
            BlockSlot::Relay => Some(Block::relay(reply.clone(), policy)),
        };
        let outcome = match self.table.get(&method) {
            Some(handler) => {
                let invocation = Invocation::new(arguments, block);
                let object = self.cell.get();
                catch_unwind(AssertUnwindSafe(|| handler(object, invocation)))
                    .unwrap_or_else(|panic| Err(WrapperError::panicked(panic_text(panic.as_ref()))))
            }
            None => Err(WrapperError::NoSuchMethod(method.clone())),
        };
        let terminal = match outcome {
            Ok(value) => match value.export(policy.move_results()) {
                Ok(exported) => Reply::Return(exported),
                Err(err) => Reply::Exception(err),
            },
            Err(err) => Reply::Exception(err),
        };
        if reply.send(terminal).is_err() {
            self.diag
                .dropped(&transaction, &method, "reply channel closed, dropping result");
        } else {
            self.diag.call(&transaction, &method, worker, "completed");
        }
    }
}

fn worker_loop<O>(
    worker: usize,
    runner: &Runner<'_, O>,
    jobs: Receiver<CallRequest>,
    stopped: Sender<ServerMessage>,
) {
    runner.diag.worker(worker, "worker started");
    while let Ok(request) = jobs.recv() {
        runner.execute(request, Some(worker));
    }
    let _ = stopped.send(ServerMessage::WorkerStopped(worker));
}

fn panic_text(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
