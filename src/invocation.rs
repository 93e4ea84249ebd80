//! Server-side view of one call: the method table, the [`Invocation`] handed
//! to a handler, and the [`Block`] through which a handler reaches the
//! caller's block.

use std::collections::HashMap;

use crossbeam::channel::{unbounded, Sender};

use crate::error::{WrapperError, WrapperResult};
use crate::message::{BlockFn, Reply};
use crate::payload::{Arguments, Payload};
use crate::policy::MethodPolicy;

/// Method-table key of the auto-registered capability query.
pub(crate) const RESPOND_TO: &str = "respond_to?";

pub(crate) type Handler<O> =
    Box<dyn Fn(&O, Invocation) -> WrapperResult<Payload> + Send + Sync>;

/// Name-keyed dispatch table, frozen when the server starts.
pub(crate) struct MethodTable<O> {
    handlers: HashMap<String, Handler<O>>,
}

impl<O> MethodTable<O> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, name: String, handler: Handler<O>) {
        self.handlers.insert(name, handler);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Handler<O>> {
        self.handlers.get(name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Everything a handler receives for one call.
pub struct Invocation {
    arguments: Arguments,
    block: Option<Block>,
}

impl Invocation {
    pub(crate) fn new(arguments: Arguments, block: Option<Block>) -> Self {
        Self { arguments, block }
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn arg(&self, index: usize) -> WrapperResult<&Payload> {
        self.arguments
            .get(index)
            .ok_or_else(|| WrapperError::method(format!("missing argument {index}")))
    }

    pub fn kwarg(&self, name: &str) -> WrapperResult<&Payload> {
        self.arguments
            .keyword(name)
            .ok_or_else(|| WrapperError::method(format!("missing keyword argument `{name}`")))
    }

    pub fn has_block(&self) -> bool {
        self.block.is_some()
    }

    pub fn block(&mut self) -> WrapperResult<&mut Block> {
        self.block
            .as_mut()
            .ok_or_else(|| WrapperError::method("no block given"))
    }
}

/// The effective block argument of a call. `Direct` runs the shipped closure
/// in place; `Relay` marshals each invocation back to the caller's domain and
/// waits for the answer on a fresh sub-channel.
pub struct Block {
    kind: BlockKind,
}

enum BlockKind {
    Direct(BlockFn),
    Relay {
        reply: Sender<Reply>,
        policy: MethodPolicy,
    },
}

impl Block {
    pub(crate) fn direct(block: BlockFn) -> Self {
        Self {
            kind: BlockKind::Direct(block),
        }
    }

    pub(crate) fn relay(reply: Sender<Reply>, policy: MethodPolicy) -> Self {
        Self {
            kind: BlockKind::Relay { reply, policy },
        }
    }

    pub fn call(&mut self, arguments: Arguments) -> WrapperResult<Payload> {
        match &mut self.kind {
            BlockKind::Direct(block) => block(arguments),
            BlockKind::Relay { reply, policy } => {
                let exported = arguments.export(policy.move_block_arguments())?;
                let (answer_tx, answer_rx) = unbounded();
                reply
                    .send(Reply::Yield {
                        arguments: exported,
                        reply: answer_tx,
                    })
                    .map_err(|_| {
                        WrapperError::disconnected("caller abandoned the reply channel")
                    })?;
                match answer_rx.recv() {
                    Ok(Reply::Return(value)) => Ok(value),
                    Ok(Reply::Exception(err)) => Err(err),
                    Ok(Reply::Yield { .. }) => Err(WrapperError::disconnected(
                        "unexpected yield on a block reply channel",
                    )),
                    Err(_) => Err(WrapperError::disconnected(
                        "caller abandoned the block reply channel",
                    )),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_blocks_run_in_place() {
        let mut block = Block::direct(Box::new(|arguments: Arguments| {
            let value: i64 = arguments
                .get(0)
                .ok_or_else(|| WrapperError::method("missing value"))?
                .extract()?;
            Ok(Payload::new(value * 2))
        }));
        let result = block.call(Arguments::new().arg(21i64)).expect("block runs");
        assert_eq!(result.extract::<i64>().unwrap(), 42);
    }

    #[test]
    fn missing_arguments_surface_as_method_errors() {
        let mut invocation = Invocation::new(Arguments::new(), None);
        assert!(matches!(
            invocation.arg(0),
            Err(WrapperError::Method(_))
        ));
        assert!(matches!(
            invocation.kwarg("missing"),
            Err(WrapperError::Method(_))
        ));
        assert!(matches!(
            invocation.block(),
            Err(WrapperError::Method(_))
        ));
    }
}
