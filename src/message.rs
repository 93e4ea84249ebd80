//! Messages exchanged on the server inbox and on per-call reply channels.

use std::fmt;

use crossbeam::channel::Sender;

use crate::error::{WrapperError, WrapperResult};
use crate::payload::{Arguments, Payload};
use crate::policy::MethodPolicy;

/// A caller-supplied block, boxed for transport. In relay mode it stays on
/// the caller's side; in in-place mode it ships with the call.
pub(crate) type BlockFn = Box<dyn FnMut(Arguments) -> WrapperResult<Payload> + Send>;

/// Inbox protocol.
pub(crate) enum ServerMessage {
    Call(CallRequest),
    Stop,
    Join(Sender<()>),
    WorkerStopped(usize),
}

/// One marshalled method invocation.
pub(crate) struct CallRequest {
    pub method: String,
    pub arguments: Arguments,
    pub block: BlockSlot,
    pub transaction: TransactionId,
    pub policy: MethodPolicy,
    pub reply: Sender<Reply>,
}

/// The three shapes of the block argument slot.
pub(crate) enum BlockSlot {
    Absent,
    /// The block itself, shipped for execution in the server's domain.
    InPlace(BlockFn),
    /// The block stays with the caller; the server relays invocations back.
    Relay,
}

/// Per-call reply protocol: zero or more `Yield`s followed by exactly one
/// terminal `Return` or `Exception`. The yield sub-channel reuses the same
/// enum and never legitimately carries `Yield`.
pub(crate) enum Reply {
    Return(Payload),
    Exception(WrapperError),
    Yield {
        arguments: Arguments,
        reply: Sender<Reply>,
    },
}

/// Random 120-bit value rendered base-36. Opaque to the server; used only
/// for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TransactionId(String);

impl TransactionId {
    pub(crate) fn generate() -> Self {
        let mut value = rand::random::<u128>() >> 8;
        let mut digits = Vec::new();
        const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        if value == 0 {
            digits.push(b'0');
        }
        while value > 0 {
            digits.push(ALPHABET[(value % 36) as usize]);
            value /= 36;
        }
        digits.reverse();
        Self(String::from_utf8_lossy(&digits).into_owned())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
