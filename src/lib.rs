#![forbid(unsafe_code)]

//! Marshals method calls from many threads onto an actor that owns a
//! non-shareable object.
//!
//! A [`Wrapper`] spawns a server thread that takes ownership of a user
//! object and executes name-dispatched calls on it, either one at a time on
//! the dispatch thread (`threads = 0`) or in parallel on a bounded worker
//! pool. Callers drive a small per-call protocol: arguments travel as
//! [`Payload`] handles whose transport is move or deep-copy per method
//! policy, and a caller-supplied block is either relayed back to the calling
//! thread on every yield or shipped to the server to run in place.
//!
//! ```
//! use crosscall::{Arguments, Payload, Wrapper, WrapperError};
//!
//! struct Greeter;
//!
//! # fn main() -> Result<(), WrapperError> {
//! let wrapper = Wrapper::builder(Greeter)
//!     .threads(2)
//!     .method("greet", |_greeter: &Greeter, invocation| {
//!         let name: String = invocation.arg(0)?.extract()?;
//!         Ok(Payload::new(format!("hello, {name}")))
//!     })
//!     .start()?;
//!
//! let reply = wrapper.call("greet", Arguments::new().arg("peer".to_string()))?;
//! assert_eq!(reply.extract::<String>()?, "hello, peer");
//! wrapper.async_stop().join();
//! # Ok(())
//! # }
//! ```

mod error;
mod invocation;
mod logging;
mod mailbox;
mod message;
mod payload;
mod policy;
mod server;
mod stub;
mod wrapper;

pub use error::{WrapperError, WrapperResult};
pub use invocation::{Block, Invocation};
pub use payload::{Arguments, Payload, PayloadValue};
pub use policy::{MethodPolicy, PolicySettings};
pub use stub::Stub;
pub use wrapper::{Wrapper, WrapperBuilder};

#[cfg(test)]
mod tests;
