//! By-name façade handed to peers.
//!
//! A stub is nothing but a wrapper clone with an invocation-shaped surface:
//! every `invoke` forwards to [`Wrapper::call`], and the capability query is
//! dispatched through the server like any other call.

use std::fmt;

use crate::error::WrapperResult;
use crate::invocation::RESPOND_TO;
use crate::payload::{Arguments, Payload};
use crate::wrapper::Wrapper;

pub struct Stub<O> {
    wrapper: Wrapper<O>,
}

impl<O> Clone for Stub<O> {
    fn clone(&self) -> Self {
        Self {
            wrapper: self.wrapper.clone(),
        }
    }
}

impl<O> fmt::Debug for Stub<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub").finish_non_exhaustive()
    }
}

impl<O: Send + Sync + 'static> Stub<O> {
    pub(crate) fn new(wrapper: Wrapper<O>) -> Self {
        Self { wrapper }
    }

    pub fn wrapper(&self) -> &Wrapper<O> {
        &self.wrapper
    }

    pub fn invoke(&self, method: &str, arguments: Arguments) -> WrapperResult<Payload> {
        self.wrapper.call(method, arguments)
    }

    pub fn invoke_with_block<F>(
        &self,
        method: &str,
        arguments: Arguments,
        block: F,
    ) -> WrapperResult<Payload>
    where
        F: FnMut(Arguments) -> WrapperResult<Payload> + Send + 'static,
    {
        self.wrapper.call_with_block(method, arguments, block)
    }

    /// Whether the wrapped object answers to `method`.
    pub fn responds_to(&self, method: &str) -> WrapperResult<bool> {
        self.wrapper
            .call(RESPOND_TO, Arguments::new().arg(method.to_string()))?
            .extract()
    }
}
