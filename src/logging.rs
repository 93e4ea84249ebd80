//! Diagnostics helper carried to every wrapper and server call site.
//!
//! Emission is gated by the wrapper's `logging_enabled` flag; formatting and
//! timestamping belong to the installed `tracing` subscriber.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::TransactionId;

const TARGET: &str = "crosscall";

#[derive(Clone)]
pub(crate) struct DiagLog {
    enabled: bool,
    wrapper: Arc<str>,
}

impl DiagLog {
    pub(crate) fn new(enabled: bool, wrapper: Arc<str>) -> Self {
        Self { enabled, wrapper }
    }

    pub(crate) fn lifecycle(&self, event: &str) {
        if self.enabled {
            debug!(target: TARGET, wrapper = %self.wrapper, "{event}");
        }
    }

    pub(crate) fn worker(&self, worker: usize, event: &str) {
        if self.enabled {
            debug!(target: TARGET, wrapper = %self.wrapper, worker, "{event}");
        }
    }

    pub(crate) fn call(
        &self,
        transaction: &TransactionId,
        method: &str,
        worker: Option<usize>,
        event: &str,
    ) {
        if !self.enabled {
            return;
        }
        match worker {
            Some(worker) => {
                debug!(
                    target: TARGET,
                    wrapper = %self.wrapper,
                    transaction = %transaction,
                    method,
                    worker,
                    "{event}"
                );
            }
            None => {
                debug!(
                    target: TARGET,
                    wrapper = %self.wrapper,
                    transaction = %transaction,
                    method,
                    "{event}"
                );
            }
        }
    }

    /// Best-effort reply paths log their drops here.
    pub(crate) fn dropped(&self, transaction: &TransactionId, method: &str, event: &str) {
        if self.enabled {
            warn!(
                target: TARGET,
                wrapper = %self.wrapper,
                transaction = %transaction,
                method,
                "{event}"
            );
        }
    }
}
