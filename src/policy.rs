//! Per-method payload-transport configuration.
//!
//! A [`PolicySettings`] is the mutable configuration record collected while a
//! wrapper is being built; [`MethodPolicy`] is the frozen value object the
//! running server and its callers consult. Each of the four payload-class
//! flags inherits from the base `move_data` flag when left unset;
//! `execute_blocks_in_place` ignores the base and defaults to off.

/// Builder-side transport settings for one method (or for the wrapper-wide
/// default). All flags start unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicySettings {
    move_data: Option<bool>,
    move_arguments: Option<bool>,
    move_results: Option<bool>,
    move_block_arguments: Option<bool>,
    move_block_results: Option<bool>,
    execute_blocks_in_place: Option<bool>,
}

impl PolicySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base flag the four payload-class flags fall back to.
    pub fn move_data(mut self, enabled: bool) -> Self {
        self.move_data = Some(enabled);
        self
    }

    pub fn move_arguments(mut self, enabled: bool) -> Self {
        self.move_arguments = Some(enabled);
        self
    }

    pub fn move_results(mut self, enabled: bool) -> Self {
        self.move_results = Some(enabled);
        self
    }

    pub fn move_block_arguments(mut self, enabled: bool) -> Self {
        self.move_block_arguments = Some(enabled);
        self
    }

    pub fn move_block_results(mut self, enabled: bool) -> Self {
        self.move_block_results = Some(enabled);
        self
    }

    /// Ship the caller's block to the server and run it there instead of
    /// relaying each invocation back to the caller.
    pub fn execute_blocks_in_place(mut self, enabled: bool) -> Self {
        self.execute_blocks_in_place = Some(enabled);
        self
    }

    pub(crate) fn resolve(&self) -> MethodPolicy {
        let base = self.move_data;
        MethodPolicy {
            move_arguments: interpret(self.move_arguments, base),
            move_results: interpret(self.move_results, base),
            move_block_arguments: interpret(self.move_block_arguments, base),
            move_block_results: interpret(self.move_block_results, base),
            execute_blocks_in_place: self.execute_blocks_in_place.unwrap_or(false),
        }
    }
}

/// A specific setting wins over the base regardless of truth value.
fn interpret(flag: Option<bool>, base: Option<bool>) -> bool {
    flag.or(base).unwrap_or(false)
}

/// Frozen transport policy for one method. Read-only once constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodPolicy {
    move_arguments: bool,
    move_results: bool,
    move_block_arguments: bool,
    move_block_results: bool,
    execute_blocks_in_place: bool,
}

impl MethodPolicy {
    pub fn move_arguments(&self) -> bool {
        self.move_arguments
    }

    pub fn move_results(&self) -> bool {
        self.move_results
    }

    pub fn move_block_arguments(&self) -> bool {
        self.move_block_arguments
    }

    pub fn move_block_results(&self) -> bool {
        self.move_block_results
    }

    pub fn execute_blocks_in_place(&self) -> bool {
        self.execute_blocks_in_place
    }
}
