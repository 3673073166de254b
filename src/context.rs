// SPDX-License-Identifier: Apache-2.0/MIT
//! The context threaded into every target action.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation flag shared between the caller and every
/// action the executor invokes.
///
/// The executor never preempts a running action on its own; actions are
/// responsible for polling [`is_cancelled`](CancellationToken::is_cancelled)
/// at convenient points and returning an error of their own choosing when it
/// is set.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not (yet) cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Opaque context passed to every target action.
///
/// Carries only cancellation today; the type exists so actions have a
/// stable, extensible entry point rather than taking a bare
/// `CancellationToken`.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancellation: CancellationToken,
}

impl Context {
    /// Build a context around a given cancellation token.
    pub fn new(cancellation: CancellationToken) -> Self {
        Context { cancellation }
    }

    /// The cancellation token for this run.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Shorthand for `self.cancellation().is_cancelled()`.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
