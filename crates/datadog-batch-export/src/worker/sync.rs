// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Blocking notification used by callers waiting on the thread worker.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    // bumped after every export pass
    generation: u64,
    stopped: bool,
}

/// Broadcasts "an export pass completed" pulses and a final "stopped" state.
#[derive(Debug, Default)]
pub(crate) struct Notifier {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Notifier {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub(crate) fn pulse(&self) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.condvar.notify_all();
    }

    pub(crate) fn stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        drop(state);
        self.condvar.notify_all();
    }

    /// Blocks until a pulse newer than `seen`, a stop, or `timeout`.
    pub(crate) fn wait_pulse(&self, seen: u64, timeout: Duration) {
        let guard = self.lock();
        let _ = self
            .condvar
            .wait_timeout_while(guard, timeout, |state| {
                state.generation == seen && !state.stopped
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Blocks until stopped; `None` waits without a bound.
    ///
    /// Returns whether the stop was observed.
    pub(crate) fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        let guard = self.lock();
        match timeout {
            None => {
                let state = self
                    .condvar
                    .wait_while(guard, |state| !state.stopped)
                    .unwrap_or_else(PoisonError::into_inner);
                state.stopped
            }
            Some(timeout) => {
                let (state, _) = self
                    .condvar
                    .wait_timeout_while(guard, timeout, |state| !state.stopped)
                    .unwrap_or_else(PoisonError::into_inner);
                state.stopped
            }
        }
    }
}
