// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

use crate::errors::Range;

/// Raw millisecond value that stands for "wait forever".
pub const INFINITE_MILLIS: i64 = -1;

/// How long a caller is willing to block on a flush or a shutdown.
///
/// `Timeout::ZERO` means "signal the worker and return immediately".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    #[default]
    Infinite,
    After(Duration),
}

impl Timeout {
    pub const ZERO: Timeout = Timeout::After(Duration::ZERO);

    pub fn from_millis(millis: u64) -> Self {
        Timeout::After(Duration::from_millis(millis))
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Timeout::After(d) if d.is_zero())
    }

    /// A duration too large to be represented as an instant never expires.
    pub(crate) fn deadline(&self) -> Deadline {
        match self {
            Timeout::Infinite => Deadline(None),
            Timeout::After(d) => Deadline(Instant::now().checked_add(*d)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

impl TryFrom<i64> for Timeout {
    type Error = Range;

    /// Converts a raw millisecond count, where `-1` is the infinite sentinel.
    fn try_from(millis: i64) -> Result<Self, Self::Error> {
        match millis {
            INFINITE_MILLIS => Ok(Timeout::Infinite),
            m if m < 0 => Err(Range::new(
                "timeout_milliseconds",
                m,
                "should be non-negative or -1 for an infinite wait",
            )),
            m => Ok(Timeout::from_millis(m.unsigned_abs())),
        }
    }
}

/// Fixed point in time derived from a [`Timeout`]; `None` never expires.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// Length of the next wait slice, never longer than `poll_interval`.
    pub(crate) fn slice(&self, poll_interval: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(poll_interval),
            None => poll_interval,
        }
    }

    /// Whatever is left of the deadline, expressed as a timeout.
    pub(crate) fn as_timeout(&self) -> Timeout {
        match self.remaining() {
            Some(remaining) => Timeout::After(remaining),
            None => Timeout::Infinite,
        }
    }
}
