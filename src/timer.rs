// Copyright 2026 the skiff authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deadline timers with periodic reschedule, per connection and global.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::list::{List, NodeId};

/// Handle to a live timer.
pub type TimerId = NodeId;

/// Maximum live timers per list.
pub const MAX_TIMERS: usize = 1024;

/// What a timer drives when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// TCP establish deadline.
    Establish,
    /// TLS handshake deadline (outgoing).
    TlsEstablish,
    /// TLS handshake deadline (incoming).
    TlsAccept,
    /// TLS shutdown deadline.
    TlsShutdown,
    /// Flush-and-close drain deadline.
    FlushClose,
    /// User-level timer, surfaced as an event.
    User,
}

#[derive(Debug)]
pub(crate) struct Timer {
    pub(crate) deadline: Instant,
    pub(crate) shift: Duration,
    pub(crate) kind: TimerKind,
    pub(crate) udata: u64,
}

/// A fired timer, reported from the due-walk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fired {
    pub(crate) id: TimerId,
    pub(crate) kind: TimerKind,
    pub(crate) udata: u64,
}

/// Deadline-ordered-enough timer list: unsorted FIFO walked each reactor
/// iteration, as the set per connection is small.
///
/// The walk first snapshots node ids, then fires and reschedules, so user
/// code reacting to the fired batch can freely add or delete timers; a
/// timer deleted from its own callback is simply gone by the next walk, and
/// timers created during the batch never fire in the same iteration.
#[derive(Debug, Default)]
pub(crate) struct TimerList {
    timers: List<Timer>,
}

impl TimerList {
    pub(crate) fn new() -> Self {
        TimerList { timers: List::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    /// Arms a timer `shift` from `now`. Fails with `TimerCapacity` past the
    /// per-list limit.
    pub(crate) fn add(
        &mut self,
        now: Instant,
        shift: Duration,
        kind: TimerKind,
        udata: u64,
    ) -> Result<TimerId> {
        if self.timers.len() >= MAX_TIMERS {
            return Err(Error::TimerCapacity);
        }
        Ok(self.timers.push_back(Timer {
            deadline: now + shift,
            shift,
            kind,
            udata,
        }))
    }

    pub(crate) fn del(&mut self, id: TimerId) -> Result<()> {
        self.timers.remove(id).map(|_| ()).ok_or(Error::WrongState)
    }

    /// Fires every timer with `deadline <= now`, advancing each by its
    /// shift, and returns the fired set in list order.
    pub(crate) fn due(&mut self, now: Instant) -> Vec<Fired> {
        if self.timers.is_empty() {
            return Vec::new();
        }

        let mut fired = Vec::new();
        for id in self.timers.ids() {
            if let Some(timer) = self.timers.get_mut(id) {
                if timer.deadline <= now {
                    fired.push(Fired {
                        id,
                        kind: timer.kind,
                        udata: timer.udata,
                    });
                    timer.deadline += timer.shift;
                }
            }
        }
        fired
    }

    /// Drops every timer; used on connection teardown so no callback ever
    /// observes a dead connection.
    pub(crate) fn clear(&mut self) {
        while self.timers.pop_front().is_some() {}
    }
}
