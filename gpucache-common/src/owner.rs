// Copyright 2026 gpucache Project Authors
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

use std::{
    sync::Arc,
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use crate::strict_assert_eq;

#[derive(Debug, Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    reentrance: usize,
}

/// Diagnostic that detects two threads being inside the same single-owner object at once.
///
/// The first thread to enter becomes the owner until its outermost guard is dropped. Entering from another thread
/// while the owner is still inside trips a strict assertion. Nested entries from the owner thread are counted.
///
/// The mutex only protects the owner comparison. It is not a lock around the guarded object.
#[derive(Debug, Clone, Default)]
pub struct SingleOwner {
    state: Arc<Mutex<OwnerState>>,
}

impl SingleOwner {
    /// Enter the guarded section on the current thread.
    pub fn enter(&self) -> SingleOwnerGuard {
        let current = thread::current().id();
        {
            let mut state = self.state.lock();
            if state.reentrance == 0 {
                state.owner = Some(current);
            } else {
                strict_assert_eq!(
                    state.owner,
                    Some(current),
                    "single owner object entered from a second thread"
                );
            }
            state.reentrance += 1;
        }
        SingleOwnerGuard {
            state: self.state.clone(),
        }
    }

    /// The thread currently inside the guarded section, if any.
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }
}

/// Guard returned by [`SingleOwner::enter`].
#[derive(Debug)]
#[must_use]
pub struct SingleOwnerGuard {
    state: Arc<Mutex<OwnerState>>,
}

impl Drop for SingleOwnerGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.reentrance -= 1;
        if state.reentrance == 0 {
            state.owner = None;
        }
    }
}
