// Copyright 2025 OPPO.
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

use orpc::common::FastHashSet;
use p2pgrid_common::state::MessageId;
use std::collections::VecDeque;

/// Bounded FIFO of recently seen message ids.
///
/// Once `capacity` ids are remembered, recording a new one forgets the
/// oldest. A message without id is always new and is never recorded.
pub struct MessageMemory {
    capacity: usize,
    order: VecDeque<MessageId>,
    seen: FastHashSet<MessageId>,
}

impl MessageMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: FastHashSet::with_capacity(capacity),
        }
    }

    /// Returns true and records `id` if it was not seen yet.
    pub fn is_new(&mut self, id: Option<&MessageId>) -> bool {
        let id = match id {
            Some(v) => v,
            None => return true,
        };

        if self.seen.contains(id) {
            return false;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(*id);
        self.seen.insert(*id);
        true
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_id_is_always_new() {
        let mut memory = MessageMemory::new(2);
        assert!(memory.is_new(None));
        assert!(memory.is_new(None));
        assert!(memory.is_empty());
    }

    #[test]
    fn duplicate_within_window() {
        let mut memory = MessageMemory::new(3);
        let id = MessageId::random();
        assert!(memory.is_new(Some(&id)));
        assert!(!memory.is_new(Some(&id)));
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn oldest_is_evicted() {
        let mut memory = MessageMemory::new(2);
        let ids: Vec<_> = (0..3).map(|_| MessageId::random()).collect();

        for id in &ids {
            assert!(memory.is_new(Some(id)));
        }
        assert_eq!(memory.len(), 2);
        assert!(!memory.contains(&ids[0]));
        assert!(memory.contains(&ids[1]));
        assert!(memory.contains(&ids[2]));

        // Forgotten ids are accepted again and push out the next oldest.
        assert!(memory.is_new(Some(&ids[0])));
        assert!(!memory.contains(&ids[1]));
        assert!(!memory.is_new(Some(&ids[2])));
    }
}
