//! Bounded FIFO owned by every input socket.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::value::{Value, ValueKind};
use std::collections::VecDeque;

/// Fixed-capacity ring of pending values.
pub(crate) struct InputQueue {
    items: VecDeque<Value>,
    capacity: usize,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Change the capacity. Values already queued must still fit.
    pub fn set_capacity(&mut self, capacity: usize) -> PipelineResult<()> {
        if capacity == 0 || capacity < self.items.len() {
            return Err(PipelineError::InvalidCapacity(capacity));
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Append at the tail. A full queue hands the value back.
    pub fn push(&mut self, value: Value) -> Result<(), Value> {
        if self.is_full() {
            return Err(value);
        }
        self.items.push_back(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.items.pop_front()
    }

    pub fn head(&self) -> Option<&Value> {
        self.items.front()
    }

    /// Position of the first value of `kind`.
    pub fn find(&self, kind: ValueKind) -> Option<usize> {
        self.items.iter().position(|v| v.kind() == kind)
    }

    /// Move the value at `index` to the head, keeping the others in order.
    pub fn jump(&mut self, index: usize) -> bool {
        if index >= self.items.len() {
            return false;
        }
        if index > 0 {
            if let Some(value) = self.items.remove(index) {
                self.items.push_front(value);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ints(queue: &InputQueue) -> Vec<Option<i64>> {
        queue
            .iter()
            .map(|v| v.downcast_ref::<i64>().copied())
            .collect()
    }

    #[test]
    fn test_minimum_capacity_is_one() {
        let mut queue = InputQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.push(Value::object(1i64)).is_ok());
        assert!(queue.push(Value::object(2i64)).is_err());
    }

    #[test]
    fn test_push_refuses_when_full() {
        let mut queue = InputQueue::new(2);
        assert!(queue.push(Value::object(1i64)).is_ok());
        assert!(queue.push(Value::object(2i64)).is_ok());
        let rejected = queue.push(Value::object(3i64)).unwrap_err();
        assert_eq!(rejected.downcast_ref::<i64>(), Some(&3));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_jump_moves_tag_to_head() {
        let mut queue = InputQueue::new(4);
        queue.push(Value::object(1i64)).unwrap();
        queue.push(Value::object(2i64)).unwrap();
        queue.push(Value::Pause).unwrap();
        queue.push(Value::object(3i64)).unwrap();

        let index = queue.find(ValueKind::Pause).unwrap();
        assert_eq!(index, 2);
        assert!(queue.jump(index));
        assert_eq!(queue.head().map(Value::kind), Some(ValueKind::Pause));
        queue.pop();
        assert_eq!(ints(&queue), vec![Some(1), Some(2), Some(3)]);
        assert!(!queue.jump(5));
    }

    #[test]
    fn test_set_capacity_keeps_queued_values() {
        let mut queue = InputQueue::new(3);
        queue.push(Value::object(1i64)).unwrap();
        queue.push(Value::object(2i64)).unwrap();
        assert!(matches!(queue.set_capacity(1), Err(PipelineError::InvalidCapacity(1))));
        assert!(matches!(queue.set_capacity(0), Err(PipelineError::InvalidCapacity(0))));
        queue.set_capacity(2).unwrap();
        assert!(queue.is_full());
    }

    proptest! {
        #[test]
        fn prop_length_never_exceeds_capacity(
            capacity in 1usize..6,
            ops in proptest::collection::vec(any::<bool>(), 0..64),
        ) {
            let mut queue = InputQueue::new(capacity);
            for (i, push) in ops.into_iter().enumerate() {
                let len_before = queue.len();
                if push {
                    let accepted = queue.push(Value::object(i as i64)).is_ok();
                    prop_assert_eq!(accepted, len_before < capacity);
                } else {
                    queue.pop();
                }
                prop_assert!(queue.len() <= queue.capacity());
            }
        }
    }
}
