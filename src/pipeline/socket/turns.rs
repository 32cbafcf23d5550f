//! Emission turn queue.
//!
//! When several worker threads send through one output, values must leave
//! in the order the rounds were scheduled. Each scheduled round registers a
//! turn for its worker thread; values sent by a thread are buffered in that
//! thread's turn and released only when every earlier turn has finished.
//! Values from threads without a turn (control tags sent by the scheduling
//! thread) are ordered after every turn registered so far.

use crate::pipeline::value::Value;
use std::collections::VecDeque;
use std::thread::ThreadId;

struct Turn {
    /// `None` for values sent by unregistered threads.
    thread: Option<ThreadId>,
    finished: bool,
    pending: VecDeque<Value>,
}

#[derive(Default)]
pub(crate) struct EmissionTurns {
    turns: VecDeque<Turn>,
}

impl EmissionTurns {
    /// Reserve the next turn for `thread`.
    pub fn register(&mut self, thread: ThreadId) {
        self.turns.push_back(Turn {
            thread: Some(thread),
            finished: false,
            pending: VecDeque::new(),
        });
    }

    /// Buffer a value sent by `thread`.
    pub fn push(&mut self, thread: ThreadId, value: Value) {
        if let Some(turn) = self
            .turns
            .iter_mut()
            .rev()
            .find(|t| t.thread == Some(thread) && !t.finished)
        {
            turn.pending.push_back(value);
            return;
        }
        match self.turns.back_mut() {
            Some(turn) if turn.thread.is_none() => turn.pending.push_back(value),
            _ => self.turns.push_back(Turn {
                thread: None,
                finished: true,
                pending: VecDeque::from([value]),
            }),
        }
    }

    /// Values `thread` has buffered while an unfinished earlier turn holds them back.
    pub fn held_back(&self, thread: ThreadId) -> usize {
        let Some(index) = self
            .turns
            .iter()
            .position(|t| t.thread == Some(thread) && !t.finished)
        else {
            return 0;
        };
        if self.turns.iter().take(index).all(|t| t.finished) {
            return 0;
        }
        self.turns[index].pending.len()
    }

    /// Mark the oldest open turn of `thread` as complete.
    pub fn finish(&mut self, thread: ThreadId) {
        if let Some(turn) = self
            .turns
            .iter_mut()
            .find(|t| t.thread == Some(thread) && !t.finished)
        {
            turn.finished = true;
        }
    }

    /// Next value that may leave the socket, dropping completed turns.
    pub fn next(&mut self) -> Option<Value> {
        loop {
            let head = self.turns.front_mut()?;
            if let Some(value) = head.pending.pop_front() {
                return Some(value);
            }
            if !head.finished {
                return None;
            }
            self.turns.pop_front();
        }
    }

    pub fn has_deliverable(&self) -> bool {
        for turn in &self.turns {
            if !turn.pending.is_empty() {
                return true;
            }
            if !turn.finished {
                return false;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_thread_id() -> ThreadId {
        std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap()
    }

    fn drain(turns: &mut EmissionTurns) -> Vec<i64> {
        let mut out = Vec::new();
        while let Some(v) = turns.next() {
            out.push(*v.downcast_ref::<i64>().unwrap());
        }
        out
    }

    #[test]
    fn test_later_turn_waits_for_earlier() {
        let (w1, w2) = (spawn_thread_id(), spawn_thread_id());
        let mut turns = EmissionTurns::default();
        turns.register(w1);
        turns.register(w2);

        // Second round completes first.
        turns.push(w2, Value::object(20i64));
        turns.finish(w2);
        assert!(drain(&mut turns).is_empty());
        assert!(!turns.has_deliverable());

        turns.push(w1, Value::object(10i64));
        assert_eq!(drain(&mut turns), vec![10]);
        turns.push(w1, Value::object(11i64));
        turns.finish(w1);
        assert_eq!(drain(&mut turns), vec![11, 20]);
        assert!(turns.is_empty());
    }

    #[test]
    fn test_held_back_counts_only_blocked_turns() {
        let (w1, w2) = (spawn_thread_id(), spawn_thread_id());
        let mut turns = EmissionTurns::default();
        turns.register(w1);
        turns.register(w2);
        turns.push(w1, Value::object(1i64));
        turns.push(w2, Value::object(2i64));
        turns.push(w2, Value::object(3i64));
        assert_eq!(turns.held_back(w1), 0);
        assert_eq!(turns.held_back(w2), 2);

        turns.finish(w1);
        assert_eq!(turns.held_back(w2), 0);
    }

    #[test]
    fn test_unregistered_values_follow_registered_turns() {
        let w1 = spawn_thread_id();
        let scheduler = spawn_thread_id();
        let mut turns = EmissionTurns::default();
        turns.register(w1);
        turns.push(scheduler, Value::Stop);
        assert!(turns.next().is_none());

        turns.push(w1, Value::object(1i64));
        turns.finish(w1);
        assert_eq!(turns.next().and_then(|v| v.downcast_ref::<i64>().copied()), Some(1));
        assert!(matches!(turns.next(), Some(Value::Stop)));
        assert!(turns.next().is_none());
    }

    #[test]
    fn test_same_thread_reused_for_later_round() {
        let (w1, w2) = (spawn_thread_id(), spawn_thread_id());
        let mut turns = EmissionTurns::default();
        turns.register(w1);
        turns.register(w2);
        turns.push(w1, Value::object(1i64));
        turns.finish(w1);
        turns.register(w1);
        turns.push(w1, Value::object(3i64));
        turns.finish(w1);
        turns.push(w2, Value::object(2i64));
        turns.finish(w2);
        assert_eq!(drain(&mut turns), vec![1, 2, 3]);
    }
}
