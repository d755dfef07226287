//! Lock-free command intake with deterministic drain ordering.
//!
//! Uses crossbeam-channel for MPSC handoff from connection handlers and AI
//! feedback into the session tick loop. Only the tick loop ever touches the
//! pending heap, so enqueues racing a drain cannot corrupt ordering: a
//! command is either in the channel or in the heap, never both.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};

use crate::game::command::Command;

/// Wrapper giving `BinaryHeap` min-heap behavior over the ordering key.
#[derive(Debug)]
struct Pending(Command);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.0.ordering_key() == other.0.ordering_key()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest key first.
        other.0.ordering_key().cmp(&self.0.ordering_key())
    }
}

/// Deterministic command queue for a single session.
///
/// Producers enqueue through cloned [`CommandSender`] handles; the session
/// tick loop is the only consumer and calls [`CommandQueue::drain`] once per
/// tick. Commands tagged for a future tick stay queued.
pub struct CommandQueue {
    sender: Sender<Command>,
    receiver: Receiver<Command>,
    pending: BinaryHeap<Pending>,
}

impl CommandQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            pending: BinaryHeap::new(),
        }
    }

    /// New producer handle for a connection or AI feedback path.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Enqueue directly (tick-loop-local producers and tests).
    pub fn enqueue(&self, command: Command) {
        // Unbounded channel: send only fails if the receiver is gone, and
        // the queue owns its receiver.
        let _ = self.sender.send(command);
    }

    /// Remove and return every command with `session_tick <= tick`, sorted
    /// by the deterministic ordering key. Later-tick commands remain queued.
    pub fn drain(&mut self, tick: u64) -> Vec<Command> {
        // Pull everything handed off since the last drain into the heap.
        for command in self.receiver.try_iter() {
            self.pending.push(Pending(command));
        }

        let mut drained = Vec::new();
        while let Some(next) = self.pending.peek() {
            if next.0.session_tick > tick {
                break;
            }
            // Unwrap is fine: peek just succeeded.
            drained.push(self.pending.pop().map(|p| p.0).unwrap());
        }
        drained
    }

    /// Number of commands currently held (handed off but not yet drained
    /// commands still in the channel are not counted).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop everything without applying it (session teardown).
    pub fn clear(&mut self) {
        for _ in self.receiver.try_iter() {}
        self.pending.clear();
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Clonable producer handle for connection handlers and AI feedback.
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<Command>,
}

impl CommandSender {
    /// Hand a command off to the owning session (non-blocking).
    pub fn send(&self, command: Command) -> Result<(), CommandQueueError> {
        self.sender.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => CommandQueueError::Full,
            TrySendError::Disconnected(_) => CommandQueueError::Disconnected,
        })
    }
}

/// Command queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandQueueError {
    #[error("command queue is full")]
    Full,
    #[error("session is gone")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::command::CommandPayload;
    use crate::util::vec2::Vec2;
    use uuid::Uuid;

    fn cmd(player: Uuid, tick: u64, at: u64) -> Command {
        Command::with_timestamp(
            player,
            tick,
            CommandPayload::Move {
                unit_ids: vec![1],
                position: Vec2::new(1.0, 1.0),
            },
            at,
        )
    }

    #[test]
    fn test_drain_sorts_by_ordering_key() {
        let mut queue = CommandQueue::new();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);

        // Inserted deliberately out of order.
        queue.enqueue(cmd(b, 3, 50));
        queue.enqueue(cmd(a, 1, 200));
        queue.enqueue(cmd(a, 3, 50));
        queue.enqueue(cmd(b, 2, 10));

        let drained = queue.drain(10);
        let keys: Vec<_> = drained.iter().map(|c| c.ordering_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(drained.len(), 4);
        assert_eq!(drained[0].session_tick, 1);
        // Equal (tick, timestamp): lower player id first.
        assert_eq!(drained[2].source_player, a);
        assert_eq!(drained[3].source_player, b);
    }

    #[test]
    fn test_future_commands_stay_queued() {
        let mut queue = CommandQueue::new();
        let player = Uuid::new_v4();

        queue.enqueue(cmd(player, 5, 1));
        queue.enqueue(cmd(player, 20, 2));

        let drained = queue.drain(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].session_tick, 5);
        assert_eq!(queue.pending_len(), 1);

        let later = queue.drain(20);
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].session_tick, 20);
    }

    #[test]
    fn test_no_loss_no_duplication_across_ticks() {
        let mut queue = CommandQueue::new();
        let player = Uuid::from_u128(7);

        for tick in 0..50u64 {
            queue.enqueue(cmd(player, tick % 10, tick));
        }

        let mut seen = Vec::new();
        for tick in 0..10u64 {
            for c in queue.drain(tick) {
                assert!(c.session_tick <= tick);
                seen.push(c.enqueued_at_micros);
            }
        }

        seen.sort();
        let expected: Vec<u64> = (0..50).collect();
        assert_eq!(seen, expected);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_drain_is_deterministic_for_fixed_tuples() {
        let players: Vec<Uuid> = (0..5).map(Uuid::from_u128).collect();
        let mut reference: Option<Vec<(u64, u64, Uuid)>> = None;

        // Same tuple set in several shuffled insertion orders.
        for rotation in 0..5 {
            let mut queue = CommandQueue::new();
            let mut tuples = Vec::new();
            for (i, player) in players.iter().enumerate() {
                for tick in 0..4u64 {
                    tuples.push((*player, tick, (i as u64 * 13 + tick) % 7));
                }
            }
            tuples.rotate_left(rotation * 3);
            for (player, tick, at) in tuples {
                queue.enqueue(cmd(player, tick, at));
            }

            let keys: Vec<_> = queue.drain(10).iter().map(|c| c.ordering_key()).collect();
            match &reference {
                None => reference = Some(keys),
                Some(expected) => assert_eq!(&keys, expected),
            }
        }
    }

    #[test]
    fn test_concurrent_senders() {
        let mut queue = CommandQueue::new();
        let sender = queue.sender();

        let handles: Vec<_> = (0..4u128)
            .map(|i| {
                let tx = sender.clone();
                std::thread::spawn(move || {
                    for j in 0..25u64 {
                        tx.send(cmd(Uuid::from_u128(i), 0, j)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.drain(0).len(), 100);
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut queue = CommandQueue::new();
        let player = Uuid::new_v4();
        queue.enqueue(cmd(player, 1, 1));
        let _ = queue.drain(0); // moves tick-1 command into the heap
        queue.enqueue(cmd(player, 2, 2));

        queue.clear();
        assert!(queue.drain(100).is_empty());
    }
}
