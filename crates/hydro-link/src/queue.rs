//! FIFO of commands waiting for the worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use hydro_protocol::Command;

/// A command plus its delivery history.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    /// The command to write.
    pub command: Command,
    /// Link faults suffered while writing or reading for this command.
    pub attempts: u32,
    /// Times the worker put it back because the link was down.
    pub deferrals: u32,
    /// When it was first enqueued.
    pub enqueued_at: Instant,
}

impl QueuedCommand {
    /// Wrap a fresh command.
    pub fn new(command: Command) -> Self {
        QueuedCommand {
            command,
            attempts: 0,
            deferrals: 0,
            enqueued_at: Instant::now(),
        }
    }

    /// Time since first enqueued.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Unbounded multi-producer queue drained by the worker.
///
/// Both channel ends live here, so sends cannot fail. At most one fresh
/// sensor query waits at a time; further ones merge into it.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: Sender<QueuedCommand>,
    rx: Receiver<QueuedCommand>,
    pending_queries: Arc<AtomicUsize>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        CommandQueue {
            tx,
            rx,
            pending_queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append a fresh command; returns the depth afterwards.
    ///
    /// Returns `None` when the command is a sensor query and one is already
    /// waiting; the waiting one answers both.
    pub fn push(&self, command: Command) -> Option<usize> {
        if command.expects_reading()
            && self
                .pending_queries
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return None;
        }
        let _ = self.tx.send(QueuedCommand::new(command));
        Some(self.tx.len())
    }

    /// Append a command that has already been tried, keeping its history.
    ///
    /// It goes to the tail, behind anything enqueued meanwhile.
    pub fn requeue(&self, queued: QueuedCommand) -> usize {
        if queued.command.expects_reading() {
            self.pending_queries.fetch_add(1, Ordering::AcqRel);
        }
        let _ = self.tx.send(queued);
        self.tx.len()
    }

    /// Take the head, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueuedCommand> {
        match self.rx.recv_timeout(timeout) {
            Ok(queued) => Some(self.taken(queued)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take the head if there is one.
    pub fn try_pop(&self) -> Option<QueuedCommand> {
        self.rx.try_recv().ok().map(|queued| self.taken(queued))
    }

    fn taken(&self, queued: QueuedCommand) -> QueuedCommand {
        if queued.command.expects_reading() {
            self.pending_queries.fetch_sub(1, Ordering::AcqRel);
        }
        queued
    }

    /// Number of waiting commands.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp(action: &str, channel: &str) -> Command {
        Command::control("lamp", action, channel).unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new();
        assert_eq!(queue.push(lamp("on", "1")), Some(1));
        assert_eq!(queue.push(Command::QuerySensors), Some(2));
        assert_eq!(queue.push(lamp("off", "1")), Some(3));

        assert_eq!(queue.try_pop().unwrap().command, lamp("on", "1"));
        assert_eq!(queue.try_pop().unwrap().command, Command::QuerySensors);
        assert_eq!(queue.try_pop().unwrap().command, lamp("off", "1"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_goes_to_tail() {
        let queue = CommandQueue::new();
        queue.push(lamp("on", "1"));
        queue.push(lamp("on", "2"));

        let mut head = queue.try_pop().unwrap();
        head.deferrals += 1;
        queue.requeue(head);

        assert_eq!(queue.try_pop().unwrap().command, lamp("on", "2"));
        let again = queue.try_pop().unwrap();
        assert_eq!(again.command, lamp("on", "1"));
        assert_eq!(again.deferrals, 1);
    }

    #[test]
    fn test_sensor_queries_merge_while_waiting() {
        let queue = CommandQueue::new();
        assert_eq!(queue.push(Command::QuerySensors), Some(1));
        assert_eq!(queue.push(Command::QuerySensors), None);
        assert_eq!(queue.push(Command::raw("GET_SENSORS").unwrap()), None);
        assert_eq!(queue.push(lamp("on", "1")), Some(2));
        assert_eq!(queue.len(), 2);

        // Once taken, the next query is queued again.
        let query = queue.try_pop().unwrap();
        assert_eq!(queue.push(Command::QuerySensors), Some(2));

        // A requeued query keeps its place alongside the fresh one.
        queue.requeue(query);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.push(Command::QuerySensors), None);
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let queue = CommandQueue::new();
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_push_from_other_thread() {
        let queue = CommandQueue::new();
        let producer = queue.clone();
        std::thread::spawn(move || {
            producer.push(Command::QuerySensors);
        });

        let queued = queue.pop_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(queued.command, Command::QuerySensors);
        assert_eq!(queued.attempts, 0);
    }
}
