use log::error;
use tokio::sync::{
    mpsc::{self, error::TrySendError, Receiver, Sender},
    Mutex,
};

use crate::Task;

/// Bounded FIFO of tasks shared by every RPC handler.
///
/// A task sits in at most one pool at a time, so a capacity equal to the total
/// number of tasks means `push` never has to wait.
#[derive(Debug)]
pub struct TaskPool {
    tx: Sender<Task>,
    rx: Mutex<Receiver<Task>>,
}

impl TaskPool {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Append to the tail. Returns `false` if the pool is full.
    pub fn push(&self, task: Task) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(t)) => {
                error!("pool full, dropped {:?}", t);
                false
            }
            // We own `rx`, so the channel can't be closed while `self` is alive.
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Pop the head if one is ready and no other handler is waiting on this pool.
    pub fn try_pop(&self) -> Option<Task> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Wait for the head. Cancel safe.
    pub async fn pop(&self) -> Option<Task> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo() {
        let pool = TaskPool::new(3);
        for f in ["a", "b", "c"] {
            assert!(pool.push(Task::map(f)));
        }
        assert!(!pool.push(Task::map("d")));

        assert_eq!(pool.try_pop().unwrap().id, "a");
        assert_eq!(pool.pop().await.unwrap().id, "b");
        assert_eq!(pool.try_pop().unwrap().id, "c");
        assert!(pool.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let pool = std::sync::Arc::new(TaskPool::new(1));
        let p = pool.clone();
        let waiter = tokio::spawn(async move { p.pop().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.push(Task::reduce(0));
        let t = waiter.await.unwrap().unwrap();
        assert_eq!(t, Task::reduce(0));
    }
}
