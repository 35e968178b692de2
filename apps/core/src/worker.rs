use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Result handle for a job running on a short-lived worker thread.
pub struct Task<T> {
    name: String,
    receiver: Receiver<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TaskPoll<T> {
    Ready(T),
    Pending,
    /// The worker ended without sending a result (it panicked).
    Lost,
}

/// Runs `job` on a named thread and returns a handle the event loop can poll
/// without blocking.
pub fn dispatch<T, F>(name: &str, job: F) -> Result<Task<T>, std::io::Error>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    std::thread::Builder::new()
        .name(format!("starter-{name}"))
        .spawn(move || {
            let _ = sender.send(job());
        })?;
    log::debug!(target: "runtime", "dispatched worker {name}");

    Ok(Task {
        name: name.to_string(),
        receiver,
    })
}

impl<T> Task<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn poll(&self) -> TaskPoll<T> {
        match self.receiver.try_recv() {
            Ok(value) => TaskPoll::Ready(value),
            Err(TryRecvError::Empty) => TaskPoll::Pending,
            Err(TryRecvError::Disconnected) => TaskPoll::Lost,
        }
    }

    pub fn try_take(&self) -> Option<T> {
        match self.poll() {
            TaskPoll::Ready(value) => Some(value),
            TaskPoll::Pending | TaskPoll::Lost => None,
        }
    }

    /// Blocks for at most `timeout`.
    pub fn wait(self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!(target: "runtime", "worker {} ended without a result", self.name);
                None
            }
        }
    }
}
