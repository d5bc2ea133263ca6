use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A job run on a fixed interval by a dedicated thread until it is cancelled.
///
/// The thread waits on a channel with `recv_timeout(interval)`: a timeout runs the job, while a
/// cancel message or a dropped `PeriodicTask` stops the loop.
pub struct PeriodicTask {
    name: String,
    cancel: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &str, interval: Duration, mut job: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (cancel, rx) = channel();
        let task_name = name.to_string();
        let handle = thread::spawn(move || {
            loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => job(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("Stopped periodic task {}", task_name);
        });
        PeriodicTask {
            name: name.to_string(),
            cancel,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the task and waits for the running iteration, if any, to finish.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.cancel.send(()).is_err() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Periodic task {} panicked", self.name);
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        // signal only, `cancel` is the joining variant
        let _ = self.cancel.send(());
    }
}
