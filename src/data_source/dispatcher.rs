use std::panic::{catch_unwind, AssertUnwindSafe};

use async_channel::{Receiver, Sender};

use crate::platform::runtime::spawn_detached;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serial delivery context for observer callbacks.
///
/// Jobs run one at a time on a single background task in the order they were
/// queued. The task ends once every handle to the dispatcher is gone.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    sender: Sender<Job>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded::<Job>();
        spawn_detached(drain(receiver));
        Self { sender }
    }

    pub(crate) fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.try_send(Box::new(job)).is_err() {
            log::debug!("callback dropped; delivery task is gone");
        }
    }

    /// Resolves once every job queued before this call has run.
    pub(crate) async fn flush(&self) {
        let (done, finished) = async_channel::bounded::<()>(1);
        self.dispatch(move || {
            let _ = done.try_send(());
        });
        let _ = finished.recv().await;
    }
}

async fn drain(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv().await {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!("observer callback panicked");
        }
    }
}
