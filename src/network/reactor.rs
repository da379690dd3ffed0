//! Reactor
//!
//! One current-thread tokio runtime driven by one dedicated OS thread.
//! Every socket operation a client or server performs runs on that thread;
//! other threads hand work over through the runtime [`Handle`].

use std::future::Future;
use std::thread::JoinHandle;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

use crate::error::{LinkError, Result};

/// Event loop owned by a [`Client`](crate::Client) or [`Server`](crate::Server)
pub struct Reactor {
    /// Handle used to post tasks onto the loop
    handle: Handle,

    /// Fired to make the driving thread leave the loop
    shutdown: Option<oneshot::Sender<()>>,

    /// The driving thread
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Build the runtime and start its driving thread
    pub fn start(thread_name: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LinkError::Setup(format!("Failed to build reactor: {}", e)))?;
        let handle = runtime.handle().clone();
        let (shutdown, stopped) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                tracing::debug!("Reactor thread running");
                runtime.block_on(async {
                    let _ = stopped.await;
                });
                // Dropping the runtime cancels every task still parked on it,
                // which releases their sockets.
                drop(runtime);
                tracing::debug!("Reactor thread exiting");
            })
            .map_err(|e| LinkError::Setup(format!("Failed to spawn reactor thread: {}", e)))?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    /// Handle for posting work onto the reactor
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Post a task to run on the reactor thread
    pub fn post<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(task);
    }

    /// Stop the loop and join the driving thread. Idempotent.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Reactor thread panicked");
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}
