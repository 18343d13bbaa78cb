use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use shopledger_core::OrganizationId;
use shopledger_events::{EventBus, OrganizationScoped, Subscription};

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Worker thread applying a handler to every message of one bus subscription.
///
/// The subscription is taken before the thread starts, so nothing published
/// after `spawn` returns is missed.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// - `organization_id`: when provided, messages for other organizations are ignored
    /// - `handler`: must be idempotent (at-least-once delivery)
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        organization_id: Option<OrganizationId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: OrganizationScoped + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, organization_id, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    organization_id: Option<OrganizationId>,
    handler: &mut H,
) where
    M: OrganizationScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if organization_id.is_some_and(|o| msg.organization_id() != o) {
                    continue;
                }

                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = ?err, "worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
