use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use stockflow_events::{EventBus, Subscription};

use super::WorkerHandle;

/// Generic projection worker loop.
///
/// - Subscribes to an event bus
/// - Applies an idempotent handler for each message
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn a worker thread that processes events from the bus subscription.
    ///
    /// `handler` must be idempotent (at-least-once delivery safe). The
    /// subscription is taken before the thread starts, so nothing published
    /// after this call returns is missed.
    pub fn spawn<M, B, H, E>(name: &'static str, bus: B, mut handler: H) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M> + Send + Sync + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &mut handler))?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);
    debug!(worker = name, "projection worker started");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = ?err, "projection worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "projection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use stockflow_events::InMemoryEventBus;

    #[test]
    fn handler_sees_published_messages_and_shutdown_joins() {
        let bus = Arc::new(InMemoryEventBus::<u32>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let handle = ProjectionWorker::spawn("test-worker", bus.clone(), move |m: u32| {
            sink.lock().unwrap().push(m);
            Ok::<(), ()>(())
        })
        .unwrap();

        bus.publish(1).unwrap();
        bus.publish(2).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn handler_errors_do_not_stop_the_worker() {
        let bus = Arc::new(InMemoryEventBus::<u32>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let handle = ProjectionWorker::spawn("failing-worker", bus.clone(), move |m: u32| {
            sink.lock().unwrap().push(m);
            if m == 1 { Err("boom") } else { Ok(()) }
        })
        .unwrap();

        bus.publish(1).unwrap();
        bus.publish(2).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
