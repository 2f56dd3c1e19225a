use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use tally_core::TenantId;
use tally_events::{EventBus, Subscription, TenantScoped};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to a running worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    processed: Arc<AtomicU64>,
}

impl WorkerHandle {
    /// Messages handed to the handler so far (successful or not).
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Stop the loop and wait for the thread to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Background loop feeding bus messages into a read-model handler.
///
/// The subscription is taken before the thread starts, so nothing published
/// after `spawn` returns is missed. Handler failures are logged and the loop
/// moves on; handlers must tolerate redelivery.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn the worker. With `tenant_id` set, other tenants' messages are skipped.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M>,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let subscription: Subscription<M> = bus.subscribe();
        let processed = Arc::new(AtomicU64::new(0));
        let counter = processed.clone();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                run(name, subscription, shutdown_rx, tenant_id, handler, &counter);
            })?;
        debug!(worker = name, "projection worker started");

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            processed,
        })
    }
}

fn run<M, H, E>(
    name: &'static str,
    subscription: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    mut handler: H,
    processed: &AtomicU64,
) where
    M: TenantScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(POLL_INTERVAL) {
            Ok(msg) => {
                if tenant_id.is_some_and(|t| msg.tenant_id() != t) {
                    continue;
                }
                let msg_tenant = msg.tenant_id();
                if let Err(err) = handler(msg) {
                    warn!(worker = name, tenant_id = %msg_tenant, error = %err, "projection handler failed");
                }
                processed.fetch_add(1, Ordering::Release);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "projection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    use tally_events::InMemoryEventBus;

    #[derive(Debug, Clone)]
    struct Msg {
        tenant_id: TenantId,
        value: u32,
    }

    impl TenantScoped for Msg {
        fn tenant_id(&self) -> TenantId {
            self.tenant_id
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn worker_applies_only_its_tenant_and_survives_failures() {
        let bus = InMemoryEventBus::<Msg>::new();
        let tenant_id = TenantId::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let handle = ProjectionWorker::spawn("test-worker", &bus, Some(tenant_id), move |msg: Msg| {
            if msg.value == 0 {
                return Err("zero is rejected".to_string());
            }
            sink.lock().unwrap().push(msg.value);
            Ok(())
        })
        .unwrap();

        for (tenant, value) in [(tenant_id, 1), (TenantId::new(), 2), (tenant_id, 0), (tenant_id, 3)] {
            bus.publish(Msg { tenant_id: tenant, value }).unwrap();
        }

        wait_until(|| handle.processed() >= 3);
        assert_eq!(handle.processed(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);

        handle.shutdown();
    }
}
