//! Run-request worker pool
//!
//! Workers pull run requests off a shared queue. Each worker retires after a
//! maximum lifetime and the pool spawns a replacement, so no single task
//! accumulates state forever. A run request that overruns its time budget is
//! abandoned and logged; the batch it dispatched keeps going on its own.

use std::{sync::Arc, time::Duration};

use lettermill_common::{Signal, internal};
use tokio::{
    sync::{Mutex, broadcast, mpsc},
    task::JoinSet,
    time::{Instant, timeout, timeout_at},
};
use tracing::{error, warn};

use crate::{
    engine::{Engine, RunRequest},
    error::Result,
};

enum WorkerExit {
    Retired(String),
    Shutdown(String),
}

type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<RunRequest>>>;

/// Run the pool until shutdown, replacing retired workers as they exit.
pub(crate) async fn serve(
    engine: Arc<Engine>,
    mut shutdown: broadcast::Receiver<Signal>,
) -> Result<()> {
    let queue: SharedQueue = Arc::new(Mutex::new(engine.take_run_receiver()?));

    let mut workers = JoinSet::new();
    let mut next_id = 0usize;
    for _ in 0..engine.config().worker_count.max(1) {
        spawn_worker(&mut workers, &engine, &queue, &shutdown, &mut next_id);
    }

    let mut draining = false;
    loop {
        tokio::select! {
            joined = workers.join_next() => match joined {
                None => break,
                Some(Ok(WorkerExit::Shutdown(name))) => {
                    internal!(level = DEBUG, "{name} observed shutdown");
                }
                Some(Ok(WorkerExit::Retired(name))) => {
                    internal!(level = DEBUG, "{name} retired at max lifetime");
                    if !draining {
                        spawn_worker(&mut workers, &engine, &queue, &shutdown, &mut next_id);
                    }
                }
                Some(Err(e)) => {
                    error!("worker task failed: {e}");
                    if !draining {
                        spawn_worker(&mut workers, &engine, &queue, &shutdown, &mut next_id);
                    }
                }
            },
            _ = shutdown.recv(), if !draining => {
                internal!("worker pool draining");
                draining = true;
            }
        }
    }

    internal!("worker pool stopped");
    Ok(())
}

fn spawn_worker(
    workers: &mut JoinSet<WorkerExit>,
    engine: &Arc<Engine>,
    queue: &SharedQueue,
    shutdown: &broadcast::Receiver<Signal>,
    next_id: &mut usize,
) {
    *next_id += 1;
    let name = format!("worker-{}-{next_id}", std::process::id());
    workers.spawn(worker_loop(
        Arc::clone(engine),
        Arc::clone(queue),
        shutdown.resubscribe(),
        name,
    ));
}

async fn worker_loop(
    engine: Arc<Engine>,
    queue: SharedQueue,
    mut shutdown: broadcast::Receiver<Signal>,
    name: String,
) -> WorkerExit {
    let retire_at =
        Instant::now() + Duration::from_secs(engine.config().worker_max_lifetime_secs.max(1));
    let budget = Duration::from_secs(engine.config().run_request_budget_secs.max(1));

    loop {
        let request = tokio::select! {
            _ = shutdown.recv() => return WorkerExit::Shutdown(name),
            received = timeout_at(retire_at, recv_next(&queue)) => match received {
                Err(_elapsed) => return WorkerExit::Retired(name),
                Ok(None) => return WorkerExit::Shutdown(name),
                Ok(Some(request)) => request,
            },
        };

        if timeout(
            budget,
            Arc::clone(&engine).handle_run_request(request, &name),
        )
        .await
        .is_err()
        {
            warn!(
                campaign = %request.campaign,
                "run request exceeded its {}s budget; abandoning",
                budget.as_secs()
            );
        }

        if Instant::now() >= retire_at {
            return WorkerExit::Retired(name);
        }
    }
}

/// Receive the next request. Only one worker holds the queue at a time; the
/// lock is released as soon as a request (or closure) is observed.
async fn recv_next(queue: &SharedQueue) -> Option<RunRequest> {
    queue.lock().await.recv().await
}
