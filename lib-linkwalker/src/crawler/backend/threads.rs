//! OS-thread backend: N named worker threads, each owning a current-thread
//! runtime and an HTTP client, sharing the crawl state behind one mutex. The
//! mutex is never held across I/O.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use crate::error::Error;

use super::super::master::WorkerContext;
use super::super::state::{CrawlState, ItemReport};
use super::super::worker::CrawlWorker;

type Shared = Arc<(Mutex<CrawlState>, Condvar)>;

pub fn run(state: CrawlState, context: &WorkerContext) -> Result<CrawlState, Error> {
    let shared: Shared = Arc::new((Mutex::new(state), Condvar::new()));

    let handles = (0..context.config.workers)
        .map(|worker_id| {
            let shared = shared.clone();
            let worker = context.build_worker();
            thread::Builder::new()
                .name(format!("lw-wrk-{}", worker_id))
                .spawn(move || worker_loop(shared, worker))
                .expect("can always spawn")
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle
            .join()
            .map_err(|_| Error::WorkerPool("worker thread panicked".to_owned()))?;
    }

    let (mutex, _) = Arc::try_unwrap(shared)
        .map_err(|_| Error::WorkerPool("crawl state still shared after join".to_owned()))?;
    Ok(mutex.into_inner().unwrap_or_else(|poison| poison.into_inner()))
}

fn lock<'a>(mutex: &'a Mutex<CrawlState>) -> MutexGuard<'a, CrawlState> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn worker_loop(shared: Shared, worker: CrawlWorker) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("can always init runtime");

    log::debug!("worker started");

    let (mutex, condvar) = &*shared;
    let mut guard = lock(mutex);

    loop {
        if let Some(item) = guard.claim() {
            drop(guard);
            let outcome = runtime.block_on(worker.process(&item));

            guard = lock(mutex);
            guard.apply(ItemReport { item, outcome });
            // New work or the end of the crawl; either way the others need
            // a look.
            condvar.notify_all();
        } else if guard.busy() == 0 {
            condvar.notify_all();
            break;
        } else {
            guard = condvar
                .wait(guard)
                .unwrap_or_else(|poison| poison.into_inner());
        }
    }

    log::debug!("queue drained, worker stopping");
}
