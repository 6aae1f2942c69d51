//! Cooperative backend: one OS thread, N logical tasks multiplexed over
//! non-blocking I/O. The shared state needs no lock; tasks only touch it
//! between yield points, and no borrow ever crosses an await.

use futures::future;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::Notify;
use tokio::task::LocalSet;

use crate::error::Error;

use super::super::master::WorkerContext;
use super::super::state::{CrawlState, ItemReport};
use super::super::worker::CrawlWorker;

pub fn run(state: CrawlState, context: &WorkerContext) -> Result<CrawlState, Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();

    let shared = Rc::new(RefCell::new(state));
    let notify = Rc::new(Notify::new());
    // One HTTP client for the whole pool; the tasks all live on this thread.
    let worker = Rc::new(context.build_worker());

    local.block_on(&runtime, async {
        let tasks = (0..context.config.workers)
            .map(|_| task_loop(shared.clone(), notify.clone(), worker.clone()))
            .collect::<Vec<_>>();
        future::join_all(tasks).await;
    });

    let state = Rc::try_unwrap(shared)
        .map_err(|_| Error::WorkerPool("crawl state still shared after drain".to_owned()))?
        .into_inner();
    Ok(state)
}

async fn task_loop(shared: Rc<RefCell<CrawlState>>, notify: Rc<Notify>, worker: Rc<CrawlWorker>) {
    loop {
        let claimed = shared.borrow_mut().claim();

        if let Some(item) = claimed {
            let outcome = worker.process(&item).await;
            shared.borrow_mut().apply(ItemReport { item, outcome });
            notify.notify_waiters();
        } else if shared.borrow().busy() == 0 {
            notify.notify_waiters();
            break;
        } else {
            // Single-threaded: nothing can slip in between the check above
            // and this registration.
            notify.notified().await;
        }
    }
}
