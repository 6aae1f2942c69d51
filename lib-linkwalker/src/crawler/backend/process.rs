//! Process backend: the coordinator keeps the queue and the model to itself
//! and serves them over a loopback RPC channel; N child processes (this same
//! executable, re-entered through a hidden flag) connect, pull items, fetch
//! and parse, and send the results back as messages. No memory is shared
//! across processes.

use futures::prelude::*;
use serde_derive::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tarpc::{context::Context, server::Channel, service};
use tokio::process::Command;
use tokio::sync::{Mutex, Notify};
use tokio::time;

use crate::config::CrawlConfig;
use crate::error::Error;

use super::super::boundaries::Boundaries;
use super::super::master::{Capabilities, DefaultCapabilities, WorkerContext};
use super::super::state::{CrawlState, ItemReport, WorkItem};
use super::super::worker::CrawlWorker;

/// Bounded long-poll; workers come back for more on `Retry`.
const POLL_WAIT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: usize = 128;

#[derive(Debug, Serialize, Deserialize)]
pub enum NextItem {
    Work(WorkItem),
    /// Nothing right now; ask again.
    Retry,
    /// Queue drained and nobody busy; drain and exit.
    Shutdown,
}

#[service]
pub trait CrawlIpc {
    /// The full crawl configuration; workers rebuild their downloader and
    /// parser from it.
    async fn configuration() -> CrawlConfig;
    async fn next_item() -> NextItem;
    async fn submit(report: ItemReport);
}

struct IpcInner {
    state: Mutex<CrawlState>,
    work_ready: Notify,
    done: Notify,
}

#[derive(Clone)]
struct CrawlIpcServer {
    inner: Arc<IpcInner>,
    config: Arc<CrawlConfig>,
}

impl CrawlIpc for CrawlIpcServer {
    type ConfigurationFut = Pin<Box<dyn Send + Future<Output = CrawlConfig>>>;
    type NextItemFut = Pin<Box<dyn Send + Future<Output = NextItem>>>;
    type SubmitFut = Pin<Box<dyn Send + Future<Output = ()>>>;

    fn configuration(self, _: Context) -> Self::ConfigurationFut {
        Box::pin(async move { (*self.config).clone() })
    }

    fn next_item(self, _: Context) -> Self::NextItemFut {
        Box::pin(async move {
            {
                let mut state = self.inner.state.lock().await;
                if let Some(item) = state.claim() {
                    return NextItem::Work(item);
                }
                if state.is_done() {
                    self.inner.done.notify_waiters();
                    return NextItem::Shutdown;
                }
            }

            // Others are still busy and might discover work; wait a little
            // before sending the worker around again.
            time::timeout(POLL_WAIT, self.inner.work_ready.notified())
                .await
                .ok();
            NextItem::Retry
        })
    }

    fn submit(self, _: Context, report: ItemReport) -> Self::SubmitFut {
        Box::pin(async move {
            let mut state = self.inner.state.lock().await;
            state.apply(report);

            if state.is_done() {
                self.inner.done.notify_waiters();
            } else if state.queued() > 0 {
                self.inner.work_ready.notify_waiters();
            }
        })
    }
}

pub fn run(state: CrawlState, context: &WorkerContext) -> Result<CrawlState, Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(master(state, context))
}

async fn master(state: CrawlState, context: &WorkerContext) -> Result<CrawlState, Error> {
    let listener = tarpc::serde_transport::tcp::listen(
        ("127.0.0.1", 0),
        tarpc::tokio_serde::formats::Json::default,
    )
    .await
    .map_err(|err| Error::Ipc(format!("cannot open work channel: {}", err)))?;
    let addr = listener.local_addr();

    log::debug!("work channel at {}", addr);

    let inner = Arc::new(IpcInner {
        state: Mutex::new(state),
        work_ready: Notify::new(),
        done: Notify::new(),
    });

    let server = CrawlIpcServer {
        inner: inner.clone(),
        config: context.config.clone(),
    };
    let server_task = tokio::spawn(async move {
        listener
            // Ignore accept errors.
            .filter_map(|r| future::ready(r.ok()))
            .map(tarpc::server::BaseChannel::with_defaults)
            .map(move |channel| {
                let server = server.clone();
                channel.execute(server.serve())
            })
            .buffer_unordered(MAX_CONNECTIONS)
            .for_each(|_| async {})
            .await;
    });

    let mut children = spawn_worker_processes(context.config.workers, addr)?;

    // Wait out the crawl, keeping an eye on the brood.
    loop {
        {
            let state = inner.state.lock().await;
            if state.is_done() {
                break;
            }
        }

        tokio::select! {
            _ = inner.done.notified() => {}
            _ = time::sleep(Duration::from_millis(500)) => {
                for (worker_id, child) in children.iter_mut().enumerate() {
                    if let Some(status) = child.try_wait()? {
                        return Err(Error::Ipc(format!(
                            "worker process {} exited prematurely: {}",
                            worker_id, status
                        )));
                    }
                }
            }
        }
    }

    // Every worker's next pull answers `Shutdown`; give them a moment.
    for mut child in children {
        match time::timeout(Duration::from_secs(10), child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => log::warn!("failed to reap worker process: {}", err),
            Err(_) => {
                log::warn!("worker process did not exit in time; killing");
                child.kill().await.ok();
            }
        }
    }

    server_task.abort();
    server_task.await.ok();

    let inner = Arc::try_unwrap(inner)
        .map_err(|_| Error::Ipc("ipc state still shared after shutdown".to_owned()))?;
    Ok(inner.state.into_inner())
}

fn spawn_worker_processes(
    workers: usize,
    addr: SocketAddr,
) -> Result<Vec<tokio::process::Child>, Error> {
    let exe = std::env::current_exe()?;

    (0..workers)
        .map(|worker_id| {
            Command::new(&exe)
                .arg("--ipc-worker")
                .arg(addr.to_string())
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| {
                    Error::Ipc(format!("failed to spawn worker process {}: {}", worker_id, err))
                })
        })
        .collect()
}

/// Entry point of a worker process. The embedding binary routes its hidden
/// `--ipc-worker <addr>` flag here.
pub fn run_ipc_worker(addr: SocketAddr) -> Result<(), Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let transport = tarpc::serde_transport::tcp::connect(
            addr,
            tarpc::tokio_serde::formats::Json::default,
        )
        .await
        .map_err(|err| Error::Ipc(format!("cannot reach coordinator: {}", err)))?;
        let client = CrawlIpcClient::new(tarpc::client::Config::default(), transport).spawn();

        let config: Arc<CrawlConfig> = Arc::new(
            client
                .configuration(rpc_context())
                .await
                .map_err(|err| Error::Ipc(err.to_string()))?,
        );

        // Stateless apart from the HTTP connection pool: the policy and the
        // capabilities are rebuilt from the configuration.
        let (boundaries, _) = Boundaries::from_config(&config)?;
        let auth_hosts = boundaries.in_scope_hosts();
        let worker = CrawlWorker::new(
            config.clone(),
            DefaultCapabilities.downloader(&config, &auth_hosts),
            DefaultCapabilities.parser(&config),
        );

        log::debug!("worker process attached to {}", addr);

        loop {
            let next = client
                .next_item(rpc_context())
                .await
                .map_err(|err| Error::Ipc(err.to_string()))?;

            match next {
                NextItem::Work(item) => {
                    let outcome = worker.process(&item).await;
                    client
                        .submit(rpc_context(), ItemReport { item, outcome })
                        .await
                        .map_err(|err| Error::Ipc(err.to_string()))?;
                }
                NextItem::Retry => continue,
                NextItem::Shutdown => break,
            }
        }

        log::debug!("coordinator is done; worker process stopping");
        Ok(())
    })
}

fn rpc_context() -> Context {
    let mut ctx = tarpc::context::current();
    // Comfortably above the long-poll wait and any single fetch.
    ctx.deadline = SystemTime::now() + Duration::from_secs(120);
    ctx
}
