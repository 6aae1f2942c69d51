use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::counter::Counter;

const LOG_STATS_EVERY: Duration = Duration::from_secs(2);

/// Periodic progress line. Pure observer: reads the counters, mutates
/// nothing.
pub struct Reporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn spawn(counter: Arc<Counter>) -> Reporter {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name("lw-stats".to_owned())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    thread::sleep(LOG_STATS_EVERY);
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    log::info!(
                        "{} done ({} broken), {} in flight, {:.1}MB downloaded",
                        counter.n_closed(),
                        counter.n_error(),
                        counter.n_active(),
                        counter.n_downloaded() as f64 / 1e6,
                    );
                }
            })
            .expect("can always spawn");

        Reporter {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}
