//! Cooperative background tickers.
//!
//! One thread per concern, stoppable through a channel and joined on close.
//! No tick fires after `stop` returns.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

/// A named background thread running a closure on a fixed interval.
pub(crate) struct Ticker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawn a ticker. The closure runs once per interval until `stop`.
    pub fn spawn(name: &str, interval: Duration, mut tick: impl FnMut() + Send + 'static) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => tick(),
                    // Stop signal or owner dropped.
                    _ => break,
                }
            })
            .expect("spawn background ticker");
        Ticker { stop_tx, handle }
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            warn!(target: "tokmesh::engine", "background ticker panicked");
        }
    }
}
