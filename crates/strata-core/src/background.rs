use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::panic::AssertUnwindSafe;
use std::thread::JoinHandle;
use std::time::Duration;

/// Upper bound on how long [`BackgroundLoop::stop`] waits for the worker by default.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A named worker thread that runs `tick` every `interval` until stopped.
///
/// The wait between ticks is a channel receive with a timeout, so [`stop`](Self::stop)
/// interrupts it immediately instead of waiting out the interval. A panicking tick is logged
/// and the loop keeps running.
#[derive(Debug)]
pub struct BackgroundLoop {
    name: String,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundLoop {
    pub fn spawn<F>(
        name: impl Into<String>,
        interval: Duration,
        mut tick: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if std::panic::catch_unwind(AssertUnwindSafe(&mut tick)).is_err() {
                        tracing::error!(
                            target: "strata.background",
                            thread = %thread_name,
                            "background tick panicked; continuing"
                        );
                    }
                }
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the worker and wait up to `timeout` for it to exit.
    ///
    /// Returns `false` when the worker did not finish in time; the thread is then detached.
    /// Calling `stop` again after it returned is a no-op that returns `true`.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(stop_tx) = self.stop_tx.take() else {
            return true;
        };
        let _ = stop_tx.try_send(());
        drop(stop_tx);

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    target: "strata.background",
                    thread = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "background loop did not stop in time; detaching"
                );
                self.handle.take();
                false
            }
        }
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        self.stop(DEFAULT_JOIN_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut worker = BackgroundLoop::spawn("test-ticker", Duration::from_millis(5), {
            let ticks = ticks.clone();
            move || {
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 3);

        assert!(worker.stop(Duration::from_secs(5)));
        assert!(!worker.is_running());
        let after_stop = ticks.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);

        // Idempotent.
        assert!(worker.stop(Duration::from_secs(1)));
    }

    #[test]
    fn stop_interrupts_long_interval() {
        let mut worker =
            BackgroundLoop::spawn("test-sleeper", Duration::from_secs(3600), || {}).unwrap();
        let start = Instant::now();
        assert!(worker.stop(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn panicking_tick_does_not_end_the_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut worker = BackgroundLoop::spawn("test-panicky", Duration::from_millis(2), {
            let ticks = ticks.clone();
            move || {
                let n = ticks.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("first tick fails");
                }
            }
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        assert!(worker.stop(Duration::from_secs(5)));
    }
}
