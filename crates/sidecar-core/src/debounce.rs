use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Trailing debounce state driven by the caller's clock. Used inside the host
/// loop where a thread per timer would be wasteful.
#[derive(Debug, Clone, Copy)]
pub struct Debounce {
    window: Duration,
    due: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self { window, due: None }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn poke(&mut self, now: Instant) {
        self.due = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.due.is_some()
    }

    pub fn cancel(&mut self) {
        self.due = None;
    }

    /// Returns true exactly once per quiet window that has fully elapsed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if now >= due => {
                self.due = None;
                true
            }
            _ => false,
        }
    }

    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.due.map(|due| due.saturating_duration_since(now))
    }
}

enum Msg<T> {
    Value(T),
    Stop,
}

/// Trailing debouncer on its own thread: every `trigger` resets the timer and
/// replaces the pending value; the sink sees the last value once the window
/// stays quiet. Dropping the handle stops the thread without emitting.
pub struct Debouncer<T: Send + 'static> {
    tx: Option<Sender<Msg<T>>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn spawn<F>(name: &str, window: Duration, mut sink: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Msg<T>>();
        let thread_name = format!("debounce-{name}");
        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut pending: Option<(T, Instant)> = None;
                loop {
                    let received = match &pending {
                        Some((_, due)) => {
                            let wait = due.saturating_duration_since(Instant::now());
                            rx.recv_timeout(wait)
                        }
                        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };
                    match received {
                        Ok(Msg::Value(value)) => {
                            pending = Some((value, Instant::now() + window));
                        }
                        Ok(Msg::Stop) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if let Some((value, _)) = pending.take() {
                                sink(value);
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(thread = %thread_name, "debouncer stopped");
            })
            .ok();

        Self {
            tx: Some(tx),
            worker,
        }
    }

    pub fn trigger(&self, value: T) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Msg::Value(value)).is_ok(),
            None => false,
        }
    }

    /// A cloneable handle for producers living on other threads.
    pub fn trigger_handle(&self) -> Option<DebounceTrigger<T>> {
        self.tx.as_ref().map(|tx| DebounceTrigger { tx: tx.clone() })
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.tx.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Msg::Stop);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

pub struct DebounceTrigger<T> {
    tx: Sender<Msg<T>>,
}

impl<T> Clone for DebounceTrigger<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> DebounceTrigger<T> {
    pub fn trigger(&self, value: T) -> bool {
        self.tx.send(Msg::Value(value)).is_ok()
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn debounce_fires_once_after_quiet_window() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(100));
        debounce.poke(start);
        debounce.poke(start + Duration::from_millis(50));

        assert!(!debounce.fire_if_due(start + Duration::from_millis(120)));
        assert!(debounce.fire_if_due(start + Duration::from_millis(150)));
        assert!(!debounce.fire_if_due(start + Duration::from_millis(400)));
        assert!(!debounce.is_pending());
    }

    #[test]
    fn debouncer_coalesces_burst_into_last_value() {
        let (tx, rx) = channel();
        let debouncer = Debouncer::spawn("test", Duration::from_millis(100), move |value: u32| {
            let _ = tx.send((value, Instant::now()));
        });

        for value in 0..49 {
            assert!(debouncer.trigger(value));
        }
        let last_trigger = Instant::now();
        assert!(debouncer.trigger(49));

        let (value, fired_at) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("debounced value");
        assert_eq!(value, 49);
        assert!(fired_at.duration_since(last_trigger) >= Duration::from_millis(100));
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn stopping_discards_pending_value() {
        let (tx, rx) = channel();
        let mut debouncer = Debouncer::spawn("stop", Duration::from_millis(200), move |value: u32| {
            let _ = tx.send(value);
        });
        debouncer.trigger(1);
        debouncer.stop();
        assert!(!debouncer.trigger(2));
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }
}
