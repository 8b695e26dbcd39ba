//! Countdown against the server-issued remaining time.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::SessionTimings;
use crate::sync::lock;

/// Injected sleep source, so tests can run on paused time.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// `Timer` backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Result of advancing or correcting a countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running(u32),
    /// Zero was reached. Reported once per countdown.
    Expired,
    /// Already expired earlier.
    Stopped,
}

/// Locally ticked remaining time, never above the last server value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
    ceiling: u32,
    fired: bool,
}

impl Countdown {
    #[must_use]
    pub fn new(server_remaining: u32) -> Self {
        Self {
            remaining: server_remaining,
            ceiling: server_remaining,
            fired: false,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.fired
    }

    pub fn tick(&mut self) -> Tick {
        if self.fired {
            return Tick::Stopped;
        }
        self.remaining = self.remaining.saturating_sub(1);
        self.settle()
    }

    /// Adopt the server's value, capped at the previous server value.
    pub fn resync(&mut self, server_remaining: u32) -> Tick {
        if self.fired {
            return Tick::Stopped;
        }
        let adopted = server_remaining.min(self.ceiling);
        self.ceiling = adopted;
        self.remaining = adopted;
        self.settle()
    }

    /// Report a countdown that was seeded at zero.
    pub fn poll(&mut self) -> Tick {
        if self.fired {
            return Tick::Stopped;
        }
        self.settle()
    }

    fn settle(&mut self) -> Tick {
        if self.remaining == 0 {
            self.fired = true;
            Tick::Expired
        } else {
            Tick::Running(self.remaining)
        }
    }
}

/// Callbacks from the countdown tasks into the attempt controller.
#[async_trait]
pub trait TimerListener: Send + Sync {
    /// Fetch the authoritative remaining time. `None` skips this round.
    async fn resync(&self) -> Option<u32>;

    /// The countdown reached zero.
    async fn expired(&self);
}

/// Drives the tick and resync loops of the active attempt.
pub struct TimerService {
    timer: Arc<dyn Timer>,
    timings: SessionTimings,
    remaining: watch::Sender<Option<u32>>,
}

impl TimerService {
    #[must_use]
    pub fn new(timer: Arc<dyn Timer>, timings: SessionTimings) -> Self {
        let (remaining, _) = watch::channel(None);
        Self {
            timer,
            timings,
            remaining,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        *self.remaining.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<u32>> {
        self.remaining.subscribe()
    }

    /// Seed a new countdown and spawn its loops. Both stop when `cancel` fires.
    pub fn start(
        &self,
        server_remaining: u32,
        listener: Weak<dyn TimerListener>,
        cancel: CancellationToken,
    ) {
        let countdown = Arc::new(Mutex::new(Countdown::new(server_remaining)));
        self.remaining.send_replace(Some(server_remaining));

        tokio::spawn(tick_loop(
            Arc::clone(&self.timer),
            self.timings.tick_interval,
            Arc::clone(&countdown),
            self.remaining.clone(),
            listener.clone(),
            cancel.clone(),
        ));
        tokio::spawn(resync_loop(
            Arc::clone(&self.timer),
            self.timings.resync_period,
            countdown,
            self.remaining.clone(),
            listener,
            cancel,
        ));
    }
}

async fn tick_loop(
    timer: Arc<dyn Timer>,
    period: Duration,
    countdown: Arc<Mutex<Countdown>>,
    remaining: watch::Sender<Option<u32>>,
    listener: Weak<dyn TimerListener>,
    cancel: CancellationToken,
) {
    let mut step = lock(&countdown).poll();
    loop {
        match step {
            Tick::Running(_) => {}
            Tick::Expired => {
                remaining.send_replace(Some(0));
                fire_expired(&listener, &cancel).await;
                return;
            }
            Tick::Stopped => return,
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = timer.sleep(period) => {}
        }

        step = lock(&countdown).tick();
        if let Tick::Running(left) = step {
            remaining.send_replace(Some(left));
        }
    }
}

async fn resync_loop(
    timer: Arc<dyn Timer>,
    period: Duration,
    countdown: Arc<Mutex<Countdown>>,
    remaining: watch::Sender<Option<u32>>,
    listener: Weak<dyn TimerListener>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = timer.sleep(period) => {}
        }

        let Some(target) = listener.upgrade() else {
            return;
        };
        let server_remaining = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            value = target.resync() => value,
        };
        drop(target);
        let Some(server_remaining) = server_remaining else {
            continue;
        };

        let step = lock(&countdown).resync(server_remaining);
        match step {
            Tick::Running(left) => {
                tracing::debug!(remaining = left, "countdown resynced");
                remaining.send_replace(Some(left));
            }
            Tick::Expired => {
                remaining.send_replace(Some(0));
                fire_expired(&listener, &cancel).await;
                return;
            }
            Tick::Stopped => return,
        }
    }
}

async fn fire_expired(listener: &Weak<dyn TimerListener>, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    if let Some(target) = listener.upgrade() {
        tracing::info!("countdown reached zero");
        target.expired().await;
    }
}
