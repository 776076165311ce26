//! Bounded-concurrency gate with a per-slot minimum interval.
//!
//! `RateLimiter::new(limit, window)` lets at most `limit` holders run at once.
//! With a non-zero `window`, a slot freed at time `t` is not reused before
//! `t + window`, which caps throughput at roughly `limit` operations per
//! `window`. `RateLimiter::new(1, Duration::ZERO)` is a plain async mutex.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Hand-off message: `Some(generation)` transfers a counted slot, `None`
/// wakes the waiter without one (see [`RateLimiter::release_all`]).
type Waiter = oneshot::Sender<Option<u64>>;

#[derive(Default)]
struct State {
    active: usize,
    pending: VecDeque<Waiter>,
    completions: VecDeque<Instant>,
    disabled: bool,
    generation: u64,
}

struct Inner {
    limit: usize,
    window: Duration,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Async counting semaphore with optional minimum-interval semantics.
///
/// Cloning yields another handle to the same limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("RateLimiter")
            .field("limit", &self.inner.limit)
            .field("window", &self.inner.window)
            .field("active", &state.active)
            .field("pending", &state.pending.len())
            .field("disabled", &state.disabled)
            .finish()
    }
}

/// A held slot. Dropping it releases the slot.
#[must_use = "the slot is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct RatePermit {
    slot: Option<(RateLimiter, u64)>,
}

impl RatePermit {
    fn counted(limiter: &RateLimiter, generation: u64) -> Self {
        Self {
            slot: Some((limiter.clone(), generation)),
        }
    }

    fn uncounted() -> Self {
        Self { slot: None }
    }

    /// Release the slot now.
    pub fn release(self) {
        drop(self);
    }

    /// Give up the permit without releasing its slot.
    ///
    /// The slot stays occupied until [`RateLimiter::release`] or
    /// [`RateLimiter::release_all`] is called.
    pub fn forget(mut self) {
        self.slot = None;
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        if let Some((limiter, generation)) = self.slot.take() {
            limiter.release_slot(Some(generation));
        }
    }
}

/// A completion timestamp taken by an `acquire` waiting out the window.
/// Put back if the caller stops waiting.
struct WindowClaim<'a> {
    limiter: &'a RateLimiter,
    completion: Option<Instant>,
    generation: u64,
    wait: Duration,
}

impl Drop for WindowClaim<'_> {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            let mut state = self.limiter.inner.state();
            if state.generation == self.generation {
                state.completions.push_front(completion);
            }
        }
    }
}

/// Queue position of an `acquire`. A slot handed over after the caller
/// stopped waiting is released again.
struct PendingSlot<'a> {
    limiter: &'a RateLimiter,
    rx: Option<oneshot::Receiver<Option<u64>>>,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(Some(generation)) = rx.try_recv() {
                self.limiter.release_slot(Some(generation));
            }
        }
    }
}

impl RateLimiter {
    /// Create a limiter allowing `limit` concurrent holders (at least one).
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit: limit.max(1),
                window,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// A limiter that starts disabled: every `acquire` returns at once.
    pub fn disabled(limit: usize, window: Duration) -> Self {
        let limiter = Self::new(limit, window);
        limiter.disable(true);
        limiter
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.inner.state().active
    }

    /// Number of callers waiting for a slot.
    pub fn pending(&self) -> usize {
        self.inner.state().pending.len()
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.state().disabled
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> RatePermit {
        let claim = {
            let mut state = self.inner.state();
            if state.disabled {
                return RatePermit::uncounted();
            }

            let completed = state.completions.len();
            if completed > 0 && completed == self.inner.limit.saturating_sub(state.active) {
                let active = state.active;
                state.completions.pop_front().map(|oldest| {
                    let wait = self.inner.window.saturating_sub(oldest.elapsed());
                    debug!(completed, active, ?wait, "rate limiter window wait");
                    WindowClaim {
                        limiter: self,
                        completion: Some(oldest),
                        generation: state.generation,
                        wait,
                    }
                })
            } else {
                None
            }
        };

        if let Some(mut claim) = claim {
            if !claim.wait.is_zero() {
                tokio::time::sleep(claim.wait).await;
            }
            claim.completion = None;
        }

        let mut pending = {
            let mut state = self.inner.state();
            if state.disabled {
                return RatePermit::uncounted();
            }
            if state.active < self.inner.limit {
                state.active += 1;
                return RatePermit::counted(self, state.generation);
            }

            let (tx, rx) = oneshot::channel();
            state.pending.push_back(tx);
            PendingSlot {
                limiter: self,
                rx: Some(rx),
            }
        };

        let handed = match pending.rx.as_mut() {
            Some(rx) => rx.await,
            None => Ok(None),
        };
        pending.rx = None;
        match handed {
            Ok(Some(generation)) => RatePermit::counted(self, generation),
            // Woken by release_all, or the limiter went away
            _ => RatePermit::uncounted(),
        }
    }

    /// Run `f` while holding a slot.
    ///
    /// The slot is released on every exit path, including cancellation.
    pub async fn sync<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        f().await
    }

    /// Free one slot that was taken by a forgotten permit.
    pub fn release(&self) {
        self.release_slot(None);
    }

    /// Wake every waiter without a slot and reset all counters.
    ///
    /// Permits handed out before the reset no longer count.
    pub fn release_all(&self) {
        let waiters: Vec<Waiter> = {
            let mut state = self.inner.state();
            state.active = 0;
            state.completions.clear();
            state.generation += 1;
            state.pending.drain(..).collect()
        };
        for waiter in waiters {
            let _ = waiter.send(None);
        }
    }

    /// Turn the limiter into a no-op, optionally waking all waiters first.
    pub fn disable(&self, release_all: bool) {
        if release_all {
            self.release_all();
        }
        self.inner.state().disabled = true;
    }

    pub fn enable(&self) {
        self.inner.state().disabled = false;
    }

    fn release_slot(&self, generation: Option<u64>) {
        let handoff = {
            let mut state = self.inner.state();
            if state.disabled {
                return;
            }
            if generation.is_some_and(|g| g != state.generation) {
                return;
            }
            if state.active == 0 {
                warn!("rate limiter over released");
                return;
            }

            state.active -= 1;

            let mut handoff = None;
            while let Some(waiter) = state.pending.pop_front() {
                if waiter.is_closed() {
                    continue;
                }
                state.active += 1;
                handoff = Some((waiter, state.generation));
                break;
            }

            if handoff.is_none() && !self.inner.window.is_zero() {
                state.completions.push_back(Instant::now());
            }
            handoff
        };

        if let Some((waiter, generation)) = handoff {
            self.hand_off(waiter, generation);
        }
    }

    /// Pass a counted slot to a waiter after `window`.
    fn hand_off(&self, waiter: Waiter, generation: u64) {
        let runtime = tokio::runtime::Handle::try_current();
        match runtime {
            Ok(handle) if !self.inner.window.is_zero() => {
                let limiter = self.clone();
                handle.spawn(async move {
                    tokio::time::sleep(limiter.inner.window).await;
                    if waiter.send(Some(generation)).is_err() {
                        limiter.release_slot(Some(generation));
                    }
                });
            }
            _ => {
                if waiter.send(Some(generation)).is_err() {
                    self.release_slot(Some(generation));
                }
            }
        }
    }
}
