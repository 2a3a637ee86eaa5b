//! Monotonic time and timers for the cooperative frame loop.
//!
//! Everything in this crate runs on a single thread. The [`Clock`] is the only
//! notion of time: the frame loop derives its deltas from it, the asset loader
//! sleeps on it between retries and scenes may await it during `init`.
//!
//! The time itself comes from a [`TimeSource`]. [`InstantTime`] reads the platform
//! clock (through `instant`, which also works on wasm32) and [`ManualTime`] only
//! moves when told to, which lets tests step frames deterministically.

use std::{
    cell::{Cell, RefCell},
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
    time::Duration,
};

/// Something that can tell the time since an arbitrary, fixed origin.
pub trait TimeSource {
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`instant::Instant`].
pub struct InstantTime {
    origin: instant::Instant,
}

impl InstantTime {
    pub fn new() -> Self {
        Self {
            origin: instant::Instant::now(),
        }
    }
}

impl Default for InstantTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for InstantTime {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A time source that only advances through [`ManualTime::advance`].
#[derive(Default)]
pub struct ManualTime {
    now: Cell<Duration>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

#[derive(Default)]
struct Timers {
    pending: Vec<(Duration, Waker)>,
}

/// Shared handle to the session clock. Cloning is cheap and all clones observe
/// the same time and timer queue.
#[derive(Clone)]
pub struct Clock {
    source: Rc<dyn TimeSource>,
    timers: Rc<RefCell<Timers>>,
}

impl Clock {
    pub fn new(source: Rc<dyn TimeSource>) -> Self {
        Self {
            source,
            timers: Rc::new(RefCell::new(Timers::default())),
        }
    }

    /// Clock backed by the platform's monotonic time.
    pub fn system() -> Self {
        Self::new(Rc::new(InstantTime::new()))
    }

    /// Clock backed by a [`ManualTime`] the caller keeps a handle to.
    pub fn manual(time: Rc<ManualTime>) -> Self {
        Self::new(time)
    }

    pub fn now(&self) -> Duration {
        self.source.now()
    }

    /// A future that completes once the clock reached `now() + duration`.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep {
            clock: self.clone(),
            deadline: self.now() + duration,
        }
    }

    /// Wake every sleeper whose deadline has passed.
    ///
    /// The frame loop calls this once per frame. Executors that park until woken
    /// (such as `LocalPool` in tests) need it after every time advance.
    pub fn fire_due(&self) -> usize {
        let now = self.now();
        let due: Vec<Waker> = {
            let mut timers = self.timers.borrow_mut();
            let (due, pending): (Vec<_>, Vec<_>) = timers
                .pending
                .drain(..)
                .partition(|(deadline, _)| *deadline <= now);
            timers.pending = pending;
            due.into_iter().map(|(_, waker)| waker).collect()
        };
        let fired = due.len();
        due.into_iter().for_each(Waker::wake);
        fired
    }

    /// Number of sleepers still waiting for their deadline.
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().pending.len()
    }
}

/// Future returned by [`Clock::sleep`].
pub struct Sleep {
    clock: Clock,
    deadline: Duration,
}

impl Sleep {
    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.clock.now() >= self.deadline {
            return Poll::Ready(());
        }
        let mut timers = self.clock.timers.borrow_mut();
        let registered = timers
            .pending
            .iter()
            .any(|(deadline, waker)| *deadline == self.deadline && waker.will_wake(cx.waker()));
        if !registered {
            timers.pending.push((self.deadline, cx.waker().clone()));
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, executor::LocalPool, task::LocalSpawnExt};

    #[test]
    fn sleep_completes_only_after_deadline() {
        let time = Rc::new(ManualTime::new());
        let clock = Clock::manual(time.clone());
        let mut sleep = clock.sleep(Duration::from_millis(50)).boxed_local();

        assert!((&mut sleep).now_or_never().is_none());
        time.advance(Duration::from_millis(49));
        assert!((&mut sleep).now_or_never().is_none());
        time.advance(Duration::from_millis(1));
        assert!(sleep.now_or_never().is_some());
    }

    #[test]
    fn fire_due_wakes_parked_tasks() {
        let time = Rc::new(ManualTime::new());
        let clock = Clock::manual(time.clone());
        let done = Rc::new(Cell::new(false));
        let mut pool = LocalPool::new();
        {
            let clock = clock.clone();
            let done = done.clone();
            pool.spawner()
                .spawn_local(async move {
                    clock.sleep(Duration::from_secs(1)).await;
                    done.set(true);
                })
                .unwrap();
        }
        pool.run_until_stalled();
        assert_eq!(clock.pending_timers(), 1);

        time.advance(Duration::from_secs(1));
        assert_eq!(clock.fire_due(), 1);
        pool.run_until_stalled();
        assert!(done.get());
    }
}
