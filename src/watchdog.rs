//! This module contains the type definitions necessary to support cancelling
//! an exploration from outside the engine.
//!
//! # Dequeue Granularity
//!
//! The explorer only consults the watchdog when it takes a state off its
//! worklist. A state that is already being stepped runs on until its next fork
//! or terminal outcome, so every state transition the engine reports stays
//! atomic and replayable. States left on the worklist when the watchdog fires
//! are reported as unexplored.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;

/// A dynamically dispatched [`Watchdog`] instance that can be shared between
/// worker threads.
pub type DynWatchdog = Arc<dyn Watchdog>;

/// The interface to an object that can be polled to see if the explorer needs
/// to abort processing.
///
/// The interface is simple, but it can encapsulate arbitrary logic as far as
/// the explorer is concerned, allowing the client to implement complex stop
/// logic.
pub trait Watchdog
where
    Self: Debug + Send + Sync,
{
    /// Checks if the explorer should stop taking new states from its worklist.
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Gets the number of dequeues the explorer should wait before polling the
    /// watchdog.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// An implementation of the [`Watchdog`] trait that does not place any
/// restrictions on the execution of the explorer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    /// Wraps `self` into an [`Arc`].
    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        // Something ridiculously huge so it basically never gets checked.
        1_000_000_000_000
    }
}

/// A watchdog that tells the explorer when to stop based on a flag in the form
/// of an atomic boolean.
///
/// By default, it requests that the explorer poll for watchdog status every
/// [`DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS`] dequeues. This is configurable by
/// calling [`Self::polling_every`].
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    /// The flag that should be mutated externally to stop the explorer.
    flag: Arc<AtomicBool>,

    /// The number of dequeues the explorer should wait before polling the
    /// watchdog.
    poll_loop_iterations: usize,
}

impl FlagWatchdog {
    /// Constructs a new `FlagWatchdog` wrapping the provided `flag`.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            flag,
            poll_loop_iterations,
        }
    }

    /// Specifies the number of dequeues that the explorer should wait before
    /// polling the watchdog for status.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations.max(1);
        self
    }

    /// Wraps the watchdog into an [`Arc`].
    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use crate::watchdog::{FlagWatchdog, LazyWatchdog, Watchdog};

    #[test]
    fn lazy_watchdog_never_stops() {
        let watchdog = LazyWatchdog.in_arc();
        assert!(!watchdog.should_stop());
    }

    #[test]
    fn flag_watchdog_follows_its_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let watchdog = FlagWatchdog::new(flag.clone()).polling_every(0);
        assert!(!watchdog.should_stop());
        assert_eq!(watchdog.poll_every(), 1);

        flag.store(true, Ordering::Relaxed);
        assert!(watchdog.should_stop());
    }
}
