use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptStatus {
    Continue,
    Cancel,
}

/// Polled once at the top of every iteration of a run.
pub trait Interrupt {
    fn check(&mut self) -> InterruptStatus;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverInterrupt;

impl Interrupt for NeverInterrupt {
    fn check(&mut self) -> InterruptStatus {
        InterruptStatus::Continue
    }
}

/// Cancellation through a shared flag, for example from a signal handler or
/// another thread.
#[derive(Debug, Default, Clone)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

impl Interrupt for InterruptFlag {
    fn check(&mut self) -> InterruptStatus {
        if self.is_cancelled() {
            InterruptStatus::Cancel
        } else {
            InterruptStatus::Continue
        }
    }
}

/// Lets `n` iterations through and cancels at the next check.
#[derive(Debug, Clone, Copy)]
pub struct CancelAfter {
    remaining: u64,
}

impl CancelAfter {
    pub fn new(n: u64) -> Self {
        CancelAfter { remaining: n }
    }
}

impl Interrupt for CancelAfter {
    fn check(&mut self) -> InterruptStatus {
        if self.remaining == 0 {
            return InterruptStatus::Cancel;
        }
        self.remaining -= 1;
        InterruptStatus::Continue
    }
}
