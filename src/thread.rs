//! Designated-thread access
//!
//! Handler construction and storage mutation that hosts observe must happen
//! on one designated thread. Holding a [`MainThread`] token proves the caller
//! is on it; the token is neither `Send` nor `Sync`, so it cannot leave the
//! thread it was claimed on.

use std::marker::PhantomData;
use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThreadError {
    #[error("operation requires the designated thread")]
    NotDesignated,
}

/// Proof of running on the designated thread
#[derive(Debug)]
pub struct MainThread {
    _not_send: PhantomData<*const ()>,
}

/// Remembers which thread is designated; the first claimant wins
#[derive(Debug, Default)]
pub struct DesignatedThread {
    owner: OnceLock<ThreadId>,
}

impl DesignatedThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self) -> Result<MainThread, ThreadError> {
        let current = thread::current().id();
        let owner = *self.owner.get_or_init(|| current);

        if owner == current {
            Ok(MainThread {
                _not_send: PhantomData,
            })
        } else {
            Err(ThreadError::NotDesignated)
        }
    }

    pub fn is_designated(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }
}
