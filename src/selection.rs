//! Anti-repeat selection over ready media
//!
//! Each capability class keeps a lazily built list of eligible identifiers.
//! In prefer-new mode a picked identifier leaves the list; once the list
//! runs dry the use cutoff rises by one and the list is refilled, so every
//! identifier is handed out once before any repeats.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use crate::handler::{CapabilityClass, SwapperHandler};
use crate::identifier::{Identifier, Placeholder};
use crate::query::ContentFilter;
use crate::storage::{AnyError, MediaStorage};
use crate::thread::MainThread;

#[derive(Debug)]
struct ClassPool {
    entries: Option<Vec<Identifier>>,
    exhausted: bool,
    cutoff: usize,
    /// Identifier count when the pool was last found exhausted
    built_against: usize,
}

impl Default for ClassPool {
    fn default() -> Self {
        Self {
            entries: None,
            exhausted: false,
            cutoff: 1,
            built_against: 0,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    active: HashMap<Identifier, usize>,
    mesh: ClassPool,
    general: ClassPool,
}

pub struct SelectionPool {
    prioritize_new: bool,
    state: Mutex<PoolState>,
}

impl SelectionPool {
    pub fn new(prioritize_new: bool) -> Self {
        Self {
            prioritize_new,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Pick an identifier for a caller of `class`.
    ///
    /// With a seed the pick is deterministic for an unchanged pool. Returns
    /// `None` when nothing is eligible.
    pub fn pick(
        &self,
        storage: &MediaStorage,
        class: CapabilityClass,
        seed: Option<u64>,
    ) -> Option<Identifier> {
        let mut state = self.state.lock();
        let PoolState {
            active,
            mesh,
            general,
        } = &mut *state;
        let pool = match class {
            CapabilityClass::Mesh => mesh,
            CapabilityClass::General => general,
        };

        // new media arrived since the pool ran dry
        if pool.exhausted && storage.len() > pool.built_against {
            pool.exhausted = false;
            pool.entries = None;
        }

        if pool.entries.is_none() {
            let built = self.eligible(storage, class, active, pool.cutoff);
            pool.exhausted = built.is_empty();
            pool.built_against = storage.len();
            pool.entries = Some(built);
        }

        let entries = pool.entries.as_mut()?;
        if entries.is_empty() {
            return None;
        }

        let index = match seed {
            Some(seed) => StdRng::seed_from_u64(seed).random_range(0..entries.len()),
            None => rand::rng().random_range(0..entries.len()),
        };
        let id = entries[index].clone();
        *active.entry(id.clone()).or_default() += 1;

        let single_use = storage
            .handler(&id)
            .is_some_and(|handler| !handler.allow_multiple());

        if single_use || self.prioritize_new {
            entries.remove(index);

            if entries.is_empty() {
                pool.cutoff += 1;
                let refill = self.eligible(storage, class, active, pool.cutoff);
                pool.exhausted = refill.is_empty();
                pool.built_against = storage.len();
                pool.entries = Some(refill);
                tracing::debug!(?class, cutoff = pool.cutoff, "Selection pool refilled");
            }
        }

        tracing::trace!(id = %id, ?class, "Picked media");
        Some(id)
    }

    fn eligible(
        &self,
        storage: &MediaStorage,
        class: CapabilityClass,
        active: &HashMap<Identifier, usize>,
        cutoff: usize,
    ) -> Vec<Identifier> {
        storage.eligible(class.media_kinds(), |id| {
            let uses = active.get(id).copied().unwrap_or(0);
            if self.prioritize_new && uses > cutoff {
                return false;
            }

            storage
                .handler(id)
                .is_none_or(|handler| handler.allow_multiple() || uses == 0)
        })
    }

    /// Pick and apply the handler. Censored media is applied through the
    /// censored placeholder; the picked identifier is still returned.
    pub fn pick_and_act<F>(
        &self,
        main: &MainThread,
        storage: &MediaStorage,
        filter: &ContentFilter,
        class: CapabilityClass,
        seed: Option<u64>,
        on_ready: F,
    ) -> Option<Identifier>
    where
        F: FnMut(&SwapperHandler) -> Result<(), AnyError> + Send + 'static,
    {
        let id = self.pick(storage, class, seed)?;

        let censored = storage
            .query_result(&id)
            .is_some_and(|result| filter.is_censored(&result));
        let target = if censored {
            Placeholder::Censored.id()
        } else {
            id.clone()
        };

        storage.act_with_handler(main, &target, class, on_ready);
        Some(id)
    }

    /// A placement stopped using `id`
    pub fn release(&self, id: &Identifier) {
        let mut state = self.state.lock();
        if let Some(uses) = state.active.get_mut(id) {
            *uses = uses.saturating_sub(1);
            if *uses == 0 {
                state.active.remove(id);
            }
        }
    }

    pub fn active_count(&self, id: &Identifier) -> usize {
        self.state.lock().active.get(id).copied().unwrap_or(0)
    }

    /// Forget all lists, cutoffs and use counts
    pub fn reset(&self) {
        *self.state.lock() = PoolState::default();
    }
}
