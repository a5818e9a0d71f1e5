use std::collections::HashMap;

use gust_core::prelude::RuntimeError;
use gust_plan::prelude::{DatasetSpec, ExhaustionPolicy, SharingMode};
use parking_lot::Mutex;
use rand::Rng;

use crate::store::{UserContext, UserId};

/// Distributes dataset rows to virtual users at iteration start.
///
/// A row is always handed out whole: every column of the chosen row is copied into the user's
/// context in one call, under the dataset's own lock. Cursors for different datasets never share
/// a lock, so exhaustion or contention on one dataset cannot stall users of another.
#[derive(Debug)]
pub struct DatasetPool {
    datasets: HashMap<String, DatasetState>,
}

#[derive(Debug)]
struct DatasetState {
    spec: DatasetSpec,
    shared: Mutex<SharedCursor>,
}

#[derive(Debug, Default)]
struct SharedCursor {
    /// Next row for shared-round-robin acquisition.
    next: usize,
    /// Pinned row per user for exclusive-per-user sharing, in order of first acquisition.
    pinned: HashMap<UserId, usize>,
}

impl DatasetPool {
    pub fn new(specs: impl IntoIterator<Item = DatasetSpec>) -> Self {
        Self {
            datasets: specs
                .into_iter()
                .map(|spec| {
                    (
                        spec.name.clone(),
                        DatasetState {
                            spec,
                            shared: Mutex::new(SharedCursor::default()),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Assigns one row from every dataset to the user for the coming iteration.
    ///
    /// Fails with [`RuntimeError::DatasetExhausted`] only under the stop-user policy; the caller
    /// is expected to bail that virtual user and leave the rest of the scenario running.
    pub fn assign_rows(
        &self,
        user: &mut UserContext,
        rng: &mut impl Rng,
    ) -> Result<(), RuntimeError> {
        for state in self.datasets.values() {
            let index = state.pick_row(user.id(), rng)?;
            if let Some(columns) = state.spec.row(index) {
                user.assign_row(columns);
            }
        }
        Ok(())
    }
}

impl DatasetState {
    fn pick_row(&self, user: UserId, rng: &mut impl Rng) -> Result<usize, RuntimeError> {
        let len = self.spec.rows.len();
        if len == 0 {
            return Err(RuntimeError::DatasetExhausted {
                dataset: self.spec.name.clone(),
            });
        }

        match self.spec.sharing {
            SharingMode::SharedRandom => Ok(rng.gen_range(0..len)),
            SharingMode::SharedRoundRobin => {
                let mut shared = self.shared.lock();
                let index = shared.next;
                if index >= len {
                    return match self.spec.on_exhausted {
                        ExhaustionPolicy::Recycle => {
                            shared.next = 1;
                            Ok(0)
                        }
                        ExhaustionPolicy::StopUser => Err(RuntimeError::DatasetExhausted {
                            dataset: self.spec.name.clone(),
                        }),
                        ExhaustionPolicy::BlockAtEof => Ok(len - 1),
                    };
                }
                shared.next += 1;
                Ok(index)
            }
            SharingMode::ExclusivePerUser => {
                let mut shared = self.shared.lock();
                if let Some(&index) = shared.pinned.get(&user) {
                    return Ok(index);
                }
                let ordinal = shared.pinned.len();
                let index = if ordinal >= len {
                    match self.spec.on_exhausted {
                        ExhaustionPolicy::Recycle => ordinal % len,
                        ExhaustionPolicy::StopUser => {
                            return Err(RuntimeError::DatasetExhausted {
                                dataset: self.spec.name.clone(),
                            })
                        }
                        ExhaustionPolicy::BlockAtEof => len - 1,
                    }
                } else {
                    ordinal
                };
                shared.pinned.insert(user, index);
                Ok(index)
            }
        }
    }
}
