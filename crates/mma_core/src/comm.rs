//! Reduction services for the partitioned design vector.
//!
//! `SerialComm` is the identity for a single process. `ThreadComm` runs a
//! group of ranks on threads of one process; each collective publishes the
//! local buffer into a per-rank slot and combines the slots in rank order,
//! so every rank obtains a bit-identical result.

use std::sync::{Arc, Barrier, Mutex, MutexGuard};

use crate::error::{MmaError, Result};
use crate::traits::Communicator;

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum_in_place(&self, _values: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn max_in_place(&self, _values: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

struct GroupState {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

/// One rank of an in-process SPMD group.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    state: Arc<GroupState>,
}

impl ThreadComm {
    /// Creates the handles of a group with `size` ranks, one per thread.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        let size = size.max(1);
        let state = Arc::new(GroupState {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                state: Arc::clone(&state),
            })
            .collect()
    }

    fn slots(&self) -> Result<MutexGuard<'_, Vec<Vec<f64>>>> {
        self.state
            .slots
            .lock()
            .map_err(|_| MmaError::Collective(format!("rank {} found a poisoned group", self.rank)))
    }

    fn all_reduce(&self, values: &mut [f64], op: fn(f64, f64) -> f64) -> Result<()> {
        {
            let mut slots = self.slots()?;
            let slot = &mut slots[self.rank];
            slot.clear();
            slot.extend_from_slice(values);
        }
        self.state.barrier.wait();

        let combined = {
            let slots = self.slots()?;
            combine(&slots, values.len(), op)
        };
        // Nobody may publish the next collective until all ranks have read.
        self.state.barrier.wait();

        let combined = combined?;
        values.copy_from_slice(&combined);
        Ok(())
    }
}

fn combine(slots: &[Vec<f64>], len: usize, op: fn(f64, f64) -> f64) -> Result<Vec<f64>> {
    if let Some((rank, slot)) = slots.iter().enumerate().find(|(_, s)| s.len() != len) {
        return Err(MmaError::Collective(format!(
            "rank {} contributed {} values, expected {}",
            rank,
            slot.len(),
            len
        )));
    }
    let mut out = slots[0].clone();
    for slot in &slots[1..] {
        for (acc, &v) in out.iter_mut().zip(slot) {
            *acc = op(*acc, v);
        }
    }
    Ok(out)
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sum_in_place(&self, values: &mut [f64]) -> Result<()> {
        self.all_reduce(values, |a, b| a + b)
    }

    fn max_in_place(&self, values: &mut [f64]) -> Result<()> {
        self.all_reduce(values, f64::max)
    }
}
