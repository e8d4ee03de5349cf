//! Rank-aware dispatch.
//!
//! The core is written against a small communicator trait so it runs
//! unchanged with a single process and no MPI initialized. An
//! MPI-backed communicator is a front-end concern implementing the
//! same trait over the world communicator.

use cf_common::CfResult;

/// Collective operations the core needs from a process group.
pub trait Communicator: Send + Sync {
    /// This process's rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Broadcast `payload` from `root` to every rank. On the root the
    /// buffer is the source; elsewhere it is replaced with the
    /// received bytes.
    fn broadcast(&self, root: usize, payload: &mut Vec<u8>) -> CfResult<()>;
}

/// Single-process communicator: rank 0 of 1, broadcast is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloComm;

impl Communicator for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, _root: usize, _payload: &mut Vec<u8>) -> CfResult<()> {
        Ok(())
    }
}

/// The rank that performs collective catalog work: the highest one,
/// keeping rank 0 free for the contention other patterns put there.
pub fn root_rank(comm: &dyn Communicator) -> usize {
    comm.size() - 1
}

/// Round-robin split of `steps` across ranks: rank r takes every
/// `size`-th entry starting at position r.
pub fn partition_steps(steps: &[u64], rank: usize, size: usize) -> Vec<u64> {
    steps
        .iter()
        .enumerate()
        .filter(|(i, _)| i % size == rank)
        .map(|(_, step)| *step)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solo_comm() {
        let comm = SoloComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert_eq!(root_rank(&comm), 0);
        let mut payload = vec![1, 2, 3];
        comm.broadcast(0, &mut payload).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_partition_covers_all_steps_once() {
        let steps: Vec<u64> = (0..10).collect();
        let size = 3;
        let mut seen = Vec::new();
        for rank in 0..size {
            seen.extend(partition_steps(&steps, rank, size));
        }
        seen.sort_unstable();
        assert_eq!(seen, steps);
    }

    #[test]
    fn test_partition_is_round_robin() {
        let steps: Vec<u64> = (0..7).collect();
        assert_eq!(partition_steps(&steps, 0, 2), vec![0, 2, 4, 6]);
        assert_eq!(partition_steps(&steps, 1, 2), vec![1, 3, 5]);
        assert_eq!(partition_steps(&steps, 0, 1), steps);
    }
}
