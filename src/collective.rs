//! Cluster-wide collectives.
//!
//! The storage layer needs exactly one synchronization point: aggregating
//! locally-known dead gids across every fragment. The collective is
//! blocking and full-participation. Every worker must call it in the same
//! logical step or the computation deadlocks; there is no partial
//! participation and no timeout.

use std::sync::{Arc, Barrier, Mutex};

use crate::error::{acquire_lock, Result};
use crate::types::Gid;

/// Blocking all-gather over per-worker gid lists.
pub trait AllGather {
    /// Contributes `local` and returns every worker's contribution, indexed
    /// by worker rank. Blocks until all workers of the step arrive.
    fn all_gather(&self, local: Vec<Gid>) -> Result<Vec<Vec<Gid>>>;
}

/// Degenerate single-worker cluster.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoloCluster;

impl AllGather for SoloCluster {
    fn all_gather(&self, local: Vec<Gid>) -> Result<Vec<Vec<Gid>>> {
        Ok(vec![local])
    }
}

struct ClusterShared {
    barrier: Barrier,
    inbox: Mutex<Vec<Option<Vec<Gid>>>>,
}

/// One worker's handle onto an in-process cluster of `n` ranks,
/// synchronized by a barrier. Stands in for the wire transport in tests and
/// single-process deployments.
pub struct ProcessCluster {
    shared: Arc<ClusterShared>,
    rank: usize,
}

impl ProcessCluster {
    /// Creates handles for a cluster of `n` workers, one per rank.
    pub fn new(n: usize) -> Vec<ProcessCluster> {
        assert!(n > 0, "cluster must have at least one worker");
        let shared = Arc::new(ClusterShared {
            barrier: Barrier::new(n),
            inbox: Mutex::new(vec![None; n]),
        });
        (0..n)
            .map(|rank| ProcessCluster {
                shared: Arc::clone(&shared),
                rank,
            })
            .collect()
    }

    /// This worker's rank.
    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl AllGather for ProcessCluster {
    fn all_gather(&self, local: Vec<Gid>) -> Result<Vec<Vec<Gid>>> {
        {
            let mut inbox = acquire_lock(&self.shared.inbox)?;
            inbox[self.rank] = Some(local);
        }
        self.shared.barrier.wait();
        let gathered: Vec<Vec<Gid>> = {
            let inbox = acquire_lock(&self.shared.inbox)?;
            inbox
                .iter()
                .map(|slot| slot.clone().unwrap_or_default())
                .collect()
        };
        // Second barrier so no slot is cleared under a slow reader. Each
        // rank then clears only its own slot; a rank racing ahead into the
        // next step rewrites nothing but its own entry.
        self.shared.barrier.wait();
        {
            let mut inbox = acquire_lock(&self.shared.inbox)?;
            inbox[self.rank] = None;
        }
        Ok(gathered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solo_gathers_itself() -> Result<()> {
        let gathered = SoloCluster.all_gather(vec![Gid(1), Gid(2)])?;
        assert_eq!(gathered, vec![vec![Gid(1), Gid(2)]]);
        Ok(())
    }

    #[test]
    fn process_cluster_gathers_every_rank() {
        let handles = ProcessCluster::new(3);
        let joined: Vec<_> = handles
            .into_iter()
            .map(|handle| {
                std::thread::spawn(move || {
                    let mine = vec![Gid(handle.rank() as u64 * 10)];
                    handle.all_gather(mine).expect("gather")
                })
            })
            .collect();
        for join in joined {
            let gathered = join.join().expect("join");
            assert_eq!(gathered, vec![vec![Gid(0)], vec![Gid(10)], vec![Gid(20)]]);
        }
    }

    #[test]
    fn process_cluster_is_reusable_across_steps() {
        let handles = ProcessCluster::new(2);
        let joined: Vec<_> = handles
            .into_iter()
            .map(|handle| {
                std::thread::spawn(move || {
                    let first = handle.all_gather(vec![Gid(1)]).expect("first step");
                    let second = handle.all_gather(vec![Gid(2)]).expect("second step");
                    (first, second)
                })
            })
            .collect();
        for join in joined {
            let (first, second) = join.join().expect("join");
            assert_eq!(first, vec![vec![Gid(1)], vec![Gid(1)]]);
            assert_eq!(second, vec![vec![Gid(2)], vec![Gid(2)]]);
        }
    }
}
