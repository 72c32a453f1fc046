use std::collections::HashSet;

use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use fragma::collective::ProcessCluster;
use fragma::model::{Oid, Value};
use fragma::storage::{Fragment, FragmentOpts, LoadStrategy, PartitionMode};
use fragma::types::{Fid, Gid};
use fragma::vmap::GlobalVertexMap;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn solo_opts(directed: bool) -> FragmentOpts {
    FragmentOpts {
        fid: Fid(0),
        fnum: 1,
        directed,
        mode: PartitionMode::Distributed,
        strategy: LoadStrategy::BothOutIn,
    }
}

#[test]
fn cluster_mutation_and_dead_gid_gather() {
    init_tracing();
    let fnum = 2u32;
    let mut vmap = GlobalVertexMap::new(fnum);
    let gids: Vec<Gid> = (0..6)
        .map(|i| {
            let oid = Oid::Int(i);
            let home = vmap.partition_of(&oid);
            vmap.add_vertex(home, oid).expect("assign")
        })
        .collect();
    let ring: Vec<(Gid, Gid, Value)> = (0..6)
        .map(|i| (gids[i], gids[(i + 1) % 6], Value::Int(i as i64)))
        .collect();
    let coder = *vmap.coder();

    let mut frags: Vec<Fragment> = (0..fnum)
        .map(|f| {
            let opts = FragmentOpts {
                fid: Fid(f),
                fnum,
                directed: true,
                mode: PartitionMode::Distributed,
                strategy: LoadStrategy::BothOutIn,
            };
            let vertices: Vec<(Gid, Value)> = gids
                .iter()
                .filter(|gid| coder.is_inner(Fid(f), **gid))
                .map(|gid| (*gid, Value::Null))
                .collect();
            Fragment::init(opts, vertices, ring.clone())
        })
        .collect();

    for (f, frag) in frags.iter().enumerate() {
        let fid = Fid(f as u32);
        assert_eq!(frag.alive_inner_num(), vmap.inner_vertex_count(fid));
        // Every ring vertex has exactly one outgoing and one incoming edge.
        for lid in frag.inner_vertices() {
            assert_eq!(frag.out_degree(lid), 1, "fragment {f} lid {lid}");
            assert_eq!(frag.in_degree(lid), 1, "fragment {f} lid {lid}");
        }
    }

    // Deleting a vertex is issued cluster-wide; each fragment drops what it
    // knows locally (the owner its inner copy, the rest their ghosts).
    let victim = gids[0];
    for frag in frags.iter_mut() {
        frag.delete(vec![victim], Vec::new());
    }
    let owner = coder.fid(victim);
    for (f, frag) in frags.iter().enumerate() {
        if Fid(f as u32) == owner {
            assert_eq!(
                frag.alive_inner_num(),
                vmap.inner_vertex_count(owner) - 1
            );
        }
        for lid in frag.inner_vertices() {
            for nbr in frag.neighbors(lid, fragma::storage::Dir::Out) {
                assert!(
                    frag.lid_to_gid(nbr.lid) != Some(victim),
                    "fragment {f} still points at the deleted vertex"
                );
            }
        }
    }

    // The collective liveness query must agree on every worker.
    let handles = ProcessCluster::new(fnum as usize);
    let joined: Vec<_> = frags
        .into_iter()
        .zip(handles)
        .map(|(frag, comm)| {
            std::thread::spawn(move || frag.gather_dead_gids(&comm).expect("gather"))
        })
        .collect();
    for join in joined {
        let dead = join.join().expect("join");
        assert_eq!(dead, vec![victim]);
    }
}

#[test]
fn randomized_churn_keeps_counters_consistent() {
    init_tracing();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let n = 40u64;
    let vertices: Vec<(Gid, Value)> = (0..n).map(|lid| (Gid(lid), Value::Null)).collect();
    let mut frag = Fragment::init(solo_opts(true), vertices, Vec::new());

    for round in 0..20i64 {
        let inserts: Vec<(Gid, Gid, Value)> = (0..30)
            .map(|_| {
                (
                    Gid(rng.gen_range(0..n)),
                    Gid(rng.gen_range(0..n)),
                    Value::Int(round),
                )
            })
            .collect();
        frag.insert(Vec::new(), inserts);

        let edge_deletes: Vec<(Gid, Gid)> = (0..5)
            .map(|_| (Gid(rng.gen_range(0..n)), Gid(rng.gen_range(0..n))))
            .collect();
        let vertex_delete = Gid(rng.gen_range(0..n));
        frag.delete(vec![vertex_delete], edge_deletes);

        let out_sum: usize = frag.inner_vertices().map(|lid| frag.out_degree(lid)).sum();
        let in_sum: usize = frag.inner_vertices().map(|lid| frag.in_degree(lid)).sum();
        assert_eq!(frag.edge_num(), out_sum, "round {round}");
        assert_eq!(out_sum, in_sum, "round {round}");
        assert!(frag.selfloops_num() <= frag.edge_num(), "round {round}");
    }
    assert!(frag.alive_inner_num() < n);
}

proptest! {
    #[test]
    fn duplicate_batches_are_idempotent(
        pairs in proptest::collection::vec((0u64..12, 0u64..12), 1..40)
    ) {
        let vertices: Vec<(Gid, Value)> = (0..12).map(|lid| (Gid(lid), Value::Null)).collect();
        let edges: Vec<(Gid, Gid, Value)> = pairs
            .iter()
            .map(|&(src, dst)| (Gid(src), Gid(dst), Value::Null))
            .collect();
        let mut frag = Fragment::init(solo_opts(true), vertices, edges.clone());
        let first = frag.edge_num();
        let distinct: HashSet<(u64, u64)> = pairs.iter().copied().collect();
        prop_assert_eq!(first, distinct.len());

        // Re-inserting the same batch creates nothing.
        frag.insert(Vec::new(), edges);
        prop_assert_eq!(frag.edge_num(), first);

        let out_sum: usize = frag.inner_vertices().map(|lid| frag.out_degree(lid)).sum();
        prop_assert_eq!(out_sum, frag.edge_num());
    }
}
