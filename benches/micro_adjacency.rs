use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use fragma::model::Value;
use fragma::storage::{BatchCsr, SlotStore};

fn random_edges(n_vertices: u64, n_edges: usize, seed: u64) -> Vec<(u64, u64, Value)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n_edges)
        .map(|_| {
            (
                rng.gen_range(0..n_vertices),
                rng.gen_range(0..n_vertices),
                Value::Null,
            )
        })
        .collect()
}

fn bench_slot_insert(c: &mut Criterion) {
    let edges = random_edges(1024, 16 * 1024, 11);
    c.bench_function("slot_store_insert_16k", |b| {
        b.iter(|| {
            let mut store = SlotStore::new();
            let mut handles = vec![None; 1024];
            for (src, dst, data) in &edges {
                match handles[*src as usize] {
                    Some(handle) => {
                        store.insert(handle, *dst, data.clone());
                    }
                    None => handles[*src as usize] = Some(store.new_slot(*dst, data.clone())),
                }
            }
            black_box(store.len())
        })
    });
}

fn bench_csr_bulk_load(c: &mut Criterion) {
    let edges = random_edges(1024, 16 * 1024, 13);
    c.bench_function("csr_bulk_load_16k", |b| {
        b.iter(|| {
            let mut csr = BatchCsr::with_range(0, 1024, false, false);
            csr.add_vertices(1024, 0);
            csr.add_forward_edges(&edges);
            black_box(csr.edge_num())
        })
    });
}

criterion_group!(benches, bench_slot_insert, bench_csr_bulk_load);
criterion_main!(benches);
