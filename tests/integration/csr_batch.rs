use proptest::prelude::*;

use fragma::model::Value;
use fragma::storage::{read_csr, write_csr, BatchCsr, DegreeTally, FileArchive, TOMBSTONE};
use fragma::FragmaError;

fn triples(pairs: &[(u64, u64)]) -> Vec<(u64, u64, Value)> {
    pairs
        .iter()
        .map(|&(src, dst)| (src, dst, Value::Null))
        .collect()
}

#[test]
fn batch_lifecycle_with_head_and_tail() {
    let mut csr = BatchCsr::with_range(0, 1000, false, true);
    csr.add_vertices(100, 50);
    csr.add_forward_edges(&triples(&[(0, 1), (0, 2), (99, 950), (999, 0), (999, 0)]));
    assert_eq!(csr.degree(0), 2);
    assert_eq!(csr.degree(999), 2);
    assert_eq!(csr.edge_num(), 5);

    // Removal batches tombstone first, then compact touched slots once;
    // sentinel sources are skipped as already-invalidated entries.
    csr.remove_edges(&[(999, 0), (TOMBSTONE, 1), (0, 7)]);
    assert_eq!(csr.degree(999), 0);
    assert_eq!(csr.edge_num(), 3);

    // Later growth keeps earlier content intact.
    csr.add_vertices(10, 10);
    assert_eq!(csr.degree(0), 2);
    csr.add_forward_edges(&triples(&[(105, 940)]));
    assert_eq!(csr.degree(105), 1);
    assert_eq!(csr.edge_num(), 4);
}

#[test]
fn file_archive_round_trip() -> fragma::Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fragment.csr");

    let mut csr = BatchCsr::with_range(0, 256, true, true);
    csr.add_vertices(16, 8);
    csr.add_forward_edges(&[
        (0, 3, Value::Int(1)),
        (5, 250, Value::Str("boundary".into())),
        (250, 5, Value::Float(0.25)),
        (15, 15, Value::Null),
    ]);

    let mut archive = FileArchive::create(&path)?;
    write_csr(&csr, &mut archive)?;
    archive.close()?;

    let mut archive = FileArchive::open(&path)?;
    let decoded = read_csr(&mut archive)?;
    assert_eq!(decoded.min_id(), 0);
    assert_eq!(decoded.max_id(), 256);
    assert_eq!(decoded.max_head_id(), 16);
    assert_eq!(decoded.min_tail_id(), 248);
    assert!(decoded.dedup());
    assert_eq!(decoded.edge_num(), csr.edge_num());
    for v in decoded.head_range().chain(decoded.tail_range()) {
        assert_eq!(decoded.neighbors(v), csr.neighbors(v), "vertex {v}");
    }
    Ok(())
}

#[test]
fn corrupted_archive_is_rejected() -> fragma::Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fragment.csr");

    let mut csr = BatchCsr::with_range(0, 32, false, false);
    csr.add_vertices(8, 0);
    csr.add_forward_edges(&triples(&[(1, 2), (2, 3)]));
    let mut archive = FileArchive::create(&path)?;
    write_csr(&csr, &mut archive)?;
    archive.close()?;

    let mut bytes = std::fs::read(&path)?;
    let flip = bytes.len() / 2;
    bytes[flip] ^= 0x40;
    std::fs::write(&path, &bytes)?;

    let err = read_csr(&mut FileArchive::open(&path)?).unwrap_err();
    assert!(matches!(err, FragmaError::Corruption(_)));
    Ok(())
}

proptest! {
    // Forcing the sparse and dense counting paths over the same batch must
    // produce identical adjacency content.
    #[test]
    fn sparse_and_dense_counting_agree(
        pairs in proptest::collection::vec((0u64..24, 0u64..24), 1..120),
        dedup in proptest::bool::ANY,
    ) {
        let edges = triples(&pairs);

        let mut forced_sparse = BatchCsr::with_range(0, 24, dedup, false);
        forced_sparse.add_vertices(24, 0);
        forced_sparse.add_forward_edges_with(DegreeTally::sparse(), &edges);

        let mut forced_dense = BatchCsr::with_range(0, 24, dedup, false);
        forced_dense.add_vertices(24, 0);
        forced_dense.add_forward_edges_with(DegreeTally::dense(24), &edges);

        prop_assert_eq!(forced_sparse.edge_num(), forced_dense.edge_num());
        for v in 0..24u64 {
            prop_assert_eq!(forced_sparse.neighbors(v), forced_dense.neighbors(v));
        }
    }
}
