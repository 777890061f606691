use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use launch_server::state::{DigestAlgorithm, DigestNode, ServerKeyPair, SignedEnvelope};

#[allow(clippy::unwrap_used)]
fn bench_digest_and_sign(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest_tree");
    let keys = Arc::new(ServerKeyPair::from_seed(&[1; 32]));

    for &files in &[16usize, 256, 2048] {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..files {
            let dir = tmp.path().join(format!("d{}", i % 16));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("f{i}.bin")), vec![(i & 0xFF) as u8; 4096]).unwrap();
        }

        group.throughput(Throughput::Bytes((files * 4096) as u64));
        for algorithm in [DigestAlgorithm::Sha256, DigestAlgorithm::Sha512] {
            group.bench_function(format!("build_{}_{files}", algorithm.name()), |b| {
                b.iter(|| DigestNode::build(tmp.path(), algorithm).unwrap())
            });
        }

        let tree = DigestNode::build(tmp.path(), DigestAlgorithm::Sha256).unwrap();
        group.bench_function(format!("sign_{files}"), |b| {
            b.iter_batched(
                || tree.clone(),
                |tree| SignedEnvelope::create(&tree, keys.signing_key()).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_digest_and_sign);
criterion_main!(benches);
