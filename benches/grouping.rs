//! Benchmarks for size-bounded file grouping and blob hashing
//!
//! Grouping runs once per publish over the whole site tree, hashing reads
//! every byte of it.

use blobsite::publish::{group_files, hash_group, FileEntry, FileGroup};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fs;
use tempfile::TempDir;

/// Synthetic listing with sizes cycling between 1 KiB and 64 KiB
fn listing(count: usize) -> Vec<FileEntry> {
    (0..count)
        .map(|i| FileEntry {
            relative_path: format!("/assets/{:05}.js", i),
            absolute_path: format!("/site/assets/{:05}.js", i).into(),
            size_bytes: 1024 * (1 + (i as u64 * 7) % 64),
        })
        .collect()
}

fn bench_group_files(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_files");

    for count in [100, 1_000, 10_000] {
        let files = listing(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &files, |b, files| {
            b.iter(|| group_files(black_box(files.clone()), black_box(10 * 1024 * 1024)))
        });
    }

    group.finish();
}

fn bench_hash_group(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let entries: Vec<FileEntry> = (0..64)
        .map(|i| {
            let path = dir.path().join(format!("{}.bin", i));
            let content = vec![i as u8; 16 * 1024];
            fs::write(&path, &content).unwrap();
            FileEntry {
                relative_path: format!("/{}.bin", i),
                absolute_path: path,
                size_bytes: content.len() as u64,
            }
        })
        .collect();
    let file_group = FileGroup::new(entries);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("hash_group_1mib", |b| {
        b.iter(|| runtime.block_on(hash_group(black_box(&file_group))).unwrap())
    });
}

criterion_group!(benches, bench_group_files, bench_hash_group);
criterion_main!(benches);
