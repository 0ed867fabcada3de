use criterion::{Criterion, black_box, criterion_group, criterion_main};
use loadout_fs::io::{self, RobustnessConfig};
use loadout_fs::{RelativePath, hash_bytes, hash_file};
use tempfile::tempdir;

fn write_atomic_benchmark(c: &mut Criterion) {
    c.bench_function("io::write_atomic", |b| {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_file.bin");
        let content = vec![42u8; 4096];
        let config = RobustnessConfig::default();

        b.iter(|| {
            io::write_atomic(black_box(&path), black_box(&content), config).unwrap();
        })
    });
}

fn hashing_benchmark(c: &mut Criterion) {
    let data = vec![7u8; 1 << 20];
    c.bench_function("hash::hash_bytes (1 MiB)", |b| {
        b.iter(|| hash_bytes(black_box(&data)))
    });

    let dir = tempdir().unwrap();
    let path = dir.path().join("blob.bin");
    std::fs::write(&path, &data).unwrap();
    c.bench_function("hash::hash_file (1 MiB)", |b| {
        b.iter(|| hash_file(black_box(&path)).unwrap())
    });
}

fn path_benchmark(c: &mut Criterion) {
    c.bench_function("path::RelativePath::new", |b| {
        b.iter(|| RelativePath::new(black_box("Data\\Textures//Armor/iron/cuirass_n.dds")).unwrap())
    });
}

criterion_group!(benches, write_atomic_benchmark, hashing_benchmark, path_benchmark);
criterion_main!(benches);
