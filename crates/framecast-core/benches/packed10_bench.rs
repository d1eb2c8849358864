use criterion::{black_box, criterion_group, criterion_main, Criterion};
use framecast_core::packed10::{decode_group, encode_group, SampleGroup, GROUP_BYTES};

fn bench_packed10(c: &mut Criterion) {
    // One 1080p row: 320 groups of 16 bytes.
    let samples = SampleGroup {
        luma: [64, 200, 400, 600, 800, 940],
        cb: [64, 512, 960],
        cr: [128, 512, 896],
    };
    let row: Vec<[u8; GROUP_BYTES]> = (0..320).map(|_| encode_group(&samples)).collect();

    c.bench_function("decode_row_1080p", |b| {
        b.iter(|| {
            for group in &row {
                black_box(decode_group(black_box(group)));
            }
        })
    });

    let decoded: Vec<SampleGroup> = row.iter().map(decode_group).collect();
    c.bench_function("encode_row_1080p", |b| {
        b.iter(|| {
            for samples in &decoded {
                black_box(encode_group(black_box(samples)));
            }
        })
    });
}

criterion_group!(benches, bench_packed10);
criterion_main!(benches);
