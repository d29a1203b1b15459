use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use peakwave::audio_cache::{AudioBlock, AudioCache};
use peakwave::waveform::{BLOCK_SIZE_FRAMES, Waveform};

const CACHE_BLOCKS: u64 = 64;

fn block(index: u64) -> AudioBlock {
    AudioBlock {
        block_index: index,
        left: vec![0i16; BLOCK_SIZE_FRAMES as usize],
        right: None,
    }
}

fn bench_insert_under_pressure(c: &mut Criterion) {
    let waveform = Waveform::new("bench.wav".into(), BLOCK_SIZE_FRAMES * 10_000, 1, 44_100);
    c.bench_with_input(
        BenchmarkId::new("insert_evicting", CACHE_BLOCKS),
        &CACHE_BLOCKS,
        |b, &blocks| {
            let cache = AudioCache::new(blocks * BLOCK_SIZE_FRAMES);
            b.iter(|| {
                for i in 0..blocks * 4 {
                    cache.insert(waveform.id(), black_box(block(i)));
                }
            });
        },
    );
}

fn bench_get_hit_rate(c: &mut Criterion) {
    let waveform = Waveform::new("bench.wav".into(), BLOCK_SIZE_FRAMES * 10_000, 1, 44_100);
    let cache = AudioCache::new(CACHE_BLOCKS * BLOCK_SIZE_FRAMES);
    for i in 0..CACHE_BLOCKS {
        cache.insert(waveform.id(), block(i));
    }
    c.bench_function("get_resident_block", |b| {
        b.iter(|| {
            black_box(cache.get(waveform.id(), black_box(0)));
        });
    });
}

criterion_group!(benches, bench_insert_under_pressure, bench_get_hit_rate);
criterion_main!(benches);
