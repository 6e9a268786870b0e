use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fsm_compiler::*;

fn word(idx: usize, len: usize) -> Vec<Key> {
    (0..len)
        .map(|pos| b'a' as Key + ((idx * 7 + pos * 3) % 26) as Key)
        .collect()
}

pub fn exponential_union_size_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("union operand count comparison");

    (1..10)
        .map(|exponent| 2usize.pow(exponent))
        .for_each(|sample_size| {
            let words: Vec<Vec<Key>> = (0..sample_size).map(|idx| word(idx, 8)).collect();

            group.throughput(Throughput::Elements(sample_size as u64));
            group.bench_with_input(
                BenchmarkId::new("union of words", sample_size),
                &words,
                |b, words| {
                    b.iter(|| {
                        let mut ctx = FsmCtx::default();
                        let res = words.iter().try_fold(FsmAp::empty_fsm(), |fsm, word| {
                            fsm.union_op(&mut ctx, FsmAp::concat_fsm(word))
                        });
                        assert!(res.is_ok())
                    })
                },
            );
        })
}

pub fn exponential_concat_size_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("concatenated star length comparison");

    (1..10)
        .map(|exponent| 2usize.pow(exponent))
        .for_each(|sample_size| {
            group.throughput(Throughput::Elements(sample_size as u64));
            group.bench_with_input(
                BenchmarkId::new("concatenation of starred ranges", sample_size),
                &sample_size,
                |b, &len| {
                    b.iter(|| {
                        let mut ctx = FsmCtx::default();
                        let res = (0..len).try_fold(FsmAp::lambda_fsm(), |fsm, idx| {
                            let key = b'a' as Key + (idx % 26) as Key;
                            let item = FsmAp::range_star_fsm(key, key + 1);
                            fsm.concat_op(&mut ctx, item)
                        });
                        assert!(res.is_ok())
                    })
                },
            );
        })
}

criterion_group!(
    benches,
    exponential_union_size_comparison,
    exponential_concat_size_comparison
);
criterion_main!(benches);
