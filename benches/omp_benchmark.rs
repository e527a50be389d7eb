use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use polychaos::config::StrategyKind;
use polychaos::{ChaosConfig, Distribution, FunctionalChaosAlgorithm, Marginal};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SAMPLE_SIZE: usize = 400;

/// Ishigami function on `[-π, π]³`.
fn ishigami_sample() -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(0x15_4164);
    let pi = std::f64::consts::PI;
    let input = Array2::from_shape_fn((SAMPLE_SIZE, 3), |_| rng.gen_range(-pi..pi));
    let output = Array2::from_shape_fn((SAMPLE_SIZE, 1), |(i, _)| {
        let (a, b, c) = (input[[i, 0]], input[[i, 1]], input[[i, 2]]);
        a.sin() + 7.0 * b.sin().powi(2) + 0.1 * c.powi(4) * a.sin()
    });
    (input, output)
}

fn distribution() -> Distribution {
    let pi = std::f64::consts::PI;
    let marginal = Marginal::Uniform {
        lower: -pi,
        upper: pi,
    };
    Distribution::independent(vec![marginal; 3]).unwrap()
}

fn benchmark_strategies(c: &mut Criterion) {
    let (input, output) = ishigami_sample();
    // Total degrees 3, 5 and 7 in three dimensions.
    let basis_sizes = [20_usize, 56, 120];

    let mut group = c.benchmark_group("ishigami_expansion");
    group.sample_size(10);
    for &basis_size in &basis_sizes {
        group.throughput(Throughput::Elements(basis_size as u64));
        let config = ChaosConfig {
            basis_size,
            ..ChaosConfig::default()
        };
        for (label, strategy) in [
            ("least_squares", StrategyKind::LeastSquares),
            ("greedy", StrategyKind::OrthogonalMatchingPursuit),
        ] {
            group.bench_with_input(BenchmarkId::new(label, basis_size), &config, |b, config| {
                b.iter(|| {
                    let result = FunctionalChaosAlgorithm::new(
                        input.clone(),
                        output.clone(),
                        distribution(),
                    )
                    .with_strategy(strategy)
                    .with_config(config.clone())
                    .run()
                    .unwrap();
                    black_box(result);
                });
            });
        }
    }
    group.finish();
}

criterion_group!(omp_benchmark, benchmark_strategies);
criterion_main!(omp_benchmark);
