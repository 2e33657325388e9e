use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use autoplan::prelude::*;
use polars::prelude::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

fn create_dataset(n_rows: usize) -> DataFrame {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let cities = ["Oslo", "Bergen", "Tromso", "Stavanger"];

    let age: Vec<Option<f64>> = (0..n_rows)
        .map(|_| if rng.gen_bool(0.05) { None } else { Some(rng.gen_range(18.0..80.0)) })
        .collect();
    let city: Vec<&str> = (0..n_rows).map(|_| cities[rng.gen_range(0..cities.len())]).collect();
    let hours: Vec<f64> = (0..n_rows).map(|_| rng.gen_range(10.0..60.0)).collect();
    let income: Vec<f64> = age
        .iter()
        .zip(&hours)
        .map(|(a, h)| a.unwrap_or(40.0) * 800.0 + h * 300.0 + rng.gen::<f64>() * 1000.0)
        .collect();

    df!("age" => age, "city" => city, "hours" => hours, "income" => income).unwrap()
}

fn steps() -> Vec<TransformationStep> {
    vec![
        TransformationStep::new("SimpleImputer", ["age"]).with_param("strategy", "median"),
        TransformationStep::new("OneHotEncoder", ["city"]),
        TransformationStep::new("StandardScaler", ["age", "hours"]),
    ]
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let applier = PipelineApplier::new(Arc::new(TransformerRegistry::builtin()));
    let steps = steps();

    for n_rows in [1_000, 10_000, 100_000].iter() {
        let df = create_dataset(*n_rows);
        group.bench_with_input(BenchmarkId::new("apply", n_rows), &df, |b, df| {
            b.iter(|| applier.apply(black_box(&steps), black_box(df)).unwrap())
        });
    }

    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    group.sample_size(10);

    let plan = AnalysisPlan {
        transformations: steps(),
        suggested_regression_models: Some(vec![
            ModelSpec::new("LinearRegression"),
            ModelSpec::new("Ridge").with_param("alpha", 1.0),
        ]),
        ..Default::default()
    };
    let engine = PlanEngine::builtin(EngineConfig::new().with_random_seed(1));

    for n_rows in [1_000, 10_000].iter() {
        let df = create_dataset(*n_rows);
        group.bench_with_input(BenchmarkId::new("regression", n_rows), &df, |b, df| {
            b.iter(|| {
                let input = DatasetInput::new(df.clone()).with_target("income");
                engine.execute(&plan, input, TaskKind::Regression).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_execute);
criterion_main!(benches);
