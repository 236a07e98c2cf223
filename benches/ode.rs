use criterion::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use pkfit::prelude::*;

fn iv_source() -> DrugSource {
    let doses = vec![Dose::bolus("D", Route::Iv, 0.0, 100.0)];
    DrugSource::for_doses(&doses, 0.0, 480.0)
}

fn one_compartment() {
    let model = OneCompartment::new(0.1, 20.0);
    let source = iv_source();
    let grid = OdeGrid::new(0.0, 480.0, 0.25);
    black_box(simulate(&model, &source, &grid).unwrap());
}

fn two_compartment() {
    let model = TwoCompartments::new(0.1, 20.0, 0.05, 40.0);
    let source = iv_source();
    let grid = OdeGrid::new(0.0, 480.0, 0.25);
    black_box(simulate(&model, &source, &grid).unwrap());
}

fn ev1_absorption() {
    let model = OneCompartment::new(0.1, 20.0);
    let mut source = DrugSource::with_profile(AbsorptionModel::FirstOrder { ka: 0.05 });
    source.set_doses(&[Dose::bolus("D", Route::Ev1, 0.0, 100.0)], 0.0, 480.0);
    let grid = OdeGrid::new(0.0, 480.0, 0.25);
    black_box(simulate(&model, &source, &grid).unwrap());
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("one_compartment", |b| b.iter(|| one_compartment()));
    c.bench_function("two_compartment", |b| b.iter(|| two_compartment()));
    c.bench_function("ev1_absorption", |b| b.iter(|| ev1_absorption()));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
