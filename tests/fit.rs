use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use pkfit::optimize::FitError;
use pkfit::prelude::*;

const SAMPLE_TIMES: [f64; 6] = [5.0, 30.0, 60.0, 120.0, 240.0, 480.0];

/// Noise-free one-compartment IV data generated from known parameters
fn iv_sample(cl: f64, v: f64, dose: f64) -> Sample {
    let ke = cl / v;
    let mut builder = Sample::builder("synthetic")
        .dose(&format!("Dose1; iv; bolus t=0 d={}; min; mg", dose))
        .unwrap();
    for &t in &SAMPLE_TIMES {
        builder = builder.observation(t, dose / v * (-ke * t).exp());
    }
    builder.build()
}

fn iv_context(sample: Sample, bounds: &str) -> FitContext {
    FitContext::new(
        sample,
        Box::new(OneCompartment::new(0.0, 1.0)),
        OdeGrid::new(0.0, 500.0, 0.5),
        bounds,
        Loss::Linear,
    )
    .unwrap()
}

#[test]
fn recovers_one_compartment_iv_parameters_within_one_percent() {
    let (cl, v) = (0.1, 20.0);
    let context = iv_context(iv_sample(cl, v, 100.0), "(0.001,10);(0.1,500)");

    let result = fit(&context, &FitOptions::default()).unwrap();
    assert!(result.converged);

    let fitted_cl = result.parameter("Cl").unwrap().value;
    let fitted_v = result.parameter("V").unwrap().value;
    assert!((fitted_cl - cl).abs() / cl < 0.01, "Cl = {}", fitted_cl);
    assert!((fitted_v - v).abs() / v < 0.01, "V = {}", fitted_v);

    // Noise-free data: statistics reflect a near-perfect fit and the
    // intervals cover the generating values
    assert!(result.quality.r2 > 0.999);
    let interval = result.parameter("Cl").unwrap().interval.unwrap();
    assert!(interval.contains(cl));
}

#[test]
fn predicted_curve_carries_a_confidence_envelope() {
    let context = iv_context(iv_sample(0.1, 20.0, 100.0), "(0.001,10);(0.1,500)");
    let result = fit(&context, &FitOptions::default()).unwrap();

    let curve = &result.curve;
    assert_eq!(curve.times.len(), SAMPLE_TIMES.len());
    let lower = curve.lower.as_ref().unwrap();
    let upper = curve.upper.as_ref().unwrap();
    for i in 0..curve.times.len() {
        assert!(lower[i] <= curve.predicted[i] + 1e-12);
        assert!(upper[i] >= curve.predicted[i] - 1e-12);
        assert!(lower[i] >= 0.0);
    }
}

#[test]
fn recovers_ev1_absorption_parameters() {
    let (cl, v, ka) = (0.1, 20.0, 0.05);
    let ke = cl / v;
    let dose = 100.0;

    // Bateman profile for a single first-order extravascular dose
    let mut builder = Sample::builder("ev1")
        .dose("Dose1; ev1; bolus t=0 d=100; min; mg")
        .unwrap();
    for &t in &SAMPLE_TIMES {
        let c = dose * ka / (v * (ka - ke)) * ((-ke * t).exp() - (-ka * t).exp());
        builder = builder.observation(t, c);
    }

    let context = FitContext::new(
        builder.build(),
        Box::new(OneCompartment::new(0.0, 1.0)),
        OdeGrid::new(0.0, 500.0, 0.5),
        // Ka's lower bound sits above the elimination rate, which keeps the
        // search away from the flip-flop mirror solution
        "(0.01,1);(0.001,10);(0.1,500)",
        Loss::Linear,
    )
    .unwrap();
    assert_eq!(context.parameter_names(), vec!["Ka", "Cl", "V"]);

    let result = fit(&context, &FitOptions::default()).unwrap();
    let fitted_ka = result.parameter("Ka").unwrap().value;
    let fitted_cl = result.parameter("Cl").unwrap().value;
    assert!((fitted_ka - ka).abs() / ka < 0.05, "Ka = {}", fitted_ka);
    assert!((fitted_cl - cl).abs() / cl < 0.05, "Cl = {}", fitted_cl);
}

#[test]
fn bounds_mismatch_fails_before_any_optimization() {
    let sample = iv_sample(0.1, 20.0, 100.0);
    let result = FitContext::new(
        sample,
        Box::new(OneCompartment::new(0.0, 1.0)),
        OdeGrid::new(0.0, 500.0, 0.5),
        "(0.001,10)",
        Loss::Linear,
    );
    assert!(matches!(result, Err(FitError::BoundsMismatch { .. })));
}

#[test]
fn deadline_is_surfaced_as_a_timeout_error() {
    let context = iv_context(iv_sample(0.1, 20.0, 100.0), "(0.001,10);(0.1,500)");
    let options = FitOptions {
        deadline: Some(std::time::Duration::ZERO),
        ..Default::default()
    };
    assert!(matches!(
        fit(&context, &options),
        Err(FitError::Timeout(_))
    ));
}

#[test]
fn collinear_parameter_pair_is_not_significant() {
    // Urine output A(t) = fe * D * (1 - exp(-Cl/V * t)) depends on Cl and
    // V only through their ratio: the pair is perfectly collinear and the
    // fit cannot claim either individually
    let (cl, v, fe) = (0.1, 20.0, 0.6);
    let ke = cl / v;
    let dose = 100.0;

    let mut builder = Sample::builder("urine")
        .dose("Dose1; iv; bolus t=0 d=100; min; mg")
        .unwrap();
    for &t in &SAMPLE_TIMES {
        builder = builder.observation(t, fe * dose * (1.0 - (-ke * t).exp()));
    }

    let context = FitContext::new(
        builder.build(),
        Box::new(OneCompartmentUrine::new(0.0, 1.0, 0.5).observing(UrineOutput::Excreted)),
        OdeGrid::new(0.0, 500.0, 0.5),
        "(0.05,0.15);(10,30);(0.1,1)",
        Loss::Linear,
    )
    .unwrap();

    let options = FitOptions {
        global_search: false,
        ..Default::default()
    };
    let result = fit(&context, &options).unwrap();
    let cl_param = result.parameter("Cl").unwrap();
    assert_ne!(cl_param.significance, Significance::Significant);
}

#[test]
fn bootstrap_on_noise_free_data_collapses_to_a_point() {
    let context = iv_context(iv_sample(0.1, 20.0, 100.0), "(0.001,10);(0.1,500)");
    let options = BootstrapOptions {
        n_resamples: 200,
        ..Default::default()
    };
    let population = bootstrap_fit(&context, &[0.1, 20.0], &options).unwrap();

    assert_eq!(population.len(), 200);
    for (std, mean) in population.std().iter().zip(population.mean()) {
        assert!(
            std / mean.abs() < 1e-3,
            "noise-free bootstrap should have near-zero variance"
        );
    }
    // Every resample judged its quality against the full dataset
    assert!(population.quality().iter().all(|q| q.n_observations == 6));
}

#[test]
fn bootstrap_percentile_interval_brackets_the_truth_under_noise() {
    let (cl, v) = (0.1, 20.0);
    let ke = cl / v;
    let dose = 100.0;

    let mut rng = StdRng::seed_from_u64(2024);
    let noise = Normal::new(0.0, 0.02).unwrap();
    let mut builder = Sample::builder("noisy")
        .dose("Dose1; iv; bolus t=0 d=100; min; mg")
        .unwrap();
    for &t in &SAMPLE_TIMES {
        let c = dose / v * (-ke * t).exp();
        builder = builder.observation(t, c * (1.0 + noise.sample(&mut rng)));
    }

    let context = FitContext::new(
        builder.build(),
        Box::new(OneCompartment::new(0.0, 1.0)),
        OdeGrid::new(0.0, 500.0, 0.5),
        "(0.001,10);(0.1,500)",
        Loss::Linear,
    )
    .unwrap();

    let point = fit(&context, &FitOptions::default())
        .unwrap()
        .parameter_values();
    let population = bootstrap_fit(
        &context,
        &point,
        &BootstrapOptions {
            n_resamples: 200,
            seed: 7,
            ..Default::default()
        },
    )
    .unwrap();

    let intervals = population.percentile_intervals(95.0);
    assert!(intervals[0].contains(cl), "Cl interval {:?}", intervals[0]);
    assert!(intervals[1].contains(v), "V interval {:?}", intervals[1]);
}

#[test]
fn fit_result_serializes_for_the_workflow_layer() {
    let context = iv_context(iv_sample(0.1, 20.0, 100.0), "(0.001,10);(0.1,500)");
    let result = fit(&context, &FitOptions::default()).unwrap();
    let json = result.to_json().unwrap();
    assert!(json.contains("\"Cl\""));
    assert!(json.contains("converged"));
}

#[test]
fn refined_grid_reuses_fitted_parameters() {
    let context = iv_context(iv_sample(0.1, 20.0, 100.0), "(0.001,10);(0.1,500)");
    let result = fit(&context, &FitOptions::default()).unwrap();
    let point = result.parameter_values();

    // Re-simulate at a 4x finer step with the fitted parameters; the
    // predictions barely move
    let coarse = context.predict(&point).unwrap();
    let fine_context = FitContext::new(
        context.sample().clone(),
        Box::new(OneCompartment::new(0.0, 1.0)),
        context.grid().refined(4.0),
        "(0.001,10);(0.1,500)",
        Loss::Linear,
    )
    .unwrap();
    let fine = fine_context.predict(&point).unwrap();
    for (a, b) in coarse.iter().zip(&fine) {
        assert_relative_eq!(a, b, max_relative = 1e-3);
    }
}
