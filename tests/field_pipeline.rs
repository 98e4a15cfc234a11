use gmrf::linalg::utils::max_asymmetry;
use gmrf::{
    AxisSpec, CorrelationKernel, Decomposition, FieldConfig, FieldError, Grid, NullspacePenalty,
    PrecisionModel, SamplingTarget, build_precision, generate_field, penalize_nullspace,
    sample_cholesky, sample_eigen,
};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn grid_20x20() -> Grid {
    Grid::new(AxisSpec::new(0.0, 10.0, 0.5), AxisSpec::new(0.0, 10.0, 0.5))
        .expect("valid 20x20 grid")
}

fn gaussian_model(radius: f64, tau: f64) -> PrecisionModel {
    PrecisionModel::KernelTruncated {
        kernel: CorrelationKernel::Gaussian,
        bandwidth: 1.0,
        radius: Some(radius),
        tau,
        anisotropy: None,
    }
}

#[test]
fn default_grid_has_four_hundred_points() {
    let grid = grid_20x20();
    assert_eq!(grid.shape(), (20, 20));
    assert_eq!(grid.len(), 400);
    assert_eq!(grid.points()[[21, 0]], 0.5);
    assert_eq!(grid.points()[[21, 1]], 0.5);
}

#[test]
fn every_precision_strategy_is_symmetric_on_the_default_grid() {
    let grid = grid_20x20();
    let models = [
        gaussian_model(4.0, 0.1),
        PrecisionModel::DifferencePenalty { order: 2, tau: 1.0 },
        PrecisionModel::Autoregressive {
            kernel: CorrelationKernel::Gaussian,
            bandwidth: 1.0,
            radius: Some(1.0),
            rho: 0.95,
            tau: 1.0,
            anisotropy: None,
        },
    ];
    for model in &models {
        let q = build_precision(&grid, model).expect("precision should build");
        assert_eq!(q.matrix().dim(), (400, 400));
        assert_eq!(max_asymmetry(q.matrix().view()), 0.0, "{}", model.name());
    }
}

#[test]
fn nullspace_penalty_makes_difference_precision_invertible() {
    let grid = grid_20x20();
    let q = build_precision(&grid, &PrecisionModel::DifferencePenalty { order: 1, tau: 1.0 })
        .expect("difference precision");
    let pen = penalize_nullspace(q.matrix(), &NullspacePenalty::default())
        .expect("penalized precision should be invertible");
    assert_eq!(pen.nullspace_dim, 1);

    let product = pen.sigma.dot(&pen.pen_q);
    let mut worst = 0.0_f64;
    for i in 0..400 {
        for j in 0..400 {
            let target = if i == j { 1.0 } else { 0.0 };
            worst = worst.max((product[[i, j]] - target).abs());
        }
    }
    assert!(worst < 1e-6, "max |Sigma penQ - I| = {worst:.3e}");
}

#[test]
fn rank_deficient_precision_without_nullspace_weight_is_singular() {
    let grid = Grid::new(AxisSpec::new(0.0, 6.0, 1.0), AxisSpec::new(0.0, 6.0, 1.0))
        .expect("valid grid");
    let q = build_precision(&grid, &PrecisionModel::DifferencePenalty { order: 2, tau: 1.0 })
        .expect("difference precision");
    let penalty = NullspacePenalty {
        sig_q0: 0.0,
        ..Default::default()
    };
    match penalize_nullspace(q.matrix(), &penalty) {
        Err(FieldError::SingularPrecision {
            dim, nullspace_dim, ..
        }) => {
            assert_eq!(dim, 36);
            assert_eq!(nullspace_dim, 4);
        }
        other => panic!("expected SingularPrecision, got {other:?}"),
    }
}

#[test]
fn identical_seed_and_parameters_reproduce_every_decomposition() {
    let grid = Grid::new(AxisSpec::new(0.0, 5.0, 1.0), AxisSpec::new(0.0, 5.0, 1.0))
        .expect("valid grid");
    let q = build_precision(&grid, &gaussian_model(1.5, 1.0)).expect("precision");
    let pen = penalize_nullspace(q.matrix(), &NullspacePenalty::default()).expect("penalized");

    let draw_all = |seed: u64| -> Vec<Array1<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        vec![
            sample_eigen(SamplingTarget::Covariance(&pen.sigma), 1.0, &mut rng)
                .expect("eigen covariance draw"),
            sample_eigen(SamplingTarget::Precision(q.matrix()), 0.1, &mut rng)
                .expect("eigen precision draw"),
            sample_cholesky(&pen.pen_q, None, &mut rng).expect("cholesky draw"),
        ]
    };
    let first = draw_all(2024);
    let second = draw_all(2024);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.len(), 25);
        assert_eq!(a, b);
    }
}

#[test]
fn pipeline_from_json_config_is_reproducible() {
    let json = r#"{
        "x_grid": {"start": 0.0, "stop": 10.0, "step": 0.5},
        "y_grid": {"start": 0.0, "stop": 10.0, "step": 0.5},
        "model": {"type": "difference_penalty", "order": 1, "tau": 1.0},
        "nullspace": {"sig_q": 0.01, "sig_q0": 0.01, "threshold": 0.001},
        "decomposition": "cholesky",
        "seed": 1337
    }"#;
    let config = FieldConfig::from_json_str(json).expect("config parses");
    assert_eq!(config.decomposition, Decomposition::Cholesky);

    let a = generate_field(&config).expect("field");
    let b = generate_field(&config).expect("field");
    assert_eq!(a.coefficients, b.coefficients);
    assert_eq!(a.seed, 1337);

    // The surface is defined over the grid domain and extrapolates beyond it.
    let points = Array2::from_shape_vec((3, 2), vec![0.0, 0.0, 5.0, 5.0, 11.0, -1.0])
        .expect("point shape");
    let values = a.surface.evaluate(points.view()).expect("surface evaluation");
    assert!(values.iter().all(|v| v.is_finite()));
    assert_eq!(values, b.surface.evaluate(points.view()).expect("surface evaluation"));
}

#[test]
fn unknown_names_fail_with_descriptive_errors() {
    assert!(matches!(
        "spherical".parse::<CorrelationKernel>(),
        Err(FieldError::UnknownKernel { .. })
    ));
    let err = "lu".parse::<Decomposition>().expect_err("lu is not supported");
    assert!(err.to_string().contains("'lu'"));

    let json = r#"{
        "x_grid": {"start": 0.0, "stop": 1.0, "step": 0.5},
        "y_grid": {"start": 0.0, "stop": 1.0, "step": 0.5},
        "decomposition": "qr"
    }"#;
    match FieldConfig::from_json_str(json) {
        Err(FieldError::UnsupportedDecomposition { name }) => assert_eq!(name, "qr"),
        other => panic!("expected UnsupportedDecomposition, got {other:?}"),
    }

    let json = r#"{
        "x_grid": {"start": 0.0, "stop": 1.0, "step": 0.5},
        "y_grid": {"start": 0.0, "stop": 1.0, "step": 0.5},
        "decomposition": "eigen",
        "model": {
            "type": "kernel_truncated",
            "kernel": "spherical",
            "bandwidth": 1.0,
            "tau": 1.0
        }
    }"#;
    match FieldConfig::from_json_str(json) {
        Err(FieldError::UnknownKernel { name }) => assert_eq!(name, "spherical"),
        other => panic!("expected UnknownKernel, got {other:?}"),
    }
}
