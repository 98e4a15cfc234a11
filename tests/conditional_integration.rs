use gmrf::{
    AxisSpec, BoundaryLayout, ConditionalDraw, ConditionalSpec, CorrelationKernel, Grid,
    GridPartition, apply_kernel, cross_distance, pairwise_distance, sample_conditional,
    sample_replicates, truncate_to_neighbors,
};
use ndarray::{Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn square_grid(n: usize) -> Grid {
    Grid::new(
        AxisSpec::new(0.0, n as f64, 1.0),
        AxisSpec::new(0.0, n as f64, 1.0),
    )
    .expect("valid grid")
}

#[test]
fn corner_partition_matches_four_square_blocks() {
    let grid = square_grid(20);
    let partition = GridPartition::new(&grid, BoundaryLayout::Corners { width: 4 });
    assert_eq!(partition.boundary().len(), 4 * 16);
    assert_eq!(partition.interior().len(), 400 - 64);

    for &(i, j) in &[(0, 0), (3, 3), (0, 19), (19, 0), (16, 16), (19, 19)] {
        assert!(partition.is_boundary(grid.index(i, j)), "({i}, {j})");
    }
    for &(i, j) in &[(4, 0), (0, 4), (10, 10), (15, 19)] {
        assert!(!partition.is_boundary(grid.index(i, j)), "({i}, {j})");
    }
}

#[test]
fn conditional_draw_is_seeded_and_complete() {
    let grid = square_grid(12);
    let spec = ConditionalSpec {
        kernel: CorrelationKernel::Gaussian,
        bandwidth: 1.0,
        radius: Some(2.0),
        tau: 0.1,
        layout: BoundaryLayout::Corners { width: 3 },
        draw: ConditionalDraw::Direct,
        anisotropy: None,
    };
    let a = sample_conditional(&grid, &spec, &mut StdRng::seed_from_u64(1337)).expect("draw");
    let b = sample_conditional(&grid, &spec, &mut StdRng::seed_from_u64(1337)).expect("draw");
    assert_eq!(a, b);
    assert_eq!(a.len(), 144);
    assert!(a.iter().all(|v| v.is_finite() && *v != 0.0));
}

#[test]
fn backsolve_flavour_runs_on_a_sparse_neighborhood() {
    let grid = square_grid(10);
    let spec = ConditionalSpec {
        kernel: CorrelationKernel::Matern32,
        bandwidth: 0.4,
        radius: Some(1.0),
        tau: 0.5,
        layout: BoundaryLayout::Frame { width: 2 },
        draw: ConditionalDraw::Backsolve,
        anisotropy: None,
    };
    let z = sample_conditional(&grid, &spec, &mut StdRng::seed_from_u64(8)).expect("draw");
    assert_eq!(z.len(), 100);
    assert!(z.iter().all(|v| v.is_finite()));
}

#[test]
fn parallel_replicates_match_sequential_seeding() {
    let grid = square_grid(8);
    let spec = ConditionalSpec {
        radius: Some(1.5),
        layout: BoundaryLayout::Corners { width: 2 },
        ..Default::default()
    };
    let draws = sample_replicates(6, 77, |rng| sample_conditional(&grid, &spec, rng))
        .expect("replicates");
    let again = sample_replicates(6, 77, |rng| sample_conditional(&grid, &spec, rng))
        .expect("replicates");
    assert_eq!(draws, again);
    for pair in draws.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}

#[test]
fn interior_draw_is_conditioned_on_the_boundary_draw() {
    let grid = square_grid(4);
    let tau = 1.0;
    let radius = 1.5;
    let spec = ConditionalSpec {
        kernel: CorrelationKernel::Gaussian,
        bandwidth: 1.0,
        radius: Some(radius),
        tau,
        layout: BoundaryLayout::Corners { width: 1 },
        draw: ConditionalDraw::Direct,
        anisotropy: None,
    };
    let partition = GridPartition::new(&grid, spec.layout);
    let pts_a = grid.points().select(Axis(0), partition.interior());
    let pts_b = grid.points().select(Axis(0), partition.boundary());

    let d_bb = pairwise_distance(pts_b.view(), None).expect("distances");
    let k_bb = apply_kernel(d_bb.view(), spec.kernel, spec.bandwidth).expect("kernel");
    let q_bb = truncate_to_neighbors(k_bb, d_bb.view(), radius, true).expect("truncation");
    let d_ab = cross_distance(pts_a.view(), pts_b.view(), None).expect("distances");
    let k_ab = apply_kernel(d_ab.view(), spec.kernel, spec.bandwidth).expect("kernel");
    let q_ab = truncate_to_neighbors(k_ab, d_ab.view(), radius, false).expect("truncation");

    // x_B has covariance tau Q_BB and x_A has mean -tau Q_AB x_B, so
    // Cov(x_A, x_B) = -tau^2 Q_AB Q_BB.
    let expected = q_ab.dot(&q_bb) * (-tau * tau);

    let n = 20_000;
    let draws = sample_replicates(n, 2025, |rng| sample_conditional(&grid, &spec, rng))
        .expect("replicates");
    let (na, nb) = (partition.interior().len(), partition.boundary().len());
    let mut mean_a = vec![0.0; na];
    let mut mean_b = vec![0.0; nb];
    let mut cross = Array2::<f64>::zeros((na, nb));
    for z in &draws {
        for (a, &ka) in partition.interior().iter().enumerate() {
            mean_a[a] += z[ka];
            for (b, &kb) in partition.boundary().iter().enumerate() {
                cross[[a, b]] += z[ka] * z[kb];
            }
        }
        for (b, &kb) in partition.boundary().iter().enumerate() {
            mean_b[b] += z[kb];
        }
    }
    let n = n as f64;
    for a in 0..na {
        for b in 0..nb {
            let cov = cross[[a, b]] / n - (mean_a[a] / n) * (mean_b[b] / n);
            assert!(
                (cov - expected[[a, b]]).abs() < 0.04,
                "Cov(x_A[{a}], x_B[{b}]) = {cov:.4}, expected {:.4}",
                expected[[a, b]]
            );
        }
    }
    // The corner neighbors carry a clearly negative cross-covariance.
    assert!(expected.iter().any(|v| *v < -0.3));
}
