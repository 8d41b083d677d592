//! Exactness of ball-gather queries and the neighbor iteration protocol,
//! checked against brute force, with and without periodic wrap.

use kdtree::bounds::periodic_dist2;
use kdtree::{SpatialIndex, TreeNode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smooth::{KernelShape, Property, SmoothError, SmoothingContext, StepOutcome};

fn built_index(positions: Vec<[f64; 3]>) -> SpatialIndex<f64> {
    let masses = vec![1.0; positions.len()];
    let mut index = SpatialIndex::new(positions, masses, 8).unwrap();
    let nodes = vec![TreeNode::default(); index.node_count()];
    index.build(nodes, 1).unwrap();
    index
}

fn random_cloud(n: usize, scale: f64, seed: u64) -> Vec<[f64; 3]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            [
                scale * rng.gen::<f64>(),
                scale * rng.gen::<f64>(),
                scale * rng.gen::<f64>(),
            ]
        })
        .collect()
}

fn brute_force_in_sphere(
    positions: &[[f64; 3]],
    center: [f64; 3],
    radius: f64,
    period: [f64; 3],
) -> Vec<usize> {
    positions
        .iter()
        .enumerate()
        .filter(|(_, p)| periodic_dist2(p, &center, &period) <= radius * radius)
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn sphere_query_matches_brute_force() {
    let positions = random_cloud(500, 1.0, 21);
    let index = built_index(positions.clone());
    let ctx = SmoothingContext::new(&index, 16, 1, 0.0).unwrap();

    for (center, radius) in [
        ([0.5, 0.5, 0.5], 0.25),
        ([0.1, 0.9, 0.4], 0.3),
        ([0.0, 0.0, 0.0], 0.5),
        ([2.0, 2.0, 2.0], 0.5), // empty
    ] {
        let mut found = ctx.particles_in_sphere(&index, center, radius);
        found.sort_unstable();
        let expected =
            brute_force_in_sphere(&positions, center, radius, [f64::INFINITY; 3]);
        assert_eq!(found, expected, "center {center:?} radius {radius}");
    }
}

#[test]
fn periodic_sphere_query_matches_brute_force() {
    let positions = random_cloud(400, 10.0, 22);
    let index = built_index(positions.clone());
    let ctx = SmoothingContext::new(&index, 16, 1, 10.0).unwrap();

    // Centers near corners and faces force wrap on one or more axes.
    for center in [
        [0.2, 0.3, 9.8],
        [9.9, 0.1, 0.1],
        [0.0, 0.0, 0.0],
        [5.0, 9.95, 5.0],
    ] {
        let mut found = ctx.particles_in_sphere(&index, center, 1.5);
        found.sort_unstable();
        let expected = brute_force_in_sphere(&positions, center, 1.5, [10.0; 3]);
        assert_eq!(found, expected, "center {center:?}");
    }
}

#[test]
fn corner_particle_found_only_under_wrap() {
    let positions = vec![
        [0.5, 0.5, 0.5],
        [9.5, 9.5, 9.5],
        [0.5, 9.5, 0.5],
        [9.5, 0.5, 9.5],
    ];
    let index = built_index(positions);

    // All four corners are within sqrt(0.75) of the origin through the
    // periodic boundary.
    let periodic = SmoothingContext::new(&index, 2, 1, 10.0).unwrap();
    let mut found = periodic.particles_in_sphere(&index, [0.0, 0.0, 0.0], 1.0);
    found.sort_unstable();
    assert_eq!(found, vec![0, 1, 2, 3]);

    // Without wrap only the corner nearest the origin is in range.
    let open = SmoothingContext::new(&index, 2, 1, 0.0).unwrap();
    let found = open.particles_in_sphere(&index, [0.0, 0.0, 0.0], 1.0);
    assert_eq!(found, vec![0]);
}

#[test]
fn context_rejects_excess_neighbor_count() {
    let index = built_index(random_cloud(10, 1.0, 23));
    let err = SmoothingContext::new(&index, 11, 1, 0.0).unwrap_err();
    assert!(matches!(
        err,
        SmoothError::TooManyNeighbors {
            requested: 11,
            available: 10
        }
    ));
}

#[test]
fn context_rejects_period_smaller_than_cloud() {
    let index = built_index(random_cloud(50, 10.0, 24));
    let err = SmoothingContext::new(&index, 8, 1, 5.0).unwrap_err();
    assert!(matches!(err, SmoothError::BoxTooSmall { .. }));
}

#[test]
fn context_requires_built_tree() {
    let index = SpatialIndex::<f64>::new(random_cloud(10, 1.0, 25), vec![1.0; 10], 8).unwrap();
    assert!(SmoothingContext::new(&index, 4, 1, 0.0).is_err());
}

#[test]
fn step_iteration_visits_every_particle_exactly_once() {
    let positions = random_cloud(200, 1.0, 26);
    let mut index = built_index(positions);
    index.bind_smoothing_lengths(vec![0.0; 200]).unwrap();

    let mut ctx = SmoothingContext::new(&index, 8, 1, 0.0).unwrap();
    ctx.rewind();

    let mut visited = Vec::new();
    loop {
        match ctx
            .step(&mut index, Property::SmoothingLength, KernelShape::CubicSpline)
            .unwrap()
        {
            StepOutcome::Done => break,
            StepOutcome::Particle { index: orig, .. } => visited.push(orig),
        }
    }
    visited.sort_unstable();
    let expected: Vec<usize> = (0..200).collect();
    assert_eq!(visited, expected);

    // Once exhausted, stepping keeps reporting Done until a rewind.
    let outcome = ctx
        .step(&mut index, Property::SmoothingLength, KernelShape::CubicSpline)
        .unwrap();
    assert_eq!(outcome, StepOutcome::Done);
}

#[test]
fn step_skips_inactive_particles() {
    let positions = random_cloud(50, 1.0, 27);
    let mut index = built_index(positions);
    index.bind_smoothing_lengths(vec![0.0; 50]).unwrap();
    let mut mask = vec![true; 50];
    mask[7] = false;
    mask[31] = false;
    index.set_active_mask(&mask).unwrap();

    let mut ctx = SmoothingContext::new(&index, 4, 1, 0.0).unwrap();
    ctx.rewind();
    let mut visited = Vec::new();
    while let StepOutcome::Particle { index: orig, .. } = ctx
        .step(&mut index, Property::SmoothingLength, KernelShape::CubicSpline)
        .unwrap()
    {
        visited.push(orig);
    }
    assert_eq!(visited.len(), 48);
    assert!(!visited.contains(&7));
    assert!(!visited.contains(&31));
}

#[test]
fn smoothing_lengths_match_brute_force_k_nearest() {
    let positions = random_cloud(300, 1.0, 28);
    let mut index = built_index(positions.clone());
    index.bind_smoothing_lengths(vec![0.0; 300]).unwrap();

    let k = 12;
    let mut ctx = SmoothingContext::new(&index, k, 1, 0.0).unwrap();
    ctx.rewind();
    while let StepOutcome::Particle { .. } = ctx
        .step(&mut index, Property::SmoothingLength, KernelShape::CubicSpline)
        .unwrap()
    {}

    let smoothing = index.smoothing_lengths().unwrap();
    for i in (0..300).step_by(37) {
        let mut d2: Vec<f64> = positions
            .iter()
            .map(|p| periodic_dist2(p, &positions[i], &[f64::INFINITY; 3]))
            .collect();
        d2.sort_by(|a, b| a.partial_cmp(b).unwrap());
        // The particle itself counts as its own nearest neighbor.
        let expected = 0.5 * d2[k - 1].sqrt();
        assert!(
            (smoothing[i] - expected).abs() < 1e-12,
            "particle {i}: h={} expected={expected}",
            smoothing[i]
        );
    }
}

#[test]
fn step_reports_neighbor_lists() {
    let positions: Vec<[f64; 3]> = (0..10).map(|i| [i as f64, 0.0, 0.0]).collect();
    let mut index = built_index(positions);
    index.bind_smoothing_lengths(vec![0.0; 10]).unwrap();

    let mut ctx = SmoothingContext::new(&index, 3, 1, 0.0).unwrap();
    ctx.rewind();
    let outcome = ctx
        .step(&mut index, Property::SmoothingLength, KernelShape::CubicSpline)
        .unwrap();
    let StepOutcome::Particle {
        index: orig,
        neighbors,
        ..
    } = outcome
    else {
        panic!("expected a particle");
    };
    assert_eq!(neighbors, 3);
    let list: Vec<(usize, f64)> = ctx.neighbors(&index).collect();
    assert_eq!(list.len(), 3);
    // The claimed particle appears in its own list at distance zero.
    assert!(list.iter().any(|&(j, d2)| j == orig && d2 == 0.0));
}
