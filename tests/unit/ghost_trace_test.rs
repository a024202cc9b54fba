//! Ghost trace interpolation.

use crankride::recording::ghost::{GhostPoint, GhostTrace};

fn trace(points: &[(f64, f64)]) -> GhostTrace {
    GhostTrace::new(
        points
            .iter()
            .map(|&(distance_m, elapsed_time_s)| GhostPoint {
                distance_m,
                elapsed_time_s,
            })
            .collect(),
    )
    .unwrap()
}

#[test]
fn test_rider_behind_ghost() {
    let ghost = trace(&[(0.0, 0.0), (1000.0, 100.0)]);

    // Rider reached 500 m after 60 s
    let time_delta = 60.0 - ghost.time_at_distance(500.0);
    let distance_delta = ghost.distance_at_time(60.0) - 500.0;

    assert!((time_delta - 10.0).abs() < 1e-9);
    assert!((distance_delta - 100.0).abs() < 1e-9);
}

#[test]
fn test_piecewise_interpolation() {
    let ghost = trace(&[(0.0, 0.0), (100.0, 20.0), (300.0, 40.0)]);

    assert!((ghost.time_at_distance(50.0) - 10.0).abs() < 1e-9);
    assert!((ghost.time_at_distance(200.0) - 30.0).abs() < 1e-9);
    assert!((ghost.distance_at_time(30.0) - 200.0).abs() < 1e-9);
    assert_eq!(ghost.total_time_s(), 40.0);
    assert_eq!(ghost.total_distance_m(), 300.0);
}

#[test]
fn test_samples_with_pause_collapse() {
    // (elapsed, distance) rows as logged, including a stop at 50 m
    let ghost = GhostTrace::from_samples(&[
        (3.0, 30.0),
        (1.0, 10.0),
        (2.0, 20.0),
        (4.0, 50.0),
        (5.0, 50.0),
        (6.0, 50.0),
        (7.0, 60.0),
    ])
    .unwrap();

    assert_eq!(ghost.points().len(), 5);
    assert_eq!(ghost.time_at_distance(50.0), 4.0);
    assert!((ghost.time_at_distance(55.0) - 5.5).abs() < 1e-9);
}
