//! Route grade lookups against the resampled profile.

use crankride::world::route::{demo_route, RouteGeometry, RoutePoint, RouteProfile};

fn bracketing_slope(route: &RouteGeometry, distance_m: f64) -> f64 {
    let points = route.resampled();
    let last = points.len() - 2;
    let i = points
        .windows(2)
        .position(|w| distance_m >= w[0].distance_m && distance_m < w[1].distance_m)
        .unwrap_or(if distance_m < points[0].distance_m { 0 } else { last });
    let (a, b) = (points[i], points[i + 1]);
    (b.elevation_m - a.elevation_m) / (b.distance_m - a.distance_m) * 100.0
}

#[test]
fn test_grade_matches_bracketing_resampled_slope() {
    let route = demo_route().unwrap();
    let total = route.total_distance_m();

    let mut d = -20.0;
    while d <= total + 20.0 {
        let expected = bracketing_slope(&route, d);
        assert!(
            (route.grade_at(d) - expected).abs() < 1e-9,
            "grade mismatch at {d} m"
        );
        d += 3.7;
    }
}

#[test]
fn test_uneven_source_points() {
    let route = RouteGeometry::new(
        "Uneven",
        vec![
            RoutePoint {
                distance_m: 0.0,
                elevation_m: 10.0,
            },
            RoutePoint {
                distance_m: 3.0,
                elevation_m: 10.5,
            },
            RoutePoint {
                distance_m: 47.0,
                elevation_m: 12.0,
            },
            RoutePoint {
                distance_m: 47.0,
                elevation_m: 12.0,
            },
            RoutePoint {
                distance_m: 95.0,
                elevation_m: 9.0,
            },
        ],
    )
    .unwrap();

    assert_eq!(route.resampled().len(), 11);
    assert_eq!(route.resampled().last().unwrap().distance_m, 95.0);
    for d in [0.0, 4.9, 10.0, 46.0, 47.0, 89.9, 90.0, 94.9, 95.0, 120.0] {
        assert!((route.grade_at(d) - bracketing_slope(&route, d)).abs() < 1e-9);
    }
}

#[test]
fn test_elevation_interpolates_raw_points() {
    let route = demo_route().unwrap();
    assert_eq!(route.elevation_at(0.0), 100.0);
    assert!((route.elevation_at(500.0) - 125.0).abs() < 1e-9);
    assert!((route.elevation_at(4500.0) - 115.0).abs() < 1e-9);
    assert_eq!(route.elevation_at(1e9), 180.0);
}
