//! Grade smoother window and rate limiter.

use crankride::sensors::incline::GradeSmoother;
use std::time::{Duration, Instant};

/// Deterministic noisy grade sequence.
fn noisy_grade(i: u32) -> f64 {
    let x = f64::from(i);
    12.0 * (x * 0.37).sin() + 6.0 * (x * 1.91).cos() - 2.0
}

#[test]
fn test_rate_limit_bound_holds_for_any_input() {
    let start = Instant::now();
    let max_rate = 1.0;
    let mut smoother = GradeSmoother::new(50.0, max_rate, start);

    let mut now = start;
    let mut previous = smoother.last_emitted();
    let mut last_emission = start;
    for i in 0..400 {
        // Irregular spacing between 100 ms and 2.6 s
        now += Duration::from_millis(100 + u64::from(i * 37 % 2500));
        smoother.push(f64::from(i) * 4.0, noisy_grade(i));

        if i % 3 == 0 {
            let target = smoother.current_target(now);
            let dt = now.duration_since(last_emission).as_secs_f64();
            assert!(
                (target - previous).abs() <= max_rate * dt + 1e-9,
                "step {} exceeds {} over {dt}s",
                (target - previous).abs(),
                max_rate * dt
            );
            previous = target;
            last_emission = now;
        }
    }
}

#[test]
fn test_converges_to_window_mean() {
    let start = Instant::now();
    let mut smoother = GradeSmoother::new(50.0, 1.0, start);
    for (d, g) in [(0.0, 4.0), (20.0, 6.0), (40.0, 5.0)] {
        smoother.push(d, g);
    }

    assert_eq!(smoother.current_target(start + Duration::from_secs(2)), 2.0);
    assert_eq!(smoother.current_target(start + Duration::from_secs(10)), 5.0);
}

#[test]
fn test_window_drops_old_samples() {
    let start = Instant::now();
    let mut smoother = GradeSmoother::new(50.0, 100.0, start);
    smoother.push(0.0, 10.0);
    smoother.push(30.0, 10.0);
    smoother.push(70.0, 0.0);
    smoother.push(75.0, 0.0);

    assert_eq!(smoother.window_len(), 3);
    assert!((smoother.window_mean() - 10.0 / 3.0).abs() < 1e-9);
}
