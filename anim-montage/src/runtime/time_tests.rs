use super::{AdvanceType, advance_time};

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-5,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

#[test]
fn moves_inside_range_without_clamping() {
    let mut time = 0.25;
    assert_eq!(advance_time(false, 0.5, &mut time, 1.0), AdvanceType::Default);
    assert_approx(time, 0.75);
}

#[test]
fn landing_exactly_on_the_end_is_not_finished() {
    let mut time = 0.5;
    assert_eq!(advance_time(false, 0.5, &mut time, 1.0), AdvanceType::Default);
    assert_approx(time, 1.0);
}

#[test]
fn clamps_at_both_ends_when_not_looping() {
    let mut time = 0.8;
    assert_eq!(advance_time(false, 0.5, &mut time, 1.0), AdvanceType::Finished);
    assert_approx(time, 1.0);

    let mut time = 0.2;
    assert_eq!(advance_time(false, -0.5, &mut time, 1.0), AdvanceType::Finished);
    assert_approx(time, 0.0);
}

#[test]
fn wraps_in_both_directions_when_looping() {
    let mut time = 0.8;
    assert_eq!(advance_time(true, 0.5, &mut time, 1.0), AdvanceType::Looped);
    assert_approx(time, 0.3);

    let mut time = 0.2;
    assert_eq!(advance_time(true, -0.5, &mut time, 1.0), AdvanceType::Looped);
    assert_approx(time, 0.7);
}

#[test]
fn zero_length_range_loops_to_start() {
    let mut time = 0.0;
    assert_eq!(advance_time(true, 0.1, &mut time, 0.0), AdvanceType::Looped);
    assert_approx(time, 0.0);
}
