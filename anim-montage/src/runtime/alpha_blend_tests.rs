use super::{AlphaBlend, blend_alpha};
use crate::BlendOption;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-5,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

const ALL_OPTIONS: [BlendOption; 14] = [
    BlendOption::Linear,
    BlendOption::Cubic,
    BlendOption::HermiteCubic,
    BlendOption::Sinusoidal,
    BlendOption::QuadraticInOut,
    BlendOption::CubicInOut,
    BlendOption::QuarticInOut,
    BlendOption::QuinticInOut,
    BlendOption::CircularIn,
    BlendOption::CircularOut,
    BlendOption::CircularInOut,
    BlendOption::ExpIn,
    BlendOption::ExpOut,
    BlendOption::ExpInOut,
];

#[test]
fn every_curve_starts_at_zero_and_ends_at_one() {
    for option in ALL_OPTIONS {
        assert_approx(blend_alpha(option, 0.0), 0.0);
        assert_approx(blend_alpha(option, 1.0), 1.0);
        assert_approx(blend_alpha(option, 2.0), 1.0);
    }
}

#[test]
fn symmetric_curves_pass_through_the_midpoint() {
    for option in [
        BlendOption::Linear,
        BlendOption::Cubic,
        BlendOption::Sinusoidal,
        BlendOption::QuadraticInOut,
        BlendOption::QuinticInOut,
        BlendOption::CircularInOut,
        BlendOption::ExpInOut,
    ] {
        assert_approx(blend_alpha(option, 0.5), 0.5);
    }
    assert_approx(blend_alpha(BlendOption::Cubic, 0.25), 0.15625);
}

#[test]
fn linear_blend_tracks_elapsed_time() {
    let mut blend = AlphaBlend::new(0.5);
    assert_approx(blend.blended_value(), 0.0);
    assert!(!blend.is_complete());

    assert_approx(blend.update(0.25), 0.0);
    assert_approx(blend.alpha(), 0.5);
    assert_approx(blend.blended_value(), 0.5);

    let leftover = blend.update(0.5);
    assert_approx(leftover, 0.25);
    assert!(blend.is_complete());
    assert_approx(blend.blended_value(), 1.0);
}

#[test]
fn zero_blend_time_snaps_to_desired_value() {
    let blend = AlphaBlend::new(0.0);
    assert!(blend.is_complete());
    assert_approx(blend.blended_value(), 1.0);
}

#[test]
fn retargeting_restarts_from_current_value() {
    let mut blend = AlphaBlend::new(1.0);
    blend.update(0.5);
    assert_approx(blend.blended_value(), 0.5);

    blend.set_desired_value(0.0);
    assert_approx(blend.begin_value(), 0.5);
    assert_approx(blend.blend_time_remaining(), 1.0);

    blend.update(0.5);
    assert_approx(blend.blended_value(), 0.25);
}

#[test]
fn set_value_cancels_a_running_blend() {
    let mut blend = AlphaBlend::new(1.0);
    blend.update(0.25);
    blend.set_value(0.75);
    assert!(blend.is_complete());
    assert_approx(blend.blended_value(), 0.75);
    assert_approx(blend.update(0.1), 0.1);
    assert_approx(blend.blended_value(), 0.75);
}

#[test]
fn switching_curves_mid_blend_keeps_the_current_value() {
    let mut blend = AlphaBlend::new(1.0);
    blend.update(0.5);
    assert_approx(blend.blended_value(), 0.5);

    blend.set_blend_option(BlendOption::ExpIn);
    assert_approx(blend.blended_value(), 0.5);
    assert_eq!(blend.blend_option(), BlendOption::ExpIn);

    blend.set_blend_time(0.5);
    blend.set_desired_value(0.0);
    assert_approx(blend.begin_value(), 0.5);
    assert_approx(blend.blended_value(), 0.5);

    blend.update(0.5);
    assert!(blend.is_complete());
    assert_approx(blend.blended_value(), 0.0);
}
