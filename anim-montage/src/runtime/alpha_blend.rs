use crate::{BlendOption, TIME_EPSILON};
use std::f32::consts::{FRAC_PI_2, PI};

/// Timed blend from a begin value to a desired value through an easing curve.
///
/// Changing the desired value or the blend time restarts the blend from the
/// current blended value.
#[derive(Clone, Debug, PartialEq)]
pub struct AlphaBlend {
    option: BlendOption,
    begin_value: f32,
    desired_value: f32,
    blend_time: f32,
    blend_time_remaining: f32,
    alpha_lin: f32,
    blended_value: f32,
}

impl Default for AlphaBlend {
    fn default() -> Self {
        Self {
            option: BlendOption::Linear,
            begin_value: 0.0,
            desired_value: 0.0,
            blend_time: 0.0,
            blend_time_remaining: 0.0,
            alpha_lin: 1.0,
            blended_value: 0.0,
        }
    }
}

impl AlphaBlend {
    pub fn new(blend_time: f32) -> Self {
        let mut blend = Self {
            desired_value: 1.0,
            ..Self::default()
        };
        blend.set_blend_time(blend_time);
        blend
    }

    pub fn blend_option(&self) -> BlendOption {
        self.option
    }

    pub fn begin_value(&self) -> f32 {
        self.begin_value
    }

    pub fn desired_value(&self) -> f32 {
        self.desired_value
    }

    pub fn blend_time(&self) -> f32 {
        self.blend_time
    }

    pub fn blend_time_remaining(&self) -> f32 {
        self.blend_time_remaining
    }

    pub fn alpha(&self) -> f32 {
        self.alpha_lin
    }

    pub fn blended_value(&self) -> f32 {
        self.blended_value
    }

    pub fn is_complete(&self) -> bool {
        self.alpha_lin >= 1.0
    }

    /// Takes effect from the next blend restart; the current value is kept.
    pub fn set_blend_option(&mut self, option: BlendOption) {
        self.option = option;
    }

    pub fn set_blend_time(&mut self, blend_time: f32) {
        self.blend_time = blend_time.max(0.0);
        self.reset_alpha();
    }

    pub fn set_desired_value(&mut self, desired_value: f32) {
        self.desired_value = desired_value;
        self.reset_alpha();
    }

    /// Snaps straight to `value` with no blend in progress.
    pub fn set_value(&mut self, value: f32) {
        self.begin_value = value;
        self.desired_value = value;
        self.blended_value = value;
        self.blend_time_remaining = 0.0;
        self.alpha_lin = 1.0;
    }

    /// Advances the blend; returns the part of `delta` left over once the
    /// blend completes.
    pub fn update(&mut self, delta: f32) -> f32 {
        if self.is_complete() {
            return delta;
        }
        self.blend_time_remaining -= delta;
        let mut leftover = 0.0;
        if self.blend_time_remaining <= TIME_EPSILON {
            leftover = (-self.blend_time_remaining).max(0.0);
            self.blend_time_remaining = 0.0;
            self.alpha_lin = 1.0;
        } else {
            self.alpha_lin = (1.0 - self.blend_time_remaining / self.blend_time).clamp(0.0, 1.0);
        }
        self.refresh_blended_value();
        leftover
    }

    fn reset_alpha(&mut self) {
        self.begin_value = self.blended_value;
        if self.blend_time <= 0.0 || (self.desired_value - self.begin_value).abs() <= TIME_EPSILON {
            self.blend_time_remaining = 0.0;
            self.alpha_lin = 1.0;
        } else {
            self.blend_time_remaining = self.blend_time;
            self.alpha_lin = 0.0;
        }
        self.refresh_blended_value();
    }

    fn refresh_blended_value(&mut self) {
        let alpha = blend_alpha(self.option, self.alpha_lin);
        self.blended_value = self.begin_value + (self.desired_value - self.begin_value) * alpha;
    }
}

/// Maps linear progress in `[0, 1]` through an easing curve.
pub fn blend_alpha(option: BlendOption, alpha: f32) -> f32 {
    let a = alpha.clamp(0.0, 1.0);
    let value = match option {
        BlendOption::Linear => a,
        BlendOption::Cubic | BlendOption::HermiteCubic => a * a * (3.0 - 2.0 * a),
        BlendOption::Sinusoidal => ((a * PI - FRAC_PI_2).sin() + 1.0) / 2.0,
        BlendOption::QuadraticInOut => ease_in_out(a, 2.0),
        BlendOption::CubicInOut => ease_in_out(a, 3.0),
        BlendOption::QuarticInOut => ease_in_out(a, 4.0),
        BlendOption::QuinticInOut => ease_in_out(a, 5.0),
        BlendOption::CircularIn => circular_in(a),
        BlendOption::CircularOut => circular_out(a),
        BlendOption::CircularInOut => {
            if a < 0.5 {
                0.5 * circular_in(a * 2.0)
            } else {
                0.5 * circular_out(a * 2.0 - 1.0) + 0.5
            }
        }
        BlendOption::ExpIn => expo_in(a),
        BlendOption::ExpOut => expo_out(a),
        BlendOption::ExpInOut => {
            if a < 0.5 {
                0.5 * expo_in(a * 2.0)
            } else {
                0.5 * expo_out(a * 2.0 - 1.0) + 0.5
            }
        }
    };
    value.clamp(0.0, 1.0)
}

fn ease_in_out(a: f32, exp: f32) -> f32 {
    if a < 0.5 {
        0.5 * (2.0 * a).powf(exp)
    } else {
        1.0 - 0.5 * (2.0 * (1.0 - a)).powf(exp)
    }
}

fn circular_in(a: f32) -> f32 {
    1.0 - (1.0 - a * a).max(0.0).sqrt()
}

fn circular_out(a: f32) -> f32 {
    let shifted = a - 1.0;
    (1.0 - shifted * shifted).max(0.0).sqrt()
}

fn expo_in(a: f32) -> f32 {
    if a <= 0.0 {
        0.0
    } else {
        2.0_f32.powf(10.0 * (a - 1.0))
    }
}

fn expo_out(a: f32) -> f32 {
    if a >= 1.0 {
        1.0
    } else {
        1.0 - 2.0_f32.powf(-10.0 * a)
    }
}
