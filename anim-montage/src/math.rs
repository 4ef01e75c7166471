use glam::{Quat, Vec3};
use std::ops::Mul;

/// Tolerance used for position comparisons on montage timelines.
pub const KINDA_SMALL_NUMBER: f32 = 1.0e-4;

/// Tolerance for comparing authored times and blend timers.
pub const TIME_EPSILON: f32 = 1.0e-6;

/// Weights at or below this value are treated as zero.
pub const ZERO_ANIMWEIGHT_THRESH: f32 = 1.0e-5;

/// Bone-local transform: rotation, translation and non-uniform scale.
///
/// Composition follows the parent-times-child convention: `parent * child`
/// applies `child` first and then `parent`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub rotation: Quat,
    pub translation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
        scale: Vec3::ONE,
    };

    /// Weighted accumulation starts from an all-zero transform.
    pub const ZERO: Self = Self {
        rotation: Quat::from_xyzw(0.0, 0.0, 0.0, 0.0),
        translation: Vec3::ZERO,
        scale: Vec3::ZERO,
    };

    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            ..Self::IDENTITY
        }
    }

    /// Every component multiplied by `weight`, including the raw quaternion.
    pub fn weighted(&self, weight: f32) -> Self {
        Self {
            rotation: self.rotation * weight,
            translation: self.translation * weight,
            scale: self.scale * weight,
        }
    }

    /// `self += other * weight`, flipping `other`'s rotation into the same
    /// hemisphere first.
    pub fn accumulate_with_shortest_rotation(&mut self, other: &Transform, weight: f32) {
        let rotation = other.rotation * weight;
        self.rotation = if self.rotation.dot(rotation) < 0.0 {
            self.rotation - rotation
        } else {
            self.rotation + rotation
        };
        self.translation += other.translation * weight;
        self.scale += other.scale * weight;
    }

    pub fn normalize_rotation(&mut self) {
        let length_squared = self.rotation.length_squared();
        self.rotation = if length_squared > 1.0e-12 {
            self.rotation / length_squared.sqrt()
        } else {
            Quat::IDENTITY
        };
    }

    pub fn is_rotation_normalized(&self) -> bool {
        (self.rotation.length_squared() - 1.0).abs() <= 1.0e-3
    }

    /// Linear blend towards `other`; rotation uses a normalized shortest-path lerp.
    pub fn blend_with(&mut self, other: &Transform, alpha: f32) {
        *self = Self::blend(self, other, alpha);
    }

    pub fn blend(a: &Transform, b: &Transform, alpha: f32) -> Self {
        if alpha <= ZERO_ANIMWEIGHT_THRESH {
            return *a;
        }
        if alpha >= 1.0 - ZERO_ANIMWEIGHT_THRESH {
            return *b;
        }
        let mut out = Self {
            rotation: fast_lerp(a.rotation, b.rotation, alpha),
            translation: a.translation.lerp(b.translation, alpha),
            scale: a.scale.lerp(b.scale, alpha),
        };
        out.normalize_rotation();
        out
    }

    /// Layers an additive delta onto `self`. The delta is first scaled from
    /// identity by `weight` (rotation slerp, translation and scale lerp).
    pub fn blend_from_identity_and_accumulate(&mut self, additive: &Transform, weight: f32) {
        let delta = if weight < 1.0 - ZERO_ANIMWEIGHT_THRESH {
            Transform {
                rotation: Quat::IDENTITY.slerp(additive.rotation, weight),
                translation: additive.translation * weight,
                scale: Vec3::ONE.lerp(additive.scale, weight),
            }
        } else {
            *additive
        };
        self.rotation = delta.rotation * self.rotation;
        self.translation += delta.translation;
        self.scale *= delta.scale;
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        let scale = safe_reciprocal(self.scale);
        let translation = scale * (rotation * -self.translation);
        Self {
            rotation,
            translation,
            scale,
        }
    }

    /// `self` expressed relative to `base`: `base.inverse() * self`.
    pub fn relative_to(&self, base: &Transform) -> Self {
        base.inverse() * *self
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * (self.scale * point) + self.translation
    }

    pub fn abs_diff_eq(&self, other: &Transform, tolerance: f32) -> bool {
        let same_rotation = self.rotation.abs_diff_eq(other.rotation, tolerance)
            || self.rotation.abs_diff_eq(-other.rotation, tolerance);
        same_rotation
            && self.translation.abs_diff_eq(other.translation, tolerance)
            && self.scale.abs_diff_eq(other.scale, tolerance)
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, child: Transform) -> Transform {
        Transform {
            rotation: self.rotation * child.rotation,
            translation: self.rotation * (self.scale * child.translation) + self.translation,
            scale: self.scale * child.scale,
        }
    }
}

/// Shortest-path quaternion lerp without normalization.
pub fn fast_lerp(a: Quat, b: Quat, alpha: f32) -> Quat {
    let bias = if a.dot(b) >= 0.0 { 1.0 } else { -1.0 };
    b * alpha + a * (bias * (1.0 - alpha))
}

pub(crate) fn safe_reciprocal(v: Vec3) -> Vec3 {
    fn recip(x: f32) -> f32 {
        if x.abs() <= 1.0e-8 { 0.0 } else { 1.0 / x }
    }
    Vec3::new(recip(v.x), recip(v.y), recip(v.z))
}
