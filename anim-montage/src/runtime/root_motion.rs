use crate::Transform;
use glam::Vec3;

/// Which animation sources may contribute root motion.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum RootMotionMode {
    NoExtraction,
    /// Extracted but thrown away.
    IgnoreRootMotion,
    FromEverything,
    #[default]
    FromMontagesOnly,
}

/// Root-motion delta accumulated over one or more steps.
#[derive(Clone, Debug, PartialEq)]
pub struct RootMotionMovementParams {
    pub has_root_motion: bool,
    pub blend_weight: f32,
    root_motion_transform: Transform,
    root_motion_scale: Vec3,
}

impl Default for RootMotionMovementParams {
    fn default() -> Self {
        Self {
            has_root_motion: false,
            blend_weight: 0.0,
            root_motion_transform: Transform::IDENTITY,
            root_motion_scale: Vec3::ONE,
        }
    }
}

impl RootMotionMovementParams {
    pub fn set(&mut self, transform: &Transform) {
        self.has_root_motion = true;
        self.root_motion_transform = *transform;
        self.root_motion_scale = transform.scale;
        self.blend_weight = 1.0;
    }

    /// Chains `transform` after what has been accumulated so far.
    pub fn accumulate(&mut self, transform: &Transform) {
        if !self.has_root_motion {
            self.set(transform);
        } else {
            self.root_motion_transform = self.root_motion_transform * *transform;
            self.root_motion_transform.scale = self.root_motion_scale;
        }
    }

    /// Weighted sum used when several sources share one frame of root
    /// motion. Rotation is renormalized on read.
    pub fn accumulate_with_blend(&mut self, transform: &Transform, weight: f32) {
        if self.has_root_motion {
            self.root_motion_transform
                .accumulate_with_shortest_rotation(transform, weight);
            self.root_motion_transform.scale = self.root_motion_scale;
            self.blend_weight += weight;
        } else {
            self.has_root_motion = true;
            self.root_motion_transform = transform.weighted(weight);
            self.root_motion_scale = Vec3::ONE;
            self.root_motion_transform.scale = self.root_motion_scale;
            self.blend_weight = weight;
        }
    }

    pub fn accumulate_params(&mut self, other: &RootMotionMovementParams) {
        if other.has_root_motion {
            self.accumulate(&other.root_motion_transform());
        }
    }

    /// Pads a partially weighted blend with identity up to full weight.
    pub fn make_up_to_full_weight(&mut self) {
        if self.blend_weight < 1.0 {
            self.accumulate_with_blend(&Transform::IDENTITY, 1.0 - self.blend_weight);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn root_motion_transform(&self) -> Transform {
        let mut transform = self.root_motion_transform;
        transform.normalize_rotation();
        transform
    }

    /// Splits off `alpha` of the accumulated motion and returns it, keeping
    /// the remainder.
    pub fn consume_root_motion(&mut self, alpha: f32) -> RootMotionMovementParams {
        let mut consumed = RootMotionMovementParams::default();
        if !self.has_root_motion {
            return consumed;
        }
        let total = self.root_motion_transform();
        let mut partial = Transform::blend(&Transform::IDENTITY, &total, alpha.clamp(0.0, 1.0));
        partial.scale = self.root_motion_scale;
        consumed.set(&partial);

        let mut remaining = total.relative_to(&partial);
        remaining.scale = self.root_motion_scale;
        remaining.normalize_rotation();
        self.root_motion_transform = remaining;
        consumed
    }
}

/// Root motion recorded during advance, blended once slot weights are known.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedRootMotionBlend {
    pub transform: Transform,
    pub slot_name: String,
    pub weight: f32,
}

/// Where an advancing instance writes its extracted root motion.
pub enum RootMotionTarget<'a> {
    Accumulate(&'a mut RootMotionMovementParams),
    Blend(&'a mut Vec<QueuedRootMotionBlend>),
}
