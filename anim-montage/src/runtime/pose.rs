use crate::math::safe_reciprocal;
use crate::{AdditiveType, AnimTrack, Skeleton, Transform, ZERO_ANIMWEIGHT_THRESH};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum CurveBlendOption {
    /// First source overrides, the rest accumulate by weight.
    #[default]
    BlendByWeight,
    /// Like `BlendByWeight`, then divided by the sum of weights.
    NormalizeByWeight,
}

/// Named float curve values carried alongside a pose.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlendedCurve {
    values: BTreeMap<String, f32>,
}

impl BlendedCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }

    pub fn set(&mut self, name: &str, value: f32) {
        if let Some(existing) = self.values.get_mut(name) {
            *existing = value;
        } else {
            self.values.insert(name.to_string(), value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Replaces the whole set with `other * weight`.
    pub fn override_with(&mut self, other: &BlendedCurve, weight: f32) {
        self.values.clear();
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value * weight);
        }
    }

    pub fn accumulate(&mut self, other: &BlendedCurve, weight: f32) {
        for (name, value) in &other.values {
            *self.values.entry(name.clone()).or_insert(0.0) += value * weight;
        }
    }

    /// Values present in `other` replace ours; missing ones are kept.
    pub fn combine(&mut self, other: &BlendedCurve) {
        for (name, value) in &other.values {
            self.set(name, *value);
        }
    }

    /// `self = lerp(self, other, alpha)` over the union of both key sets.
    pub fn lerp_to(&mut self, other: &BlendedCurve, alpha: f32) {
        for (name, value) in &other.values {
            let entry = self.values.entry(name.clone()).or_insert(0.0);
            *entry += (value - *entry) * alpha;
        }
        for (name, value) in self.values.iter_mut() {
            if !other.values.contains_key(name) {
                *value *= 1.0 - alpha;
            }
        }
    }

    pub fn blend(curves: &[&BlendedCurve], weights: &[f32], option: CurveBlendOption) -> Self {
        let mut out = BlendedCurve::new();
        let count = curves.len().min(weights.len());
        if count == 0 {
            return out;
        }
        out.override_with(curves[0], weights[0]);
        for i in 1..count {
            out.accumulate(curves[i], weights[i]);
        }
        if option == CurveBlendOption::NormalizeByWeight {
            let total: f32 = weights[..count].iter().sum();
            if total > ZERO_ANIMWEIGHT_THRESH {
                for value in out.values.values_mut() {
                    *value /= total;
                }
            }
        }
        out
    }
}

/// Local-space bone transforms plus curves.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pose {
    pub bones: Vec<Transform>,
    pub curve: BlendedCurve,
}

impl Pose {
    pub fn identity(num_bones: usize) -> Self {
        Self {
            bones: vec![Transform::IDENTITY; num_bones],
            curve: BlendedCurve::new(),
        }
    }

    pub fn reference(skeleton: &Skeleton) -> Self {
        let mut pose = Self::default();
        pose.reset_to_reference(skeleton);
        pose
    }

    pub fn num_bones(&self) -> usize {
        self.bones.len()
    }

    pub fn reset_to_reference(&mut self, skeleton: &Skeleton) {
        self.bones.clear();
        self.bones
            .extend(skeleton.bones().iter().map(|bone| bone.reference));
        self.curve.clear();
    }

    /// Identity deltas, the neutral element for additive composition.
    pub fn reset_to_additive_identity(&mut self, num_bones: usize) {
        self.bones.clear();
        self.bones.resize(num_bones, Transform::IDENTITY);
        self.curve.clear();
    }

    pub fn normalize_rotations(&mut self) {
        for bone in &mut self.bones {
            bone.normalize_rotation();
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PerBoneBlendWeight {
    pub source_index: usize,
    pub blend_weight: f32,
}

/// Mask rule: `bone_name` and its descendants take weight from the blend
/// pose, ramping in over `blend_depth` levels. A negative depth disables the
/// branch (weights clamp to 0).
#[derive(Clone, Debug)]
pub struct BranchFilter {
    pub bone_name: String,
    pub blend_depth: i32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum RotationBlendSpace {
    #[default]
    Local,
    Mesh,
}

/// `out = Σ weights[i] * poses[i]` with the first pose overwriting, then every
/// rotation renormalized. Poses must share a bone count.
pub fn blend_poses_together(poses: &[&Pose], weights: &[f32], out: &mut Pose) {
    let count = poses.len().min(weights.len());
    if count == 0 {
        return;
    }
    let num_bones = poses[0].bones.len();
    out.bones.clear();
    out.bones.extend(
        poses[0]
            .bones
            .iter()
            .map(|bone| bone.weighted(weights[0])),
    );
    for i in 1..count {
        let weight = weights[i];
        for (bone, source) in out.bones.iter_mut().zip(poses[i].bones.iter()).take(num_bones) {
            bone.accumulate_with_shortest_rotation(source, weight);
        }
    }
    out.normalize_rotations();

    let curves: Vec<&BlendedCurve> = poses[..count].iter().map(|p| &p.curve).collect();
    out.curve = BlendedCurve::blend(&curves, &weights[..count], CurveBlendOption::BlendByWeight);
}

pub fn blend_two_poses_together(a: &Pose, b: &Pose, weight_of_a: f32, out: &mut Pose) {
    blend_poses_together(&[a, b], &[weight_of_a, 1.0 - weight_of_a], out);
}

/// Weighted blend where every pose can carry its own weight per bone.
///
/// `per_bone_weights[i][bone]` overrides `sample_weights[i]` for that bone.
/// With `RotationBlendSpace::Mesh` rotations are blended along the parent
/// chain and re-localized afterwards.
pub fn blend_poses_together_per_bone(
    poses: &[&Pose],
    sample_weights: &[f32],
    per_bone_weights: &[Vec<f32>],
    space: RotationBlendSpace,
    skeleton: &Skeleton,
    out: &mut Pose,
) {
    let count = poses.len().min(sample_weights.len());
    if count == 0 {
        return;
    }

    let mesh_sources: Vec<Pose>;
    let sources: Vec<&Pose> = match space {
        RotationBlendSpace::Local => poses[..count].to_vec(),
        RotationBlendSpace::Mesh => {
            mesh_sources = poses[..count]
                .iter()
                .map(|pose| {
                    let mut converted = (*pose).clone();
                    convert_pose_to_mesh_rotation(&mut converted, skeleton);
                    converted
                })
                .collect();
            mesh_sources.iter().collect()
        }
    };

    let weight_at = |pose: usize, bone: usize| -> f32 {
        per_bone_weights
            .get(pose)
            .and_then(|weights| weights.get(bone))
            .copied()
            .unwrap_or(sample_weights[pose])
    };

    let num_bones = sources[0].bones.len();
    out.bones.clear();
    out.bones.resize(num_bones, Transform::ZERO);
    for (bone, target) in out.bones.iter_mut().enumerate() {
        *target = sources[0].bones[bone].weighted(weight_at(0, bone));
        for (pose, source) in sources.iter().enumerate().skip(1) {
            if let Some(transform) = source.bones.get(bone) {
                target.accumulate_with_shortest_rotation(transform, weight_at(pose, bone));
            }
        }
        target.normalize_rotation();
    }

    if space == RotationBlendSpace::Mesh {
        convert_mesh_rotation_pose_to_local_space(out, skeleton);
    }

    let curves: Vec<&BlendedCurve> = poses[..count].iter().map(|p| &p.curve).collect();
    out.curve = BlendedCurve::blend(
        &curves,
        &sample_weights[..count],
        CurveBlendOption::BlendByWeight,
    );
}

/// Layered blend of `blend_poses` over `base` through a per-bone mask.
pub fn blend_poses_per_bone_filter(
    base: &Pose,
    blend_poses: &[&Pose],
    bone_weights: &[PerBoneBlendWeight],
    space: RotationBlendSpace,
    skeleton: &Skeleton,
    out: &mut Pose,
) {
    let num_bones = base.bones.len();
    let mut max_pose_weights = vec![0.0f32; blend_poses.len()];

    match space {
        RotationBlendSpace::Local => {
            out.bones.clear();
            out.bones.extend_from_slice(&base.bones);
            for (bone, target) in out.bones.iter_mut().enumerate() {
                let Some(weight) = bone_weights.get(bone) else {
                    continue;
                };
                let Some(blend_pose) = blend_poses.get(weight.source_index) else {
                    continue;
                };
                let w = weight.blend_weight;
                max_pose_weights[weight.source_index] =
                    max_pose_weights[weight.source_index].max(w);
                if w < ZERO_ANIMWEIGHT_THRESH {
                    continue;
                }
                if 1.0 - w < ZERO_ANIMWEIGHT_THRESH {
                    *target = blend_pose.bones[bone];
                } else {
                    target.blend_with(&blend_pose.bones[bone], w);
                }
            }
        }
        RotationBlendSpace::Mesh => {
            let mut base_mesh = base.clone();
            convert_pose_to_mesh_rotation(&mut base_mesh, skeleton);
            let blend_mesh: Vec<Pose> = blend_poses
                .iter()
                .map(|pose| {
                    let mut converted = (*pose).clone();
                    convert_pose_to_mesh_rotation(&mut converted, skeleton);
                    converted
                })
                .collect();

            out.bones.clear();
            out.bones.extend_from_slice(&base_mesh.bones);
            for (bone, target) in out.bones.iter_mut().enumerate() {
                let Some(weight) = bone_weights.get(bone) else {
                    continue;
                };
                let Some(blend_pose) = blend_mesh.get(weight.source_index) else {
                    continue;
                };
                let w = weight.blend_weight;
                max_pose_weights[weight.source_index] =
                    max_pose_weights[weight.source_index].max(w);
                if w < ZERO_ANIMWEIGHT_THRESH {
                    continue;
                }
                if 1.0 - w < ZERO_ANIMWEIGHT_THRESH {
                    *target = blend_pose.bones[bone];
                } else {
                    // Translation and scale stay local; only rotation goes
                    // through mesh space.
                    let local_base = base.bones[bone];
                    let local_blend = blend_poses[weight.source_index].bones[bone];
                    let mut blended = Transform::blend(&local_base, &local_blend, w);
                    blended.rotation = crate::fast_lerp(target.rotation, blend_pose.bones[bone].rotation, w);
                    blended.normalize_rotation();
                    *target = blended;
                }
            }
            convert_mesh_rotation_pose_to_local_space(out, skeleton);
        }
    }
    debug_assert_eq!(out.bones.len(), num_bones);

    out.curve = base.curve.clone();
    for (pose, weight) in blend_poses.iter().zip(max_pose_weights) {
        if weight > ZERO_ANIMWEIGHT_THRESH {
            out.curve.lerp_to(&pose.curve, weight);
        }
    }
}

/// Builds a per-bone mask from branch filters, one filter list per blend
/// pose. Later poses win where branches overlap.
pub fn create_mask_weights(
    skeleton: &Skeleton,
    filters: &[Vec<BranchFilter>],
) -> Vec<PerBoneBlendWeight> {
    let mut weights = vec![PerBoneBlendWeight::default(); skeleton.num_bones()];
    for (pose_index, branch_filters) in filters.iter().enumerate() {
        for filter in branch_filters {
            let Some(mask_bone) = skeleton.find_bone(&filter.bone_name) else {
                log::warn!("mask bone '{}' not found in skeleton", filter.bone_name);
                continue;
            };
            let increase_per_depth = if filter.blend_depth != 0 {
                1.0 / filter.blend_depth as f32
            } else {
                1.0
            };
            for (bone, weight) in weights.iter_mut().enumerate() {
                if let Some(depth) = skeleton.depth_between_bones(bone, mask_bone) {
                    weight.source_index = pose_index;
                    let increase = increase_per_depth * (depth + 1) as f32;
                    weight.blend_weight = (weight.blend_weight + increase).clamp(0.0, 1.0);
                }
            }
        }
    }
    weights
}

/// Scales a mask by the current weight of each blend pose.
pub fn update_desired_bone_weight(
    source: &[PerBoneBlendWeight],
    target: &mut Vec<PerBoneBlendWeight>,
    pose_weights: &[f32],
) {
    target.clear();
    target.extend(source.iter().map(|weight| PerBoneBlendWeight {
        source_index: weight.source_index,
        blend_weight: weight.blend_weight
            * pose_weights.get(weight.source_index).copied().unwrap_or(0.0),
    }));
}

/// Layers `additive` onto `base` in place.
pub fn accumulate_additive_pose(
    base: &mut Pose,
    additive: &Pose,
    weight: f32,
    additive_type: AdditiveType,
    skeleton: &Skeleton,
) {
    if weight <= ZERO_ANIMWEIGHT_THRESH {
        return;
    }
    match additive_type {
        AdditiveType::None => return,
        AdditiveType::LocalSpace => {
            for (bone, delta) in base.bones.iter_mut().zip(additive.bones.iter()) {
                bone.blend_from_identity_and_accumulate(delta, weight);
            }
        }
        AdditiveType::RotationOffsetMeshSpace => {
            convert_pose_to_mesh_rotation(base, skeleton);
            for (bone, delta) in base.bones.iter_mut().zip(additive.bones.iter()) {
                bone.blend_from_identity_and_accumulate(delta, weight);
            }
            convert_mesh_rotation_pose_to_local_space(base, skeleton);
        }
    }
    base.normalize_rotations();
    base.curve.accumulate(&additive.curve, weight);
}

/// Rewrites local rotations as mesh-space rotations (parent chain applied).
pub fn convert_pose_to_mesh_rotation(pose: &mut Pose, skeleton: &Skeleton) {
    for bone in 1..pose.bones.len() {
        if let Some(parent) = skeleton.parent_index(bone) {
            pose.bones[bone].rotation = pose.bones[parent].rotation * pose.bones[bone].rotation;
        }
    }
}

pub fn convert_mesh_rotation_pose_to_local_space(pose: &mut Pose, skeleton: &Skeleton) {
    for bone in (1..pose.bones.len()).rev() {
        if let Some(parent) = skeleton.parent_index(bone) {
            let local = pose.bones[parent].rotation.inverse() * pose.bones[bone].rotation;
            pose.bones[bone].rotation = local.normalize();
        }
    }
}

/// Turns `target` into a delta against `base` so that composing it back on
/// `base` reproduces `target`.
pub fn convert_pose_to_additive(target: &mut Pose, base: &Pose) {
    for (bone, base_bone) in target.bones.iter_mut().zip(base.bones.iter()) {
        let rotation = (bone.rotation * base_bone.rotation.inverse()).normalize();
        let translation = bone.translation - base_bone.translation;
        let scale = bone.scale * safe_reciprocal(base_bone.scale);
        *bone = Transform::new(translation, rotation, scale);
    }
    let mut delta = target.curve.clone();
    delta.accumulate(&base.curve, -1.0);
    target.curve = delta;
}

pub fn lerp_bone_transforms(a: &mut [Transform], b: &[Transform], alpha: f32) {
    if alpha >= 1.0 - ZERO_ANIMWEIGHT_THRESH {
        for (target, source) in a.iter_mut().zip(b.iter()) {
            *target = *source;
        }
    } else if alpha > ZERO_ANIMWEIGHT_THRESH {
        for (target, source) in a.iter_mut().zip(b.iter()) {
            target.blend_with(source, alpha);
        }
    }
}

/// Samples every segment of `track` overlapping `time` and blends them by
/// normalized weight. Falls back to the reference pose (identity deltas for
/// additive tracks) when nothing overlaps.
pub fn pose_from_anim_track(track: &AnimTrack, time: f32, skeleton: &Skeleton, out: &mut Pose) {
    let clamped = time.clamp(0.0, track.length());
    let mut samples = Vec::new();
    for segment in &track.segments {
        if let Some(sample) = segment.animation_data(clamped) {
            if sample.weight > ZERO_ANIMWEIGHT_THRESH {
                samples.push(sample);
            }
        }
    }

    match samples.len() {
        0 => {
            if track.is_additive() {
                out.reset_to_additive_identity(skeleton.num_bones());
            } else {
                out.reset_to_reference(skeleton);
            }
        }
        1 => samples[0].anim.pose_at(samples[0].position, skeleton, out),
        _ => {
            let total: f32 = samples.iter().map(|s| s.weight).sum();
            let weights: Vec<f32> = samples.iter().map(|s| s.weight / total).collect();
            let poses: Vec<Pose> = samples
                .iter()
                .map(|sample| {
                    let mut pose = Pose::default();
                    sample.anim.pose_at(sample.position, skeleton, &mut pose);
                    pose
                })
                .collect();
            let refs: Vec<&Pose> = poses.iter().collect();
            blend_poses_together(&refs, &weights, out);
        }
    }
}
