use crate::{
    AnimNotifyEvent, AnimSequence, BlendedCurve, CurveKey, Pose, Skeleton, Transform,
    TransformKey,
};

impl AnimSequence {
    /// Samples every bone track at `time` into `out`. Untracked bones keep the
    /// reference pose, or identity for additive clips.
    pub fn pose_at(&self, time: f32, skeleton: &Skeleton, out: &mut Pose) {
        if self.is_additive() {
            out.reset_to_additive_identity(skeleton.num_bones());
        } else {
            out.reset_to_reference(skeleton);
        }
        let time = time.clamp(0.0, self.length);
        for track in &self.bone_tracks {
            if let Some(bone) = out.bones.get_mut(track.bone_index) {
                if let Some(sampled) = sample_transform(&track.keys, time) {
                    *bone = sampled;
                }
            }
        }
        self.evaluate_curves(time, &mut out.curve);
    }

    pub fn evaluate_curves(&self, time: f32, out: &mut BlendedCurve) {
        for curve in &self.curves {
            if let Some(value) = sample_curve(&curve.keys, time) {
                out.set(&curve.name, value);
            }
        }
    }

    /// Root-bone transform at `time`, identity when the root is not keyed.
    pub fn root_transform_at(&self, time: f32) -> Transform {
        self.bone_tracks
            .iter()
            .find(|track| track.bone_index == 0)
            .and_then(|track| sample_transform(&track.keys, time.clamp(0.0, self.length)))
            .unwrap_or(Transform::IDENTITY)
    }

    /// Root-bone delta from `start` to `end`, either direction.
    pub fn extract_root_motion_from_range(&self, start: f32, end: f32) -> Transform {
        if !self.enable_root_motion {
            return Transform::IDENTITY;
        }
        let from = self.root_transform_at(start);
        let to = self.root_transform_at(end);
        let mut delta = to.relative_to(&from);
        delta.normalize_rotation();
        delta
    }

    pub fn notifies_from_delta_positions(
        &self,
        previous: f32,
        current: f32,
        out: &mut Vec<AnimNotifyEvent>,
    ) {
        collect_notifies_from_delta_positions(&self.notifies, previous, current, out);
    }
}

/// Forward playback picks notifies with `start <= current && end > previous`;
/// backward playback uses `start < previous && end >= current`.
pub(crate) fn collect_notifies_from_delta_positions(
    notifies: &[AnimNotifyEvent],
    previous: f32,
    current: f32,
    out: &mut Vec<AnimNotifyEvent>,
) {
    if previous == current {
        return;
    }
    let backwards = current < previous;
    for notify in notifies {
        let start = notify.trigger_time();
        let end = notify.end_trigger_time();
        let hit = if backwards {
            start < previous && end >= current
        } else {
            start <= current && end > previous
        };
        if hit {
            out.push(notify.clone());
        }
    }
}

fn sample_transform(keys: &[TransformKey], time: f32) -> Option<Transform> {
    if keys.is_empty() {
        return None;
    }
    let index = keys.partition_point(|k| k.time <= time);
    if index == 0 {
        return Some(keys[0].transform);
    }
    if index >= keys.len() {
        return Some(keys[keys.len() - 1].transform);
    }
    let prev = &keys[index - 1];
    let next = &keys[index];
    let denom = next.time - prev.time;
    if denom.abs() <= 1.0e-12 {
        return Some(next.transform);
    }
    let alpha = (time - prev.time) / denom;
    let a = &prev.transform;
    let b = &next.transform;
    Some(Transform {
        rotation: a.rotation.slerp(b.rotation, alpha),
        translation: a.translation.lerp(b.translation, alpha),
        scale: a.scale.lerp(b.scale, alpha),
    })
}

fn sample_curve(keys: &[CurveKey], time: f32) -> Option<f32> {
    if keys.is_empty() {
        return None;
    }
    let index = keys.partition_point(|k| k.time <= time);
    if index == 0 {
        return Some(keys[0].value);
    }
    if index >= keys.len() {
        return Some(keys[keys.len() - 1].value);
    }
    let prev = &keys[index - 1];
    let next = &keys[index];
    let denom = next.time - prev.time;
    if denom.abs() <= 1.0e-12 {
        return Some(next.value);
    }
    let t = (time - prev.time) / denom;
    Some(prev.value + (next.value - prev.value) * t)
}
