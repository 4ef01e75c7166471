use crate::{Error, KINDA_SMALL_NUMBER, Transform};
use std::sync::Arc;

pub const DEFAULT_SLOT_NAME: &str = "DefaultSlot";
pub const DEFAULT_SLOT_GROUP_NAME: &str = "DefaultGroup";
pub const DEFAULT_SECTION_NAME: &str = "Default";
pub const DEFAULT_BLEND_TIME: f32 = 0.25;

#[derive(Clone, Debug)]
pub struct BoneData {
    pub name: String,
    pub parent: Option<usize>,
    /// Local reference (bind) pose.
    pub reference: Transform,
}

impl BoneData {
    pub fn new(name: impl Into<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent,
            reference: Transform::IDENTITY,
        }
    }

    pub fn with_reference(mut self, reference: Transform) -> Self {
        self.reference = reference;
        self
    }
}

#[derive(Clone, Debug)]
pub struct SlotGroup {
    pub name: String,
    pub slots: Vec<String>,
}

/// Bone hierarchy plus slot group registry.
///
/// Bones are stored parent-before-child so a single forward pass can build
/// mesh-space transforms.
#[derive(Clone, Debug)]
pub struct Skeleton {
    bones: Vec<BoneData>,
    slot_groups: Vec<SlotGroup>,
}

impl Skeleton {
    pub fn new(bones: Vec<BoneData>) -> Result<Self, Error> {
        for (index, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= index {
                    return Err(Error::InvalidBoneParent {
                        bone: bone.name.clone(),
                        parent,
                    });
                }
            }
        }
        Ok(Self {
            bones,
            slot_groups: vec![SlotGroup {
                name: DEFAULT_SLOT_GROUP_NAME.to_string(),
                slots: vec![DEFAULT_SLOT_NAME.to_string()],
            }],
        })
    }

    pub fn bones(&self) -> &[BoneData] {
        &self.bones
    }

    pub fn num_bones(&self) -> usize {
        self.bones.len()
    }

    pub fn parent_index(&self, bone: usize) -> Option<usize> {
        self.bones.get(bone).and_then(|b| b.parent)
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    /// Number of links from `bone` up to `ancestor`; `Some(0)` when they are
    /// the same bone, `None` when `ancestor` is not on the parent chain.
    pub fn depth_between_bones(&self, bone: usize, ancestor: usize) -> Option<usize> {
        let mut depth = 0;
        let mut current = Some(bone);
        while let Some(index) = current {
            if index == ancestor {
                return Some(depth);
            }
            current = self.parent_index(index);
            depth += 1;
        }
        None
    }

    pub fn slot_groups(&self) -> &[SlotGroup] {
        &self.slot_groups
    }

    /// Registers `slot` under `group`, moving it out of any group it was in.
    pub fn set_slot_group(&mut self, slot: &str, group: &str) {
        for existing in &mut self.slot_groups {
            existing.slots.retain(|s| s != slot);
        }
        if let Some(existing) = self.slot_groups.iter_mut().find(|g| g.name == group) {
            existing.slots.push(slot.to_string());
        } else {
            self.slot_groups.push(SlotGroup {
                name: group.to_string(),
                slots: vec![slot.to_string()],
            });
        }
    }

    /// Slots that were never registered belong to the default group.
    pub fn slot_group_name(&self, slot: &str) -> &str {
        self.slot_groups
            .iter()
            .find(|g| g.slots.iter().any(|s| s == slot))
            .map(|g| g.name.as_str())
            .unwrap_or(DEFAULT_SLOT_GROUP_NAME)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum AdditiveType {
    #[default]
    None,
    LocalSpace,
    RotationOffsetMeshSpace,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TransformKey {
    pub time: f32,
    pub transform: Transform,
}

#[derive(Clone, Debug)]
pub struct BoneTrack {
    pub bone_index: usize,
    pub keys: Vec<TransformKey>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CurveKey {
    pub time: f32,
    pub value: f32,
}

#[derive(Clone, Debug)]
pub struct FloatCurve {
    pub name: String,
    pub keys: Vec<CurveKey>,
}

/// Keyframed clip resource referenced by anim segments.
///
/// For additive clips the keys hold deltas; bone 0 is the root used for
/// root-motion extraction.
#[derive(Clone, Debug)]
pub struct AnimSequence {
    pub name: String,
    pub length: f32,
    pub rate_scale: f32,
    pub bone_tracks: Vec<BoneTrack>,
    pub curves: Vec<FloatCurve>,
    pub notifies: Vec<AnimNotifyEvent>,
    pub enable_root_motion: bool,
    pub additive_type: AdditiveType,
}

impl AnimSequence {
    pub fn new(name: impl Into<String>, length: f32) -> Self {
        Self {
            name: name.into(),
            length,
            rate_scale: 1.0,
            bone_tracks: Vec::new(),
            curves: Vec::new(),
            notifies: Vec::new(),
            enable_root_motion: false,
            additive_type: AdditiveType::None,
        }
    }

    pub fn is_additive(&self) -> bool {
        self.additive_type != AdditiveType::None
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum NotifyKind {
    /// Plain callback notify.
    #[default]
    Native,
    /// Converted legacy branching point, dispatched by function name.
    NamedFunction,
    /// Begin/Tick/End window spanning `duration`.
    State,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum NotifyTickType {
    #[default]
    Queued,
    BranchingPoint,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum TriggerOffset {
    #[default]
    None,
    OffsetBefore,
    OffsetAfter,
}

impl TriggerOffset {
    pub fn offset(self) -> f32 {
        match self {
            Self::None => 0.0,
            Self::OffsetBefore => -KINDA_SMALL_NUMBER,
            Self::OffsetAfter => KINDA_SMALL_NUMBER,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum LinkMethod {
    /// Time is authored directly on the montage timeline.
    #[default]
    Absolute,
    /// Fixed offset from the linked segment's start.
    Relative,
    /// Fraction of the linked segment's length.
    Proportional,
}

/// Montage timeline position that can follow a segment when segments move.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimLink {
    pub time: f32,
    pub method: LinkMethod,
    pub slot_index: usize,
    pub segment_index: Option<usize>,
    pub link_value: f32,
}

impl AnimLink {
    pub fn absolute(time: f32) -> Self {
        Self {
            time,
            method: LinkMethod::Absolute,
            slot_index: 0,
            segment_index: None,
            link_value: time,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AnimNotifyEvent {
    pub name: String,
    pub link: AnimLink,
    pub duration: f32,
    pub kind: NotifyKind,
    pub tick_type: NotifyTickType,
    pub trigger_offset: TriggerOffset,
    pub end_trigger_offset: TriggerOffset,
    pub trigger_weight_threshold: f32,
}

impl AnimNotifyEvent {
    pub fn new(name: impl Into<String>, time: f32) -> Self {
        Self {
            name: name.into(),
            link: AnimLink::absolute(time),
            duration: 0.0,
            kind: NotifyKind::Native,
            tick_type: NotifyTickType::Queued,
            trigger_offset: TriggerOffset::None,
            end_trigger_offset: TriggerOffset::None,
            trigger_weight_threshold: crate::ZERO_ANIMWEIGHT_THRESH,
        }
    }

    pub fn state(name: impl Into<String>, time: f32, duration: f32) -> Self {
        Self {
            kind: NotifyKind::State,
            duration: duration.max(0.0),
            ..Self::new(name, time)
        }
    }

    pub fn as_branching_point(mut self) -> Self {
        self.tick_type = NotifyTickType::BranchingPoint;
        self
    }

    pub fn time(&self) -> f32 {
        self.link.time
    }

    pub fn trigger_time(&self) -> f32 {
        self.link.time + self.trigger_offset.offset()
    }

    pub fn end_trigger_time(&self) -> f32 {
        self.trigger_time() + self.duration + self.end_trigger_offset.offset()
    }

    pub fn is_branching_point(&self) -> bool {
        self.tick_type == NotifyTickType::BranchingPoint
    }

    pub fn is_state(&self) -> bool {
        self.kind == NotifyKind::State
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum BlendOption {
    #[default]
    Linear,
    Cubic,
    HermiteCubic,
    Sinusoidal,
    QuadraticInOut,
    CubicInOut,
    QuarticInOut,
    QuinticInOut,
    CircularIn,
    CircularOut,
    CircularInOut,
    ExpIn,
    ExpOut,
    ExpInOut,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MontageBlendSettings {
    pub blend_time: f32,
    pub blend_option: BlendOption,
}

impl MontageBlendSettings {
    pub fn new(blend_time: f32) -> Self {
        Self {
            blend_time,
            blend_option: BlendOption::Linear,
        }
    }
}

impl Default for MontageBlendSettings {
    fn default() -> Self {
        Self::new(DEFAULT_BLEND_TIME)
    }
}

#[derive(Clone, Debug)]
pub struct CompositeSection {
    pub name: String,
    pub link: AnimLink,
    pub next_section_name: Option<String>,
}

impl CompositeSection {
    pub fn time(&self) -> f32 {
        self.link.time
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BranchingPointEventType {
    Begin,
    End,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BranchingPointMarker {
    pub notify_index: usize,
    pub trigger_time: f32,
    pub event_type: BranchingPointEventType,
}

/// One sub-clip placed on a track.
#[derive(Clone, Debug)]
pub struct AnimSegment {
    pub anim_reference: Option<Arc<AnimSequence>>,
    pub start_pos: f32,
    pub anim_start_time: f32,
    pub anim_end_time: f32,
    pub anim_play_rate: f32,
    pub looping_count: u32,
}

impl AnimSegment {
    /// Segment covering the whole clip once at normal rate.
    pub fn new(anim: Arc<AnimSequence>, start_pos: f32) -> Self {
        Self {
            anim_start_time: 0.0,
            anim_end_time: anim.length,
            anim_reference: Some(anim),
            start_pos,
            anim_play_rate: 1.0,
            looping_count: 1,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AnimTrack {
    pub segments: Vec<AnimSegment>,
}

#[derive(Clone, Debug)]
pub struct SlotAnimTrack {
    pub slot_name: String,
    pub track: AnimTrack,
}

impl SlotAnimTrack {
    pub fn new(slot_name: impl Into<String>, track: AnimTrack) -> Self {
        Self {
            slot_name: slot_name.into(),
            track,
        }
    }
}

/// Authored montage asset. Shared read-only between instances once wrapped
/// in an `Arc`.
#[derive(Clone, Debug)]
pub struct Montage {
    pub name: String,
    pub sequence_length: f32,
    pub rate_scale: f32,
    pub slot_anim_tracks: Vec<SlotAnimTrack>,
    pub composite_sections: Vec<CompositeSection>,
    pub notifies: Vec<AnimNotifyEvent>,
    pub blend_in: MontageBlendSettings,
    pub blend_out: MontageBlendSettings,
    /// Seconds before the end at which blend-out starts; negative means use
    /// the blend-out time.
    pub blend_out_trigger_time: f32,
    pub sync_group: Option<String>,
    pub(crate) branching_point_markers: Vec<BranchingPointMarker>,
    pub(crate) branching_point_state_notify_indices: Vec<usize>,
}
