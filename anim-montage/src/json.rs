use crate::{
    AdditiveType, AnimLink, AnimNotifyEvent, AnimSegment, AnimSequence, AnimTrack, BlendOption,
    BoneData, BoneTrack, CurveKey, DEFAULT_SECTION_NAME, Error, FloatCurve, LinkMethod, Montage,
    MontageBlendSettings, NotifyKind, NotifyTickType, Skeleton, SlotAnimTrack, Transform,
    TransformKey, ZERO_ANIMWEIGHT_THRESH,
};
use glam::{Quat, Vec3};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct Root {
    skeleton: SkeletonDef,
    #[serde(default)]
    sequences: Vec<SequenceDef>,
    #[serde(default)]
    montages: Vec<MontageDef>,
}

#[derive(Debug, Deserialize)]
struct SkeletonDef {
    #[serde(default)]
    bones: Vec<BoneDef>,
    #[serde(default, rename = "slotGroups")]
    slot_groups: Vec<SlotGroupDef>,
}

fn default_one() -> f32 {
    1.0
}

fn default_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

fn default_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

#[derive(Debug, Deserialize)]
struct TransformDef {
    #[serde(default)]
    translation: [f32; 3],
    /// Quaternion as `[x, y, z, w]`.
    #[serde(default = "default_rotation")]
    rotation: [f32; 4],
    #[serde(default = "default_scale")]
    scale: [f32; 3],
}

impl Default for TransformDef {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: default_rotation(),
            scale: default_scale(),
        }
    }
}

impl TransformDef {
    fn to_transform(&self) -> Transform {
        Transform::new(
            Vec3::from_array(self.translation),
            Quat::from_array(self.rotation).normalize(),
            Vec3::from_array(self.scale),
        )
    }
}

#[derive(Debug, Deserialize)]
struct BoneDef {
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    reference: TransformDef,
}

#[derive(Debug, Deserialize)]
struct SlotGroupDef {
    name: String,
    #[serde(default)]
    slots: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SequenceDef {
    name: String,
    length: f32,
    #[serde(default = "default_one", rename = "rateScale")]
    rate_scale: f32,
    #[serde(default, rename = "rootMotion")]
    root_motion: bool,
    #[serde(default)]
    additive: Option<String>,
    #[serde(default)]
    bones: Vec<BoneTrackDef>,
    #[serde(default)]
    curves: Vec<CurveDef>,
    #[serde(default)]
    notifies: Vec<NotifyDef>,
}

#[derive(Debug, Deserialize)]
struct BoneTrackDef {
    bone: String,
    #[serde(default)]
    keys: Vec<TransformKeyDef>,
}

#[derive(Debug, Deserialize)]
struct TransformKeyDef {
    time: f32,
    #[serde(flatten)]
    transform: TransformDef,
}

#[derive(Debug, Deserialize)]
struct CurveDef {
    name: String,
    #[serde(default)]
    keys: Vec<CurveKeyDef>,
}

#[derive(Debug, Deserialize)]
struct CurveKeyDef {
    time: f32,
    value: f32,
}

fn default_trigger_weight_threshold() -> f32 {
    ZERO_ANIMWEIGHT_THRESH
}

#[derive(Debug, Deserialize)]
struct NotifyDef {
    name: String,
    time: f32,
    #[serde(default)]
    duration: f32,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default, rename = "tickType")]
    tick_type: Option<String>,
    #[serde(
        default = "default_trigger_weight_threshold",
        rename = "triggerWeightThreshold"
    )]
    trigger_weight_threshold: f32,
}

#[derive(Debug, Deserialize)]
struct BlendDef {
    #[serde(default)]
    time: Option<f32>,
    #[serde(default)]
    option: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MontageDef {
    name: String,
    #[serde(default = "default_one", rename = "rateScale")]
    rate_scale: f32,
    #[serde(default, rename = "blendIn")]
    blend_in: Option<BlendDef>,
    #[serde(default, rename = "blendOut")]
    blend_out: Option<BlendDef>,
    #[serde(default, rename = "blendOutTriggerTime")]
    blend_out_trigger_time: Option<f32>,
    #[serde(default, rename = "syncGroup")]
    sync_group: Option<String>,
    #[serde(default)]
    slots: Vec<SlotTrackDef>,
    #[serde(default)]
    sections: Vec<SectionDef>,
    #[serde(default)]
    notifies: Vec<NotifyDef>,
}

#[derive(Debug, Deserialize)]
struct SlotTrackDef {
    slot: String,
    #[serde(default)]
    segments: Vec<SegmentDef>,
}

#[derive(Debug, Deserialize)]
struct SegmentDef {
    animation: String,
    #[serde(default, rename = "animStartTime")]
    anim_start_time: f32,
    #[serde(default, rename = "animEndTime")]
    anim_end_time: Option<f32>,
    #[serde(default = "default_one", rename = "playRate")]
    play_rate: f32,
    #[serde(default, rename = "loopingCount")]
    looping_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SectionDef {
    name: String,
    time: f32,
    /// Absent means the section ends playback.
    #[serde(default)]
    next: Option<String>,
}

/// Skeleton, clips and montages loaded together, with every name reference
/// resolved.
#[derive(Clone, Debug)]
pub struct MontageLibrary {
    pub skeleton: Arc<Skeleton>,
    pub sequences: HashMap<String, Arc<AnimSequence>>,
    pub montages: HashMap<String, Arc<Montage>>,
}

impl MontageLibrary {
    pub fn from_json_str(input: &str) -> Result<Self, Error> {
        let root: Root = serde_json::from_str(input).map_err(|e| Error::JsonParse {
            message: e.to_string(),
        })?;

        let mut bones = Vec::new();
        let mut bone_index = HashMap::<String, usize>::new();
        for bone in root.skeleton.bones {
            let parent = match bone.parent.as_deref() {
                None => None,
                Some(parent_name) => match bone_index.get(parent_name) {
                    Some(&index) => Some(index),
                    None => {
                        return Err(Error::JsonUnknownBone {
                            context: format!("parent of bone '{}'", bone.name),
                            bone: parent_name.to_string(),
                        });
                    }
                },
            };
            bone_index.insert(bone.name.clone(), bones.len());
            let reference = bone.reference.to_transform();
            bones.push(BoneData::new(bone.name, parent).with_reference(reference));
        }
        let mut skeleton = Skeleton::new(bones)?;
        for group in &root.skeleton.slot_groups {
            for slot in &group.slots {
                skeleton.set_slot_group(slot, &group.name);
            }
        }
        let skeleton = Arc::new(skeleton);

        let mut sequences = HashMap::new();
        for def in root.sequences {
            let sequence = parse_sequence(def, &bone_index)?;
            sequences.insert(sequence.name.clone(), Arc::new(sequence));
        }

        let mut montages = HashMap::new();
        for def in root.montages {
            let montage = parse_montage(def, &sequences)?;
            montages.insert(montage.name.clone(), Arc::new(montage));
        }

        Ok(Self {
            skeleton,
            sequences,
            montages,
        })
    }

    pub fn sequence(&self, name: &str) -> Option<&Arc<AnimSequence>> {
        self.sequences.get(name)
    }

    pub fn montage(&self, name: &str) -> Option<&Arc<Montage>> {
        self.montages.get(name)
    }
}

fn parse_sequence(
    def: SequenceDef,
    bone_index: &HashMap<String, usize>,
) -> Result<AnimSequence, Error> {
    let mut sequence = AnimSequence::new(def.name, def.length);
    sequence.rate_scale = def.rate_scale;
    sequence.enable_root_motion = def.root_motion;
    sequence.additive_type = match def.additive.as_deref() {
        None | Some("none") => AdditiveType::None,
        Some("localSpace") => AdditiveType::LocalSpace,
        Some("rotationOffsetMeshSpace") => AdditiveType::RotationOffsetMeshSpace,
        Some(other) => {
            return Err(Error::JsonUnsupportedValue {
                context: format!("sequence '{}'", sequence.name),
                field: "additive".to_string(),
                value: other.to_string(),
            });
        }
    };

    for track in def.bones {
        let Some(&index) = bone_index.get(&track.bone) else {
            return Err(Error::JsonUnknownBone {
                context: format!("sequence '{}'", sequence.name),
                bone: track.bone,
            });
        };
        let mut keys: Vec<TransformKey> = track
            .keys
            .iter()
            .map(|key| TransformKey {
                time: key.time,
                transform: key.transform.to_transform(),
            })
            .collect();
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        sequence.bone_tracks.push(BoneTrack {
            bone_index: index,
            keys,
        });
    }

    for curve in def.curves {
        let mut keys: Vec<CurveKey> = curve
            .keys
            .iter()
            .map(|key| CurveKey {
                time: key.time,
                value: key.value,
            })
            .collect();
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        sequence.curves.push(FloatCurve {
            name: curve.name,
            keys,
        });
    }

    let context = format!("sequence '{}'", sequence.name);
    for notify in def.notifies {
        sequence.notifies.push(parse_notify(notify, &context)?);
    }
    Ok(sequence)
}

fn parse_notify(def: NotifyDef, context: &str) -> Result<AnimNotifyEvent, Error> {
    let kind = match def.kind.as_deref() {
        None | Some("native") => NotifyKind::Native,
        Some("namedFunction") => NotifyKind::NamedFunction,
        Some("state") => NotifyKind::State,
        Some(other) => {
            return Err(Error::JsonUnsupportedValue {
                context: format!("{context} notify '{}'", def.name),
                field: "kind".to_string(),
                value: other.to_string(),
            });
        }
    };
    let tick_type = match def.tick_type.as_deref() {
        None | Some("queued") => NotifyTickType::Queued,
        Some("branchingPoint") => NotifyTickType::BranchingPoint,
        Some(other) => {
            return Err(Error::JsonUnsupportedValue {
                context: format!("{context} notify '{}'", def.name),
                field: "tickType".to_string(),
                value: other.to_string(),
            });
        }
    };

    let mut notify = AnimNotifyEvent::new(def.name, def.time);
    notify.kind = kind;
    notify.tick_type = tick_type;
    notify.trigger_weight_threshold = def.trigger_weight_threshold;
    if kind == NotifyKind::State {
        notify.duration = def.duration.max(0.0);
    }
    Ok(notify)
}

fn parse_blend_option(raw: &str, context: &str) -> Result<BlendOption, Error> {
    Ok(match raw {
        "linear" => BlendOption::Linear,
        "cubic" => BlendOption::Cubic,
        "hermiteCubic" => BlendOption::HermiteCubic,
        "sinusoidal" => BlendOption::Sinusoidal,
        "quadraticInOut" => BlendOption::QuadraticInOut,
        "cubicInOut" => BlendOption::CubicInOut,
        "quarticInOut" => BlendOption::QuarticInOut,
        "quinticInOut" => BlendOption::QuinticInOut,
        "circularIn" => BlendOption::CircularIn,
        "circularOut" => BlendOption::CircularOut,
        "circularInOut" => BlendOption::CircularInOut,
        "expIn" => BlendOption::ExpIn,
        "expOut" => BlendOption::ExpOut,
        "expInOut" => BlendOption::ExpInOut,
        other => {
            return Err(Error::JsonUnsupportedValue {
                context: context.to_string(),
                field: "option".to_string(),
                value: other.to_string(),
            });
        }
    })
}

fn parse_blend(def: Option<&BlendDef>, context: &str) -> Result<MontageBlendSettings, Error> {
    let mut settings = MontageBlendSettings::default();
    if let Some(def) = def {
        if let Some(time) = def.time {
            settings.blend_time = time.max(0.0);
        }
        if let Some(option) = def.option.as_deref() {
            settings.blend_option = parse_blend_option(option, context)?;
        }
    }
    Ok(settings)
}

fn parse_montage(
    def: MontageDef,
    sequences: &HashMap<String, Arc<AnimSequence>>,
) -> Result<Montage, Error> {
    let mut slot_tracks = Vec::with_capacity(def.slots.len());
    for slot in def.slots {
        let mut segments = Vec::with_capacity(slot.segments.len());
        for segment in slot.segments {
            let Some(anim) = sequences.get(&segment.animation) else {
                return Err(Error::JsonUnknownAnimation {
                    montage: def.name.clone(),
                    animation: segment.animation,
                });
            };
            let mut parsed = AnimSegment::new(Arc::clone(anim), 0.0);
            parsed.anim_start_time = segment.anim_start_time;
            if let Some(end) = segment.anim_end_time {
                parsed.anim_end_time = end;
            }
            parsed.anim_play_rate = segment.play_rate;
            if let Some(count) = segment.looping_count {
                parsed.looping_count = count;
            }
            segments.push(parsed);
        }
        let mut track = AnimTrack::new(segments);
        track.validate_segment_times();
        slot_tracks.push(SlotAnimTrack::new(slot.slot, track));
    }

    let mut montage = Montage::new(def.name, slot_tracks);
    montage.rate_scale = def.rate_scale;
    montage.sync_group = def.sync_group;
    montage.blend_in = parse_blend(
        def.blend_in.as_ref(),
        &format!("montage '{}' blendIn", montage.name),
    )?;
    montage.blend_out = parse_blend(
        def.blend_out.as_ref(),
        &format!("montage '{}' blendOut", montage.name),
    )?;
    if let Some(trigger) = def.blend_out_trigger_time {
        montage.blend_out_trigger_time = trigger;
    }

    for section in &def.sections {
        if montage.add_composite_section(&section.name, section.time).is_none() {
            return Err(Error::InvalidMontage {
                montage: montage.name.clone(),
                message: format!("duplicate section '{}'", section.name),
            });
        }
    }
    // Stored links replace the chaining applied while sections were added.
    for section in &def.sections {
        if let Some(next) = section.next.as_deref() {
            if montage.section_index(next).is_none() {
                return Err(Error::JsonUnknownSection {
                    montage: montage.name.clone(),
                    section: next.to_string(),
                });
            }
        }
        montage.set_section_next(&section.name, section.next.as_deref())?;
    }
    if montage.composite_sections.is_empty() {
        montage.add_composite_section(DEFAULT_SECTION_NAME, 0.0);
    }
    montage.sort_composite_sections_by_pos();

    let context = format!("montage '{}'", montage.name);
    for notify in def.notifies {
        let mut parsed = parse_notify(notify, &context)?;
        let time = parsed.time();
        let mut link = AnimLink::absolute(time);
        link.link_to_segment(&montage.slot_anim_tracks, time, LinkMethod::Relative);
        parsed.link = link;
        montage.notifies.push(parsed);
    }

    montage.refresh_cache_data();
    Ok(montage)
}
