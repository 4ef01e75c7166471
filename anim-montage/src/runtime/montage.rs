use super::sequence::collect_notifies_from_delta_positions;
use crate::{
    AnimLink, AnimNotifyEvent, AnimSegment, AnimSequence, AnimTrack, BranchingPointEventType,
    BranchingPointMarker, CompositeSection, DEFAULT_SECTION_NAME, DEFAULT_SLOT_GROUP_NAME, Error,
    LinkMethod, Montage, MontageBlendSettings, RootMotionMovementParams, Skeleton, SlotAnimTrack,
    TIME_EPSILON, Transform, TriggerOffset,
};
use std::sync::Arc;

impl AnimLink {
    /// Binds the link to the segment of `tracks[self.slot_index]` that
    /// contains `time`. Falls back to an absolute link when no segment does.
    pub fn link_to_segment(&mut self, tracks: &[SlotAnimTrack], time: f32, method: LinkMethod) {
        self.time = time;
        self.method = method;
        self.segment_index = None;
        self.link_value = time;
        if method == LinkMethod::Absolute {
            return;
        }
        let Some(track) = tracks.get(self.slot_index) else {
            self.method = LinkMethod::Absolute;
            return;
        };
        let Some(index) = track.track.segment_index_at_time(time) else {
            self.method = LinkMethod::Absolute;
            return;
        };
        let segment = &track.track.segments[index];
        self.segment_index = Some(index);
        self.link_value = match method {
            LinkMethod::Relative => time - segment.start_pos,
            LinkMethod::Proportional => {
                let length = segment.length();
                if length > 0.0 {
                    (time - segment.start_pos) / length
                } else {
                    0.0
                }
            }
            LinkMethod::Absolute => time,
        };
    }

    /// Recomputes `time` from the linked segment.
    pub fn update(&mut self, tracks: &[SlotAnimTrack]) {
        let segment = self.segment_index.and_then(|index| {
            tracks
                .get(self.slot_index)
                .and_then(|track| track.track.segments.get(index))
        });
        let Some(segment) = segment else {
            return;
        };
        self.time = match self.method {
            LinkMethod::Absolute => self.link_value,
            LinkMethod::Relative => segment.start_pos + self.link_value,
            LinkMethod::Proportional => segment.start_pos + self.link_value * segment.length(),
        };
    }
}

impl Montage {
    pub fn new(name: impl Into<String>, slot_anim_tracks: Vec<SlotAnimTrack>) -> Self {
        let mut montage = Self {
            name: name.into(),
            sequence_length: 0.0,
            rate_scale: 1.0,
            slot_anim_tracks,
            composite_sections: Vec::new(),
            notifies: Vec::new(),
            blend_in: MontageBlendSettings::default(),
            blend_out: MontageBlendSettings::default(),
            blend_out_trigger_time: -1.0,
            sync_group: None,
            branching_point_markers: Vec::new(),
            branching_point_state_notify_indices: Vec::new(),
        };
        montage.sequence_length = montage.calculate_sequence_length();
        montage
    }

    /// One slot playing `anim` once, with a single `Default` section at 0.
    pub fn from_sequence(slot_name: &str, anim: Arc<AnimSequence>) -> Self {
        let name = format!("{}_Montage", anim.name);
        let track = AnimTrack::new(vec![AnimSegment::new(anim, 0.0)]);
        let mut montage = Self::new(name, vec![SlotAnimTrack::new(slot_name, track)]);
        montage.add_composite_section(DEFAULT_SECTION_NAME, 0.0);
        montage
    }

    pub fn calculate_sequence_length(&self) -> f32 {
        self.slot_anim_tracks
            .iter()
            .map(|slot| slot.track.length())
            .fold(0.0, f32::max)
    }

    /// Re-derives everything computed from authored data: linked times,
    /// length, notify offsets and branching-point markers.
    pub fn refresh_cache_data(&mut self) {
        self.update_linkable_elements();
        self.sequence_length = self.calculate_sequence_length();
        self.refresh_notify_trigger_offsets();
        self.refresh_branching_point_markers();
    }

    /// Usable for playback: positive length, at least one slot with
    /// segments, and unique section names.
    pub fn is_valid(&self) -> bool {
        if self.sequence_length <= 0.0 {
            return false;
        }
        if !self.slot_anim_tracks.iter().any(|slot| !slot.track.is_empty()) {
            return false;
        }
        self.composite_sections
            .iter()
            .enumerate()
            .all(|(i, section)| {
                self.composite_sections[..i]
                    .iter()
                    .all(|other| other.name != section.name)
            })
    }

    pub fn num_sections(&self) -> usize {
        self.composite_sections.len()
    }

    pub fn section(&self, index: usize) -> Option<&CompositeSection> {
        self.composite_sections.get(index)
    }

    pub fn section_index(&self, name: &str) -> Option<usize> {
        self.composite_sections
            .iter()
            .position(|section| section.name == name)
    }

    pub fn section_name(&self, index: usize) -> Option<&str> {
        self.composite_sections
            .get(index)
            .map(|section| section.name.as_str())
    }

    pub fn is_valid_section_index(&self, index: usize) -> bool {
        index < self.composite_sections.len()
    }

    /// Appends a section. An empty name gets a generated `SectionN` name.
    /// The previous section is chained to the new one if it had no next.
    pub fn add_composite_section(&mut self, name: &str, start_time: f32) -> Option<usize> {
        let name = if name.is_empty() {
            format!("Section{}", self.composite_sections.len() + 1)
        } else {
            name.to_string()
        };
        if self.section_index(&name).is_some() {
            log::warn!(
                "composite section '{}' already exists in montage '{}'",
                name,
                self.name
            );
            return None;
        }

        let mut link = AnimLink::absolute(start_time);
        link.link_to_segment(&self.slot_anim_tracks, start_time, LinkMethod::Relative);
        self.composite_sections.push(CompositeSection {
            name: name.clone(),
            link,
            next_section_name: None,
        });
        let index = self.composite_sections.len() - 1;
        if let Some(prev) = index
            .checked_sub(1)
            .and_then(|prev| self.composite_sections.get_mut(prev))
        {
            if prev.next_section_name.is_none() {
                prev.next_section_name = Some(name);
            }
        }
        self.refresh_notify_trigger_offsets();
        self.refresh_branching_point_markers();
        Some(index)
    }

    /// Removes a section and clears any next links that pointed at it.
    pub fn delete_composite_section(&mut self, index: usize) -> bool {
        if index >= self.composite_sections.len() {
            return false;
        }
        let removed = self.composite_sections.remove(index);
        for section in &mut self.composite_sections {
            if section.next_section_name.as_deref() == Some(removed.name.as_str()) {
                section.next_section_name = None;
            }
        }
        self.refresh_notify_trigger_offsets();
        self.refresh_branching_point_markers();
        true
    }

    pub fn sort_composite_sections_by_pos(&mut self) {
        self.composite_sections
            .sort_by(|a, b| a.time().total_cmp(&b.time()));
    }

    pub fn set_section_next(&mut self, section: &str, next: Option<&str>) -> Result<(), Error> {
        if let Some(next) = next {
            if self.section_index(next).is_none() {
                return Err(Error::UnknownSection {
                    montage: self.name.clone(),
                    section: next.to_string(),
                });
            }
        }
        let Some(index) = self.section_index(section) else {
            return Err(Error::UnknownSection {
                montage: self.name.clone(),
                section: section.to_string(),
            });
        };
        self.composite_sections[index].next_section_name = next.map(str::to_string);
        Ok(())
    }

    /// `[start(first), start(second))`, where a missing `first` starts at 0
    /// and a missing `second` ends at the sequence length, closed on the right.
    pub fn is_within_pos(&self, first: usize, second: usize, time: f32) -> bool {
        let start = self.section(first).map(|s| s.time()).unwrap_or(0.0);
        match self.section(second) {
            Some(next) => start <= time && time < next.time(),
            None => start <= time && time <= self.sequence_length,
        }
    }

    pub fn section_index_from_position(&self, position: f32) -> Option<usize> {
        (0..self.composite_sections.len()).find(|&i| self.is_within_pos(i, i + 1, position))
    }

    /// Section containing `position` and the offset from its start.
    pub fn composite_section_index_from_pos(&self, position: f32) -> Option<(usize, f32)> {
        let index = self.section_index_from_position(position)?;
        Some((index, position - self.composite_sections[index].time()))
    }

    pub fn section_start_and_end_time(&self, index: usize) -> Option<(f32, f32)> {
        let start = self.section(index)?.time();
        let end = self
            .section(index + 1)
            .map(|next| next.time())
            .unwrap_or(self.sequence_length);
        Some((start, end))
    }

    pub fn section_length(&self, index: usize) -> f32 {
        self.section_start_and_end_time(index)
            .map(|(start, end)| end - start)
            .unwrap_or(0.0)
    }

    /// Time from `position` to the start of the following section, or to the
    /// sequence end inside the last one.
    pub fn section_time_left_from_pos(&self, position: f32) -> Option<f32> {
        let index = self.section_index_from_position(position)?;
        let end = self
            .section(index + 1)
            .map(|next| next.time())
            .unwrap_or(self.sequence_length);
        Some(end - position)
    }

    pub fn add_notify(&mut self, notify: AnimNotifyEvent) -> usize {
        self.notifies.push(notify);
        self.refresh_notify_trigger_offsets();
        self.refresh_branching_point_markers();
        self.notifies.len() - 1
    }

    pub fn branching_point_markers(&self) -> &[BranchingPointMarker] {
        &self.branching_point_markers
    }

    pub fn branching_point_state_notify_indices(&self) -> &[usize] {
        &self.branching_point_state_notify_indices
    }

    /// Rebuilds the sorted marker cache. State notifies get an `End` marker
    /// too. Markers sharing a trigger time are kept in insertion order and
    /// reported, since only the first one can be found by a forward search.
    pub fn refresh_branching_point_markers(&mut self) {
        let mut markers = Vec::new();
        let mut state_indices = Vec::new();
        let mut trigger_times: Vec<(f32, usize)> = Vec::new();

        let mut add = |marker: BranchingPointMarker,
                       markers: &mut Vec<BranchingPointMarker>,
                       notifies: &[AnimNotifyEvent]| {
            if let Some(&(_, existing)) = trigger_times
                .iter()
                .find(|(time, _)| (time - marker.trigger_time).abs() <= TIME_EPSILON)
            {
                log::warn!(
                    "branching point '{}' overlaps with '{}' at time {}; one of them will not be triggered",
                    notifies[marker.notify_index].name,
                    notifies[existing].name,
                    marker.trigger_time
                );
            } else {
                trigger_times.push((marker.trigger_time, marker.notify_index));
            }
            markers.push(marker);
        };

        for (index, notify) in self.notifies.iter().enumerate() {
            if !notify.is_branching_point() {
                continue;
            }
            add(
                BranchingPointMarker {
                    notify_index: index,
                    trigger_time: notify.trigger_time(),
                    event_type: BranchingPointEventType::Begin,
                },
                &mut markers,
                &self.notifies,
            );
            if notify.is_state() {
                add(
                    BranchingPointMarker {
                        notify_index: index,
                        trigger_time: notify.end_trigger_time(),
                        event_type: BranchingPointEventType::End,
                    },
                    &mut markers,
                    &self.notifies,
                );
                state_indices.push(index);
            }
        }

        markers.sort_by(|a, b| a.trigger_time.total_cmp(&b.trigger_time));
        self.branching_point_markers = markers;
        self.branching_point_state_notify_indices = state_indices;
    }

    /// First marker crossed moving from `start` to `end`, excluding `start`
    /// itself and including `end`. Backward when `end < start`.
    pub fn find_first_branching_point_marker(
        &self,
        start: f32,
        end: f32,
    ) -> Option<&BranchingPointMarker> {
        if end >= start {
            for marker in &self.branching_point_markers {
                if marker.trigger_time <= start {
                    continue;
                }
                if marker.trigger_time > end {
                    break;
                }
                return Some(marker);
            }
        } else {
            for marker in self.branching_point_markers.iter().rev() {
                if marker.trigger_time >= start {
                    continue;
                }
                if marker.trigger_time < end {
                    break;
                }
                return Some(marker);
            }
        }
        None
    }

    pub fn filter_out_branching_point_notifies(notifies: &mut Vec<AnimNotifyEvent>) {
        notifies.retain(|notify| !notify.is_branching_point());
    }

    /// Montage-level notifies crossed between two positions.
    pub fn notifies_from_delta_positions(
        &self,
        previous: f32,
        current: f32,
        out: &mut Vec<AnimNotifyEvent>,
    ) {
        collect_notifies_from_delta_positions(&self.notifies, previous, current, out);
    }

    /// Notifies on the montage start fire just after it and those on the end
    /// just before it. Others sitting exactly on a section start fire just
    /// before it, so a jump to that section does not skip them.
    pub fn refresh_notify_trigger_offsets(&mut self) {
        let section_times: Vec<f32> = self.composite_sections.iter().map(|s| s.time()).collect();
        let sequence_length = self.sequence_length;
        let offset_at = |time: f32| {
            if time.abs() <= TIME_EPSILON {
                TriggerOffset::OffsetAfter
            } else if (time - sequence_length).abs() <= TIME_EPSILON {
                TriggerOffset::OffsetBefore
            } else if section_times
                .iter()
                .any(|section| (section - time).abs() <= TIME_EPSILON)
            {
                TriggerOffset::OffsetBefore
            } else {
                TriggerOffset::None
            }
        };
        for notify in &mut self.notifies {
            notify.trigger_offset = offset_at(notify.time());
            notify.end_trigger_offset = if notify.is_state() {
                offset_at(notify.time() + notify.duration)
            } else {
                TriggerOffset::None
            };
        }
    }

    pub fn update_linkable_elements(&mut self) {
        let tracks = &self.slot_anim_tracks;
        for section in &mut self.composite_sections {
            section.link.update(tracks);
        }
        for notify in &mut self.notifies {
            notify.link.update(tracks);
        }
    }

    pub fn slot_track(&self, slot_name: &str) -> Option<&SlotAnimTrack> {
        self.slot_anim_tracks
            .iter()
            .find(|slot| slot.slot_name == slot_name)
    }

    pub fn animation_data(&self, slot_name: &str) -> Option<&AnimTrack> {
        self.slot_track(slot_name).map(|slot| &slot.track)
    }

    pub fn is_valid_slot(&self, slot_name: &str) -> bool {
        self.slot_track(slot_name)
            .is_some_and(|slot| !slot.track.is_empty())
    }

    /// True when every slot track is additive.
    pub fn is_valid_additive(&self) -> bool {
        !self.slot_anim_tracks.is_empty()
            && self
                .slot_anim_tracks
                .iter()
                .all(|slot| slot.track.is_additive())
    }

    pub fn has_root_motion(&self) -> bool {
        self.slot_anim_tracks
            .iter()
            .any(|slot| slot.track.has_root_motion())
    }

    /// Slot group of the first slot track.
    pub fn group_name<'a>(&self, skeleton: &'a Skeleton) -> &'a str {
        match self.slot_anim_tracks.first() {
            Some(slot) => skeleton.slot_group_name(&slot.slot_name),
            None => DEFAULT_SLOT_GROUP_NAME,
        }
    }

    /// With several slot tracks, slot names must be unique and share the
    /// first slot's group.
    pub fn has_valid_slot_setup(&self, skeleton: &Skeleton) -> bool {
        if self.slot_anim_tracks.len() <= 1 {
            return true;
        }
        let group = self.group_name(skeleton);
        for (index, slot) in self.slot_anim_tracks.iter().enumerate().skip(1) {
            if self.slot_anim_tracks[..index]
                .iter()
                .any(|other| other.slot_name == slot.slot_name)
            {
                log::warn!(
                    "montage '{}' not playable: slot '{}' already used before track {}",
                    self.name,
                    slot.slot_name,
                    index
                );
                return false;
            }
            let slot_group = skeleton.slot_group_name(&slot.slot_name);
            if slot_group != group {
                log::warn!(
                    "montage '{}' not playable: slot '{}' belongs to group '{}' instead of '{}'",
                    self.name,
                    slot.slot_name,
                    slot_group,
                    group
                );
                return false;
            }
        }
        true
    }

    /// Root motion between two montage positions. Only the first slot track
    /// contributes.
    pub fn extract_root_motion_from_track_range(&self, start: f32, end: f32) -> Transform {
        let mut params = RootMotionMovementParams::default();
        if let Some(slot) = self.slot_anim_tracks.first() {
            let mut steps = Vec::new();
            slot.track
                .root_motion_extraction_steps_for_track_range(start, end, &mut steps);
            for step in steps {
                if step.anim.enable_root_motion {
                    params.accumulate(&step.anim.extract_root_motion_from_range(
                        step.start_position,
                        step.end_position,
                    ));
                }
            }
        }
        params.root_motion_transform()
    }
}
