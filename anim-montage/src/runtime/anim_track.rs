use crate::{AdditiveType, AnimNotifyEvent, AnimSegment, AnimSequence, AnimTrack};
use std::sync::Arc;

/// Clip-local range to pull root motion from, in playback order.
#[derive(Clone, Debug)]
pub struct RootMotionExtractionStep {
    pub anim: Arc<AnimSequence>,
    pub start_position: f32,
    pub end_position: f32,
}

/// Clip and clip-local position resolved from a track position.
#[derive(Copy, Clone, Debug)]
pub struct SegmentSample<'a> {
    pub anim: &'a Arc<AnimSequence>,
    pub position: f32,
    pub weight: f32,
}

impl AnimSegment {
    /// Clip rate scale times segment rate; a near-zero product snaps to 1.
    pub fn valid_play_rate(&self) -> f32 {
        let clip_rate = self
            .anim_reference
            .as_ref()
            .map(|anim| anim.rate_scale)
            .unwrap_or(1.0);
        let rate = clip_rate * self.anim_play_rate;
        if rate.abs() <= 1.0e-8 { 1.0 } else { rate }
    }

    /// Length of the clip sub-range played by one loop.
    pub fn anim_length(&self) -> f32 {
        self.anim_end_time - self.anim_start_time
    }

    pub fn length(&self) -> f32 {
        self.looping_count as f32 * self.anim_length() / self.valid_play_rate().abs()
    }

    pub fn end_pos(&self) -> f32 {
        self.start_pos + self.length()
    }

    pub fn is_in_range(&self, track_pos: f32) -> bool {
        self.start_pos <= track_pos && track_pos <= self.end_pos()
    }

    pub fn is_valid(&self) -> bool {
        self.anim_reference.is_some()
            && self.anim_end_time > self.anim_start_time
            && self.looping_count >= 1
    }

    pub fn convert_track_pos_to_anim_pos(&self, track_pos: f32) -> f32 {
        self.track_pos_to_anim_pos_and_loop(track_pos).0
    }

    /// Loop iteration (0-based) that `track_pos` falls into.
    pub fn loop_index_at(&self, track_pos: f32) -> u32 {
        self.track_pos_to_anim_pos_and_loop(track_pos).1
    }

    /// Inverse of [`AnimSegment::convert_track_pos_to_anim_pos`] for a known
    /// loop iteration.
    pub fn convert_anim_pos_to_track_pos(&self, anim_pos: f32, loop_index: u32) -> f32 {
        let rate = self.valid_play_rate();
        let looped = loop_index as f32 * self.anim_length();
        let unwrapped = if rate >= 0.0 {
            anim_pos - self.anim_start_time + looped
        } else {
            anim_pos - self.anim_end_time - looped
        };
        self.start_pos + unwrapped / rate
    }

    fn track_pos_to_anim_pos_and_loop(&self, track_pos: f32) -> (f32, u32) {
        let rate = self.valid_play_rate();
        let anim_length = self.anim_length();
        if anim_length <= 0.0 {
            return (self.anim_start_time, 0);
        }
        let unwrapped = (track_pos - self.start_pos) * rate;
        let max_loops = self.looping_count.saturating_sub(1);
        let loops = ((unwrapped.abs() / anim_length).floor().max(0.0) as u32).min(max_loops);
        let looped = loops as f32 * anim_length;
        let anim_pos = if rate >= 0.0 {
            self.anim_start_time + (unwrapped - looped)
        } else {
            self.anim_end_time + (unwrapped + looped)
        };
        (anim_pos, loops)
    }

    pub fn animation_data(&self, track_pos: f32) -> Option<SegmentSample<'_>> {
        let anim = self.anim_reference.as_ref()?;
        if !self.is_in_range(track_pos) {
            return None;
        }
        Some(SegmentSample {
            anim,
            position: self.convert_track_pos_to_anim_pos(track_pos),
            weight: 1.0,
        })
    }

    /// Appends clip notifies crossed while the track moves from `previous` to
    /// `current`, without wrapping on the track.
    pub fn notifies_from_track_positions(
        &self,
        previous: f32,
        current: f32,
        out: &mut Vec<AnimNotifyEvent>,
    ) {
        self.for_each_clip_range(previous, current, |anim, start, end| {
            anim.notifies_from_delta_positions(start, end, out);
        });
    }

    pub fn root_motion_extraction_steps_for_track_range(
        &self,
        start_track_pos: f32,
        end_track_pos: f32,
        out: &mut Vec<RootMotionExtractionStep>,
    ) {
        self.for_each_clip_range(start_track_pos, end_track_pos, |anim, start, end| {
            out.push(RootMotionExtractionStep {
                anim: Arc::clone(anim),
                start_position: start,
                end_position: end,
            });
        });
    }

    /// Splits the overlap of `[from, to]` with this segment into clip-local
    /// ranges, one per loop iteration crossed, in playback order.
    fn for_each_clip_range(
        &self,
        from: f32,
        to: f32,
        mut f: impl FnMut(&Arc<AnimSequence>, f32, f32),
    ) {
        if from == to {
            return;
        }
        let Some(anim) = self.anim_reference.as_ref() else {
            return;
        };

        let track_backwards = to < from;
        let segment_start = self.start_pos;
        let segment_end = self.end_pos();
        let overlaps = if track_backwards {
            to < segment_end && from > segment_start
        } else {
            from < segment_end && to > segment_start
        };
        if !overlaps {
            return;
        }

        let rate = self.valid_play_rate();
        let abs_rate = rate.abs();
        let (start_in_segment, end_in_segment) = if track_backwards {
            (from.min(segment_end), to.max(segment_start))
        } else {
            (from.max(segment_start), to.min(segment_end))
        };

        let mut anim_start = self
            .convert_track_pos_to_anim_pos(start_in_segment)
            .clamp(self.anim_start_time, self.anim_end_time);
        let mut track_time_to_go = (end_in_segment - start_in_segment).abs();

        // Direction through the clip combines track direction and rate sign.
        let anim_backwards = track_backwards ^ (rate < 0.0);
        let reset_position = if anim_backwards {
            self.anim_end_time
        } else {
            self.anim_start_time
        };
        let anim_end_point = if anim_backwards {
            self.anim_start_time
        } else {
            self.anim_end_time
        };

        let mut iterations_left = self.looping_count.max(1);
        while iterations_left > 0 && track_time_to_go > 0.0 {
            let track_time_to_end_point = (anim_end_point - anim_start).abs() / abs_rate;
            if track_time_to_go < track_time_to_end_point {
                let direction = if anim_backwards { -1.0 } else { 1.0 };
                let anim_end = anim_start + track_time_to_go * abs_rate * direction;
                f(anim, anim_start, anim_end);
                break;
            }
            f(anim, anim_start, anim_end_point);
            track_time_to_go -= track_time_to_end_point;
            anim_start = reset_position;
            iterations_left -= 1;
        }
    }
}

impl AnimTrack {
    pub fn new(segments: Vec<AnimSegment>) -> Self {
        Self { segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn length(&self) -> f32 {
        self.segments
            .iter()
            .map(|segment| segment.end_pos())
            .fold(0.0, f32::max)
    }

    /// Lays segments end to end from 0 and clamps clip sub-ranges to the
    /// referenced clip.
    pub fn validate_segment_times(&mut self) {
        let mut running = 0.0;
        for segment in &mut self.segments {
            segment.start_pos = running;
            if let Some(anim) = segment.anim_reference.as_ref() {
                segment.anim_end_time = segment.anim_end_time.min(anim.length);
            }
            segment.anim_start_time = segment.anim_start_time.clamp(0.0, segment.anim_end_time);
            segment.looping_count = segment.looping_count.max(1);
            running += segment.length();
        }
    }

    pub fn segment_index_at_time(&self, time: f32) -> Option<usize> {
        self.segments
            .iter()
            .position(|segment| segment.is_in_range(time))
    }

    pub fn segment_at_time(&self, time: f32) -> Option<&AnimSegment> {
        self.segment_index_at_time(time)
            .map(|index| &self.segments[index])
    }

    /// Additivity is decided by the first segment's clip.
    pub fn additive_type(&self) -> AdditiveType {
        self.segments
            .first()
            .and_then(|segment| segment.anim_reference.as_ref())
            .map(|anim| anim.additive_type)
            .unwrap_or_default()
    }

    pub fn is_additive(&self) -> bool {
        self.additive_type() != AdditiveType::None
    }

    pub fn has_root_motion(&self) -> bool {
        self.segments.iter().any(|segment| {
            segment
                .anim_reference
                .as_ref()
                .is_some_and(|anim| anim.enable_root_motion)
        })
    }

    /// Segments are visited in reverse when the range runs backwards, so the
    /// steps come out in playback order.
    pub fn root_motion_extraction_steps_for_track_range(
        &self,
        start_track_pos: f32,
        end_track_pos: f32,
        out: &mut Vec<RootMotionExtractionStep>,
    ) {
        if start_track_pos <= end_track_pos {
            for segment in &self.segments {
                segment.root_motion_extraction_steps_for_track_range(
                    start_track_pos,
                    end_track_pos,
                    out,
                );
            }
        } else {
            for segment in self.segments.iter().rev() {
                segment.root_motion_extraction_steps_for_track_range(
                    start_track_pos,
                    end_track_pos,
                    out,
                );
            }
        }
    }

    pub fn notifies_from_track_positions(
        &self,
        previous: f32,
        current: f32,
        out: &mut Vec<AnimNotifyEvent>,
    ) {
        for segment in &self.segments {
            segment.notifies_from_track_positions(previous, current, out);
        }
    }
}
