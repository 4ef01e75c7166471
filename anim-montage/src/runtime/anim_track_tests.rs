use crate::{
    AdditiveType, AnimNotifyEvent, AnimSegment, AnimSequence, AnimTrack, BoneTrack, Transform,
    TransformKey,
};
use glam::Vec3;
use std::sync::Arc;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-5,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn clip(name: &str, length: f32) -> Arc<AnimSequence> {
    Arc::new(AnimSequence::new(name, length))
}

fn clip_with_notify(length: f32, notify_time: f32) -> Arc<AnimSequence> {
    let mut anim = AnimSequence::new("notified", length);
    anim.notifies.push(AnimNotifyEvent::new("Step", notify_time));
    Arc::new(anim)
}

fn looping_segment() -> AnimSegment {
    let mut segment = AnimSegment::new(clip("walk", 1.0), 1.0);
    segment.anim_start_time = 0.2;
    segment.anim_end_time = 0.8;
    segment.anim_play_rate = 2.0;
    segment.looping_count = 2;
    segment
}

#[test]
fn segment_length_accounts_for_rate_and_loops() {
    let segment = looping_segment();
    assert_approx(segment.anim_length(), 0.6);
    assert_approx(segment.length(), 0.6);
    assert_approx(segment.end_pos(), 1.6);
    assert!(segment.is_in_range(1.0));
    assert!(segment.is_in_range(1.6));
    assert!(!segment.is_in_range(1.7));
}

#[test]
fn track_positions_round_trip_through_clip_positions() {
    let segment = looping_segment();
    for track_pos in [1.0, 1.1, 1.25, 1.45, 1.55] {
        let anim_pos = segment.convert_track_pos_to_anim_pos(track_pos);
        let loop_index = segment.loop_index_at(track_pos);
        assert!(anim_pos >= segment.anim_start_time - 1.0e-5);
        assert!(anim_pos <= segment.anim_end_time + 1.0e-5);
        assert_approx(
            segment.convert_anim_pos_to_track_pos(anim_pos, loop_index),
            track_pos,
        );
    }
    assert_approx(segment.convert_track_pos_to_anim_pos(1.1), 0.4);
    assert_approx(segment.convert_track_pos_to_anim_pos(1.45), 0.5);
    assert_eq!(segment.loop_index_at(1.45), 1);
}

#[test]
fn reversed_segment_counts_down_from_clip_end() {
    let mut segment = AnimSegment::new(clip("reverse", 1.0), 0.0);
    segment.anim_play_rate = -1.0;

    assert_approx(segment.convert_track_pos_to_anim_pos(0.0), 1.0);
    assert_approx(segment.convert_track_pos_to_anim_pos(0.25), 0.75);
    assert_approx(segment.convert_track_pos_to_anim_pos(segment.end_pos()), 0.0);
}

#[test]
fn near_zero_play_rate_falls_back_to_one() {
    let mut segment = AnimSegment::new(clip("still", 1.0), 0.0);
    segment.anim_play_rate = 0.0;
    assert_approx(segment.valid_play_rate(), 1.0);
    assert_approx(segment.length(), 1.0);
}

#[test]
fn track_length_is_furthest_segment_end() {
    let mut late = AnimSegment::new(clip("b", 0.5), 2.0);
    late.looping_count = 3;
    let track = AnimTrack::new(vec![AnimSegment::new(clip("a", 1.0), 0.0), late]);
    assert_approx(track.length(), 3.5);
    assert!(AnimTrack::default().is_empty());
    assert_approx(AnimTrack::default().length(), 0.0);
}

#[test]
fn validate_lays_segments_end_to_end() {
    let mut first = AnimSegment::new(clip("a", 1.0), 0.7);
    first.anim_end_time = 5.0;
    let second = AnimSegment::new(clip("b", 0.5), 0.0);
    let mut track = AnimTrack::new(vec![first, second]);

    track.validate_segment_times();

    assert_approx(track.segments[0].start_pos, 0.0);
    assert_approx(track.segments[0].anim_end_time, 1.0);
    assert_approx(track.segments[1].start_pos, 1.0);
    assert_approx(track.length(), 1.5);
    assert_eq!(track.segment_index_at_time(1.2), Some(1));
    assert_eq!(track.segment_index_at_time(2.0), None);
}

#[test]
fn notifies_fire_once_per_loop_crossed() {
    let mut segment = AnimSegment::new(clip_with_notify(1.0, 0.5), 0.0);
    segment.looping_count = 2;
    let track = AnimTrack::new(vec![segment]);

    let mut notifies = Vec::new();
    track.notifies_from_track_positions(0.4, 1.6, &mut notifies);
    assert_eq!(notifies.len(), 2);

    notifies.clear();
    track.notifies_from_track_positions(0.6, 1.4, &mut notifies);
    assert!(notifies.is_empty());

    notifies.clear();
    track.notifies_from_track_positions(1.6, 1.4, &mut notifies);
    assert_eq!(notifies.len(), 1, "backward playback crosses 1.5");
}

#[test]
fn root_motion_steps_follow_playback_order() {
    let mut anim = AnimSequence::new("move", 1.0);
    anim.enable_root_motion = true;
    anim.bone_tracks.push(BoneTrack {
        bone_index: 0,
        keys: vec![
            TransformKey {
                time: 0.0,
                transform: Transform::IDENTITY,
            },
            TransformKey {
                time: 1.0,
                transform: Transform::from_translation(Vec3::new(4.0, 0.0, 0.0)),
            },
        ],
    });
    let anim = Arc::new(anim);
    let track = AnimTrack::new(vec![
        AnimSegment::new(Arc::clone(&anim), 0.0),
        AnimSegment::new(anim, 1.0),
    ]);
    assert!(track.has_root_motion());

    let mut steps = Vec::new();
    track.root_motion_extraction_steps_for_track_range(0.5, 1.5, &mut steps);
    assert_eq!(steps.len(), 2);
    assert_approx(steps[0].start_position, 0.5);
    assert_approx(steps[0].end_position, 1.0);
    assert_approx(steps[1].start_position, 0.0);
    assert_approx(steps[1].end_position, 0.5);

    steps.clear();
    track.root_motion_extraction_steps_for_track_range(1.5, 0.5, &mut steps);
    assert_eq!(steps.len(), 2);
    assert_approx(steps[0].start_position, 0.5);
    assert_approx(steps[0].end_position, 0.0);
    assert_approx(steps[1].start_position, 1.0);
    assert_approx(steps[1].end_position, 0.5);
}

#[test]
fn additivity_comes_from_first_segment() {
    let mut additive = AnimSequence::new("lean", 1.0);
    additive.additive_type = AdditiveType::LocalSpace;
    let track = AnimTrack::new(vec![
        AnimSegment::new(Arc::new(additive), 0.0),
        AnimSegment::new(clip("plain", 1.0), 1.0),
    ]);
    assert!(track.is_additive());
    assert_eq!(track.additive_type(), AdditiveType::LocalSpace);
    assert!(!track.has_root_motion());
}
