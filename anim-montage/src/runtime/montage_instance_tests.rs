use super::{
    MontageEventDispatcher, MontageInstance, MontageSnapshot, RootMotionMovementParams,
    RootMotionTarget, SimulationContext, SyncLeaderState,
};
use crate::{
    AnimNotifyEvent, AnimSegment, AnimSequence, AnimTrack, BoneTrack, KINDA_SMALL_NUMBER,
    Montage, MontageBlendSettings, NotifyKind, SlotAnimTrack, Transform, TransformKey,
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

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    handle_functions: bool,
    jump_on: Option<(&'static str, &'static str)>,
}

impl MontageEventDispatcher for Recorder {
    fn add_anim_notifies(
        &mut self,
        _montage: &MontageSnapshot,
        notifies: &[AnimNotifyEvent],
        _weight: f32,
    ) {
        for notify in notifies {
            self.events.push(format!("notify:{}", notify.name));
        }
    }

    fn trigger_single_anim_notify(&mut self, instance: &mut MontageInstance, notify: &AnimNotifyEvent) {
        self.events.push(format!("single:{}", notify.name));
        if let Some((name, section)) = self.jump_on {
            if notify.name == name {
                instance.jump_to_section_name(section, false);
            }
        }
    }

    fn call_function(&mut self, _instance: &mut MontageInstance, function: &str) -> bool {
        if self.handle_functions {
            self.events.push(format!("call:{function}"));
        }
        self.handle_functions
    }

    fn notify_begin(&mut self, _instance: &mut MontageInstance, notify: &AnimNotifyEvent, _duration: f32) {
        self.events.push(format!("begin:{}", notify.name));
    }

    fn notify_tick(&mut self, _instance: &mut MontageInstance, notify: &AnimNotifyEvent, _delta: f32) {
        self.events.push(format!("tick:{}", notify.name));
    }

    fn notify_end(&mut self, _instance: &mut MontageInstance, notify: &AnimNotifyEvent) {
        self.events.push(format!("end:{}", notify.name));
    }

    fn on_montage_instance_stopped(&mut self, _montage: &MontageSnapshot) {
        self.events.push("stopped".to_string());
    }

    fn queue_montage_blending_out_event(&mut self, _montage: &MontageSnapshot, interrupted: bool) {
        self.events.push(format!("blending_out:{interrupted}"));
    }

    fn queue_montage_ended_event(&mut self, _montage: &MontageSnapshot, interrupted: bool) {
        self.events.push(format!("ended:{interrupted}"));
    }
}

fn clip(length: f32) -> Arc<AnimSequence> {
    Arc::new(AnimSequence::new("clip", length))
}

fn root_motion_clip(length: f32, distance: f32) -> Arc<AnimSequence> {
    let mut anim = AnimSequence::new("dash", length);
    anim.enable_root_motion = true;
    anim.bone_tracks.push(BoneTrack {
        bone_index: 0,
        keys: vec![
            TransformKey {
                time: 0.0,
                transform: Transform::IDENTITY,
            },
            TransformKey {
                time: length,
                transform: Transform::from_translation(Vec3::new(distance, 0.0, 0.0)),
            },
        ],
    });
    Arc::new(anim)
}

/// Montage over one clip with the given `(name, start, next)` sections and an
/// instant blend-in.
fn montage(length: f32, sections: &[(&str, f32, Option<&str>)]) -> Montage {
    let track = AnimTrack::new(vec![AnimSegment::new(clip(length), 0.0)]);
    let mut montage = Montage::new("test", vec![SlotAnimTrack::new("DefaultSlot", track)]);
    for (name, time, _) in sections {
        montage.add_composite_section(name, *time);
    }
    for (name, _, next) in sections {
        montage.set_section_next(name, *next).unwrap();
    }
    montage.blend_in = MontageBlendSettings::new(0.0);
    montage
}

fn two_sections() -> Montage {
    montage(2.0, &[("A", 0.0, Some("B")), ("B", 1.0, None)])
}

fn start(montage: Montage, context: &mut SimulationContext) -> MontageInstance {
    let mut instance = MontageInstance::new(Arc::new(montage), context);
    instance.play(1.0);
    instance
}

fn tick(instance: &mut MontageInstance, delta: f32, recorder: &mut Recorder) {
    instance.update_weight(delta);
    instance.advance(delta, None, recorder);
}

#[test]
fn blends_in_plays_through_and_terminates() {
    let mut montage = montage(2.0, &[("Full", 0.0, None)]);
    montage.blend_in = MontageBlendSettings::new(0.25);
    montage.blend_out = MontageBlendSettings::new(0.25);
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    let mut recorder = Recorder::default();
    assert_approx(instance.weight(), 0.0);

    let mut stop_tick = None;
    let mut end_tick = None;
    for step in 1..=20 {
        tick(&mut instance, 0.1, &mut recorder);
        if step == 2 {
            assert!(instance.weight() < 1.0);
        }
        if step == 3 {
            assert_approx(instance.weight(), 1.0);
        }
        if stop_tick.is_none() && recorder.events.iter().any(|e| e == "blending_out:false") {
            stop_tick = Some(step);
            assert!(instance.is_stopped());
            assert!(instance.is_playing());
            assert_approx(instance.blend_time(), 2.0 - instance.position());
        }
        if end_tick.is_none() && recorder.events.iter().any(|e| e == "ended:false") {
            end_tick = Some(step);
        }
        if step == 19 {
            assert_approx(instance.weight(), 0.5);
        }
    }

    assert_eq!(stop_tick, Some(18));
    assert_eq!(end_tick, Some(20));
    assert_eq!(
        recorder.events,
        ["stopped", "blending_out:false", "ended:false"]
    );
    assert!(!instance.is_valid());
    assert_approx(instance.position(), 2.0);
}

#[test]
fn forward_play_is_monotonic_until_blend_out() {
    let mut montage = montage(1.0, &[("A", 0.0, Some("B")), ("B", 0.5, None)]);
    montage.blend_out = MontageBlendSettings::new(0.2);
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    let mut recorder = Recorder::default();

    let mut last = instance.position();
    let mut stopped_at = None;
    for _ in 0..40 {
        tick(&mut instance, 1.0 / 30.0, &mut recorder);
        if !instance.is_valid() {
            break;
        }
        assert!(instance.position() >= last);
        last = instance.position();
        if stopped_at.is_none() && instance.is_stopped() {
            stopped_at = Some(instance.position());
        }
    }
    let stopped_at = stopped_at.unwrap();
    assert!(1.0 - stopped_at <= 0.2 + 1.0e-5);
    assert!(1.0 - stopped_at > 0.2 - 1.0 / 30.0 - 1.0e-5);
    assert!(!instance.is_valid());
}

#[test]
fn crossing_into_linked_section_keeps_leftover_time() {
    let mut context = SimulationContext::new();
    let mut instance = start(two_sections(), &mut context);
    instance.set_position(0.9);
    let mut recorder = Recorder::default();

    tick(&mut instance, 0.2, &mut recorder);

    assert_approx(instance.position(), 1.1);
    assert_eq!(instance.current_section(), Some("B"));
    assert!(!instance.is_stopped());
}

#[test]
fn jump_to_section_lands_on_its_start_or_end() {
    let mut context = SimulationContext::new();
    let mut instance = start(two_sections(), &mut context);

    assert!(instance.jump_to_section_name("B", false));
    assert_eq!(instance.position(), 1.0);

    assert!(instance.jump_to_section_name("A", true));
    assert_approx(instance.position(), 1.0 - KINDA_SMALL_NUMBER);

    assert!(!instance.jump_to_section_name("Missing", false));
    assert_approx(instance.position(), 1.0 - KINDA_SMALL_NUMBER);
}

#[test]
fn self_linked_section_loops() {
    let mut context = SimulationContext::new();
    let mut instance = start(two_sections(), &mut context);
    assert!(instance.set_next_section_name("B", Some("B")));
    assert_eq!(instance.next_section_id(1), Some(1));
    instance.set_position(1.9);
    let mut recorder = Recorder::default();

    tick(&mut instance, 0.2, &mut recorder);

    assert_approx(instance.position(), 1.1);
    assert!(!instance.is_stopped());
    assert!(recorder.events.is_empty());
}

#[test]
fn backward_play_enters_previous_section_end() {
    let mut context = SimulationContext::new();
    let mut instance = start(two_sections(), &mut context);
    instance.set_play_rate(-1.0);
    instance.set_position(1.05);
    let mut recorder = Recorder::default();

    tick(&mut instance, 0.1, &mut recorder);

    assert!((instance.position() - (0.95 - KINDA_SMALL_NUMBER / 2.0)).abs() <= 1.0e-4);
    assert_eq!(instance.current_section(), Some("A"));
}

#[test]
fn relinking_sections_updates_reverse_links() {
    let mut context = SimulationContext::new();
    let mut instance = start(
        montage(3.0, &[("A", 0.0, Some("B")), ("B", 1.0, Some("C")), ("C", 2.0, None)]),
        &mut context,
    );
    assert_eq!(instance.prev_section_id(1), Some(0));

    assert!(instance.set_next_section_id(0, Some(2)));
    assert_eq!(instance.next_section_id(0), Some(2));
    assert_eq!(instance.prev_section_id(2), Some(0));

    assert!(instance.set_next_section_id(0, None));
    assert_eq!(instance.prev_section_id(2), None);
    assert!(!instance.set_next_section_id(7, None));
    assert_eq!(instance.section_name_from_id(2), Some("C"));
}

#[test]
fn terminate_is_idempotent() {
    let mut context = SimulationContext::new();
    let mut instance = start(two_sections(), &mut context);
    let mut recorder = Recorder::default();

    instance.terminate(&mut recorder);
    instance.terminate(&mut recorder);

    assert_eq!(recorder.events, ["ended:false"]);
    assert!(!instance.is_valid());
    assert!(!instance.is_active());
    assert!(!instance.is_playing());
}

#[test]
fn branching_point_fires_at_its_exact_position() {
    let mut montage = two_sections();
    montage.add_notify(AnimNotifyEvent::new("Mid", 0.25));
    montage.add_notify(AnimNotifyEvent::new("Open", 0.5).as_branching_point());
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    let mut recorder = Recorder::default();

    tick(&mut instance, 0.8, &mut recorder);

    assert_eq!(recorder.events, ["notify:Mid", "single:Open"]);
    assert_approx(instance.position(), 0.8);
}

#[test]
fn notify_on_the_first_frame_is_queued_once() {
    let mut montage = montage(2.0, &[("Full", 0.0, None)]);
    montage.add_notify(AnimNotifyEvent::new("Start", 0.0));
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    let mut recorder = Recorder::default();

    for _ in 0..5 {
        tick(&mut instance, 0.1, &mut recorder);
    }

    assert_eq!(recorder.events, ["notify:Start"]);
}

#[test]
fn branching_point_handler_can_reposition() {
    let mut montage = two_sections();
    montage.add_notify(AnimNotifyEvent::new("Skip", 0.2).as_branching_point());
    montage.add_notify(AnimNotifyEvent::new("Mid", 0.25));
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    let mut recorder = Recorder {
        jump_on: Some(("Skip", "B")),
        ..Recorder::default()
    };

    tick(&mut instance, 0.3, &mut recorder);

    assert_eq!(recorder.events, ["single:Skip"]);
    assert_approx(instance.position(), 1.1);
}

#[test]
fn named_function_branching_point_prefers_callback() {
    let mut montage = two_sections();
    let mut notify = AnimNotifyEvent::new("Combo", 0.5).as_branching_point();
    notify.kind = NotifyKind::NamedFunction;
    montage.add_notify(notify);
    let montage = Arc::new(montage);
    let mut context = SimulationContext::new();

    let mut handled = MontageInstance::new(Arc::clone(&montage), &mut context);
    handled.play(1.0);
    let mut recorder = Recorder {
        handle_functions: true,
        ..Recorder::default()
    };
    tick(&mut handled, 0.6, &mut recorder);
    assert_eq!(recorder.events, ["call:MontageBranchingPoint_Combo"]);

    let mut unhandled = MontageInstance::new(montage, &mut context);
    unhandled.play(1.0);
    let mut recorder = Recorder::default();
    tick(&mut unhandled, 0.6, &mut recorder);
    assert_eq!(recorder.events, ["single:Combo"]);
}

#[test]
fn branching_point_state_begins_ticks_and_ends() {
    let mut montage = two_sections();
    let window = montage.add_notify(AnimNotifyEvent::state("Window", 0.5, 0.3).as_branching_point());
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    let mut recorder = Recorder::default();

    tick(&mut instance, 0.6, &mut recorder);
    assert_eq!(recorder.events, ["begin:Window", "tick:Window"]);
    assert_eq!(instance.active_state_branching_points(), [window]);

    tick(&mut instance, 0.3, &mut recorder);
    assert_eq!(recorder.events, ["begin:Window", "tick:Window", "end:Window"]);
    assert!(instance.active_state_branching_points().is_empty());
}

#[test]
fn terminate_ends_active_states_first() {
    let mut montage = two_sections();
    montage.add_notify(AnimNotifyEvent::state("Window", 0.5, 0.3).as_branching_point());
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    let mut recorder = Recorder::default();
    tick(&mut instance, 0.6, &mut recorder);
    recorder.events.clear();

    instance.terminate(&mut recorder);

    assert_eq!(recorder.events, ["end:Window", "ended:false"]);
}

#[test]
fn interrupted_instance_skips_events() {
    let mut montage = two_sections();
    montage.add_notify(AnimNotifyEvent::new("Mid", 0.25));
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    let mut recorder = Recorder::default();

    instance.stop(MontageBlendSettings::new(1.0), true, &mut recorder);
    assert!(instance.is_interrupted());
    tick(&mut instance, 0.5, &mut recorder);

    assert_eq!(recorder.events, ["stopped", "blending_out:true"]);
    assert_approx(instance.position(), 0.5);
}

#[test]
fn section_links_survive_blending_out() {
    let mut context = SimulationContext::new();
    let mut instance = start(two_sections(), &mut context);
    let mut recorder = Recorder::default();
    assert_eq!(instance.next_section_id(0), Some(1));

    instance.stop(MontageBlendSettings::new(0.5), false, &mut recorder);

    assert!(!instance.is_active());
    assert_eq!(instance.next_section_id(0), Some(1));
    assert_eq!(instance.next_section_id(1), None);
}

#[test]
fn stopping_again_only_shortens_the_blend() {
    let mut context = SimulationContext::new();
    let mut instance = start(two_sections(), &mut context);
    let mut recorder = Recorder::default();

    instance.stop(MontageBlendSettings::new(1.0), false, &mut recorder);
    instance.stop(MontageBlendSettings::new(0.4), false, &mut recorder);
    assert_approx(instance.blend_time(), 0.4);
    assert_approx(instance.blend().blend_time_remaining(), 0.4);

    instance.stop(MontageBlendSettings::new(2.0), true, &mut recorder);
    assert_approx(instance.blend_time(), 0.4);
    assert!(instance.is_interrupted());
    assert_eq!(recorder.events, ["stopped", "blending_out:false"]);
}

#[test]
fn zero_time_stop_halts_and_terminates_next_advance() {
    let mut context = SimulationContext::new();
    let mut instance = start(two_sections(), &mut context);
    let mut recorder = Recorder::default();

    instance.stop(MontageBlendSettings::new(0.0), false, &mut recorder);
    assert!(!instance.is_playing());
    assert_approx(instance.weight(), 0.0);

    tick(&mut instance, 0.1, &mut recorder);
    assert!(!instance.is_valid());
    assert_eq!(
        recorder.events,
        ["stopped", "blending_out:false", "ended:false"]
    );
}

#[test]
fn custom_trigger_time_uses_montage_blend_out() {
    let mut montage = two_sections();
    montage.blend_out_trigger_time = 0.5;
    montage.blend_out = MontageBlendSettings::new(0.3);
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    instance.set_position(1.25);
    let mut recorder = Recorder::default();

    tick(&mut instance, 0.125, &mut recorder);
    assert!(!instance.is_stopped());
    tick(&mut instance, 0.125, &mut recorder);
    assert!(instance.is_stopped());
    assert_approx(instance.blend_time(), 0.3);
}

#[test]
fn forced_position_fires_events_while_paused() {
    let mut montage = two_sections();
    montage.add_notify(AnimNotifyEvent::new("Mid", 0.25));
    let mut context = SimulationContext::new();
    let mut instance = start(montage, &mut context);
    instance.pause();
    let mut recorder = Recorder::default();

    tick(&mut instance, 0.1, &mut recorder);
    assert_approx(instance.position(), 0.0);

    instance.set_next_position_with_events(0.6);
    tick(&mut instance, 0.1, &mut recorder);
    assert_approx(instance.position(), 0.6);
    assert_eq!(recorder.events, ["notify:Mid"]);

    tick(&mut instance, 0.1, &mut recorder);
    assert_approx(instance.position(), 0.6);
}

#[test]
fn section_change_during_blend_out_restarts_play() {
    let mut context = SimulationContext::new();
    let mut instance = start(two_sections(), &mut context);
    let mut recorder = Recorder::default();
    instance.stop(MontageBlendSettings::new(0.5), false, &mut recorder);
    assert!(instance.is_stopped());

    instance.jump_to_section_name("B", false);

    assert!(instance.is_active());
    assert_approx(instance.desired_weight(), 1.0);
}

#[test]
fn root_motion_is_extracted_while_advancing() {
    let montage = Montage::from_sequence("DefaultSlot", root_motion_clip(2.0, 4.0));
    let mut context = SimulationContext::new();
    let mut instance = MontageInstance::new(Arc::new(montage), &mut context);
    instance.play(1.0);
    instance.update_weight(0.5);

    let mut params = RootMotionMovementParams::default();
    instance.advance(0.5, Some(RootMotionTarget::Accumulate(&mut params)), &mut ());

    assert!(params.has_root_motion);
    assert!(
        params
            .root_motion_transform()
            .translation
            .abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1.0e-4)
    );
}

#[test]
fn simulated_advance_predicts_without_side_effects() {
    let montage = Montage::from_sequence("DefaultSlot", root_motion_clip(2.0, 4.0));
    let mut context = SimulationContext::new();
    let mut instance = MontageInstance::new(Arc::new(montage), &mut context);
    instance.play(1.0);

    let mut position = 0.0;
    let mut params = RootMotionMovementParams::default();
    assert!(instance.simulate_advance(0.5, &mut position, &mut params));

    assert_approx(position, 0.5);
    assert!(
        params
            .root_motion_transform()
            .translation
            .abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1.0e-4)
    );
    assert_approx(instance.position(), 0.0);
    assert!(!MontageInstance::default().simulate_advance(0.5, &mut position, &mut params));
}

#[test]
fn follower_copies_leader_position_rate_and_next_section() {
    let mut context = SimulationContext::new();
    let mut follower = start(two_sections(), &mut context);
    follower.set_position(0.2);

    follower.sync_to_leader(&SyncLeaderState {
        position: 0.5,
        play_rate: 2.0,
        current_section: Some("A".to_string()),
        next_section: None,
        updated_this_frame: true,
    });

    assert_approx(follower.position(), 0.5);
    assert_approx(follower.play_rate(), 2.0);
    assert_eq!(follower.next_section_id(0), None);

    follower.sync_to_leader(&SyncLeaderState {
        position: 0.5 + KINDA_SMALL_NUMBER / 2.0,
        play_rate: 2.0,
        current_section: Some("B".to_string()),
        next_section: Some("A".to_string()),
        updated_this_frame: true,
    });
    assert_approx(follower.position(), 0.5);
    assert_eq!(follower.next_section_id(1), None);
}

#[test]
fn instance_ids_come_from_the_context() {
    let mut context = SimulationContext::new();
    let first = start(two_sections(), &mut context);
    let second = start(two_sections(), &mut context);
    assert_ne!(first.instance_id(), second.instance_id());
    assert!(!first.has_been_updated_this_frame(&context));

    let mut first = first;
    first.mark_updated(&context);
    assert!(first.has_been_updated_this_frame(&context));
    context.next_frame();
    assert!(!first.has_been_updated_this_frame(&context));
}
