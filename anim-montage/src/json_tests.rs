use crate::json::MontageLibrary;
use crate::{AdditiveType, BlendOption, Error, MontagePlayer, NotifyKind};
use glam::Vec3;

const LIBRARY: &str = r#"
{
  "skeleton": {
    "bones": [
      { "name": "root" },
      { "name": "spine", "parent": "root", "reference": { "translation": [0, 1, 0] } }
    ],
    "slotGroups": [ { "name": "Upper", "slots": ["UpperBody"] } ]
  },
  "sequences": [
    {
      "name": "swing",
      "length": 1.0,
      "rootMotion": true,
      "bones": [
        { "bone": "root", "keys": [ { "time": 1.0, "translation": [2, 0, 0] }, { "time": 0.0 } ] }
      ],
      "curves": [ { "name": "alpha", "keys": [ { "time": 0.0, "value": 0.0 }, { "time": 1.0, "value": 1.0 } ] } ],
      "notifies": [ { "name": "Whoosh", "time": 0.5 } ]
    },
    { "name": "lean", "length": 0.5, "additive": "localSpace" }
  ],
  "montages": [
    {
      "name": "combo",
      "blendIn": { "time": 0.1, "option": "cubic" },
      "blendOut": { "time": 0.3 },
      "blendOutTriggerTime": 0.4,
      "syncGroup": "attack",
      "slots": [
        {
          "slot": "DefaultSlot",
          "segments": [
            { "animation": "swing" },
            { "animation": "swing", "playRate": 2.0, "loopingCount": 2 }
          ]
        }
      ],
      "sections": [
        { "name": "End", "time": 1.5 },
        { "name": "Start", "time": 0.0, "next": "End" }
      ],
      "notifies": [
        { "name": "Window", "time": 1.2, "duration": 0.2, "kind": "state", "tickType": "branchingPoint" },
        { "name": "Hit", "time": 0.25, "triggerWeightThreshold": 0.5 }
      ]
    }
  ]
}
"#;

fn with_montage(montage: &str) -> String {
    format!(
        r#"{{
  "skeleton": {{ "bones": [ {{ "name": "root" }} ] }},
  "sequences": [ {{ "name": "clip", "length": 1.0 }} ],
  "montages": [ {montage} ]
}}"#
    )
}

#[test]
fn json_library_resolves_skeleton_and_sequences() {
    let library = MontageLibrary::from_json_str(LIBRARY).expect("parse");

    let skeleton = &library.skeleton;
    assert_eq!(skeleton.num_bones(), 2);
    assert_eq!(skeleton.parent_index(1), Some(0));
    assert!(skeleton.bones()[1]
        .reference
        .translation
        .abs_diff_eq(Vec3::new(0.0, 1.0, 0.0), 1e-6));
    assert_eq!(skeleton.slot_group_name("UpperBody"), "Upper");
    assert_eq!(skeleton.slot_group_name("DefaultSlot"), "DefaultGroup");

    let swing = library.sequence("swing").expect("swing");
    assert!(swing.enable_root_motion);
    assert_eq!(swing.bone_tracks[0].keys[0].time, 0.0);
    assert!(swing.bone_tracks[0].keys[1]
        .transform
        .translation
        .abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-6));
    assert_eq!(swing.curves[0].keys.len(), 2);
    assert_eq!(swing.notifies[0].name, "Whoosh");

    let lean = library.sequence("lean").expect("lean");
    assert_eq!(lean.additive_type, AdditiveType::LocalSpace);
}

#[test]
fn json_montage_lays_out_segments_sections_and_notifies() {
    let library = MontageLibrary::from_json_str(LIBRARY).expect("parse");
    let combo = library.montage("combo").expect("combo");

    let segments = &combo.slot_anim_tracks[0].track.segments;
    assert!((segments[1].start_pos - 1.0).abs() < 1e-6);
    assert!((combo.sequence_length - 2.0).abs() < 1e-6);

    // Sections come back sorted; an absent `next` ends playback.
    assert_eq!(combo.composite_sections[0].name, "Start");
    assert_eq!(
        combo.composite_sections[0].next_section_name.as_deref(),
        Some("End")
    );
    assert_eq!(combo.composite_sections[1].next_section_name, None);
    assert!((combo.composite_sections[1].time() - 1.5).abs() < 1e-5);

    assert_eq!(combo.blend_in.blend_option, BlendOption::Cubic);
    assert!((combo.blend_in.blend_time - 0.1).abs() < 1e-6);
    assert_eq!(combo.blend_out.blend_option, BlendOption::Linear);
    assert!((combo.blend_out_trigger_time - 0.4).abs() < 1e-6);
    assert_eq!(combo.sync_group.as_deref(), Some("attack"));

    let window = &combo.notifies[0];
    assert_eq!(window.kind, NotifyKind::State);
    assert!(window.is_branching_point());
    assert!((window.time() - 1.2).abs() < 1e-5);
    assert!((combo.notifies[1].trigger_weight_threshold - 0.5).abs() < 1e-6);
    assert_eq!(combo.branching_point_markers().len(), 2);
    assert_eq!(combo.branching_point_state_notify_indices(), [0]);

    let mut player = MontagePlayer::new(library.skeleton.clone());
    player.montage_play(combo.clone(), 1.0).expect("play");
    assert!(player.montage_is_active(Some("combo")));
}

#[test]
fn json_montage_without_sections_gets_default_section() {
    let json = with_montage(
        r#"{ "name": "plain", "slots": [ { "slot": "DefaultSlot", "segments": [ { "animation": "clip" } ] } ] }"#,
    );
    let library = MontageLibrary::from_json_str(&json).expect("parse");
    let plain = library.montage("plain").expect("plain");
    assert_eq!(plain.num_sections(), 1);
    assert_eq!(plain.composite_sections[0].name, "Default");
}

#[test]
fn json_rejects_unresolved_references() {
    let bad_parent = r#"{ "skeleton": { "bones": [ { "name": "arm", "parent": "body" } ] } }"#;
    assert!(matches!(
        MontageLibrary::from_json_str(bad_parent),
        Err(Error::JsonUnknownBone { .. })
    ));

    let bad_animation = with_montage(
        r#"{ "name": "m", "slots": [ { "slot": "DefaultSlot", "segments": [ { "animation": "missing" } ] } ] }"#,
    );
    assert!(matches!(
        MontageLibrary::from_json_str(&bad_animation),
        Err(Error::JsonUnknownAnimation { .. })
    ));

    let bad_next = with_montage(
        r#"{ "name": "m", "slots": [ { "slot": "DefaultSlot", "segments": [ { "animation": "clip" } ] } ],
            "sections": [ { "name": "A", "time": 0.0, "next": "Z" } ] }"#,
    );
    assert!(matches!(
        MontageLibrary::from_json_str(&bad_next),
        Err(Error::JsonUnknownSection { .. })
    ));
}

#[test]
fn json_rejects_invalid_values() {
    let duplicate = with_montage(
        r#"{ "name": "m", "slots": [ { "slot": "DefaultSlot", "segments": [ { "animation": "clip" } ] } ],
            "sections": [ { "name": "A", "time": 0.0 }, { "name": "A", "time": 0.5 } ] }"#,
    );
    assert!(matches!(
        MontageLibrary::from_json_str(&duplicate),
        Err(Error::InvalidMontage { .. })
    ));

    let bad_option = with_montage(r#"{ "name": "m", "blendIn": { "option": "bouncy" } }"#);
    assert!(matches!(
        MontageLibrary::from_json_str(&bad_option),
        Err(Error::JsonUnsupportedValue { .. })
    ));

    assert!(matches!(
        MontageLibrary::from_json_str("{ not json"),
        Err(Error::JsonParse { .. })
    ));
}
