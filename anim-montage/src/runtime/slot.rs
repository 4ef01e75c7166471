use crate::{MontagePlayer, Pose, ZERO_ANIMWEIGHT_THRESH};

/// Weights a slot node reports for one frame.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SlotNodeWeight {
    /// Share of the output taken by montages, at most 1.
    pub slot_weight: f32,
    /// Share left to the source pose.
    pub source_weight: f32,
    /// Raw sum of montage weights before renormalization.
    pub total_weight: f32,
}

/// Graph node that plays montages for one named slot on top of a source pose.
#[derive(Clone, Debug)]
pub struct SlotNode {
    pub slot_name: String,
    weight: SlotNodeWeight,
}

impl SlotNode {
    pub fn new(slot_name: impl Into<String>) -> Self {
        Self {
            slot_name: slot_name.into(),
            weight: SlotNodeWeight {
                source_weight: 1.0,
                ..SlotNodeWeight::default()
            },
        }
    }

    pub fn initialize(&self, player: &mut MontagePlayer) {
        player.register_slot_node(&self.slot_name);
    }

    /// Reads this frame's slot weight and reports relevance and root-motion
    /// weight back to the player. `final_blend_weight` is the weight the
    /// graph gives this node.
    pub fn update(&mut self, player: &mut MontagePlayer, final_blend_weight: f32) -> SlotNodeWeight {
        self.weight = player.slot_weight(&self.slot_name);
        let effective = self.weight.slot_weight * final_blend_weight;
        player.update_slot_node_weight(&self.slot_name, effective);
        player.update_slot_root_motion_weight(&self.slot_name, effective);
        self.weight
    }

    pub fn weight(&self) -> SlotNodeWeight {
        self.weight
    }

    /// Whether the source branch needs updating this frame.
    pub fn is_source_relevant(&self) -> bool {
        self.weight.source_weight > ZERO_ANIMWEIGHT_THRESH
    }

    pub fn evaluate(&self, player: &MontagePlayer, source: &Pose, out: &mut Pose) {
        if self.weight.slot_weight <= ZERO_ANIMWEIGHT_THRESH {
            out.clone_from(source);
            return;
        }
        player.slot_evaluate_pose(&self.slot_name, source, self.weight.slot_weight, out);
    }
}
