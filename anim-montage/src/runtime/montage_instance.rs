use super::montage_player::MontageHandle;
use crate::{
    AdvanceType, AlphaBlend, AnimNotifyEvent, BranchingPointEventType, BranchingPointMarker,
    KINDA_SMALL_NUMBER, Montage, MontageBlendSettings, NotifyKind, QueuedRootMotionBlend,
    RootMotionMovementParams, RootMotionTarget, ZERO_ANIMWEIGHT_THRESH, advance_time,
};
use std::sync::Arc;

/// Per-simulation state that would otherwise be process-wide: the frame
/// counter used by montage sync and the instance-id allocator.
#[derive(Clone, Debug, Default)]
pub struct SimulationContext {
    pub frame: u64,
    next_instance_id: u32,
}

impl SimulationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_frame(&mut self) {
        self.frame = self.frame.wrapping_add(1);
    }

    pub fn allocate_instance_id(&mut self) -> u32 {
        self.next_instance_id = self.next_instance_id.wrapping_add(1);
        self.next_instance_id
    }
}

/// Identifies an instance in events, including after it has terminated.
#[derive(Clone, Debug, PartialEq)]
pub struct MontageSnapshot {
    pub instance_id: u32,
    pub montage_name: String,
    pub position: f32,
    pub weight: f32,
}

/// Receives everything a montage instance emits while it advances.
///
/// Handlers that take the instance may reposition it; the advance loop picks
/// up the change on its next iteration.
pub trait MontageEventDispatcher {
    /// Ordinary notifies crossed this step, queued for later delivery.
    fn add_anim_notifies(
        &mut self,
        _montage: &MontageSnapshot,
        _notifies: &[AnimNotifyEvent],
        _weight: f32,
    ) {
    }

    fn is_slot_relevant_for_notifies(&self, _slot_name: &str) -> bool {
        true
    }

    /// Branching point without a state window, fired at its exact position.
    fn trigger_single_anim_notify(
        &mut self,
        _instance: &mut MontageInstance,
        _notify: &AnimNotifyEvent,
    ) {
    }

    /// Named callback for converted legacy branching points. Returns false
    /// when nothing handles `function`.
    fn call_function(&mut self, _instance: &mut MontageInstance, _function: &str) -> bool {
        false
    }

    fn notify_begin(
        &mut self,
        _instance: &mut MontageInstance,
        _notify: &AnimNotifyEvent,
        _duration: f32,
    ) {
    }

    fn notify_tick(&mut self, _instance: &mut MontageInstance, _notify: &AnimNotifyEvent, _delta: f32) {
    }

    fn notify_end(&mut self, _instance: &mut MontageInstance, _notify: &AnimNotifyEvent) {}

    fn on_montage_instance_stopped(&mut self, _montage: &MontageSnapshot) {}

    fn queue_montage_blending_out_event(&mut self, _montage: &MontageSnapshot, _interrupted: bool) {}

    fn queue_montage_ended_event(&mut self, _montage: &MontageSnapshot, _interrupted: bool) {}
}

impl MontageEventDispatcher for () {}

/// What a follower copies from its sync leader.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncLeaderState {
    pub position: f32,
    pub play_rate: f32,
    pub current_section: Option<String>,
    pub next_section: Option<String>,
    pub updated_this_frame: bool,
}

/// Playback state of one montage: position, blend weight, section graph and
/// active branching-point states.
///
/// `advance` walks the timeline one section at a time and stops at every
/// branching point so those fire at their exact position.
#[derive(Clone, Debug)]
pub struct MontageInstance {
    montage: Option<Arc<Montage>>,
    instance_id: u32,
    position: f32,
    play_rate: f32,
    playing: bool,
    interrupted: bool,
    blend: AlphaBlend,
    previous_weight: f32,
    notify_weight: f32,
    next_sections: Vec<Option<usize>>,
    prev_sections: Vec<Option<usize>>,
    active_state_branching_points: Vec<usize>,
    forced_next_position: Option<f32>,
    pub(crate) sync_leader: Option<MontageHandle>,
    pub(crate) sync_followers: Vec<MontageHandle>,
    last_sync_frame: Option<u64>,
}

impl Default for MontageInstance {
    fn default() -> Self {
        Self {
            montage: None,
            instance_id: 0,
            position: 0.0,
            play_rate: 1.0,
            playing: false,
            interrupted: false,
            blend: AlphaBlend::default(),
            previous_weight: 0.0,
            notify_weight: 0.0,
            next_sections: Vec::new(),
            prev_sections: Vec::new(),
            active_state_branching_points: Vec::new(),
            forced_next_position: None,
            sync_leader: None,
            sync_followers: Vec::new(),
            last_sync_frame: None,
        }
    }
}

impl MontageInstance {
    pub fn new(montage: Arc<Montage>, context: &mut SimulationContext) -> Self {
        let mut instance = Self::default();
        instance.initialize(montage, context);
        instance
    }

    pub fn initialize(&mut self, montage: Arc<Montage>, context: &mut SimulationContext) {
        self.instance_id = context.allocate_instance_id();
        self.montage = Some(montage);
        self.position = 0.0;
        self.blend = AlphaBlend::default();
        self.refresh_next_prev_sections();
    }

    fn refresh_next_prev_sections(&mut self) {
        let Some(montage) = self.montage.as_ref() else {
            return;
        };
        let count = montage.num_sections();
        self.next_sections = vec![None; count];
        self.prev_sections = vec![None; count];
        for (index, section) in montage.composite_sections.iter().enumerate() {
            let next = section
                .next_section_name
                .as_deref()
                .and_then(|name| montage.section_index(name));
            self.next_sections[index] = next;
            if let Some(next) = next {
                self.prev_sections[next] = Some(index);
            }
        }
    }

    pub fn montage(&self) -> Option<&Arc<Montage>> {
        self.montage.as_ref()
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    /// Teleports without firing events, clamped to the montage length.
    pub fn set_position(&mut self, position: f32) {
        if let Some(montage) = self.montage.as_ref() {
            self.position = position.clamp(0.0, montage.sequence_length);
        }
    }

    /// Moves to `position` on the next advance, firing the events crossed on
    /// the way.
    pub fn set_next_position_with_events(&mut self, position: f32) {
        self.forced_next_position = Some(position);
    }

    pub fn play_rate(&self) -> f32 {
        self.play_rate
    }

    pub fn set_play_rate(&mut self, play_rate: f32) {
        self.play_rate = play_rate;
    }

    pub fn weight(&self) -> f32 {
        self.blend.blended_value()
    }

    pub fn desired_weight(&self) -> f32 {
        self.blend.desired_value()
    }

    pub fn previous_weight(&self) -> f32 {
        self.previous_weight
    }

    pub fn notify_weight(&self) -> f32 {
        self.notify_weight
    }

    pub fn blend(&self) -> &AlphaBlend {
        &self.blend
    }

    pub fn blend_time(&self) -> f32 {
        self.blend.blend_time()
    }

    pub fn is_valid(&self) -> bool {
        self.montage.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.is_valid() && self.desired_weight() > 0.0
    }

    pub fn is_playing(&self) -> bool {
        self.is_valid() && self.playing
    }

    pub fn is_stopped(&self) -> bool {
        self.desired_weight() == 0.0
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn active_state_branching_points(&self) -> &[usize] {
        &self.active_state_branching_points
    }

    pub fn snapshot(&self) -> MontageSnapshot {
        MontageSnapshot {
            instance_id: self.instance_id,
            montage_name: self
                .montage
                .as_ref()
                .map(|m| m.name.clone())
                .unwrap_or_default(),
            position: self.position,
            weight: self.weight(),
        }
    }

    /// Starts (or restarts) blending in with the montage's blend-in settings,
    /// from whatever weight the instance currently has.
    pub fn play(&mut self, play_rate: f32) {
        self.playing = true;
        self.play_rate = play_rate;
        if let Some(montage) = self.montage.as_ref() {
            self.blend.set_blend_option(montage.blend_in.blend_option);
            self.blend.set_blend_time(montage.blend_in.blend_time);
        }
        self.blend.set_desired_value(1.0);
    }

    /// Begins blending out with `blend_out`. Once interrupted an instance
    /// stays interrupted.
    pub fn stop(
        &mut self,
        blend_out: MontageBlendSettings,
        interrupt: bool,
        dispatcher: &mut dyn MontageEventDispatcher,
    ) {
        if interrupt {
            self.interrupted = true;
        }

        if self.blend.desired_value() > 0.0 {
            self.blend.set_blend_option(blend_out.blend_option);
            self.blend.set_blend_time(blend_out.blend_time);
            self.blend.set_desired_value(0.0);
            if self.montage.is_some() {
                let snapshot = self.snapshot();
                log::debug!(
                    "montage '{}' instance {} stopping (interrupted: {})",
                    snapshot.montage_name,
                    self.instance_id,
                    self.interrupted
                );
                dispatcher.on_montage_instance_stopped(&snapshot);
                dispatcher.queue_montage_blending_out_event(&snapshot, self.interrupted);
            }
        } else if blend_out.blend_time < self.blend.blend_time_remaining() {
            self.blend.set_blend_time(blend_out.blend_time);
        }

        if self.blend.blend_time() <= 0.0 {
            self.playing = false;
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    /// Ends any active branching-point states, queues the ended event and
    /// drops the montage. Calling it again does nothing.
    pub fn terminate(&mut self, dispatcher: &mut dyn MontageEventDispatcher) {
        let Some(montage) = self.montage.clone() else {
            return;
        };
        let snapshot = self.snapshot();
        self.montage = None;

        while let Some(index) = self.active_state_branching_points.pop() {
            if let Some(notify) = montage.notifies.get(index) {
                dispatcher.notify_end(self, notify);
            }
        }
        log::debug!(
            "montage '{}' instance {} terminated",
            snapshot.montage_name,
            self.instance_id
        );
        dispatcher.queue_montage_ended_event(&snapshot, self.interrupted);
    }

    pub fn update_weight(&mut self, delta: f32) {
        if !self.is_valid() {
            return;
        }
        self.previous_weight = self.weight();
        self.blend.update(delta);
        self.notify_weight = self.previous_weight.max(self.weight());
    }

    pub fn current_section(&self) -> Option<&str> {
        let montage = self.montage.as_ref()?;
        let index = montage.section_index_from_position(self.position)?;
        montage.section_name(index)
    }

    /// Authored next section of the current one.
    pub fn next_section(&self) -> Option<&str> {
        let montage = self.montage.as_ref()?;
        let index = montage.section_index_from_position(self.position)?;
        montage.section(index)?.next_section_name.as_deref()
    }

    pub fn next_section_id(&self, section: usize) -> Option<usize> {
        self.next_sections.get(section).copied().flatten()
    }

    pub fn section_name_from_id(&self, section: usize) -> Option<&str> {
        self.montage.as_ref()?.section_name(section)
    }

    pub fn jump_to_section_name(&mut self, section: &str, end_of_section: bool) -> bool {
        let Some(montage) = self.montage.clone() else {
            return false;
        };
        let Some(index) = montage.section_index(section) else {
            log::warn!(
                "jump to section '{}' (end: {}) failed for montage '{}'",
                section,
                end_of_section,
                montage.name
            );
            return false;
        };
        let start = montage.composite_sections[index].time();
        let offset = if end_of_section {
            montage.section_length(index) - KINDA_SMALL_NUMBER
        } else {
            0.0
        };
        self.position = start + offset;
        self.on_montage_position_changed(section);
        true
    }

    pub fn set_next_section_name(&mut self, section: &str, next: Option<&str>) -> bool {
        let Some(montage) = self.montage.clone() else {
            return false;
        };
        let section_id = montage.section_index(section);
        let next_id = next.and_then(|name| montage.section_index(name));
        match section_id {
            Some(section_id) => self.set_next_section_id(section_id, next_id),
            None => {
                log::warn!(
                    "set next section of '{}' failed for montage '{}'",
                    section,
                    montage.name
                );
                false
            }
        }
    }

    /// Relinks `section` to `next`, keeping the reverse links consistent.
    pub fn set_next_section_id(&mut self, section: usize, next: Option<usize>) -> bool {
        if section >= self.next_sections.len() {
            log::warn!(
                "set next section id {} to {:?} failed for montage '{}'",
                section,
                next,
                self.snapshot().montage_name
            );
            return false;
        }

        if let Some(old_next) = self.next_sections[section] {
            if let Some(prev) = self.prev_sections.get_mut(old_next) {
                *prev = None;
            }
        }
        if let Some(prev) = next.and_then(|next| self.prev_sections.get_mut(next)) {
            *prev = Some(section);
        }
        self.next_sections[section] = next;

        let name = next
            .and_then(|next| self.section_name_from_id(next))
            .unwrap_or_default()
            .to_string();
        self.on_montage_position_changed(&name);
        true
    }

    /// Changing sections while blending out restarts playback.
    fn on_montage_position_changed(&mut self, to_section: &str) {
        if self.playing && self.blend.desired_value() == 0.0 {
            log::warn!(
                "changing section on montage '{}' to '{}' during blend out",
                self.snapshot().montage_name,
                to_section
            );
            self.play(self.play_rate);
        }
    }

    /// Previous section when playing backward.
    pub fn prev_section_id(&self, section: usize) -> Option<usize> {
        self.prev_sections.get(section).copied().flatten()
    }

    fn linked_section(&self, section: usize, forward: bool) -> Option<usize> {
        let links = if forward {
            &self.next_sections
        } else {
            &self.prev_sections
        };
        links.get(section).copied().flatten()
    }

    /// Advances position by `delta` seconds, firing notifies and branching
    /// points, extracting root motion into `root_motion`, blending out near
    /// the end and terminating once fully blended out.
    pub fn advance(
        &mut self,
        delta: f32,
        mut root_motion: Option<RootMotionTarget<'_>>,
        dispatcher: &mut dyn MontageEventDispatcher,
    ) {
        if let Some(montage) = self.montage.clone() {
            if montage.num_sections() != self.next_sections.len() {
                self.refresh_next_prev_sections();
            }
            let forced = self.forced_next_position.take();
            let weighted = self.weight() > ZERO_ANIMWEIGHT_THRESH
                || self.previous_weight > ZERO_ANIMWEIGHT_THRESH;
            if (self.playing || forced.is_some()) && weighted {
                self.advance_sections(&montage, delta, forced, &mut root_motion, dispatcher);
            }
        }

        if self.weight() <= ZERO_ANIMWEIGHT_THRESH && self.desired_weight() <= ZERO_ANIMWEIGHT_THRESH
        {
            self.terminate(dispatcher);
            return;
        }

        if !self.interrupted {
            if let Some(montage) = self.montage.clone() {
                for index in self.active_state_branching_points.clone() {
                    if let Some(notify) = montage.notifies.get(index) {
                        dispatcher.notify_tick(self, notify, delta);
                    }
                }
            }
        }
    }

    fn advance_sections(
        &mut self,
        montage: &Arc<Montage>,
        delta: f32,
        forced: Option<f32>,
        root_motion: &mut Option<RootMotionTarget<'_>>,
        dispatcher: &mut dyn MontageEventDispatcher,
    ) {
        let combined_play_rate = self.play_rate * montage.rate_scale;
        let mut desired_delta_move = match forced {
            Some(target) => target - self.position,
            None => combined_play_rate * delta,
        };
        let playing_forward = desired_delta_move > 0.0;
        let original_move_delta = desired_delta_move;
        let extract_root_motion = root_motion.is_some() && montage.has_root_motion();

        while (self.playing || forced.is_some())
            && desired_delta_move.abs() > KINDA_SMALL_NUMBER
            && original_move_delta * desired_delta_move > 0.0
        {
            let Some((section_index, mut pos_in_section)) =
                montage.composite_section_index_from_pos(self.position)
            else {
                log::warn!(
                    "montage '{}' has no section at position {}; stopping",
                    montage.name,
                    self.position
                );
                self.stop(montage.blend_out, false, dispatcher);
                break;
            };

            let section_start = montage.composite_sections[section_index].time();
            let next_section_index = self.linked_section(section_index, playing_forward);
            let section_length = montage.section_length(section_index);
            let section_end = section_start + section_length;

            let mut stopping_pos_in_section = section_length;
            let marker: Option<BranchingPointMarker> = montage
                .find_first_branching_point_marker(
                    self.position,
                    (self.position + desired_delta_move).clamp(section_start, section_end),
                )
                .copied();
            if let Some(marker) = marker {
                stopping_pos_in_section = marker.trigger_time - section_start;
            }

            let prev_pos_in_section = pos_in_section;
            let advance_type = advance_time(
                false,
                desired_delta_move,
                &mut pos_in_section,
                stopping_pos_in_section,
            );
            let actual_delta_move = pos_in_section - prev_pos_in_section;
            desired_delta_move -= actual_delta_move;

            let prev_position = self.position;
            self.position =
                (self.position + actual_delta_move).clamp(section_start, section_end);
            let position_before_events = self.position;
            let have_moved = actual_delta_move.abs() > 0.0;

            if have_moved && extract_root_motion {
                let transform =
                    montage.extract_root_motion_from_track_range(prev_position, self.position);
                match root_motion.as_mut() {
                    Some(RootMotionTarget::Accumulate(params)) => params.accumulate(&transform),
                    Some(RootMotionTarget::Blend(queue)) => {
                        if let Some(slot) = montage.slot_anim_tracks.first() {
                            queue.push(QueuedRootMotionBlend {
                                transform,
                                slot_name: slot.slot_name.clone(),
                                weight: self.weight(),
                            });
                        }
                    }
                    None => {}
                }
            }

            if next_section_index.is_none() && self.blend.desired_value() > 0.0 {
                let delta_pos_to_end = if playing_forward {
                    section_length - pos_in_section
                } else {
                    pos_in_section
                };
                let delta_time_to_end = if combined_play_rate != 0.0 {
                    delta_pos_to_end / combined_play_rate.abs()
                } else {
                    delta_pos_to_end
                };
                let custom_trigger_time = montage.blend_out_trigger_time >= 0.0;
                let trigger_time = if custom_trigger_time {
                    montage.blend_out_trigger_time
                } else {
                    montage.blend_out.blend_time
                };
                if delta_time_to_end <= trigger_time.max(KINDA_SMALL_NUMBER) {
                    let blend_out = if custom_trigger_time {
                        montage.blend_out
                    } else {
                        MontageBlendSettings {
                            blend_time: delta_time_to_end,
                            blend_option: montage.blend_out.blend_option,
                        }
                    };
                    self.stop(blend_out, false, dispatcher);
                }
            }

            if have_moved && !self.interrupted {
                self.handle_events(prev_position, self.position, marker.as_ref(), dispatcher);
            }

            let mut jumped = false;
            if advance_type != AdvanceType::Default
                && marker.is_none()
                && position_before_events == self.position
            {
                if let Some(next) = self.linked_section(section_index, playing_forward) {
                    if let Some((start, end)) = montage.section_start_and_end_time(next) {
                        // Half the notify trigger offset keeps the position inside the section.
                        let end_offset = KINDA_SMALL_NUMBER / 2.0;
                        self.position = if playing_forward {
                            start
                        } else {
                            end - end_offset
                        };
                        jumped = true;
                    }
                }
            }

            if !have_moved && !jumped {
                break;
            }
        }
    }

    /// Event-free section walk from `position`, used for prediction. Returns
    /// false when the instance has no montage.
    pub fn simulate_advance(
        &self,
        delta: f32,
        position: &mut f32,
        root_motion: &mut RootMotionMovementParams,
    ) -> bool {
        let Some(montage) = self.montage.as_ref() else {
            return false;
        };
        let combined_play_rate = self.play_rate * montage.rate_scale;
        let playing_forward = combined_play_rate > 0.0;
        let extract_root_motion = montage.has_root_motion();

        let mut desired_delta_move = combined_play_rate * delta;
        let original_move_delta = desired_delta_move;

        while desired_delta_move.abs() > KINDA_SMALL_NUMBER
            && original_move_delta * desired_delta_move > 0.0
        {
            let Some((section_index, mut pos_in_section)) =
                montage.composite_section_index_from_pos(*position)
            else {
                break;
            };
            let section_start = montage.composite_sections[section_index].time();
            let section_length = montage.section_length(section_index);

            let prev_pos_in_section = pos_in_section;
            let advance_type =
                advance_time(false, desired_delta_move, &mut pos_in_section, section_length);
            let actual_delta_move = pos_in_section - prev_pos_in_section;
            desired_delta_move -= actual_delta_move;

            let prev_position = *position;
            *position = (*position + actual_delta_move)
                .clamp(section_start, section_start + section_length);

            if actual_delta_move.abs() <= 0.0 {
                break;
            }
            if extract_root_motion {
                root_motion.accumulate(
                    &montage.extract_root_motion_from_track_range(prev_position, *position),
                );
            }
            if advance_type != AdvanceType::Default {
                if let Some(next) = self.linked_section(section_index, playing_forward) {
                    if let Some((start, end)) = montage.section_start_and_end_time(next) {
                        *position = if playing_forward {
                            start
                        } else {
                            end - KINDA_SMALL_NUMBER
                        };
                    }
                }
            }
        }
        true
    }

    /// Queues ordinary notifies crossed between the two positions, updates
    /// branching-point states and fires `marker` if one stopped this step.
    pub fn handle_events(
        &mut self,
        previous: f32,
        current: f32,
        marker: Option<&BranchingPointMarker>,
        dispatcher: &mut dyn MontageEventDispatcher,
    ) {
        if self.interrupted {
            return;
        }
        let Some(montage) = self.montage.clone() else {
            return;
        };

        let mut notifies = Vec::new();
        montage.notifies_from_delta_positions(previous, current, &mut notifies);
        Montage::filter_out_branching_point_notifies(&mut notifies);
        for slot in &montage.slot_anim_tracks {
            if dispatcher.is_slot_relevant_for_notifies(&slot.slot_name) {
                slot.track
                    .notifies_from_track_positions(previous, current, &mut notifies);
            }
        }
        if !notifies.is_empty() {
            dispatcher.add_anim_notifies(&self.snapshot(), &notifies, self.notify_weight);
        }

        self.update_active_state_branching_points(current, dispatcher);

        if let Some(marker) = marker {
            self.branching_point_event_handler(marker, dispatcher);
        }
    }

    /// Ends states the position has left, then begins states it is inside.
    pub fn update_active_state_branching_points(
        &mut self,
        current: f32,
        dispatcher: &mut dyn MontageEventDispatcher,
    ) {
        let Some(montage) = self.montage.clone() else {
            return;
        };
        if montage.branching_point_state_notify_indices().is_empty() {
            return;
        }
        let is_inside = |notify: &AnimNotifyEvent| {
            current > notify.trigger_time() && current <= notify.end_trigger_time()
        };

        let mut index = self.active_state_branching_points.len();
        while index > 0 {
            index -= 1;
            let notify_index = self.active_state_branching_points[index];
            let Some(notify) = montage.notifies.get(notify_index) else {
                self.active_state_branching_points.remove(index);
                continue;
            };
            if !is_inside(notify) {
                self.active_state_branching_points.remove(index);
                dispatcher.notify_end(self, notify);
                index = index.min(self.active_state_branching_points.len());
            }
        }

        for &notify_index in montage.branching_point_state_notify_indices() {
            let Some(notify) = montage.notifies.get(notify_index) else {
                continue;
            };
            if is_inside(notify) && !self.active_state_branching_points.contains(&notify_index) {
                self.active_state_branching_points.push(notify_index);
                dispatcher.notify_begin(self, notify, notify.duration);
            }
        }
    }

    pub fn branching_point_event_handler(
        &mut self,
        marker: &BranchingPointMarker,
        dispatcher: &mut dyn MontageEventDispatcher,
    ) {
        let Some(montage) = self.montage.clone() else {
            return;
        };
        let Some(notify) = montage.notifies.get(marker.notify_index) else {
            return;
        };
        match notify.kind {
            NotifyKind::NamedFunction if !notify.name.is_empty() => {
                let function = format!("MontageBranchingPoint_{}", notify.name);
                if !dispatcher.call_function(self, &function) {
                    dispatcher.trigger_single_anim_notify(self, notify);
                }
            }
            NotifyKind::State => match marker.event_type {
                BranchingPointEventType::Begin => {
                    if !self.active_state_branching_points.contains(&marker.notify_index) {
                        self.active_state_branching_points.push(marker.notify_index);
                    }
                    dispatcher.notify_begin(self, notify, notify.duration);
                }
                BranchingPointEventType::End => {
                    if let Some(pos) = self
                        .active_state_branching_points
                        .iter()
                        .position(|&i| i == marker.notify_index)
                    {
                        self.active_state_branching_points.swap_remove(pos);
                    }
                    dispatcher.notify_end(self, notify);
                }
            },
            _ => dispatcher.trigger_single_anim_notify(self, notify),
        }
    }

    pub fn sync_leader(&self) -> Option<MontageHandle> {
        self.sync_leader
    }

    pub fn sync_followers(&self) -> &[MontageHandle] {
        &self.sync_followers
    }

    pub fn has_been_updated_this_frame(&self, context: &SimulationContext) -> bool {
        self.last_sync_frame == Some(context.frame)
    }

    pub fn mark_updated(&mut self, context: &SimulationContext) {
        self.last_sync_frame = Some(context.frame);
    }

    pub fn sync_leader_state(&self, context: &SimulationContext) -> SyncLeaderState {
        SyncLeaderState {
            position: self.position,
            play_rate: self.play_rate,
            current_section: self.current_section().map(str::to_string),
            next_section: self.next_section().map(str::to_string),
            updated_this_frame: self.has_been_updated_this_frame(context),
        }
    }

    /// Copies position (only when noticeably off, to avoid skipping
    /// notifies), play rate and, when both sit in the same section, the
    /// leader's next section.
    pub fn sync_to_leader(&mut self, leader: &SyncLeaderState) {
        if (self.position - leader.position).abs() > KINDA_SMALL_NUMBER {
            self.set_position(leader.position);
        }
        self.set_play_rate(leader.play_rate);

        if let Some(leader_section) = leader.current_section.as_deref() {
            if self.current_section() == Some(leader_section) {
                let section = leader_section.to_string();
                self.set_next_section_name(&section, leader.next_section.as_deref());
            }
        }
    }
}
