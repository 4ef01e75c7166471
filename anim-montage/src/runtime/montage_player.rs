use crate::{
    AdditiveType, AnimNotifyEvent, Error, MontageBlendSettings, MontageEventDispatcher,
    MontageInstance, MontageSnapshot, Pose, QueuedRootMotionBlend, RootMotionMode,
    RootMotionMovementParams, RootMotionTarget, SimulationContext, Skeleton, SlotNodeWeight,
    SyncLeaderState, ZERO_ANIMWEIGHT_THRESH, accumulate_additive_pose, blend_poses_together,
    pose_from_anim_track,
};
use crate::Montage;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct InstanceId {
    index: usize,
    generation: u32,
}

#[derive(Debug)]
struct InstanceSlot {
    generation: u32,
    instance: Option<MontageInstance>,
}

/// Generation-checked reference to a playing montage. Resolves to nothing
/// once the instance has terminated and its slot was reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MontageHandle {
    id: InstanceId,
}

impl MontageHandle {
    pub fn instance<'a>(&self, player: &'a MontagePlayer) -> Option<&'a MontageInstance> {
        player.entry(self.id)
    }

    pub fn is_valid(&self, player: &MontagePlayer) -> bool {
        self.instance(player).is_some_and(MontageInstance::is_valid)
    }

    pub fn stop(&self, player: &mut MontagePlayer, blend_out: MontageBlendSettings) {
        player.with_dispatcher(self.id, |instance, dispatcher| {
            instance.stop(blend_out, true, dispatcher);
        });
        player.drain_event_queue();
    }

    pub fn set_next_position_with_events(&self, player: &mut MontagePlayer, position: f32) {
        if let Some(instance) = player.entry_mut(self.id) {
            instance.set_next_position_with_events(position);
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct MontagePlayerSettings {
    pub root_motion_mode: RootMotionMode,
}

#[derive(Clone, Debug)]
pub enum MontageEvent {
    /// Queued notify, delivered after the update.
    Notify { notify: AnimNotifyEvent, weight: f32 },
    /// Branching point fired at its exact position during advance.
    BranchingPoint { notify: AnimNotifyEvent },
    NotifyBegin { notify: AnimNotifyEvent, duration: f32 },
    NotifyTick { notify: AnimNotifyEvent, delta: f32 },
    NotifyEnd { notify: AnimNotifyEvent },
    BlendingOut { interrupted: bool },
    Ended { interrupted: bool },
}

pub trait MontageListener {
    /// Queued notifies and lifecycle events, delivered once the player is
    /// free to be mutated again.
    fn on_event(
        &mut self,
        player: &mut MontagePlayer,
        montage: &MontageSnapshot,
        event: &MontageEvent,
    );

    /// Branching points and branching-point states, delivered synchronously
    /// while `instance` advances.
    fn on_branching_point(&mut self, _instance: &mut MontageInstance, _event: &MontageEvent) {}

    /// Handles `MontageBranchingPoint_<name>` callbacks of converted legacy
    /// branching points. Returning false falls back to a `BranchingPoint`
    /// event.
    fn call_function(&mut self, _instance: &mut MontageInstance, _function: &str) -> bool {
        false
    }
}

#[derive(Clone, Debug)]
struct QueuedNotify {
    montage: MontageSnapshot,
    notify: AnimNotifyEvent,
    weight: f32,
}

impl QueuedNotify {
    fn same_notify(&self, other: &QueuedNotify) -> bool {
        self.montage.instance_id == other.montage.instance_id
            && self.notify.name == other.notify.name
            && self.notify.time() == other.notify.time()
    }
}

#[derive(Clone, Debug)]
struct QueuedEvent {
    montage: MontageSnapshot,
    event: MontageEvent,
}

#[derive(Copy, Clone, Debug, Default)]
struct SlotTracker {
    relevant_this_tick: bool,
    relevant_previous_tick: bool,
    root_motion_weight: f32,
}

/// Event sink handed to an instance while it advances, built from the
/// player's fields other than the instance arena.
struct PlayerDispatcher<'a> {
    slot_trackers: &'a HashMap<String, SlotTracker>,
    queued_notifies: &'a mut Vec<QueuedNotify>,
    blending_out: &'a mut Vec<(MontageSnapshot, bool)>,
    ended: &'a mut Vec<(MontageSnapshot, bool)>,
    root_motion_instance: &'a mut Option<u32>,
    listener: Option<&'a mut (dyn MontageListener + 'static)>,
}

impl MontageEventDispatcher for PlayerDispatcher<'_> {
    fn add_anim_notifies(
        &mut self,
        montage: &MontageSnapshot,
        notifies: &[AnimNotifyEvent],
        weight: f32,
    ) {
        for notify in notifies {
            if notify.trigger_weight_threshold > weight {
                continue;
            }
            let queued = QueuedNotify {
                montage: montage.clone(),
                notify: notify.clone(),
                weight,
            };
            // A looping segment can report the same state twice in one tick.
            if notify.is_state() && self.queued_notifies.iter().any(|q| q.same_notify(&queued)) {
                continue;
            }
            self.queued_notifies.push(queued);
        }
    }

    fn is_slot_relevant_for_notifies(&self, slot_name: &str) -> bool {
        self.slot_trackers
            .get(slot_name)
            .is_some_and(|tracker| tracker.relevant_this_tick || tracker.relevant_previous_tick)
    }

    fn trigger_single_anim_notify(&mut self, instance: &mut MontageInstance, notify: &AnimNotifyEvent) {
        if let Some(listener) = self.listener.as_deref_mut() {
            let event = MontageEvent::BranchingPoint {
                notify: notify.clone(),
            };
            listener.on_branching_point(instance, &event);
        }
    }

    fn call_function(&mut self, instance: &mut MontageInstance, function: &str) -> bool {
        self.listener
            .as_deref_mut()
            .is_some_and(|listener| listener.call_function(instance, function))
    }

    fn notify_begin(&mut self, instance: &mut MontageInstance, notify: &AnimNotifyEvent, duration: f32) {
        if let Some(listener) = self.listener.as_deref_mut() {
            let event = MontageEvent::NotifyBegin {
                notify: notify.clone(),
                duration,
            };
            listener.on_branching_point(instance, &event);
        }
    }

    fn notify_tick(&mut self, instance: &mut MontageInstance, notify: &AnimNotifyEvent, delta: f32) {
        if let Some(listener) = self.listener.as_deref_mut() {
            let event = MontageEvent::NotifyTick {
                notify: notify.clone(),
                delta,
            };
            listener.on_branching_point(instance, &event);
        }
    }

    fn notify_end(&mut self, instance: &mut MontageInstance, notify: &AnimNotifyEvent) {
        if let Some(listener) = self.listener.as_deref_mut() {
            let event = MontageEvent::NotifyEnd {
                notify: notify.clone(),
            };
            listener.on_branching_point(instance, &event);
        }
    }

    fn on_montage_instance_stopped(&mut self, montage: &MontageSnapshot) {
        if *self.root_motion_instance == Some(montage.instance_id) {
            *self.root_motion_instance = None;
        }
    }

    fn queue_montage_blending_out_event(&mut self, montage: &MontageSnapshot, interrupted: bool) {
        self.blending_out.push((montage.clone(), interrupted));
    }

    fn queue_montage_ended_event(&mut self, montage: &MontageSnapshot, interrupted: bool) {
        self.ended.push((montage.clone(), interrupted));
    }
}

/// Owns every montage instance of one animated object: plays and stops
/// montages, advances them each frame, keeps sync followers aligned, weighs
/// and evaluates slots, and delivers events to the listener.
///
/// A frame is `update` (weights and positions), slot node updates, then
/// `post_update` (root-motion blending and event delivery).
pub struct MontagePlayer {
    skeleton: Arc<Skeleton>,
    settings: MontagePlayerSettings,
    context: SimulationContext,
    instances: Vec<InstanceSlot>,
    free_list: Vec<usize>,
    order: Vec<InstanceId>,
    root_motion_instance: Option<u32>,
    slot_trackers: HashMap<String, SlotTracker>,
    queued_notifies: Vec<QueuedNotify>,
    active_notify_states: Vec<QueuedNotify>,
    queued_blending_out: Vec<(MontageSnapshot, bool)>,
    queued_ended: Vec<(MontageSnapshot, bool)>,
    event_queue: VecDeque<QueuedEvent>,
    queued_root_motion_blends: Vec<QueuedRootMotionBlend>,
    extracted_root_motion: RootMotionMovementParams,
    last_delta: f32,
    listener: Option<Box<dyn MontageListener>>,
    draining_events: bool,
}

impl MontagePlayer {
    pub fn new(skeleton: Arc<Skeleton>) -> Self {
        Self::with_settings(skeleton, MontagePlayerSettings::default())
    }

    pub fn with_settings(skeleton: Arc<Skeleton>, settings: MontagePlayerSettings) -> Self {
        Self {
            skeleton,
            settings,
            context: SimulationContext::new(),
            instances: Vec::new(),
            free_list: Vec::new(),
            order: Vec::new(),
            root_motion_instance: None,
            slot_trackers: HashMap::new(),
            queued_notifies: Vec::new(),
            active_notify_states: Vec::new(),
            queued_blending_out: Vec::new(),
            queued_ended: Vec::new(),
            event_queue: VecDeque::new(),
            queued_root_motion_blends: Vec::new(),
            extracted_root_motion: RootMotionMovementParams::default(),
            last_delta: 0.0,
            listener: None,
            draining_events: false,
        }
    }

    pub fn set_listener<L: MontageListener + 'static>(&mut self, listener: L) {
        self.listener = Some(Box::new(listener));
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn settings(&self) -> MontagePlayerSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: MontagePlayerSettings) {
        self.settings = settings;
    }

    pub fn context(&self) -> &SimulationContext {
        &self.context
    }

    fn alloc_entry(&mut self, instance: MontageInstance) -> InstanceId {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.instances[index];
            slot.instance = Some(instance);
            InstanceId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.instances.len();
            self.instances.push(InstanceSlot {
                generation: 0,
                instance: Some(instance),
            });
            InstanceId {
                index,
                generation: 0,
            }
        }
    }

    fn entry(&self, id: InstanceId) -> Option<&MontageInstance> {
        let slot = self.instances.get(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.instance.as_ref()
    }

    fn entry_mut(&mut self, id: InstanceId) -> Option<&mut MontageInstance> {
        slot_entry_mut(&mut self.instances, id)
    }

    fn free_entry(&mut self, id: InstanceId) {
        let Some(slot) = self.instances.get_mut(id.index) else {
            return;
        };
        if slot.generation != id.generation {
            return;
        }
        slot.instance = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
    }

    /// Runs `f` with the instance and a dispatcher over the rest of the
    /// player.
    fn with_dispatcher(
        &mut self,
        id: InstanceId,
        f: impl FnOnce(&mut MontageInstance, &mut PlayerDispatcher<'_>),
    ) {
        let Self {
            instances,
            slot_trackers,
            queued_notifies,
            queued_blending_out,
            queued_ended,
            root_motion_instance,
            listener,
            ..
        } = self;
        let Some(instance) = slot_entry_mut(instances, id) else {
            return;
        };
        let mut dispatcher = PlayerDispatcher {
            slot_trackers,
            queued_notifies,
            blending_out: queued_blending_out,
            ended: queued_ended,
            root_motion_instance,
            listener: listener.as_deref_mut(),
        };
        f(instance, &mut dispatcher);
    }

    pub fn instance(&self, handle: MontageHandle) -> Option<&MontageInstance> {
        self.entry(handle.id)
    }

    pub fn instance_mut(&mut self, handle: MontageHandle) -> Option<&mut MontageInstance> {
        self.entry_mut(handle.id)
    }

    /// Live instances in play order.
    pub fn instances(&self) -> impl Iterator<Item = (MontageHandle, &MontageInstance)> {
        self.order.iter().filter_map(|&id| {
            self.entry(id)
                .map(|instance| (MontageHandle { id }, instance))
        })
    }

    pub fn num_instances(&self) -> usize {
        self.order.len()
    }

    /// Starts `montage`, blending out every active montage in the same slot
    /// group with the new montage's blend-in settings.
    pub fn montage_play(
        &mut self,
        montage: Arc<Montage>,
        play_rate: f32,
    ) -> Result<MontageHandle, Error> {
        if montage.sequence_length <= 0.0 {
            log::warn!("montage '{}' not played: zero length", montage.name);
            return Err(Error::InvalidMontage {
                montage: montage.name.clone(),
                message: "sequence length is zero".to_string(),
            });
        }
        if !montage.has_valid_slot_setup(&self.skeleton) {
            return Err(Error::InvalidMontage {
                montage: montage.name.clone(),
                message: "slot tracks must be unique and share one slot group".to_string(),
            });
        }

        let skeleton = Arc::clone(&self.skeleton);
        let group = montage.group_name(&skeleton);
        self.stop_instances(montage.blend_in, true, |instance| {
            instance.is_active()
                && instance
                    .montage()
                    .is_some_and(|m| m.group_name(&skeleton) == group)
        });

        if montage.has_root_motion() {
            if let Some(active) = self.root_motion_instance {
                self.stop_instances(montage.blend_in, true, |instance| {
                    instance.instance_id() == active
                });
            }
        }

        let mut instance = MontageInstance::new(Arc::clone(&montage), &mut self.context);
        instance.play(play_rate);
        let instance_id = instance.instance_id();
        let id = self.alloc_entry(instance);
        self.order.push(id);
        if montage.has_root_motion() {
            self.root_motion_instance = Some(instance_id);
        }
        log::debug!(
            "montage '{}' started as instance {}",
            montage.name,
            instance_id
        );
        self.drain_event_queue();
        Ok(MontageHandle { id })
    }

    fn stop_instances(
        &mut self,
        blend_out: MontageBlendSettings,
        interrupt: bool,
        filter: impl Fn(&MontageInstance) -> bool,
    ) {
        for id in self.order.clone().into_iter().rev() {
            let selected = self.entry(id).is_some_and(&filter);
            if selected {
                self.with_dispatcher(id, |instance, dispatcher| {
                    instance.stop(blend_out, interrupt, dispatcher);
                });
            }
        }
    }

    /// Newest active instance of the named montage.
    pub fn active_instance_for_montage(&self, montage_name: &str) -> Option<MontageHandle> {
        self.order.iter().rev().copied().find_map(|id| {
            let instance = self.entry(id)?;
            let matches = instance.is_active()
                && instance.montage().is_some_and(|m| m.name == montage_name);
            matches.then_some(MontageHandle { id })
        })
    }

    /// Newest active instance of any montage.
    pub fn active_montage_instance(&self) -> Option<MontageHandle> {
        self.order.iter().rev().copied().find_map(|id| {
            self.entry(id)
                .filter(|instance| instance.is_active())
                .map(|_| MontageHandle { id })
        })
    }

    pub fn root_motion_montage_instance(&self) -> Option<MontageHandle> {
        let active = self.root_motion_instance?;
        self.order.iter().copied().find_map(|id| {
            self.entry(id)
                .filter(|instance| instance.instance_id() == active)
                .map(|_| MontageHandle { id })
        })
    }

    /// Targets of a montage-scoped call: the named montage's active instance,
    /// or every active instance when no name is given.
    fn targets(&self, montage_name: Option<&str>) -> Vec<InstanceId> {
        match montage_name {
            Some(name) => self
                .active_instance_for_montage(name)
                .map(|handle| vec![handle.id])
                .unwrap_or_default(),
            None => self
                .order
                .iter()
                .copied()
                .filter(|&id| self.entry(id).is_some_and(MontageInstance::is_active))
                .collect(),
        }
    }

    pub fn montage_stop(&mut self, blend_out: MontageBlendSettings, montage_name: Option<&str>) {
        for id in self.targets(montage_name) {
            self.with_dispatcher(id, |instance, dispatcher| {
                instance.stop(blend_out, true, dispatcher);
            });
        }
        self.drain_event_queue();
    }

    pub fn stop_all_montages(&mut self, blend_out: MontageBlendSettings) {
        self.stop_instances(blend_out, true, |_| true);
        self.drain_event_queue();
    }

    pub fn stop_all_montages_by_group_name(&mut self, group: &str, blend_out: MontageBlendSettings) {
        let skeleton = Arc::clone(&self.skeleton);
        self.stop_instances(blend_out, true, |instance| {
            instance.is_active()
                && instance
                    .montage()
                    .is_some_and(|m| m.group_name(&skeleton) == group)
        });
        self.drain_event_queue();
    }

    pub fn montage_pause(&mut self, montage_name: Option<&str>) {
        for id in self.targets(montage_name) {
            if let Some(instance) = self.entry_mut(id) {
                instance.pause();
            }
        }
    }

    pub fn montage_resume(&mut self, montage_name: Option<&str>) {
        for id in self.targets(montage_name) {
            if let Some(instance) = self.entry_mut(id) {
                if !instance.is_playing() {
                    instance.set_playing(true);
                }
            }
        }
    }

    pub fn montage_set_play_rate(&mut self, montage_name: Option<&str>, play_rate: f32) {
        for id in self.targets(montage_name) {
            if let Some(instance) = self.entry_mut(id) {
                instance.set_play_rate(play_rate);
            }
        }
    }

    pub fn montage_set_position(&mut self, montage_name: Option<&str>, position: f32) {
        for id in self.targets(montage_name) {
            if let Some(instance) = self.entry_mut(id) {
                instance.set_position(position);
            }
        }
    }

    pub fn montage_jump_to_section(
        &mut self,
        section: &str,
        montage_name: Option<&str>,
    ) -> Result<(), Error> {
        self.jump_to_section(section, montage_name, false)
    }

    pub fn montage_jump_to_sections_end(
        &mut self,
        section: &str,
        montage_name: Option<&str>,
    ) -> Result<(), Error> {
        self.jump_to_section(section, montage_name, true)
    }

    fn jump_to_section(
        &mut self,
        section: &str,
        montage_name: Option<&str>,
        end_of_section: bool,
    ) -> Result<(), Error> {
        let targets = self.checked_targets(montage_name)?;
        let mut failed = None;
        for id in targets {
            if let Some(instance) = self.entry_mut(id) {
                if !instance.jump_to_section_name(section, end_of_section) {
                    failed = Some(instance.snapshot().montage_name);
                }
            }
        }
        match failed {
            Some(montage) => Err(Error::UnknownSection {
                montage,
                section: section.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn montage_set_next_section(
        &mut self,
        section: &str,
        next: Option<&str>,
        montage_name: Option<&str>,
    ) -> Result<(), Error> {
        let targets = self.checked_targets(montage_name)?;
        let mut failed = None;
        for id in targets {
            if let Some(instance) = self.entry_mut(id) {
                if !instance.set_next_section_name(section, next) {
                    failed = Some(instance.snapshot().montage_name);
                }
            }
        }
        match failed {
            Some(montage) => Err(Error::UnknownSection {
                montage,
                section: section.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn checked_targets(&self, montage_name: Option<&str>) -> Result<Vec<InstanceId>, Error> {
        let targets = self.targets(montage_name);
        if targets.is_empty() {
            if let Some(name) = montage_name {
                return Err(Error::UnknownMontage {
                    name: name.to_string(),
                });
            }
        }
        Ok(targets)
    }

    fn first_target(&self, montage_name: Option<&str>) -> Option<&MontageInstance> {
        self.targets(montage_name)
            .first()
            .and_then(|&id| self.entry(id))
    }

    pub fn montage_is_active(&self, montage_name: Option<&str>) -> bool {
        self.first_target(montage_name).is_some()
    }

    pub fn montage_is_playing(&self, montage_name: Option<&str>) -> bool {
        self.first_target(montage_name)
            .is_some_and(MontageInstance::is_playing)
    }

    pub fn montage_current_section(&self, montage_name: Option<&str>) -> Option<String> {
        self.first_target(montage_name)?
            .current_section()
            .map(str::to_string)
    }

    pub fn montage_position(&self, montage_name: Option<&str>) -> Option<f32> {
        self.first_target(montage_name)
            .map(MontageInstance::position)
    }

    pub fn montage_blend_weight(&self, montage_name: Option<&str>) -> f32 {
        self.first_target(montage_name)
            .map(MontageInstance::weight)
            .unwrap_or(0.0)
    }

    /// Makes `follower` copy `leader`'s position, play rate and section flow.
    pub fn montage_sync_follow(&mut self, follower: MontageHandle, leader: MontageHandle) -> bool {
        if follower == leader || self.entry(leader.id).is_none() || self.entry(follower.id).is_none() {
            return false;
        }
        self.montage_sync_stop_following(follower);
        if let Some(leader_instance) = self.entry_mut(leader.id) {
            if !leader_instance.sync_followers.contains(&follower) {
                leader_instance.sync_followers.push(follower);
            }
        }
        if let Some(follower_instance) = self.entry_mut(follower.id) {
            follower_instance.sync_leader = Some(leader);
        }
        true
    }

    pub fn montage_sync_stop_following(&mut self, follower: MontageHandle) {
        let Some(leader) = self.entry_mut(follower.id).and_then(|i| i.sync_leader.take()) else {
            return;
        };
        if let Some(leader_instance) = self.entry_mut(leader.id) {
            if let Some(pos) = leader_instance
                .sync_followers
                .iter()
                .position(|&h| h == follower)
            {
                leader_instance.sync_followers.swap_remove(pos);
            }
        }
    }

    pub fn montage_sync_stop_leading(&mut self, leader: MontageHandle) {
        let followers = match self.entry_mut(leader.id) {
            Some(instance) => std::mem::take(&mut instance.sync_followers),
            None => return,
        };
        for follower in followers {
            if let Some(instance) = self.entry_mut(follower.id) {
                if instance.sync_leader == Some(leader) {
                    instance.sync_leader = None;
                }
            }
        }
    }

    fn leader_state(&self, id: InstanceId) -> Option<SyncLeaderState> {
        let leader = self.entry(id)?.sync_leader?;
        Some(self.entry(leader.id)?.sync_leader_state(&self.context))
    }

    /// First half of a frame: blend weights, positions, events and root
    /// motion of every instance. Terminated instances are released.
    pub fn update(&mut self, delta: f32) {
        self.context.next_frame();
        self.last_delta = delta;
        self.clear_slot_node_weights();

        let order = self.order.clone();
        for &id in &order {
            if let Some(instance) = self.entry_mut(id) {
                instance.update_weight(delta);
            }
        }
        for &id in &order {
            self.advance_instance(id, delta);
        }
    }

    fn advance_instance(&mut self, id: InstanceId, delta: f32) {
        if let Some(state) = self.leader_state(id) {
            if !state.updated_this_frame {
                if let Some(instance) = self.entry_mut(id) {
                    instance.sync_to_leader(&state);
                }
            }
        }

        {
            let Self {
                instances,
                context,
                settings,
                root_motion_instance,
                extracted_root_motion,
                queued_root_motion_blends,
                slot_trackers,
                queued_notifies,
                queued_blending_out,
                queued_ended,
                listener,
                ..
            } = self;
            let Some(instance) = slot_entry_mut(instances, id) else {
                return;
            };

            let mode = settings.root_motion_mode;
            let blended = mode == RootMotionMode::FromEverything;
            let extract = blended
                || (mode != RootMotionMode::NoExtraction
                    && *root_motion_instance == Some(instance.instance_id()));
            let mut discarded = RootMotionMovementParams::default();
            let target = if !extract {
                None
            } else if blended {
                Some(RootMotionTarget::Blend(queued_root_motion_blends))
            } else if mode == RootMotionMode::IgnoreRootMotion {
                Some(RootMotionTarget::Accumulate(&mut discarded))
            } else {
                Some(RootMotionTarget::Accumulate(extracted_root_motion))
            };

            let mut dispatcher = PlayerDispatcher {
                slot_trackers,
                queued_notifies,
                blending_out: queued_blending_out,
                ended: queued_ended,
                root_motion_instance,
                listener: listener.as_deref_mut(),
            };
            instance.advance(delta, target, &mut dispatcher);
            instance.mark_updated(context);
        }

        if let Some(state) = self.leader_state(id) {
            if state.updated_this_frame {
                if let Some(instance) = self.entry_mut(id) {
                    instance.sync_to_leader(&state);
                }
            }
        }

        if !self.entry(id).is_some_and(MontageInstance::is_valid) {
            self.release_instance(id);
        }
    }

    /// Unlinks sync partners both ways before the slot is recycled.
    fn release_instance(&mut self, id: InstanceId) {
        let handle = MontageHandle { id };
        self.montage_sync_stop_following(handle);
        self.montage_sync_stop_leading(handle);
        if let Some(instance) = self.entry(id) {
            if self.root_motion_instance == Some(instance.instance_id()) {
                self.root_motion_instance = None;
            }
        }
        self.order.retain(|&other| other != id);
        self.free_entry(id);
    }

    /// Second half of a frame, after slot nodes have reported their weights:
    /// blends queued root motion and delivers notifies and montage events.
    pub fn post_update(&mut self) {
        for queued in std::mem::take(&mut self.queued_root_motion_blends) {
            let weight = queued.weight * self.slot_root_motion_weight(&queued.slot_name);
            if weight > ZERO_ANIMWEIGHT_THRESH {
                self.extracted_root_motion
                    .accumulate_with_blend(&queued.transform, weight);
            }
        }
        self.trigger_anim_notifies();
        self.drain_event_queue();
    }

    /// Plain notifies fire once. Notify states end when no longer reported,
    /// then newly reported ones begin, then every active one ticks.
    fn trigger_anim_notifies(&mut self) {
        let delta = self.last_delta;
        let mut previous_states = std::mem::take(&mut self.active_notify_states);
        let mut new_states = Vec::new();
        let mut begins = Vec::new();

        for queued in std::mem::take(&mut self.queued_notifies) {
            if queued.notify.is_state() {
                if let Some(pos) = previous_states.iter().position(|p| p.same_notify(&queued)) {
                    previous_states.swap_remove(pos);
                } else {
                    begins.push(queued.clone());
                }
                new_states.push(queued);
                continue;
            }
            self.event_queue.push_back(QueuedEvent {
                montage: queued.montage,
                event: MontageEvent::Notify {
                    notify: queued.notify,
                    weight: queued.weight,
                },
            });
        }

        for ended in previous_states {
            self.event_queue.push_back(QueuedEvent {
                montage: ended.montage,
                event: MontageEvent::NotifyEnd {
                    notify: ended.notify,
                },
            });
        }
        for begin in begins {
            let duration = begin.notify.duration;
            self.event_queue.push_back(QueuedEvent {
                montage: begin.montage,
                event: MontageEvent::NotifyBegin {
                    notify: begin.notify,
                    duration,
                },
            });
        }
        for active in &new_states {
            self.event_queue.push_back(QueuedEvent {
                montage: active.montage.clone(),
                event: MontageEvent::NotifyTick {
                    notify: active.notify.clone(),
                    delta,
                },
            });
        }
        self.active_notify_states = new_states;
    }

    /// Blending-out events go out before ended events.
    fn flush_montage_events(&mut self) {
        for (montage, interrupted) in self.queued_blending_out.drain(..) {
            self.event_queue.push_back(QueuedEvent {
                montage,
                event: MontageEvent::BlendingOut { interrupted },
            });
        }
        for (montage, interrupted) in self.queued_ended.drain(..) {
            self.event_queue.push_back(QueuedEvent {
                montage,
                event: MontageEvent::Ended { interrupted },
            });
        }
    }

    fn drain_event_queue(&mut self) {
        if self.draining_events {
            return;
        }
        self.draining_events = true;

        loop {
            self.flush_montage_events();
            let Some(queued) = self.event_queue.pop_front() else {
                break;
            };
            let mut listener = self.listener.take();
            if let Some(listener) = listener.as_mut() {
                listener.on_event(self, &queued.montage, &queued.event);
            }
            if self.listener.is_none() {
                self.listener = listener;
            }
        }

        self.draining_events = false;
    }

    pub fn register_slot_node(&mut self, slot_name: &str) {
        if self.slot_trackers.contains_key(slot_name) {
            log::warn!("slot node '{slot_name}' already exists; slot node names must be unique");
            return;
        }
        self.slot_trackers
            .insert(slot_name.to_string(), SlotTracker::default());
    }

    pub fn update_slot_node_weight(&mut self, slot_name: &str, weight: f32) {
        if let Some(tracker) = self.slot_trackers.get_mut(slot_name) {
            tracker.relevant_this_tick =
                tracker.relevant_this_tick || weight > ZERO_ANIMWEIGHT_THRESH;
        }
    }

    pub fn update_slot_root_motion_weight(&mut self, slot_name: &str, weight: f32) {
        if let Some(tracker) = self.slot_trackers.get_mut(slot_name) {
            tracker.root_motion_weight += weight;
        }
    }

    fn clear_slot_node_weights(&mut self) {
        for tracker in self.slot_trackers.values_mut() {
            tracker.relevant_previous_tick = tracker.relevant_this_tick;
            tracker.relevant_this_tick = false;
            tracker.root_motion_weight = 0.0;
        }
    }

    pub fn is_slot_node_relevant_for_notifies(&self, slot_name: &str) -> bool {
        self.slot_trackers
            .get(slot_name)
            .is_some_and(|tracker| tracker.relevant_this_tick || tracker.relevant_previous_tick)
    }

    pub fn slot_root_motion_weight(&self, slot_name: &str) -> f32 {
        self.slot_trackers
            .get(slot_name)
            .map(|tracker| tracker.root_motion_weight)
            .unwrap_or(0.0)
    }

    /// Montage weight feeding `slot_name`. When blends overlap and the sum
    /// exceeds one, weights are renormalized.
    pub fn slot_weight(&self, slot_name: &str) -> SlotNodeWeight {
        let mut total_weight = 0.0;
        let mut non_additive_weight = 0.0;
        for (_, instance) in self.instances() {
            let Some(montage) = instance.montage() else {
                continue;
            };
            if !montage.is_valid_slot(slot_name) {
                continue;
            }
            total_weight += instance.weight();
            if !montage.is_valid_additive() {
                non_additive_weight += instance.weight();
            }
        }

        let mut slot_weight = total_weight;
        if total_weight > 1.0 + ZERO_ANIMWEIGHT_THRESH {
            non_additive_weight /= total_weight;
            slot_weight = 1.0;
        }
        SlotNodeWeight {
            slot_weight,
            source_weight: 1.0 - non_additive_weight,
            total_weight,
        }
    }

    /// Blends every montage playing in `slot_name` over `source`.
    /// Non-additive montages share the weight with the source, additive ones
    /// are layered on top.
    pub fn slot_evaluate_pose(
        &self,
        slot_name: &str,
        source: &Pose,
        slot_node_weight: f32,
        out: &mut Pose,
    ) {
        if slot_node_weight <= ZERO_ANIMWEIGHT_THRESH {
            out.clone_from(source);
            return;
        }

        let mut additive: Vec<(Pose, f32, AdditiveType)> = Vec::new();
        let mut non_additive: Vec<(Pose, f32)> = Vec::new();
        let mut total_weight = 0.0;
        let mut non_additive_weight = 0.0;

        for (_, instance) in self.instances() {
            let weight = instance.weight();
            if weight <= ZERO_ANIMWEIGHT_THRESH {
                continue;
            }
            let Some(track) = instance
                .montage()
                .and_then(|montage| montage.animation_data(slot_name))
            else {
                continue;
            };
            if track.is_empty() {
                continue;
            }
            let mut pose = Pose::default();
            pose_from_anim_track(track, instance.position(), &self.skeleton, &mut pose);
            total_weight += weight;
            match track.additive_type() {
                AdditiveType::None => {
                    non_additive_weight += weight;
                    non_additive.push((pose, weight));
                }
                additive_type => additive.push((pose, weight, additive_type)),
            }
        }

        if total_weight <= ZERO_ANIMWEIGHT_THRESH {
            out.clone_from(source);
            return;
        }
        if total_weight > 1.0 + ZERO_ANIMWEIGHT_THRESH {
            for (_, weight, _) in &mut additive {
                *weight /= total_weight;
            }
            for (_, weight) in &mut non_additive {
                *weight /= total_weight;
            }
            non_additive_weight /= total_weight;
        }

        if non_additive.is_empty() {
            out.clone_from(source);
        } else {
            let source_weight = (1.0 - non_additive_weight).clamp(0.0, 1.0);
            let mut poses: Vec<&Pose> = non_additive.iter().map(|(pose, _)| pose).collect();
            let mut weights: Vec<f32> = non_additive.iter().map(|(_, weight)| *weight).collect();
            if source_weight > ZERO_ANIMWEIGHT_THRESH {
                poses.push(source);
                weights.push(source_weight);
            }
            blend_poses_together(&poses, &weights, out);
        }

        for (pose, weight, additive_type) in &additive {
            accumulate_additive_pose(out, pose, *weight, *additive_type, &self.skeleton);
        }
    }

    /// Takes `alpha` of the root motion extracted so far.
    pub fn consume_extracted_root_motion(&mut self, alpha: f32) -> RootMotionMovementParams {
        if alpha < ZERO_ANIMWEIGHT_THRESH {
            RootMotionMovementParams::default()
        } else if alpha > 1.0 - ZERO_ANIMWEIGHT_THRESH {
            std::mem::take(&mut self.extracted_root_motion)
        } else {
            self.extracted_root_motion.consume_root_motion(alpha)
        }
    }
}

fn slot_entry_mut(slots: &mut [InstanceSlot], id: InstanceId) -> Option<&mut MontageInstance> {
    let slot = slots.get_mut(id.index)?;
    if slot.generation != id.generation {
        return None;
    }
    slot.instance.as_mut()
}
