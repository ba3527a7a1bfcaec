//! 姿势引擎
//!
//! 每帧的更新顺序固定：
//! 1. 按当前时间轴切换缓存分区
//! 2. 执行到期的延迟任务
//! 3. 执行待导入的姿势，合成叠加栈并写回骨架
//! 4. 维护速度覆盖和宠物锁定
//!
//! 所有界面操作、文件导入导出和远端同步都从这里进入。

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::actor::{Actor, ActorId, Capability, Posing, Selection, SkeletonPosing};
use crate::animation::{
    ActionTimeline, AnimationState, RESET_TIMELINE_DELAY_FRAMES, RESTORE_SPEED_DELAY_FRAMES,
};
use crate::config::{CharacterConfiguration, Configuration};
use crate::events::EventRegistry;
use crate::files::{
    BoneFilter, LivePoseFile, NormalizedPose, PoseDocument, PoseFile, PoseImporter,
    PoseImporterOptions,
};
use crate::host::AnimationHost;
use crate::ipc::tag;
use crate::ipc::wire;
use crate::ipc::{
    CharacterPoseData, TagChannel, MAX_ACTOR_INDEX, POSE_TAG_NAME, REMOTE_ACTOR_INDEX_RANGE,
};
use crate::pose::{
    compose_skeleton, flip_rotation, BonePoseInfo, GroupedHistory, HistoryEntry, PoseEdit, PoseInfo,
};
use crate::scheduler::{DebounceKey, FrameScheduler};
use crate::skeleton::{
    BoneId, PoseSlot, Skeleton, Transform, TransformComponents, FACE_BONE_PREFIX, TRANSFORM_EPSILON,
};
use crate::{PoseError, Result};

/// 每帧合成的骨架槽位
const POSE_SLOTS: [PoseSlot; 5] = [
    PoseSlot::Character,
    PoseSlot::MainHand,
    PoseSlot::OffHand,
    PoseSlot::Ornament,
    PoseSlot::Minion,
];

/// 文件姿势可导出的槽位
const EXPORT_SLOTS: [PoseSlot; 3] = [PoseSlot::Character, PoseSlot::MainHand, PoseSlot::OffHand];

/// 远端姿势在下一帧应用
const REMOTE_POSE_DELAY_FRAMES: u32 = 1;
/// 冻结后恢复动画时间要等宿主停下
const ANIMATION_STATE_DELAY_FRAMES: u32 = 1;
/// 导入生效后再记录历史
const IMPORT_SNAPSHOT_DELAY_FRAMES: u32 = 4;
const RECONCILE_DELAY_FRAMES: u32 = 2;

/// 与 1.0 相差小于该值的速度视为正常速度
const SPEED_EPSILON: f32 = 1e-3;

/// 延迟到之后某一帧执行的工作
#[derive(Debug)]
pub enum FrameTask {
    /// None 表示负载无法解析，只清空姿势
    ApplyRemotePose {
        actor: ActorId,
        data: Option<Box<CharacterPoseData>>,
    },
    RestoreAnimationStates {
        actor: ActorId,
        states: Vec<AnimationState>,
    },
    /// 已暂停的控制器回到开头，然后执行 `then`
    ResetPausedTimeline {
        actor: ActorId,
        then: Option<Box<FrameTask>>,
        restore_speed: Option<f32>,
    },
    RestoreSpeed {
        actor: ActorId,
        speed: f32,
    },
    Import {
        actor: ActorId,
        importer: PoseImporter,
    },
    Snapshot {
        actor: ActorId,
    },
    Reconcile {
        actor: ActorId,
    },
    SendPlayerTag,
}

pub struct PoseEngine<H: AnimationHost> {
    host: H,
    config: Configuration,
    actors: BTreeMap<ActorId, Actor>,
    scheduler: FrameScheduler<FrameTask>,
    config_events: EventRegistry<ActorId>,
    /// 多选时共享一条历史
    selection: BTreeSet<ActorId>,
    grouped_history: GroupedHistory,
    /// 界面上可见的骨骼
    overlay_filter: BoneFilter,
    tags: Option<Box<dyn TagChannel>>,
}

impl<H: AnimationHost> PoseEngine<H> {
    pub fn new(host: H, config: Configuration) -> Self {
        let overlay_filter = overlay_filter(&config.posing.enabled_bone_categories);
        let grouped_history = GroupedHistory::new(config.posing.undo_stack_size);
        Self {
            host,
            config,
            actors: BTreeMap::new(),
            scheduler: FrameScheduler::new(),
            config_events: EventRegistry::new(),
            selection: BTreeSet::new(),
            grouped_history,
            overlay_filter,
            tags: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn frame(&self) -> u64 {
        self.scheduler.frame()
    }

    pub fn set_tag_channel(&mut self, channel: Box<dyn TagChannel>) {
        self.tags = Some(channel);
        self.schedule_player_tag();
    }

    pub fn tag_channel(&self) -> Option<&dyn TagChannel> {
        self.tags.as_deref()
    }

    // ========================================================================
    // 角色
    // ========================================================================

    /// 附加角色；已附加时什么都不做
    pub fn attach_actor(&mut self, id: ActorId) -> Result<()> {
        if self.actors.contains_key(&id) {
            return Ok(());
        }
        if !self.host.has_actor(id) {
            return Err(PoseError::UnknownActor(id));
        }

        let cursed = id.is_local() && self.config.posing.cursed_mode;
        let mut actor = Actor::new(id, self.config_events.subscribe(id));
        actor.add_capability(Capability::SkeletonPosing(SkeletonPosing::new(cursed)));
        actor.add_capability(Capability::Posing(Posing::new(self.config.posing.undo_stack_size)));
        actor.add_capability(Capability::ActionTimeline(ActionTimeline::new()));
        self.actors.insert(id, actor);
        log::info!("附加角色 {}", id);

        if id.is_local() {
            match self.load_character(id) {
                Ok(true) => log::info!("已载入 {} 的保存缓存", id),
                Ok(false) => {}
                Err(e) => log::warn!("载入 {} 的保存缓存失败: {}", id, e),
            }
        }
        Ok(())
    }

    /// 移除角色，取消它的所有延迟任务
    pub fn detach_actor(&mut self, id: ActorId) -> bool {
        if !self.actors.contains_key(&id) {
            return false;
        }
        if id.is_local() && self.config.posing.auto_save_on_destroy {
            if let Err(e) = self.save_character(id) {
                log::warn!("保存 {} 的缓存失败: {}", id, e);
            }
        }
        self.reset_speed_override(id);
        self.reset_minion_speed_override(id);

        self.actors.remove(&id);
        self.scheduler.cancel_owner(id);
        self.grouped_history.forget_actor(id);
        self.selection.remove(&id);
        log::info!("移除角色 {}", id);
        true
    }

    pub fn is_attached(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn pose_info(&self, id: ActorId) -> Option<&PoseInfo> {
        Some(&self.actors.get(&id)?.skeleton_posing()?.pose_info)
    }

    pub fn bone_pose(&self, id: ActorId, bone: &BoneId) -> Option<&BonePoseInfo> {
        self.pose_info(id)?.get(bone)
    }

    // ========================================================================
    // 每帧更新
    // ========================================================================

    pub fn tick(&mut self) {
        let ids: Vec<ActorId> = self.actors.keys().copied().collect();
        for &id in &ids {
            self.update_cache(id);
        }

        for task in self.scheduler.tick() {
            self.run_task(task);
        }

        for &id in &ids {
            self.update_skeletons(id);
            self.update_timeline(id);
        }
    }

    fn update_cache(&mut self, id: ActorId) {
        let Some(keys) = self.host.timeline_keys(id) else {
            return;
        };
        let skeleton = self.host.skeleton(id, PoseSlot::Character);
        let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) else {
            return;
        };
        let transition = posing.update_cache(keys, |bone| is_face_bone(skeleton, bone));
        if transition.is_switch() {
            log::debug!("{} 时间轴切换: {:?}", id, transition);
            if id.is_local() {
                self.schedule_player_tag();
            }
        }
    }

    fn update_skeletons(&mut self, id: ActorId) {
        let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) else {
            return;
        };
        let importers = posing.take_transitive_actions();
        let posing_config = &self.config.posing;

        let mut writes = Vec::new();
        for slot in POSE_SLOTS {
            let Some(skeleton) = self.host.skeleton(id, slot) else {
                continue;
            };
            for importer in &importers {
                for bone in skeleton.bones() {
                    importer.apply_bone(bone, posing.pose_info.get_pose_info(&bone.id));
                }
            }

            let locals = compose_skeleton(skeleton, &posing.pose_info, |name| {
                posing_config.joint_limit(name)
            });
            let changed: Vec<(usize, Transform)> = locals
                .into_iter()
                .enumerate()
                .filter(|(index, local)| {
                    skeleton
                        .get_bone(*index)
                        .map(|bone| !bone.last_transform.approximately_eq(local, TRANSFORM_EPSILON))
                        .unwrap_or(false)
                })
                .collect();
            if !changed.is_empty() {
                writes.push((slot, changed));
            }
        }
        if !importers.is_empty() {
            posing.pose_info.prune();
        }
        let minion_lock = posing.minion_lock();

        for (slot, changed) in writes {
            self.host.write_local_transforms(id, slot, &changed);
        }
        for difference in importers.iter().filter_map(PoseImporter::model_difference) {
            let current = self.host.model_transform(id);
            self.host.set_model_transform(id, current.apply_delta(&difference));
        }
        if let Some(anchor) = minion_lock {
            self.host.set_minion_world_transform(id, anchor);
        }
    }

    fn update_timeline(&mut self, id: ActorId) {
        let position = self.host.actor_position(id);
        let Some(timeline) = self.actors.get_mut(&id).and_then(Actor::timeline_mut) else {
            return;
        };
        let had_override = timeline.peek_speed_override().is_some();
        let speed = timeline.speed_multiplier_override(position);
        let minion_speed = timeline.minion_speed_override();

        match speed {
            Some(speed) => {
                if self.host.overall_speed(id) != speed {
                    self.host.set_overall_speed(id, speed);
                }
            }
            None if had_override => {
                self.host.set_overall_speed(id, 1.0);
                if id.is_local() {
                    self.schedule_player_tag();
                }
            }
            None => {}
        }
        if let Some(speed) = minion_speed {
            if self.host.minion_speed(id) != speed {
                self.host.set_minion_speed(id, speed);
            }
        }
    }

    fn run_task(&mut self, task: FrameTask) {
        match task {
            FrameTask::ApplyRemotePose { actor, data } => self.apply_remote_pose(actor, data.map(|d| *d)),
            FrameTask::RestoreAnimationStates { actor, states } => {
                for state in states {
                    self.host.set_animation_local_time(
                        actor,
                        state.partial_index,
                        state.control_index,
                        state.local_time,
                    );
                }
            }
            FrameTask::ResetPausedTimeline {
                actor,
                then,
                restore_speed,
            } => {
                for state in self.host.animation_states(actor) {
                    if state.playback_speed == 0.0 {
                        self.host
                            .set_animation_local_time(actor, state.partial_index, state.control_index, 0.0);
                    }
                }
                if let Some(then) = then {
                    self.run_task(*then);
                }
                if let Some(speed) = restore_speed {
                    self.scheduler.schedule(
                        RESTORE_SPEED_DELAY_FRAMES,
                        Some(actor),
                        FrameTask::RestoreSpeed { actor, speed },
                    );
                }
            }
            FrameTask::RestoreSpeed { actor, speed } => {
                if is_normal_speed(speed) {
                    self.reset_speed_override(actor);
                } else {
                    self.set_speed_override(actor, speed);
                }
            }
            FrameTask::Import { actor, importer } => {
                let Some(posing) = self.actors.get_mut(&actor).and_then(Actor::skeleton_posing_mut) else {
                    return;
                };
                posing.register_transitive_action(importer);
                self.scheduler.schedule_debounced(
                    DebounceKey::Snapshot(actor),
                    IMPORT_SNAPSHOT_DELAY_FRAMES,
                    Some(actor),
                    FrameTask::Snapshot { actor },
                );
                if actor.is_local() {
                    self.schedule_player_tag();
                }
            }
            FrameTask::Snapshot { actor } => self.snapshot(actor),
            FrameTask::Reconcile { actor } => {
                if let Some(posing) = self.actors.get_mut(&actor).and_then(Actor::skeleton_posing_mut) {
                    let baked = posing.pose_info.collapse();
                    log::debug!("{} 合并了 {} 个骨骼的叠加栈", actor, baked);
                }
            }
            FrameTask::SendPlayerTag => self.send_player_tag(),
        }
    }

    // ========================================================================
    // 编辑
    // ========================================================================

    pub fn select(&mut self, id: ActorId, selection: Selection) -> bool {
        match self.actors.get_mut(&id).and_then(Actor::posing_mut) {
            Some(posing) => {
                posing.select(selection);
                true
            }
            None => false,
        }
    }

    pub fn hover(&mut self, id: ActorId, bone: Option<BoneId>) {
        if let Some(posing) = self.actors.get_mut(&id).and_then(Actor::posing_mut) {
            posing.hover(bone);
        }
    }

    /// 多选；选中多个角色时撤销历史按组记录
    pub fn select_actors(&mut self, actors: impl IntoIterator<Item = ActorId>) {
        self.selection = actors
            .into_iter()
            .filter(|id| self.actors.contains_key(id))
            .collect();
    }

    pub fn selected_actors(&self) -> &BTreeSet<ActorId> {
        &self.selection
    }

    /// 界面上按分类过滤后的骨骼
    pub fn visible_bones(&self, id: ActorId, slot: PoseSlot) -> Vec<BoneId> {
        let Some(skeleton) = self.host.skeleton(id, slot) else {
            return Vec::new();
        };
        skeleton
            .bones()
            .iter()
            .filter(|bone| {
                self.overlay_filter
                    .is_bone_valid(bone.name(), slot, bone.is_hidden, false)
            })
            .map(|bone| bone.id.clone())
            .collect()
    }

    /// 对一个骨骼应用编辑
    ///
    /// 骨骼已不在骨架上时返回 false；不能使用 IK 的骨骼忽略启用 IK 的请求。
    pub fn apply_bone_edit(&mut self, id: ActorId, bone: &BoneId, edit: PoseEdit) -> bool {
        let Some(skeleton) = self.host.skeleton(id, bone.slot) else {
            return false;
        };
        let Some(target) = skeleton.find_bone(bone) else {
            log::debug!("{} 上找不到骨骼 {}", id, bone);
            return false;
        };

        let mut edit = edit;
        if edit.ik.map_or(false, |ik| ik.enabled) && !skeleton.eligible_for_ik(target.index) {
            log::debug!("骨骼 {} 不能使用 IK", bone);
            edit.ik = None;
        }

        let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) else {
            return false;
        };
        let changed = posing
            .pose_info
            .apply(bone, &edit, &self.config.posing.mirror, |other| {
                skeleton.find_bone(other).is_some()
            });
        if changed && id.is_local() {
            self.schedule_player_tag();
        }
        changed
    }

    /// 关闭 -> CCD -> 双关节 -> 关闭
    pub fn cycle_ik(&mut self, id: ActorId, bone: &BoneId) -> bool {
        let current = self
            .bone_pose(id, bone)
            .map(|info| info.default_ik)
            .unwrap_or_else(|| BonePoseInfo::new(bone.clone()).default_ik);
        let next = current.next_mode(&bone.bone_name);
        self.apply_bone_edit(id, bone, PoseEdit::new(Transform::IDENTITY, None).with_ik(next))
    }

    /// 把骨骼当前的旋转按镜像公式翻转，作为新的一项压栈
    pub fn flip_bone(&mut self, id: ActorId, bone: &BoneId) -> bool {
        let Some(raw) = self
            .host
            .skeleton(id, bone.slot)
            .and_then(|skeleton| skeleton.find_bone(bone))
            .map(|b| b.last_raw_transform)
        else {
            return false;
        };
        let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) else {
            return false;
        };

        let info = posing.pose_info.get_pose_info(bone);
        let current = info.effective(&raw);
        let target = Transform {
            rotation: flip_rotation(current.rotation),
            ..current
        };
        let edit = PoseEdit::new(target, Some(current))
            .with_components(TransformComponents::ROTATION)
            .forced();
        let changed = info.apply(&edit);
        if !changed {
            posing.pose_info.prune();
            return false;
        }

        self.snapshot(id);
        if id.is_local() {
            self.schedule_player_tag();
        }
        true
    }

    pub fn stack_counts(&self, id: ActorId) -> BTreeMap<BoneId, usize> {
        self.pose_info(id).map(PoseInfo::stack_counts).unwrap_or_default()
    }

    pub fn is_overridden(&self, id: ActorId, predicate: impl Fn(&BoneId) -> bool) -> bool {
        self.pose_info(id)
            .map(|pose| pose.is_overridden(predicate))
            .unwrap_or(false)
    }

    pub fn has_ik_stacks(&self, id: ActorId) -> bool {
        self.pose_info(id).map(PoseInfo::has_ik_stacks).unwrap_or(false)
    }

    /// 清空叠加并记录历史
    pub fn reset(&mut self, id: ActorId) -> bool {
        let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) else {
            return false;
        };
        posing.reset_pose();
        self.snapshot(id);
        if id.is_local() {
            self.schedule_player_tag();
        }
        true
    }

    // ========================================================================
    // 历史
    // ========================================================================

    fn group_for(&self, id: ActorId) -> Option<BTreeSet<ActorId>> {
        (self.selection.len() > 1 && self.selection.contains(&id)).then(|| self.selection.clone())
    }

    fn history_entry(&self, id: ActorId) -> Option<HistoryEntry> {
        let pose = &self.actors.get(&id)?.skeleton_posing()?.pose_info;
        Some(HistoryEntry::new(pose, Some(self.host.model_transform(id))))
    }

    pub fn snapshot(&mut self, id: ActorId) {
        if let Some(members) = self.group_for(id) {
            let entries = members
                .iter()
                .filter_map(|member| self.history_entry(*member).map(|entry| (*member, entry)))
                .collect();
            self.grouped_history.snapshot(&members, entries);
            return;
        }

        let Some(entry) = self.history_entry(id) else {
            return;
        };
        if let Some(posing) = self.actors.get_mut(&id).and_then(Actor::posing_mut) {
            posing.snapshot(entry);
        }
    }

    /// 两帧后把叠加栈合并为一项
    pub fn reconcile(&mut self, id: ActorId) {
        self.scheduler.schedule_debounced(
            DebounceKey::Reconcile(id),
            RECONCILE_DELAY_FRAMES,
            Some(id),
            FrameTask::Reconcile { actor: id },
        );
    }

    pub fn undo(&mut self, id: ActorId) -> bool {
        if let Some(members) = self.group_for(id) {
            if !members.iter().all(|member| self.actors.contains_key(member)) {
                return false;
            }
            let Some(entries) = self.grouped_history.undo(&members) else {
                return false;
            };
            for (member, entry) in entries {
                self.restore_history_entry(member, entry);
            }
            return true;
        }

        let Some(entry) = self.actors.get_mut(&id).and_then(Actor::posing_mut).and_then(Posing::undo) else {
            return false;
        };
        self.restore_history_entry(id, entry);
        true
    }

    pub fn redo(&mut self, id: ActorId) -> bool {
        if let Some(members) = self.group_for(id) {
            if !members.iter().all(|member| self.actors.contains_key(member)) {
                return false;
            }
            let Some(entries) = self.grouped_history.redo(&members) else {
                return false;
            };
            for (member, entry) in entries {
                self.restore_history_entry(member, entry);
            }
            return true;
        }

        let Some(entry) = self.actors.get_mut(&id).and_then(Actor::posing_mut).and_then(Posing::redo) else {
            return false;
        };
        self.restore_history_entry(id, entry);
        true
    }

    pub fn can_undo(&self, id: ActorId) -> bool {
        match self.group_for(id) {
            Some(members) => self.grouped_history.can_undo(&members),
            None => self
                .actors
                .get(&id)
                .and_then(Actor::posing)
                .map(|posing| posing.history().can_undo())
                .unwrap_or(false),
        }
    }

    pub fn can_redo(&self, id: ActorId) -> bool {
        match self.group_for(id) {
            Some(members) => self.grouped_history.can_redo(&members),
            None => self
                .actors
                .get(&id)
                .and_then(Actor::posing)
                .map(|posing| posing.history().can_redo())
                .unwrap_or(false),
        }
    }

    fn restore_history_entry(&mut self, id: ActorId, entry: HistoryEntry) {
        let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) else {
            return;
        };
        posing.pose_info = entry.pose;
        if let Some(model) = entry.model_transform {
            self.host.set_model_transform(id, model);
        }
        if id.is_local() {
            self.schedule_player_tag();
        }
    }

    // ========================================================================
    // 文件
    // ========================================================================

    /// 导出骨架当前可见的本地变换
    ///
    /// 分部根骨骼和上一分部的连接骨骼重名，只保留骨架根。
    pub fn export_pose(&self, id: ActorId) -> Option<PoseFile> {
        if !self.actors.contains_key(&id) {
            return None;
        }
        let mut file = PoseFile::default();
        for slot in EXPORT_SLOTS {
            let (Some(skeleton), Some(bones)) = (self.host.skeleton(id, slot), file.bones_for_slot_mut(slot))
            else {
                continue;
            };
            for bone in skeleton.bones() {
                if bone.is_partial_root && !bone.is_skeleton_root {
                    continue;
                }
                bones.entry(bone.name().to_string()).or_insert(bone.last_transform);
            }
        }
        Some(file)
    }

    pub fn save_pose_file<P: AsRef<Path>>(&self, id: ActorId, path: P) -> Result<()> {
        let file = self.export_pose(id).ok_or(PoseError::UnknownActor(id))?;
        file.save(path)
    }

    /// 保存完整叠加数据（含缓存分区）
    pub fn save_live_pose<P: AsRef<Path>>(&mut self, id: ActorId, path: P) -> Result<()> {
        self.flush_cache(id);
        let data = self.collect_pose_data(id).ok_or(PoseError::UnknownActor(id))?;
        fs::write(path, LivePoseFile::new(data).to_json()?)?;
        Ok(())
    }

    pub fn load_pose_file<P: AsRef<Path>>(
        &mut self,
        id: ActorId,
        path: P,
        options: Option<PoseImporterOptions>,
    ) -> Result<()> {
        let document = PoseDocument::load(path)?;
        self.import_pose(id, document, options)
    }

    /// 导入姿势文档
    ///
    /// 按骨骼的变换先冻结角色并把已暂停的动画归零，再在下一次骨架更新时导入；
    /// 完整叠加数据直接替换缓存。
    pub fn import_pose(
        &mut self,
        id: ActorId,
        document: PoseDocument,
        options: Option<PoseImporterOptions>,
    ) -> Result<()> {
        if !self.actors.contains_key(&id) {
            return Err(PoseError::UnknownActor(id));
        }

        match document.normalize()? {
            NormalizedPose::Transforms(file) => {
                let options = options.unwrap_or_else(|| PoseImporterOptions {
                    apply_model_transform: self.config.import.apply_model_transform,
                    ..Default::default()
                });
                log::info!(
                    "{} 导入姿势: {} 个身体骨骼, {} 个武器骨骼",
                    id,
                    file.bones.len(),
                    file.main_hand.len() + file.off_hand.len()
                );
                let restore = !self.config.posing.freeze_actor_on_pose_import;
                let importer = PoseImporter::new(file, options);
                self.stop_speed_and_reset_timeline(id, Some(FrameTask::Import { actor: id, importer }), restore);
            }
            NormalizedPose::Live(data) => {
                log::info!("{} 导入完整叠加数据", id);
                self.scheduler.schedule(
                    REMOTE_POSE_DELAY_FRAMES,
                    Some(id),
                    FrameTask::ApplyRemotePose {
                        actor: id,
                        data: Some(Box::new(data)),
                    },
                );
                self.scheduler.schedule_debounced(
                    DebounceKey::Snapshot(id),
                    IMPORT_SNAPSHOT_DELAY_FRAMES,
                    Some(id),
                    FrameTask::Snapshot { actor: id },
                );
            }
        }
        Ok(())
    }

    // ========================================================================
    // 速度
    // ========================================================================

    /// 有效速度：覆盖值或宿主当前速度
    pub fn speed_multiplier(&mut self, id: ActorId) -> f32 {
        let position = self.host.actor_position(id);
        let host_speed = self.host.overall_speed(id);
        match self.actors.get_mut(&id).and_then(Actor::timeline_mut) {
            Some(timeline) => timeline.speed_multiplier(position, host_speed),
            None => host_speed,
        }
    }

    /// 覆盖整体速度，锚定在角色当前位置
    pub fn set_speed_override(&mut self, id: ActorId, speed: f32) {
        let anchor = self.host.actor_position(id);
        let Some(timeline) = self.actors.get_mut(&id).and_then(Actor::timeline_mut) else {
            return;
        };
        timeline.set_speed_override(speed, anchor);
        self.host.set_overall_speed(id, speed);
        if id.is_local() {
            self.schedule_player_tag();
        }
    }

    pub fn reset_speed_override(&mut self, id: ActorId) {
        let Some(timeline) = self.actors.get_mut(&id).and_then(Actor::timeline_mut) else {
            return;
        };
        if timeline.peek_speed_override().is_none() {
            return;
        }
        timeline.reset_speed_override();
        self.host.set_overall_speed(id, 1.0);
        if id.is_local() {
            self.schedule_player_tag();
        }
    }

    pub fn set_minion_speed_override(&mut self, id: ActorId, speed: f32) {
        let Some(timeline) = self.actors.get_mut(&id).and_then(Actor::timeline_mut) else {
            return;
        };
        timeline.set_minion_speed_override(speed);
        self.host.set_minion_speed(id, speed);
        if id.is_local() {
            self.schedule_player_tag();
        }
    }

    pub fn reset_minion_speed_override(&mut self, id: ActorId) {
        let Some(timeline) = self.actors.get_mut(&id).and_then(Actor::timeline_mut) else {
            return;
        };
        if timeline.minion_speed_override().is_none() {
            return;
        }
        timeline.reset_minion_speed_override();
        self.host.set_minion_speed(id, 1.0);
        if id.is_local() {
            self.schedule_player_tag();
        }
    }

    /// 冻结角色，四帧后把已暂停的控制器归零并执行 `then`
    ///
    /// `restore_speed` 为 true 时再过两帧恢复原来的速度。
    pub fn stop_speed_and_reset_timeline(&mut self, id: ActorId, then: Option<FrameTask>, restore_speed: bool) {
        let previous = self.speed_multiplier(id);
        self.set_speed_override(id, 0.0);
        self.scheduler.schedule(
            RESET_TIMELINE_DELAY_FRAMES,
            Some(id),
            FrameTask::ResetPausedTimeline {
                actor: id,
                then: then.map(Box::new),
                restore_speed: restore_speed.then_some(previous),
            },
        );
    }

    pub fn lock_minion(&mut self, id: ActorId, anchor: Transform) {
        if let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) {
            posing.lock_minion(anchor);
            if id.is_local() {
                self.schedule_player_tag();
            }
        }
    }

    pub fn unlock_minion(&mut self, id: ActorId) {
        if let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) {
            posing.unlock_minion();
            if id.is_local() {
                self.schedule_player_tag();
            }
        }
    }

    // ========================================================================
    // 同步
    // ========================================================================

    fn flush_cache(&mut self, id: ActorId) {
        let skeleton = self.host.skeleton(id, PoseSlot::Character);
        if let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) {
            posing.flush_cache(|bone| is_face_bone(skeleton, bone));
        }
    }

    /// 角色的完整同步数据；冻结时附带主动画的时间
    pub fn collect_pose_data(&mut self, id: ActorId) -> Option<CharacterPoseData> {
        let position = self.host.actor_position(id);
        let actor = self.actors.get_mut(&id)?;
        let (speed, minion_speed) = match actor.timeline_mut() {
            Some(timeline) => (
                timeline.speed_multiplier_override(position),
                timeline.minion_speed_override(),
            ),
            None => (None, None),
        };

        let mut data = actor.skeleton_posing()?.export_pose_data();
        data.speed_multiplier = speed;
        data.minion_speed_multiplier = minion_speed;
        data.frozen = speed == Some(0.0);
        if data.frozen {
            data.animation_states = self
                .host
                .animation_states(id)
                .into_iter()
                .filter(|state| state.partial_index == 0 && state.control_index == 0)
                .collect();
        }
        Some(data)
    }

    /// 角色当前姿势的传输字符串；索引超出范围或角色不存在时为空串
    pub fn get_pose(&mut self, index: u16) -> String {
        if index > MAX_ACTOR_INDEX {
            return String::new();
        }
        let id = ActorId(index);
        if let Err(e) = self.attach_actor(id) {
            log::warn!("取姿势失败: {}", e);
            return String::new();
        }
        self.flush_cache(id);

        match self.collect_pose_data(id).map(|data| wire::encode_string(&data)) {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => {
                log::warn!("{} 的姿势编码失败: {}", id, e);
                String::new()
            }
            None => String::new(),
        }
    }

    /// 在下一帧应用远端姿势
    ///
    /// 负载无法解析时仍会在下一帧清空姿势，并返回 false。
    pub fn set_pose(&mut self, index: u16, payload: &str) -> bool {
        if index > MAX_ACTOR_INDEX {
            return false;
        }
        let id = ActorId(index);
        if let Err(e) = self.attach_actor(id) {
            log::warn!("忽略远端姿势: {}", e);
            return false;
        }

        let data = match wire::decode_string(payload) {
            Ok(data) => Some(data),
            Err(e) => {
                if !payload.is_empty() {
                    log::warn!("{} 的远端姿势无效: {}", id, e);
                }
                None
            }
        };
        let valid = data.is_some();

        if let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) {
            posing.set_ipc_payload(payload.to_string());
        }
        self.scheduler.schedule(
            REMOTE_POSE_DELAY_FRAMES,
            Some(id),
            FrameTask::ApplyRemotePose {
                actor: id,
                data: data.map(Box::new),
            },
        );
        valid
    }

    fn apply_remote_pose(&mut self, id: ActorId, data: Option<CharacterPoseData>) {
        let keys = self.host.timeline_keys(id);
        let skeleton = self.host.skeleton(id, PoseSlot::Character);
        let Some(posing) = self.actors.get_mut(&id).and_then(Actor::skeleton_posing_mut) else {
            return;
        };
        let Some(data) = data else {
            posing.reset_pose();
            posing.cache.reset();
            return;
        };
        posing.rehydrate(&data, keys, |bone| is_face_bone(skeleton, bone));

        if data.frozen {
            self.set_speed_override(id, 0.0);
            if !data.animation_states.is_empty() {
                self.scheduler.schedule(
                    ANIMATION_STATE_DELAY_FRAMES,
                    Some(id),
                    FrameTask::RestoreAnimationStates {
                        actor: id,
                        states: data.animation_states,
                    },
                );
            }
        } else {
            match data.speed_multiplier {
                Some(speed) if !is_normal_speed(speed) => self.set_speed_override(id, speed),
                _ => self.reset_speed_override(id),
            }
        }

        match data.minion_speed_multiplier {
            Some(speed) if !is_normal_speed(speed) => self.set_minion_speed_override(id, speed),
            _ => self.reset_minion_speed_override(id),
        }
    }

    /// 角色标签变化；只接受远端角色的姿势标签
    pub fn on_tag_changed(&mut self, index: u16, tag_name: &str, value: Option<&str>) -> bool {
        if !REMOTE_ACTOR_INDEX_RANGE.contains(&index) || tag_name != POSE_TAG_NAME {
            return false;
        }
        let payload = match value.filter(|v| !v.is_empty()) {
            Some(value) => match tag::decompress(value) {
                Ok(payload) => payload,
                Err(e) => {
                    log::warn!("Actor#{} 的姿势标签无法解压: {}", index, e);
                    String::new()
                }
            },
            None => String::new(),
        };
        self.set_pose(index, &payload)
    }

    /// 启动时扫描已有的远端标签
    pub fn refresh_remote_tags(&mut self) -> usize {
        let Some(tags) = self.tags.as_deref().filter(|tags| tags.is_available()) else {
            return 0;
        };
        let found: Vec<(u16, String)> = REMOTE_ACTOR_INDEX_RANGE
            .filter_map(|index| tags.get_tag(ActorId(index), POSE_TAG_NAME).map(|value| (index, value)))
            .collect();

        let mut applied = 0;
        for (index, value) in found {
            if self.on_tag_changed(index, POSE_TAG_NAME, Some(&value)) {
                applied += 1;
            }
        }
        applied
    }

    /// 本机姿势变化后防抖发送标签
    pub fn schedule_player_tag(&mut self) {
        if self.tags.is_none() {
            return;
        }
        self.scheduler.schedule_debounced(
            DebounceKey::PlayerPoseTag,
            self.config.posing.replication_debounce_frames,
            None,
            FrameTask::SendPlayerTag,
        );
    }

    fn send_player_tag(&mut self) {
        if !self.tags.as_deref().map_or(false, |tags| tags.is_available()) {
            return;
        }
        self.flush_cache(ActorId::LOCAL);
        let payload = self
            .collect_pose_data(ActorId::LOCAL)
            .filter(|data| !data.is_empty())
            .map(|data| wire::encode_string(&data).and_then(|text| tag::compress(&text)));

        let Some(tags) = self.tags.as_mut() else {
            return;
        };
        match payload {
            Some(Ok(value)) => {
                log::debug!("发送本机姿势标签: {} 字节", value.len());
                tags.set_tag(ActorId::LOCAL, POSE_TAG_NAME, &value);
            }
            Some(Err(e)) => log::warn!("本机姿势标签编码失败: {}", e),
            None => tags.remove_tag(ActorId::LOCAL, POSE_TAG_NAME),
        }
    }

    // ========================================================================
    // 配置
    // ========================================================================

    /// 替换配置并通知所有角色
    pub fn apply_configuration(&mut self, config: Configuration) {
        self.overlay_filter = overlay_filter(&config.posing.enabled_bone_categories);
        self.grouped_history.set_max_size(config.posing.undo_stack_size);
        self.config = config;

        for id in self.config_events.subscribers() {
            let Some(actor) = self.actors.get_mut(&id) else {
                continue;
            };
            if let Some(posing) = actor.posing_mut() {
                posing.set_undo_stack_size(self.config.posing.undo_stack_size);
            }
            if id.is_local() {
                if let Some(posing) = actor.skeleton_posing_mut() {
                    posing.set_cursed_mode(self.config.posing.cursed_mode);
                }
            }
        }
        self.schedule_player_tag();
    }

    /// 把角色缓存保存到配置目录；没有目录或身份时返回 false
    pub fn save_character(&mut self, id: ActorId) -> Result<bool> {
        let Some(directory) = self.config.posing.character_directory.clone() else {
            return Ok(false);
        };
        let Some(identity) = self.host.character_identity(id) else {
            return Ok(false);
        };
        self.flush_cache(id);
        let posing = self
            .actors
            .get(&id)
            .and_then(Actor::skeleton_posing)
            .ok_or(PoseError::UnknownActor(id))?;

        let save_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let saved = CharacterConfiguration::from_cache(&identity, &posing.cache, save_time);
        let path = CharacterConfiguration::path_in(&directory, &identity);
        saved.save(&path)?;
        log::info!("已保存角色缓存: {}", path.display());
        Ok(true)
    }

    pub fn load_character(&mut self, id: ActorId) -> Result<bool> {
        let Some(directory) = self.config.posing.character_directory.clone() else {
            return Ok(false);
        };
        let Some(identity) = self.host.character_identity(id) else {
            return Ok(false);
        };
        let path = CharacterConfiguration::path_in(&directory, &identity);
        if !path.exists() {
            return Ok(false);
        }
        let saved = CharacterConfiguration::load(&path)?;

        let skeleton = self.host.skeleton(id, PoseSlot::Character);
        let posing = self
            .actors
            .get_mut(&id)
            .and_then(Actor::skeleton_posing_mut)
            .ok_or(PoseError::UnknownActor(id))?;
        posing.load_cache(&saved, |bone| is_face_bone(skeleton, bone));
        Ok(true)
    }
}

fn is_face_bone(skeleton: Option<&Skeleton>, id: &BoneId) -> bool {
    match skeleton {
        Some(skeleton) => skeleton.is_face(id),
        None => id.bone_name.starts_with(FACE_BONE_PREFIX),
    }
}

fn is_normal_speed(speed: f32) -> bool {
    (speed - 1.0).abs() < SPEED_EPSILON
}

/// 空列表表示全部启用
fn overlay_filter(enabled: &[String]) -> BoneFilter {
    let mut filter = BoneFilter::default();
    if !enabled.is_empty() {
        filter.disable_all();
        for id in enabled {
            filter.enable_category(id);
        }
    }
    filter
}
