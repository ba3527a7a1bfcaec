//! 骨骼叠加能力：当前叠加表、时间轴缓存、待执行的导入和宠物锁定

use crate::config::CharacterConfiguration;
use crate::files::PoseImporter;
use crate::ipc::{CharacterPoseData, PoseData};
use crate::pose::{CacheTransition, PoseCache, PoseInfo, TimelineKeys};
use crate::skeleton::{BoneId, Transform};

#[derive(Clone, Debug)]
pub struct SkeletonPosing {
    pub pose_info: PoseInfo,
    pub cache: PoseCache,
    cursed_mode: bool,
    /// 缓存第一次见到时间轴时保留当前叠加，而不是从缓存恢复
    adopt_live: bool,
    /// 下一次骨架更新时执行、执行完即清空
    transitive_actions: Vec<PoseImporter>,
    minion_lock: Option<Transform>,
    /// 最近一次收到的远端负载
    ipc_payload: Option<String>,
}

impl SkeletonPosing {
    pub fn new(cursed_mode: bool) -> Self {
        Self {
            pose_info: PoseInfo::new(),
            cache: PoseCache::new(),
            cursed_mode,
            adopt_live: true,
            transitive_actions: Vec::new(),
            minion_lock: None,
            ipc_payload: None,
        }
    }

    pub fn cursed_mode(&self) -> bool {
        self.cursed_mode
    }

    /// 诅咒模式不使用缓存，切换时缓存键作废
    pub fn set_cursed_mode(&mut self, cursed_mode: bool) {
        if self.cursed_mode != cursed_mode {
            self.cursed_mode = cursed_mode;
            self.cache.reset();
            self.adopt_live = !cursed_mode;
        }
    }

    pub fn update_cache(&mut self, keys: TimelineKeys, is_face: impl Fn(&BoneId) -> bool) -> CacheTransition {
        if self.cursed_mode {
            return CacheTransition::Unchanged;
        }
        if self.adopt_live && self.cache.active().is_none() {
            self.adopt_live = false;
            self.cache.adopt(&self.pose_info, keys, is_face);
            return CacheTransition::Initialized;
        }
        self.cache.update(&mut self.pose_info, keys, is_face)
    }

    pub fn flush_cache(&mut self, is_face: impl Fn(&BoneId) -> bool) {
        if !self.cursed_mode {
            self.cache.flush(&self.pose_info, is_face);
        }
    }

    pub fn reset_pose(&mut self) {
        self.pose_info.clear_all();
    }

    pub fn register_transitive_action(&mut self, importer: PoseImporter) {
        self.transitive_actions.push(importer);
    }

    pub fn has_transitive_actions(&self) -> bool {
        !self.transitive_actions.is_empty()
    }

    pub fn take_transitive_actions(&mut self) -> Vec<PoseImporter> {
        std::mem::take(&mut self.transitive_actions)
    }

    pub fn minion_lock(&self) -> Option<Transform> {
        self.minion_lock
    }

    pub fn lock_minion(&mut self, anchor: Transform) {
        self.minion_lock = Some(anchor);
    }

    pub fn unlock_minion(&mut self) {
        self.minion_lock = None;
    }

    pub fn ipc_payload(&self) -> Option<&str> {
        self.ipc_payload.as_deref()
    }

    pub fn set_ipc_payload(&mut self, payload: String) {
        self.ipc_payload = Some(payload);
    }

    /// 载入保存的缓存；当前时间轴已知时立即恢复
    pub fn load_cache(&mut self, saved: &CharacterConfiguration, is_face: impl Fn(&BoneId) -> bool) {
        saved.fill_cache(&mut self.cache);
        if self.cursed_mode {
            return;
        }
        match self.cache.reapply(is_face) {
            Some(pose) => self.pose_info = pose,
            None => self.adopt_live = false,
        }
    }

    /// 导出叠加部分的同步数据（速度和动画时间由调用方填写）
    pub fn export_pose_data(&self) -> CharacterPoseData {
        let mut data = if self.cursed_mode {
            CharacterPoseData {
                cursed_pose: Some(PoseData::from_pose_info(&self.pose_info)),
                ..Default::default()
            }
        } else {
            CharacterPoseData::default().with_cache(&self.cache)
        };
        data.minion_lock = self.minion_lock;
        data
    }

    /// 用远端数据替换全部叠加；`keys` 可用时立即按当前时间轴恢复
    pub fn rehydrate(
        &mut self,
        data: &CharacterPoseData,
        keys: Option<TimelineKeys>,
        is_face: impl Fn(&BoneId) -> bool,
    ) {
        self.reset_pose();
        self.cache.reset();
        self.cursed_mode = data.is_cursed();
        self.adopt_live = false;

        if let Some(cursed) = &data.cursed_pose {
            self.pose_info = cursed.to_pose_info();
        } else {
            data.fill_cache(&mut self.cache);
            if let Some(keys) = keys {
                self.cache.update(&mut self.pose_info, keys, is_face);
            }
        }

        match data.minion_lock {
            Some(anchor) => self.lock_minion(anchor),
            None => self.unlock_minion(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{MirrorTable, PoseEdit};
    use glam::Quat;

    fn posed() -> SkeletonPosing {
        let mut posing = SkeletonPosing::new(false);
        posing.update_cache(TimelineKeys::new((4, 0), 2, 0), |_| false);
        posing.pose_info.apply(
            &BoneId::character("j_kosi"),
            &PoseEdit::new(Transform::from_rotation(Quat::from_rotation_x(0.3)), None),
            &MirrorTable::default(),
            |_| true,
        );
        posing.flush_cache(|_| false);
        posing
    }

    #[test]
    fn test_rehydrate_restores_active_key() {
        let source = posed();
        let data = source.export_pose_data();
        assert_eq!(data.body_poses.len(), 1);

        let mut target = SkeletonPosing::new(false);
        target.rehydrate(&data, Some(TimelineKeys::new((4, 0), 2, 0)), |_| false);
        assert_eq!(target.pose_info, source.pose_info);

        let mut elsewhere = SkeletonPosing::new(false);
        elsewhere.rehydrate(&data, Some(TimelineKeys::new((5, 0), 2, 0)), |_| false);
        assert!(elsewhere.pose_info.is_empty());
    }

    #[test]
    fn test_cursed_round_trip_bypasses_cache() {
        let mut source = posed();
        source.set_cursed_mode(true);
        let data = source.export_pose_data();
        assert!(data.is_cursed());
        assert!(data.body_poses.is_empty());

        let mut target = SkeletonPosing::new(false);
        target.rehydrate(&data, Some(TimelineKeys::new((9, 9), 9, 0)), |_| false);
        assert!(target.cursed_mode());
        assert!(!target.pose_info.is_empty());
        assert_eq!(
            target.update_cache(TimelineKeys::new((1, 1), 1, 0), |_| false),
            CacheTransition::Unchanged
        );
    }

    #[test]
    fn test_transitive_actions_are_taken_once() {
        let mut posing = SkeletonPosing::new(false);
        posing.register_transitive_action(PoseImporter::new(
            Default::default(),
            crate::files::PoseImporterOptions::ipc(),
        ));
        assert!(posing.has_transitive_actions());
        assert_eq!(posing.take_transitive_actions().len(), 1);
        assert!(!posing.has_transitive_actions());
    }

    #[test]
    fn test_edits_before_first_update_are_kept() {
        let mut posing = SkeletonPosing::new(false);
        let hip = BoneId::character("j_kosi");
        posing.pose_info.apply(
            &hip,
            &PoseEdit::new(Transform::from_rotation(Quat::from_rotation_z(0.2)), None),
            &MirrorTable::default(),
            |_| true,
        );
        let transition = posing.update_cache(TimelineKeys::new((1, 0), 1, 0), |_| false);
        assert_eq!(transition, CacheTransition::Initialized);
        assert!(posing.pose_info.is_overridden(|id| id == &hip));
    }
}
