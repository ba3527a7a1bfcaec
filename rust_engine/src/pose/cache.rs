//! 按动画时间轴分区缓存的姿势
//!
//! 身体、表情和宠物三个分区各自以当前动画的标识为键保存叠加表。
//! 时间轴切换时先保存离开的分区，再恢复进入的分区。

use std::collections::HashMap;

use super::pose_info::PoseInfo;
use crate::skeleton::BoneId;

/// 身体时间轴键（两个并行的时间轴标识）
pub type BodyKey = (u16, u16);
/// 表情时间轴键
pub type FaceKey = u16;
/// 宠物种类键，0 表示没有宠物
pub type MinionKey = u32;

/// 当前生效的三个键
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TimelineKeys {
    pub body: BodyKey,
    pub face: FaceKey,
    pub minion: MinionKey,
}

impl TimelineKeys {
    pub fn new(body: BodyKey, face: FaceKey, minion: MinionKey) -> Self {
        Self { body, face, minion }
    }
}

/// 缓存切换的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTransition {
    Unchanged,
    /// 第一次见到这个角色
    Initialized,
    Switched { from: TimelineKeys, to: TimelineKeys },
}

impl CacheTransition {
    pub fn is_switch(&self) -> bool {
        matches!(self, CacheTransition::Switched { .. })
    }
}

/// 姿势缓存
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseCache {
    pub body_poses: HashMap<BodyKey, PoseInfo>,
    pub face_poses: HashMap<FaceKey, PoseInfo>,
    pub minion_poses: HashMap<MinionKey, PoseInfo>,
    active: Option<TimelineKeys>,
}

impl PoseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<TimelineKeys> {
        self.active
    }

    /// 每帧调用：键变化时保存旧分区、恢复新分区
    ///
    /// `is_face` 判断骨骼是否属于表情分区（由骨架分类决定）。
    pub fn update(
        &mut self,
        live: &mut PoseInfo,
        incoming: TimelineKeys,
        is_face: impl Fn(&BoneId) -> bool,
    ) -> CacheTransition {
        let transition = match self.active {
            Some(active) if active == incoming => return CacheTransition::Unchanged,
            Some(active) => {
                self.capture(live, active, &is_face);
                CacheTransition::Switched {
                    from: active,
                    to: incoming,
                }
            }
            None => CacheTransition::Initialized,
        };

        *live = self.restore(incoming, &is_face);
        self.active = Some(incoming);
        log::debug!("姿势缓存切换: {:?}", transition);
        transition
    }

    /// 把当前叠加当作 `keys` 对应的分区保存，不做恢复
    pub fn adopt(&mut self, live: &PoseInfo, keys: TimelineKeys, is_face: impl Fn(&BoneId) -> bool) {
        self.capture(live, keys, &is_face);
        self.active = Some(keys);
    }

    /// 不切换，只把当前叠加写回缓存
    pub fn flush(&mut self, live: &PoseInfo, is_face: impl Fn(&BoneId) -> bool) {
        if let Some(active) = self.active {
            self.capture(live, active, &is_face);
        }
    }

    /// 重新按当前键恢复（远端数据注入缓存之后）
    pub fn reapply(&self, is_face: impl Fn(&BoneId) -> bool) -> Option<PoseInfo> {
        self.active.map(|keys| self.restore(keys, &is_face))
    }

    /// 忘掉当前键，下一帧按初次见到处理
    pub fn reset(&mut self) {
        self.body_poses.clear();
        self.face_poses.clear();
        self.minion_poses.clear();
        self.active = None;
    }

    pub fn is_empty(&self) -> bool {
        self.body_poses.is_empty() && self.face_poses.is_empty() && self.minion_poses.is_empty()
    }

    fn capture(&mut self, live: &PoseInfo, keys: TimelineKeys, is_face: &impl Fn(&BoneId) -> bool) {
        let face = live.clone_filtered(|id| !id.is_minion() && is_face(id));
        store(&mut self.face_poses, keys.face, face);

        let body = live.clone_filtered(|id| !id.is_minion() && !is_face(id));
        store(&mut self.body_poses, keys.body, body);

        if keys.minion != 0 {
            let minion = live.clone_filtered(BoneId::is_minion);
            store(&mut self.minion_poses, keys.minion, minion);
        }
    }

    fn restore(&self, keys: TimelineKeys, is_face: &impl Fn(&BoneId) -> bool) -> PoseInfo {
        let mut pose = self.body_poses.get(&keys.body).cloned().unwrap_or_default();
        pose.clear(|id| is_face(id) || id.is_minion());
        if let Some(face) = self.face_poses.get(&keys.face) {
            pose.overlay(face, |id| !id.is_minion() && is_face(id));
        }
        if let Some(minion) = self.minion_poses.get(&keys.minion) {
            pose.overlay(minion, BoneId::is_minion);
        }
        pose
    }
}

/// 空分区删除键，不保存空表
fn store<K: std::hash::Hash + Eq>(map: &mut HashMap<K, PoseInfo>, key: K, pose: PoseInfo) {
    if pose.is_empty() {
        map.remove(&key);
    } else {
        map.insert(key, pose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{MirrorTable, PoseEdit};
    use crate::skeleton::{PoseSlot, Transform};
    use glam::Quat;

    fn is_face(id: &BoneId) -> bool {
        id.bone_name.starts_with("j_f_")
    }

    fn edit(pose: &mut PoseInfo, id: &BoneId, angle: f32) {
        let target = Transform::from_rotation(Quat::from_rotation_y(angle));
        pose.apply(id, &PoseEdit::new(target, None), &MirrorTable::default(), |_| true);
    }

    #[test]
    fn test_face_switch_keeps_body() {
        let mut cache = PoseCache::new();
        let mut live = PoseInfo::new();
        let keys = TimelineKeys::new((10, 0), 1, 0);
        cache.update(&mut live, keys, is_face);

        let spine = BoneId::character("j_sebo_a");
        let brow = BoneId::character("j_f_mayu_l");
        edit(&mut live, &spine, 0.3);
        edit(&mut live, &brow, 0.2);
        let body_before = live.clone_filtered(|id| !is_face(id));

        let switched = TimelineKeys::new((10, 0), 2, 0);
        assert!(cache.update(&mut live, switched, is_face).is_switch());
        assert_eq!(live.clone_filtered(|id| !is_face(id)), body_before);
        assert!(!live.is_overridden(is_face));

        // 切回原表情，眉毛的叠加恢复
        cache.update(&mut live, keys, is_face);
        assert!(live.is_overridden(|id| id == &brow));
    }

    #[test]
    fn test_body_switch_restores_per_key() {
        let mut cache = PoseCache::new();
        let mut live = PoseInfo::new();
        let first = TimelineKeys::new((10, 0), 1, 0);
        let second = TimelineKeys::new((20, 0), 1, 0);
        let spine = BoneId::character("j_sebo_a");

        cache.update(&mut live, first, is_face);
        edit(&mut live, &spine, 0.3);
        cache.update(&mut live, second, is_face);
        assert!(live.is_empty());
        edit(&mut live, &spine, -0.5);

        cache.update(&mut live, first, is_face);
        let restored = live.get(&spine).unwrap().effective(&Transform::IDENTITY);
        assert!(restored.approximately_eq(&Transform::from_rotation(Quat::from_rotation_y(0.3)), 1e-5));
        assert_eq!(cache.body_poses.len(), 2);
    }

    #[test]
    fn test_empty_partition_is_removed() {
        let mut cache = PoseCache::new();
        let mut live = PoseInfo::new();
        let keys = TimelineKeys::new((10, 0), 1, 0);
        cache.update(&mut live, keys, is_face);
        edit(&mut live, &BoneId::character("j_kosi"), 0.1);
        cache.update(&mut live, TimelineKeys::new((11, 0), 1, 0), is_face);
        assert!(cache.body_poses.contains_key(&(10, 0)));

        // 回到 (10, 0) 后清空，再离开时键被删除
        cache.update(&mut live, keys, is_face);
        live.clear_all();
        cache.update(&mut live, TimelineKeys::new((11, 0), 1, 0), is_face);
        assert!(!cache.body_poses.contains_key(&(10, 0)));
    }

    #[test]
    fn test_minion_partition() {
        let mut cache = PoseCache::new();
        let mut live = PoseInfo::new();
        let with_minion = TimelineKeys::new((10, 0), 1, 7);
        cache.update(&mut live, with_minion, is_face);
        let tail = BoneId::new("n_sippo_a", 0, PoseSlot::Minion);
        edit(&mut live, &tail, 0.4);

        cache.update(&mut live, TimelineKeys::new((10, 0), 1, 0), is_face);
        assert!(!live.is_overridden(BoneId::is_minion));
        cache.update(&mut live, with_minion, is_face);
        assert!(live.is_overridden(BoneId::is_minion));
    }

    #[test]
    fn test_adopt_keeps_live_pose() {
        let mut cache = PoseCache::new();
        let mut live = PoseInfo::new();
        let spine = BoneId::character("j_sebo_a");
        edit(&mut live, &spine, 0.3);

        let keys = TimelineKeys::new((10, 0), 1, 0);
        cache.adopt(&live, keys, is_face);
        assert_eq!(cache.active(), Some(keys));
        assert_eq!(cache.update(&mut live, keys, is_face), CacheTransition::Unchanged);
        assert!(live.is_overridden(|id| id == &spine));
        assert!(cache.body_poses.contains_key(&(10, 0)));
    }
}
