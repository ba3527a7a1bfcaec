//! 同步数据结构
//!
//! 与线上编码、姿势文件和角色配置共用；单位变换的叠加项不输出。

use serde::{Deserialize, Serialize};

use crate::animation::AnimationState;
use crate::pose::{BonePoseInfo, MirrorMode, PoseCache, PoseInfo, PoseStackEntry};
use crate::skeleton::{BoneId, BoneIkInfo, Transform};

/// 单个骨骼的叠加数据
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BonePoseData {
    pub id: BoneId,
    pub mirror_mode: MirrorMode,
    pub default_ik: BoneIkInfo,
    pub stacks: Vec<PoseStackEntry>,
}

/// 一张叠加表
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseData {
    pub bones: Vec<BonePoseData>,
}

impl PoseData {
    pub fn from_pose_info(pose: &PoseInfo) -> Self {
        let bones = pose
            .iter()
            .filter(|(_, info)| info.has_overrides())
            .map(|(id, info)| BonePoseData {
                id: id.clone(),
                mirror_mode: info.mirror_mode,
                default_ik: info.default_ik,
                stacks: info
                    .stacks()
                    .iter()
                    .filter(|entry| entry.is_effective())
                    .copied()
                    .collect(),
            })
            .collect();
        Self { bones }
    }

    pub fn to_pose_info(&self) -> PoseInfo {
        let mut pose = PoseInfo::new();
        for bone in &self.bones {
            let mut info = BonePoseInfo::new(bone.id.clone());
            info.mirror_mode = bone.mirror_mode;
            info.default_ik = bone.default_ik;
            for entry in &bone.stacks {
                info.push(*entry);
            }
            pose.insert(info);
        }
        pose
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyPoseData {
    pub timeline: u16,
    pub secondary_timeline: u16,
    pub pose: PoseData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FacePoseData {
    pub timeline: u16,
    pub pose: PoseData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinionPoseData {
    pub minion: u32,
    pub pose: PoseData,
}

/// 一个角色的完整同步数据
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterPoseData {
    pub body_poses: Vec<BodyPoseData>,
    pub face_poses: Vec<FacePoseData>,
    pub minion_poses: Vec<MinionPoseData>,
    /// 诅咒模式下不分区，只有这一张表
    pub cursed_pose: Option<PoseData>,
    pub frozen: bool,
    pub speed_multiplier: Option<f32>,
    pub minion_speed_multiplier: Option<f32>,
    pub minion_lock: Option<Transform>,
    pub animation_states: Vec<AnimationState>,
}

impl CharacterPoseData {
    /// 从缓存导出三个分区（按键排序）
    pub fn with_cache(mut self, cache: &PoseCache) -> Self {
        let mut body: Vec<_> = cache
            .body_poses
            .iter()
            .map(|(key, pose)| BodyPoseData {
                timeline: key.0,
                secondary_timeline: key.1,
                pose: PoseData::from_pose_info(pose),
            })
            .collect();
        body.sort_by_key(|b| (b.timeline, b.secondary_timeline));

        let mut face: Vec<_> = cache
            .face_poses
            .iter()
            .map(|(key, pose)| FacePoseData {
                timeline: *key,
                pose: PoseData::from_pose_info(pose),
            })
            .collect();
        face.sort_by_key(|f| f.timeline);

        let mut minion: Vec<_> = cache
            .minion_poses
            .iter()
            .map(|(key, pose)| MinionPoseData {
                minion: *key,
                pose: PoseData::from_pose_info(pose),
            })
            .collect();
        minion.sort_by_key(|m| m.minion);

        self.body_poses = body;
        self.face_poses = face;
        self.minion_poses = minion;
        self
    }

    /// 把三个分区写入缓存（不清空已有键）
    pub fn fill_cache(&self, cache: &mut PoseCache) {
        for body in &self.body_poses {
            cache.body_poses.insert(
                (body.timeline, body.secondary_timeline),
                body.pose.to_pose_info(),
            );
        }
        for face in &self.face_poses {
            cache.face_poses.insert(face.timeline, face.pose.to_pose_info());
        }
        for minion in &self.minion_poses {
            cache.minion_poses.insert(minion.minion, minion.pose.to_pose_info());
        }
    }

    pub fn is_cursed(&self) -> bool {
        self.cursed_pose.is_some()
    }

    /// 没有任何姿势也没有速度 / 锁定信息
    pub fn is_empty(&self) -> bool {
        self.body_poses.is_empty()
            && self.face_poses.is_empty()
            && self.minion_poses.is_empty()
            && self.cursed_pose.as_ref().map(PoseData::is_empty).unwrap_or(true)
            && !self.frozen
            && self.speed_multiplier.is_none()
            && self.minion_speed_multiplier.is_none()
            && self.minion_lock.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{MirrorTable, PoseEdit, TimelineKeys};
    use glam::Quat;

    #[test]
    fn test_identity_entries_are_omitted() {
        let mut pose = PoseInfo::new();
        let id = BoneId::character("j_kubi");
        let target = Transform::from_rotation(Quat::from_rotation_x(0.2));
        pose.apply(&id, &PoseEdit::new(target, None), &MirrorTable::default(), |_| true);
        let identity = PoseStackEntry {
            transform: Transform::IDENTITY,
            ..pose.get(&id).unwrap().stacks()[0]
        };
        pose.get_pose_info(&id).push(identity);

        let data = PoseData::from_pose_info(&pose);
        assert_eq!(data.bones.len(), 1);
        assert_eq!(data.bones[0].stacks.len(), 1);
    }

    #[test]
    fn test_identity_ik_pin_is_kept() {
        let mut pose = PoseInfo::new();
        let hand = BoneId::character("j_te_l");
        let pin = pose.get_pose_info(&hand).default_ik.next_mode("j_te_l");
        pose.apply(
            &hand,
            &PoseEdit::new(Transform::IDENTITY, None).with_ik(pin),
            &MirrorTable::default(),
            |_| true,
        );

        let data = PoseData::from_pose_info(&pose);
        assert_eq!(data.bones.len(), 1);
        assert_eq!(data.bones[0].stacks.len(), 1);
        assert!(data.to_pose_info().has_ik_stacks());
    }

    #[test]
    fn test_cache_export_and_fill() {
        let mut cache = PoseCache::new();
        let mut live = PoseInfo::new();
        cache.update(&mut live, TimelineKeys::new((3, 4), 1, 0), |_| false);
        let target = Transform::from_rotation(Quat::from_rotation_x(0.2));
        live.apply(
            &BoneId::character("j_kosi"),
            &PoseEdit::new(target, None),
            &MirrorTable::default(),
            |_| true,
        );
        cache.flush(&live, |_| false);

        let data = CharacterPoseData::default().with_cache(&cache);
        assert_eq!(data.body_poses.len(), 1);
        assert_eq!(data.body_poses[0].secondary_timeline, 4);

        let mut other = PoseCache::new();
        data.fill_cache(&mut other);
        assert_eq!(other.body_poses, cache.body_poses);
    }
}
