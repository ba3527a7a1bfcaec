//! 整个角色的叠加表

use std::collections::BTreeMap;

use super::bone_pose::{BonePoseInfo, MirrorMode, PoseEdit};
use super::mirror::{flip_transform, MirrorTable};
use crate::skeleton::{BoneId, Transform};

/// 骨骼标识到叠加信息的映射；没有条目表示没有叠加
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseInfo {
    bones: BTreeMap<BoneId, BonePoseInfo>,
}

impl PoseInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得或创建条目
    pub fn get_pose_info(&mut self, id: &BoneId) -> &mut BonePoseInfo {
        self.bones
            .entry(id.clone())
            .or_insert_with(|| BonePoseInfo::new(id.clone()))
    }

    pub fn get(&self, id: &BoneId) -> Option<&BonePoseInfo> {
        self.bones.get(id)
    }

    pub fn insert(&mut self, info: BonePoseInfo) {
        self.bones.insert(info.id().clone(), info);
    }

    pub fn remove(&mut self, id: &BoneId) -> Option<BonePoseInfo> {
        self.bones.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BoneId, &BonePoseInfo)> {
        self.bones.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&BoneId, &mut BonePoseInfo)> {
        self.bones.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    /// 没有任何有效叠加
    pub fn is_empty(&self) -> bool {
        !self.bones.values().any(BonePoseInfo::has_overrides)
    }

    /// 应用编辑，并按骨骼自身的镜像模式处理对侧骨骼
    ///
    /// `exists` 判断对侧骨骼是否在当前模型上存在，不存在时静默跳过。
    pub fn apply(
        &mut self,
        id: &BoneId,
        edit: &PoseEdit,
        mirror: &MirrorTable,
        exists: impl Fn(&BoneId) -> bool,
    ) -> bool {
        let entry = self.get_pose_info(id);
        let mut changed = entry.apply(edit);
        let mode = entry.mirror_mode;
        if !entry.has_overrides() {
            self.bones.remove(id);
        }

        if edit.is_flip || mode == MirrorMode::None {
            return changed;
        }
        let Some(other) = mirror.mirror_id(id).filter(|other| exists(other)) else {
            return changed;
        };

        let mirrored = match mode {
            MirrorMode::Mirror => {
                let reference = edit.reference.unwrap_or(Transform::IDENTITY);
                PoseEdit {
                    target: flip_transform(&edit.target),
                    reference: Some(flip_transform(&reference)),
                    ..*edit
                }
            }
            _ => *edit,
        };
        let mirrored = PoseEdit {
            ik: None,
            mirror_mode: None,
            is_flip: true,
            ..mirrored
        };
        changed |= self.get_pose_info(&other).apply(&mirrored);
        changed
    }

    /// 删除满足条件的条目
    pub fn clear(&mut self, predicate: impl Fn(&BoneId) -> bool) {
        self.bones.retain(|id, _| !predicate(id));
    }

    pub fn clear_all(&mut self) {
        self.bones.clear();
    }

    /// 深拷贝满足条件、且有叠加的条目
    pub fn clone_filtered(&self, predicate: impl Fn(&BoneId) -> bool) -> PoseInfo {
        PoseInfo {
            bones: self
                .bones
                .iter()
                .filter(|(id, info)| predicate(id) && info.has_overrides())
                .map(|(id, info)| (id.clone(), info.clone()))
                .collect(),
        }
    }

    /// 用 `other` 中满足条件的条目替换自身对应条目
    pub fn overlay(&mut self, other: &PoseInfo, predicate: impl Fn(&BoneId) -> bool) {
        for (id, info) in other.bones.iter().filter(|(id, _)| predicate(id)) {
            self.bones.insert(id.clone(), info.clone());
        }
    }

    /// 删除没有叠加的空条目
    pub fn prune(&mut self) {
        self.bones.retain(|_, info| info.has_overrides());
    }

    pub fn stack_counts(&self) -> BTreeMap<BoneId, usize> {
        self.bones
            .iter()
            .filter(|(_, info)| info.has_stacks())
            .map(|(id, info)| (id.clone(), info.stacks().len()))
            .collect()
    }

    pub fn is_overridden(&self, predicate: impl Fn(&BoneId) -> bool) -> bool {
        self.bones
            .iter()
            .any(|(id, info)| predicate(id) && info.has_stacks())
    }

    pub fn has_ik_stacks(&self) -> bool {
        self.bones.values().any(BonePoseInfo::has_ik_stacks)
    }

    /// 把每个骨骼的叠加栈合并成一项
    pub fn collapse(&mut self) -> usize {
        self.bones
            .values_mut()
            .map(|info| info.collapse())
            .filter(|&collapsed| collapsed)
            .count()
    }
}
