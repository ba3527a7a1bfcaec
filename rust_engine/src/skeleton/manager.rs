//! 骨架视图与求解用的姿势缓冲区

use glam::Quat;
use std::collections::HashMap;

use super::bone::{Bone, BoneId, PoseSlot};
use super::ik_solver::JointLimit;
use super::Transform;

/// 表情骨骼的根
pub const FACE_ROOT_BONE: &str = "j_f_face";
/// 下巴骨骼，在第 0 分部上不可编辑
const HIDDEN_JAW_BONE: &str = "j_ago";
/// 骨架上找不到骨骼时按名称前缀判断表情骨骼
pub const FACE_BONE_PREFIX: &str = "j_f_";

/// 单个槽位的骨架（宿主动画系统的只读视图）
#[derive(Clone, Debug)]
pub struct Skeleton {
    slot: PoseSlot,
    bones: Vec<Bone>,
    name_to_index: HashMap<(String, i32), usize>,
    sorted_indices: Vec<usize>,
}

impl Skeleton {
    pub fn new(slot: PoseSlot) -> Self {
        Self {
            slot,
            bones: Vec::new(),
            name_to_index: HashMap::new(),
            sorted_indices: Vec::new(),
        }
    }

    /// 添加骨骼，返回索引；添加完成后需调用 `build_hierarchy`
    pub fn add_bone(
        &mut self,
        name: &str,
        partial_index: i32,
        parent: Option<usize>,
        local: Transform,
    ) -> usize {
        let index = self.bones.len();
        let id = BoneId::new(name, partial_index, self.slot);
        self.name_to_index.insert((name.to_string(), partial_index), index);
        self.bones.push(Bone {
            index,
            id,
            parent: parent.filter(|&p| p < index),
            children: Vec::new(),
            last_transform: local,
            last_raw_transform: local,
            is_hidden: false,
            is_face_bone: false,
            is_partial_root: false,
            is_skeleton_root: false,
        });
        index
    }

    /// 建立子节点表、分类标记和父先子后的遍历顺序
    pub fn build_hierarchy(&mut self) {
        let count = self.bones.len();
        for bone in &mut self.bones {
            bone.children.clear();
        }
        for i in 0..count {
            if let Some(parent) = self.bones[i].parent {
                self.bones[parent].children.push(i);
            }
        }

        let mut depths = vec![0usize; count];
        for i in 0..count {
            // 父骨骼索引总是小于子骨骼
            if let Some(parent) = self.bones[i].parent {
                depths[i] = depths[parent] + 1;
            }

            let (partial_root, face) = match self.bones[i].parent {
                None => (true, false),
                Some(parent) => {
                    let p = &self.bones[parent];
                    (
                        p.partial_index() != self.bones[i].partial_index(),
                        p.is_face_bone,
                    )
                }
            };

            let bone = &mut self.bones[i];
            bone.is_partial_root = partial_root;
            bone.is_skeleton_root = bone.parent.is_none() && bone.partial_index() == 0;
            bone.is_face_bone = face || bone.name() == FACE_ROOT_BONE;
            bone.is_hidden = (bone.is_partial_root && !bone.is_skeleton_root)
                || (bone.name() == HIDDEN_JAW_BONE && bone.partial_index() == 0);
        }

        self.sorted_indices = (0..count).collect();
        self.sorted_indices.sort_by_key(|&i| depths[i]);
    }

    pub fn slot(&self) -> PoseSlot {
        self.slot
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn get_bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    /// 按骨骼标识查找（槽位必须一致）
    pub fn find_bone(&self, id: &BoneId) -> Option<&Bone> {
        if id.slot != self.slot {
            return None;
        }
        self.name_to_index
            .get(&(id.bone_name.clone(), id.partial_index))
            .and_then(|&i| self.bones.get(i))
    }

    /// 按名称查找，取分部索引最小的那一个
    pub fn find_bone_by_name(&self, name: &str) -> Option<&Bone> {
        self.bones
            .iter()
            .filter(|b| b.name() == name)
            .min_by_key(|b| b.partial_index())
    }

    /// 父先子后的遍历顺序
    pub fn sorted_indices(&self) -> &[usize] {
        &self.sorted_indices
    }

    /// 父骨骼存在且可见时才允许启用 IK
    pub fn eligible_for_ik(&self, index: usize) -> bool {
        self.bones
            .get(index)
            .and_then(|b| b.parent)
            .and_then(|p| self.bones.get(p))
            .map(|p| !p.is_hidden)
            .unwrap_or(false)
    }

    /// 沿父链向上取最多 `depth` 个祖先，遇到分部边界停止
    pub fn bones_to_depth(&self, index: usize, depth: usize, stop_at_hidden: bool) -> Vec<usize> {
        let mut result = Vec::new();
        let Some(mut current) = self.bones.get(index) else {
            return result;
        };
        while result.len() < depth {
            let Some(parent) = current.parent.and_then(|p| self.bones.get(p)) else {
                break;
            };
            if parent.partial_index() != current.partial_index() {
                break;
            }
            if stop_at_hidden && parent.is_hidden {
                break;
            }
            result.push(parent.index);
            current = parent;
        }
        result
    }

    /// 第 `depth` 级可见祖先（0 为自身）
    pub fn ancestor(&self, index: usize, depth: usize) -> Option<usize> {
        if depth == 0 {
            return self.bones.get(index).map(|b| b.index);
        }
        let chain = self.bones_to_depth(index, depth, true);
        if chain.len() == depth {
            chain.last().copied()
        } else {
            None
        }
    }

    pub fn is_descendant_of(&self, index: usize, ancestor: usize) -> bool {
        let mut current = self.bones.get(index).and_then(|b| b.parent);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.bones.get(p).and_then(|b| b.parent);
        }
        false
    }

    /// 动画系统本帧的输出
    pub fn set_raw_transform(&mut self, index: usize, local: Transform) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.last_raw_transform = local;
        }
    }

    /// 写回后的可见变换
    pub fn set_visible_transform(&mut self, index: usize, local: Transform) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.last_transform = local;
        }
    }

    /// 骨骼是否属于表情分区
    pub fn is_face(&self, id: &BoneId) -> bool {
        self.find_bone(id)
            .map(|bone| bone.is_face_bone)
            .unwrap_or_else(|| id.bone_name.starts_with(FACE_BONE_PREFIX))
    }

    pub fn raw_locals(&self) -> Vec<Transform> {
        self.bones.iter().map(|b| b.last_raw_transform).collect()
    }

    pub fn parents(&self) -> Vec<Option<usize>> {
        self.bones.iter().map(|b| b.parent).collect()
    }
}

/// 求解用的姿势缓冲区：本地变换为准，模型空间变换按需刷新
#[derive(Clone, Debug)]
pub struct SkeletonPose {
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    base_locals: Vec<Transform>,
    locals: Vec<Transform>,
    models: Vec<Transform>,
}

impl SkeletonPose {
    /// `parents[i]` 必须小于 `i`
    pub fn new(parents: Vec<Option<usize>>, locals: Vec<Transform>) -> Self {
        let count = locals.len();
        let parents: Vec<Option<usize>> = (0..count)
            .map(|i| parents.get(i).copied().flatten().filter(|&p| p < i))
            .collect();
        let mut children = vec![Vec::new(); count];
        for (i, parent) in parents.iter().enumerate() {
            if let Some(p) = parent {
                children[*p].push(i);
            }
        }

        let mut pose = Self {
            parents,
            children,
            base_locals: locals.clone(),
            locals,
            models: vec![Transform::IDENTITY; count],
        };
        pose.update_all();
        pose
    }

    pub fn from_skeleton(skeleton: &Skeleton, locals: Vec<Transform>) -> Self {
        Self::new(skeleton.parents(), locals)
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.parents.get(index).copied().flatten()
    }

    pub fn local(&self, index: usize) -> Transform {
        self.locals.get(index).copied().unwrap_or_default()
    }

    pub fn model(&self, index: usize) -> Transform {
        self.models.get(index).copied().unwrap_or_default()
    }

    pub fn locals(&self) -> &[Transform] {
        &self.locals
    }

    pub fn models(&self) -> &[Transform] {
        &self.models
    }

    pub fn set_local(&mut self, index: usize, local: Transform) {
        if index >= self.locals.len() {
            return;
        }
        self.locals[index] = local;
        self.update_subtree(index);
    }

    /// 在模型空间中对骨骼施加旋转增量，子树跟随
    pub fn rotate_world(&mut self, index: usize, delta: Quat) {
        if index >= self.locals.len() {
            return;
        }
        let parent_rotation = self
            .parent(index)
            .map(|p| self.models[p].rotation)
            .unwrap_or(Quat::IDENTITY);
        let model_rotation = self.models[index].rotation;
        self.locals[index].rotation =
            (parent_rotation.inverse() * delta * model_rotation).normalize();
        self.update_subtree(index);
    }

    /// 相对求解前的本地旋转做欧拉角限制
    pub fn clamp_local_rotation(&mut self, index: usize, limit: &JointLimit) {
        if index >= self.locals.len() {
            return;
        }
        let base = self.base_locals[index].rotation;
        let delta = base.inverse() * self.locals[index].rotation;
        let clamped = limit.clamp(delta);
        self.locals[index].rotation = (base * clamped).normalize();
        self.update_subtree(index);
    }

    /// 递归刷新子树的模型空间变换
    pub fn update_subtree(&mut self, index: usize) {
        let parent_model = self.parent(index).map(|p| self.models[p]);
        self.models[index] = match parent_model {
            Some(parent) => Transform::compose(&parent, &self.locals[index]),
            None => self.locals[index],
        };
        let children = self.children[index].clone();
        for child in children {
            self.update_subtree(child);
        }
    }

    fn update_all(&mut self) {
        for i in 0..self.locals.len() {
            self.models[i] = match self.parent(i) {
                Some(p) => Transform::compose(&self.models[p], &self.locals[i]),
                None => self.locals[i],
            };
        }
    }

    /// 与求解前相比发生变化的本地变换
    pub fn changed_locals(&self, epsilon: f32) -> Vec<(usize, Transform)> {
        self.locals
            .iter()
            .zip(&self.base_locals)
            .enumerate()
            .filter(|(_, (now, before))| !now.approximately_eq(before, epsilon))
            .map(|(i, (now, _))| (i, *now))
            .collect()
    }
}
