//! 骨骼引用模型

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Transform;

/// 姿势槽位：角色本体、武器、饰品、宠物等
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PoseSlot {
    Character = 0,
    MainHand = 1,
    OffHand = 2,
    Ornament = 3,
    Minion = 4,
    Unknown = 255,
}

impl PoseSlot {
    pub fn from_u8(value: u8) -> PoseSlot {
        match value {
            0 => PoseSlot::Character,
            1 => PoseSlot::MainHand,
            2 => PoseSlot::OffHand,
            3 => PoseSlot::Ornament,
            4 => PoseSlot::Minion,
            _ => PoseSlot::Unknown,
        }
    }

    pub fn is_weapon(&self) -> bool {
        matches!(self, PoseSlot::MainHand | PoseSlot::OffHand)
    }
}

/// 骨骼标识：名称 + 分部索引 + 槽位
///
/// 结构相等，作为序列化与撤销历史的键。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoneId {
    pub bone_name: String,
    pub partial_index: i32,
    pub slot: PoseSlot,
}

impl BoneId {
    pub fn new(bone_name: impl Into<String>, partial_index: i32, slot: PoseSlot) -> Self {
        Self {
            bone_name: bone_name.into(),
            partial_index,
            slot,
        }
    }

    /// 角色本体第 0 分部上的骨骼
    pub fn character(bone_name: impl Into<String>) -> Self {
        Self::new(bone_name, 0, PoseSlot::Character)
    }

    pub fn is_minion(&self) -> bool {
        self.slot == PoseSlot::Minion
    }

    /// 同槽位、同分部下换一个名称
    pub fn with_name(&self, bone_name: impl Into<String>) -> Self {
        Self::new(bone_name, self.partial_index, self.slot)
    }
}

impl fmt::Display for BoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}#{}", self.slot, self.bone_name, self.partial_index)
    }
}

/// 外部动画系统提供的骨骼视图
///
/// 由宿主拥有；引擎只读取它，并通过 `AnimationHost` 写回合成结果。
#[derive(Clone, Debug)]
pub struct Bone {
    pub index: usize,
    pub id: BoneId,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// 当前可见的本地变换（上一次写回之后）
    pub last_transform: Transform,
    /// 本帧动画系统产生的本地变换（叠加之前）
    pub last_raw_transform: Transform,
    pub is_hidden: bool,
    pub is_face_bone: bool,
    pub is_partial_root: bool,
    pub is_skeleton_root: bool,
}

impl Bone {
    pub fn name(&self) -> &str {
        &self.id.bone_name
    }

    pub fn partial_index(&self) -> i32 {
        self.id.partial_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bone_id_ordering_is_structural() {
        let a = BoneId::character("j_kao");
        let b = BoneId::new("j_kao", 1, PoseSlot::Character);
        let c = BoneId::new("j_kao", 0, PoseSlot::MainHand);
        assert!(a < b);
        assert!(a < c);
        assert_eq!(a, BoneId::character("j_kao"));
    }

    #[test]
    fn test_slot_from_u8() {
        assert_eq!(PoseSlot::from_u8(4), PoseSlot::Minion);
        assert_eq!(PoseSlot::from_u8(42), PoseSlot::Unknown);
        assert!(PoseSlot::OffHand.is_weapon());
    }
}
