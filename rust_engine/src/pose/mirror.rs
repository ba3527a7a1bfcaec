//! 左右镜像：骨骼名称对照表和翻转公式

use glam::{EulerRot, Quat};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::skeleton::{BoneId, Transform};

/// 名称中左右标记所在的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffixPosition {
    Prefix,
    Suffix,
}

/// 一条左右对照规则
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRule {
    pub left: String,
    pub right: String,
    pub position: AffixPosition,
}

impl MirrorRule {
    fn new(left: &str, right: &str, position: AffixPosition) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
            position,
        }
    }

    fn swap(&self, name: &str) -> Option<String> {
        let pairs = [(&self.left, &self.right), (&self.right, &self.left)];
        for (from, to) in pairs {
            match self.position {
                AffixPosition::Suffix => {
                    if let Some(stem) = name.strip_suffix(from.as_str()) {
                        return Some(format!("{stem}{to}"));
                    }
                }
                AffixPosition::Prefix => {
                    if let Some(stem) = name.strip_prefix(from.as_str()) {
                        return Some(format!("{to}{stem}"));
                    }
                }
            }
        }
        None
    }
}

static DEFAULT_MIRROR_RULES: Lazy<Vec<MirrorRule>> = Lazy::new(|| {
    vec![
        MirrorRule::new("_l", "_r", AffixPosition::Suffix),
        MirrorRule::new("_L", "_R", AffixPosition::Suffix),
        MirrorRule::new(".L", ".R", AffixPosition::Suffix),
        // MMD 骨骼名
        MirrorRule::new("左", "右", AffixPosition::Prefix),
    ]
});

/// 镜像骨骼对照表（配置数据）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorTable {
    pub rules: Vec<MirrorRule>,
}

impl Default for MirrorTable {
    fn default() -> Self {
        Self {
            rules: DEFAULT_MIRROR_RULES.clone(),
        }
    }
}

impl MirrorTable {
    /// 第一条命中的规则生效
    pub fn mirror_name(&self, name: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.swap(name))
    }

    pub fn mirror_id(&self, id: &BoneId) -> Option<BoneId> {
        self.mirror_name(&id.bone_name).map(|name| id.with_name(name))
    }
}

/// 翻转旋转：XYZ 欧拉角 x' = 180 - x，y' = -y，z 不变
pub fn flip_rotation(rotation: Quat) -> Quat {
    let (x, y, z) = rotation.to_euler(EulerRot::XYZ);
    let x = 180.0 - x.to_degrees();
    let y = -y.to_degrees();
    Quat::from_euler(EulerRot::XYZ, x.to_radians(), y.to_radians(), z).normalize()
}

/// 翻转变换：旋转按公式翻转，位置取反镜像面法向分量
pub fn flip_transform(transform: &Transform) -> Transform {
    let mut position = transform.position;
    position.x = -position.x;
    Transform {
        position,
        rotation: flip_rotation(transform.rotation),
        scale: transform.scale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::PoseSlot;

    #[test]
    fn test_mirror_names() {
        let table = MirrorTable::default();
        assert_eq!(table.mirror_name("j_ude_a_l").as_deref(), Some("j_ude_a_r"));
        assert_eq!(table.mirror_name("j_ude_a_r").as_deref(), Some("j_ude_a_l"));
        assert_eq!(table.mirror_name("左腕").as_deref(), Some("右腕"));
        assert_eq!(table.mirror_name("j_kosi"), None);

        let id = BoneId::new("j_te_l", 2, PoseSlot::Character);
        let mirrored = table.mirror_id(&id).unwrap();
        assert_eq!(mirrored.partial_index, 2);
        assert_eq!(mirrored.bone_name, "j_te_r");
    }

    #[test]
    fn test_flip_is_an_involution() {
        let rotation = Quat::from_euler(EulerRot::XYZ, 0.3, -0.4, 0.9);
        let twice = flip_rotation(flip_rotation(rotation));
        assert!(1.0 - twice.dot(rotation).abs() < 1e-5);
    }

    #[test]
    fn test_flip_pitch() {
        let flipped = flip_rotation(Quat::from_rotation_x(30_f32.to_radians()));
        let expected = Quat::from_rotation_x(150_f32.to_radians());
        assert!(1.0 - flipped.dot(expected).abs() < 1e-5);
    }
}
