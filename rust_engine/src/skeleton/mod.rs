//! 骨骼系统：变换原语、骨骼引用模型和 IK 求解器

mod bone;
mod ik_solver;
mod manager;

pub use bone::{Bone, BoneId, PoseSlot};
pub use ik_solver::{BoneIkInfo, IkDefaults, IkSolver, IkSolverOptions, JointLimit};
pub use manager::{Skeleton, SkeletonPose, FACE_BONE_PREFIX};

use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// 默认比较精度
pub const TRANSFORM_EPSILON: f32 = 1e-4;

bitflags! {
    /// 变换通道掩码
    #[derive(Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TransformComponents: u8 {
        const POSITION = 0b001;
        const ROTATION = 0b010;
        const SCALE = 0b100;
        const ALL = Self::POSITION.bits | Self::ROTATION.bits | Self::SCALE.bits;
    }
}

/// 骨骼变换（位置 / 旋转 / 缩放）
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            ..Self::IDENTITY
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn from_matrix(matrix: &Mat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            rotation: rotation.normalize(),
            scale,
        }
    }

    /// 层级组合：子骨骼的本地变换放入父骨骼空间
    pub fn compose(parent: &Transform, child: &Transform) -> Transform {
        Transform {
            position: parent.position + parent.rotation * (parent.scale * child.position),
            rotation: (parent.rotation * child.rotation).normalize(),
            scale: parent.scale * child.scale,
        }
    }

    /// 计算从 `old` 到 `new` 的增量，满足 `old.apply_delta(&delta) == new`
    pub fn difference(new: &Transform, old: &Transform) -> Transform {
        let ratio = |n: f32, o: f32| if o.abs() < f32::EPSILON { 1.0 } else { n / o };
        Transform {
            position: new.position - old.position,
            rotation: (old.rotation.inverse() * new.rotation).normalize(),
            scale: Vec3::new(
                ratio(new.scale.x, old.scale.x),
                ratio(new.scale.y, old.scale.y),
                ratio(new.scale.z, old.scale.z),
            ),
        }
    }

    /// 在当前变换上叠加一个增量
    pub fn apply_delta(&self, delta: &Transform) -> Transform {
        Transform {
            position: self.position + delta.position,
            rotation: (self.rotation * delta.rotation).normalize(),
            scale: self.scale * delta.scale,
        }
    }

    /// 未包含在掩码中的通道重置为单位值
    pub fn masked(&self, components: TransformComponents) -> Transform {
        Transform {
            position: if components.contains(TransformComponents::POSITION) {
                self.position
            } else {
                Vec3::ZERO
            },
            rotation: if components.contains(TransformComponents::ROTATION) {
                self.rotation
            } else {
                Quat::IDENTITY
            },
            scale: if components.contains(TransformComponents::SCALE) {
                self.scale
            } else {
                Vec3::ONE
            },
        }
    }

    /// 把模型空间变换换算成相对 `parent` 的本地变换
    pub fn relative_to(&self, parent: &Transform) -> Transform {
        let local = parent.to_matrix().inverse() * self.to_matrix();
        Transform::from_matrix(&local)
    }

    pub fn approximately_eq(&self, other: &Transform, epsilon: f32) -> bool {
        self.position.abs_diff_eq(other.position, epsilon)
            && self.scale.abs_diff_eq(other.scale, epsilon)
            // q 与 -q 表示同一旋转
            && 1.0 - self.rotation.dot(other.rotation).abs() <= epsilon
    }

    pub fn is_identity(&self) -> bool {
        self.approximately_eq(&Transform::IDENTITY, TRANSFORM_EPSILON)
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}
