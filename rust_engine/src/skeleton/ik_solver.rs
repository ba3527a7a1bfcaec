//! IK 描述与求解器
//!
//! 支持两种求解方式：
//! - CCD：沿父链向上若干级，逐关节对准目标，保留最好的一轮结果
//! - 双关节：余弦定理解析求解，肘部落在由旋转轴定义的平面上

use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::manager::{Skeleton, SkeletonPose};

/// 求解器参数
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum IkSolverOptions {
    Ccd {
        depth: u32,
        iterations: u32,
    },
    /// 关节字段是相对 IK 骨骼的祖先层级（0 为自身）
    TwoJoint {
        first_bone: u32,
        second_bone: u32,
        end_bone: u32,
        rotation_axis: Vec3,
    },
}

impl IkSolverOptions {
    pub const DEFAULT_CCD: IkSolverOptions = IkSolverOptions::Ccd {
        depth: 2,
        iterations: 8,
    };

    /// 线上格式使用的类型编号
    pub fn type_index(&self) -> u8 {
        match self {
            IkSolverOptions::Ccd { .. } => 0,
            IkSolverOptions::TwoJoint { .. } => 1,
        }
    }

    pub fn is_two_joint(&self) -> bool {
        matches!(self, IkSolverOptions::TwoJoint { .. })
    }
}

/// 骨骼 IK 描述
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneIkInfo {
    pub enabled: bool,
    pub enforce_constraints: bool,
    pub solver: IkSolverOptions,
}

impl Default for BoneIkInfo {
    fn default() -> Self {
        Self {
            enabled: false,
            enforce_constraints: false,
            solver: IkSolverOptions::DEFAULT_CCD,
        }
    }
}

impl BoneIkInfo {
    /// 界面上的切换顺序：关闭 -> CCD -> 双关节 -> 关闭
    pub fn next_mode(&self, bone_name: &str) -> BoneIkInfo {
        match (self.enabled, self.solver) {
            (false, _) => BoneIkInfo {
                enabled: true,
                solver: IkDefaults::ccd_for(bone_name),
                ..*self
            },
            (true, IkSolverOptions::Ccd { .. }) => BoneIkInfo {
                enabled: true,
                solver: IkDefaults::two_joint_for(bone_name),
                ..*self
            },
            (true, IkSolverOptions::TwoJoint { .. }) => BoneIkInfo {
                enabled: false,
                ..IkDefaults::for_bone_name(bone_name)
            },
        }
    }
}

/// 按骨骼名称推断默认 IK 参数
pub struct IkDefaults;

impl IkDefaults {
    const HANDS: [&'static str; 2] = ["j_te_l", "j_te_r"];
    const FEET: [&'static str; 2] = ["j_asi_d_l", "j_asi_d_r"];

    pub fn for_bone_name(bone_name: &str) -> BoneIkInfo {
        let solver = if Self::HANDS.contains(&bone_name) || Self::FEET.contains(&bone_name) {
            Self::two_joint_for(bone_name)
        } else {
            Self::ccd_for(bone_name)
        };
        BoneIkInfo {
            enabled: false,
            enforce_constraints: false,
            solver,
        }
    }

    pub fn ccd_for(bone_name: &str) -> IkSolverOptions {
        if bone_name.starts_with("j_sebo_") || bone_name == "j_kao" {
            IkSolverOptions::Ccd {
                depth: 3,
                iterations: 8,
            }
        } else {
            IkSolverOptions::DEFAULT_CCD
        }
    }

    pub fn two_joint_for(bone_name: &str) -> IkSolverOptions {
        if Self::FEET.contains(&bone_name) {
            // 大腿 j_asi_a -> 小腿 j_asi_c -> 脚 j_asi_d
            IkSolverOptions::TwoJoint {
                first_bone: 3,
                second_bone: 1,
                end_bone: 0,
                rotation_axis: Vec3::X,
            }
        } else {
            IkSolverOptions::TwoJoint {
                first_bone: 2,
                second_bone: 1,
                end_bone: 0,
                rotation_axis: Vec3::Z,
            }
        }
    }

    /// 按骨架实际可用的祖先数收缩链长，不可用时返回 None
    pub fn fit_to_skeleton(
        info: BoneIkInfo,
        skeleton: &Skeleton,
        index: usize,
    ) -> Option<BoneIkInfo> {
        if !skeleton.eligible_for_ik(index) {
            return None;
        }
        let available = skeleton.bones_to_depth(index, 8, true).len() as u32;
        if available == 0 {
            return None;
        }
        let solver = match info.solver {
            IkSolverOptions::Ccd { depth, iterations } => IkSolverOptions::Ccd {
                depth: depth.clamp(1, available),
                iterations: iterations.max(1),
            },
            IkSolverOptions::TwoJoint { first_bone, .. } if first_bone > available => {
                IkSolverOptions::Ccd {
                    depth: available,
                    iterations: 8,
                }
            }
            two_joint => two_joint,
        };
        Some(BoneIkInfo { solver, ..info })
    }
}

/// 关节角度限制（欧拉角，单位：度）
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    pub min: Vec3,
    pub max: Vec3,
}

impl JointLimit {
    pub fn clamp(&self, rotation: Quat) -> Quat {
        let (x, y, z) = rotation.to_euler(EulerRot::XYZ);
        Quat::from_euler(
            EulerRot::XYZ,
            x.to_degrees().clamp(self.min.x, self.max.x).to_radians(),
            y.to_degrees().clamp(self.min.y, self.max.y).to_radians(),
            z.to_degrees().clamp(self.min.z, self.max.z).to_radians(),
        )
    }
}

const REACH_TOLERANCE: f32 = 1e-4;

/// IK 求解器
#[derive(Clone, Debug)]
pub struct IkSolver {
    /// 末端效应器
    pub end: usize,
    /// 参与旋转的关节，离末端最近的在前
    pub chain: Vec<usize>,
    pub options: IkSolverOptions,
    pub enforce_constraints: bool,
    pub limits: HashMap<usize, JointLimit>,
}

impl IkSolver {
    pub fn new(end: usize, chain: Vec<usize>, options: IkSolverOptions) -> Self {
        Self {
            end,
            chain,
            options,
            enforce_constraints: false,
            limits: HashMap::new(),
        }
    }

    /// 从骨架解析关节链，链长为 0 时返回 None
    pub fn for_bone(skeleton: &Skeleton, index: usize, info: &BoneIkInfo) -> Option<Self> {
        let info = IkDefaults::fit_to_skeleton(*info, skeleton, index)?;
        let (end, chain) = match info.solver {
            IkSolverOptions::Ccd { depth, .. } => {
                (index, skeleton.bones_to_depth(index, depth as usize, true))
            }
            IkSolverOptions::TwoJoint {
                first_bone,
                second_bone,
                end_bone,
                ..
            } => {
                let end = skeleton.ancestor(index, end_bone as usize)?;
                let second = skeleton.ancestor(index, second_bone as usize)?;
                let first = skeleton.ancestor(index, first_bone as usize)?;
                if !skeleton.is_descendant_of(end, second) || !skeleton.is_descendant_of(second, first) {
                    return None;
                }
                (end, vec![second, first])
            }
        };
        if chain.is_empty() {
            return None;
        }
        let mut solver = Self::new(end, chain, info.solver);
        solver.enforce_constraints = info.enforce_constraints;
        Some(solver)
    }

    /// 求解，返回末端到目标的剩余距离
    pub fn solve(&self, pose: &mut SkeletonPose, target: Vec3) -> f32 {
        match self.options {
            IkSolverOptions::Ccd { iterations, .. } => self.solve_ccd(pose, target, iterations),
            IkSolverOptions::TwoJoint { rotation_axis, .. } => {
                self.solve_two_joint(pose, target, rotation_axis)
            }
        }
    }

    fn solve_ccd(&self, pose: &mut SkeletonPose, target: Vec3, iterations: u32) -> f32 {
        let mut best_dist = (pose.model(self.end).position - target).length();
        let mut saved: Vec<_> = self.chain.iter().map(|&i| pose.local(i)).collect();

        for _ in 0..iterations {
            if best_dist < REACH_TOLERANCE {
                break;
            }
            for &link in &self.chain {
                let link_pos = pose.model(link).position;
                let to_effector = (pose.model(self.end).position - link_pos).normalize_or_zero();
                let to_target = (target - link_pos).normalize_or_zero();
                if to_effector.length_squared() < 1e-6 || to_target.length_squared() < 1e-6 {
                    continue;
                }

                let angle = to_effector.dot(to_target).clamp(-1.0, 1.0).acos();
                if angle < 1e-3_f32.to_radians() {
                    continue;
                }

                pose.rotate_world(link, Quat::from_rotation_arc(to_effector, to_target));
                self.enforce(pose, link);
            }

            let dist = (pose.model(self.end).position - target).length();
            if dist < best_dist {
                best_dist = dist;
                for (slot, &link) in saved.iter_mut().zip(&self.chain) {
                    *slot = pose.local(link);
                }
            } else {
                // 恢复最佳结果
                for (local, &link) in saved.iter().zip(&self.chain) {
                    pose.set_local(link, *local);
                }
                break;
            }
        }
        best_dist
    }

    fn solve_two_joint(&self, pose: &mut SkeletonPose, target: Vec3, rotation_axis: Vec3) -> f32 {
        let (second, first) = match self.chain.as_slice() {
            [second, first, ..] => (*second, *first),
            _ => return (pose.model(self.end).position - target).length(),
        };

        let a = pose.model(first).position;
        let b = pose.model(second).position;
        let c = pose.model(self.end).position;
        let upper = (b - a).length();
        let lower = (c - b).length();
        let to_target = target - a;
        let dist = to_target.length();
        if upper < 1e-6 || lower < 1e-6 || dist < 1e-6 {
            return (c - target).length();
        }
        let dir = to_target / dist;

        let elbow_dir = if dist >= upper + lower {
            // 够不到：整条链伸直指向目标
            dir
        } else {
            let cos_a = ((upper * upper + dist * dist - lower * lower) / (2.0 * upper * dist))
                .clamp(-1.0, 1.0);
            let sin_a = (1.0 - cos_a * cos_a).max(0.0).sqrt();

            let normal = (pose.model(first).rotation * rotation_axis).normalize_or_zero();
            let mut side = normal.cross(dir);
            if side.length_squared() < 1e-8 {
                side = (b - a).cross(c - b).cross(dir);
            }
            if side.length_squared() < 1e-8 {
                side = dir.any_orthonormal_vector();
            }
            let mut side = side.normalize();
            // 肘部保持在原来的一侧
            if (b - a).dot(side) < 0.0 {
                side = -side;
            }
            (dir * cos_a + side * sin_a).normalize()
        };

        pose.rotate_world(first, Quat::from_rotation_arc((b - a) / upper, elbow_dir));
        self.enforce(pose, first);

        let b = pose.model(second).position;
        let c = pose.model(self.end).position;
        let from = (c - b).normalize_or_zero();
        let to = (target - b).normalize_or_zero();
        if from.length_squared() > 1e-6 && to.length_squared() > 1e-6 {
            pose.rotate_world(second, Quat::from_rotation_arc(from, to));
            self.enforce(pose, second);
        }

        (pose.model(self.end).position - target).length()
    }

    fn enforce(&self, pose: &mut SkeletonPose, link: usize) {
        if !self.enforce_constraints {
            return;
        }
        if let Some(limit) = self.limits.get(&link) {
            pose.clamp_local_rotation(link, limit);
        }
    }
}
