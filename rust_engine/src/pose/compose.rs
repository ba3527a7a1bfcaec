//! 每帧的姿势合成
//!
//! 1. 每个骨骼的叠加栈作用到动画系统的原始本地变换上
//! 2. 继承掩码之外的通道不传给子骨骼（在子骨骼的本地变换里抵消）
//! 3. 按父先子后的顺序求解 IK

use super::pose_info::PoseInfo;
use crate::skeleton::{IkSolver, JointLimit, Skeleton, SkeletonPose, Transform, TRANSFORM_EPSILON};

/// 合成骨架的最终本地变换
///
/// `joint_limit` 按骨骼名查询 IK 约束使用的关节限制。
pub fn compose_skeleton(
    skeleton: &Skeleton,
    pose: &PoseInfo,
    joint_limit: impl Fn(&str) -> Option<JointLimit>,
) -> Vec<Transform> {
    let bones = skeleton.bones();
    let count = bones.len();

    let mut locals = vec![Transform::IDENTITY; count];
    let mut models = vec![Transform::IDENTITY; count];
    // 子骨骼看到的父骨骼模型变换
    let mut inherited = vec![Transform::IDENTITY; count];
    let mut diverged = vec![false; count];
    let mut ik_targets = Vec::new();

    for &i in skeleton.sorted_indices() {
        let bone = &bones[i];
        let raw = bone.last_raw_transform;
        let (local, propagated, ik) = match pose.get(&bone.id) {
            Some(info) if info.has_stacks() => {
                let composed = info.compose(&raw);
                (composed.local, composed.propagated, composed.ik)
            }
            _ => (raw, raw, None),
        };

        match bone.parent {
            Some(parent) => {
                models[i] = Transform::compose(&inherited[parent], &local);
                inherited[i] = Transform::compose(&inherited[parent], &propagated);
                locals[i] = if diverged[parent] {
                    models[i].relative_to(&models[parent])
                } else {
                    local
                };
                diverged[i] = diverged[parent] || !propagated.approximately_eq(&local, TRANSFORM_EPSILON);
            }
            None => {
                models[i] = local;
                inherited[i] = propagated;
                locals[i] = local;
                diverged[i] = !propagated.approximately_eq(&local, TRANSFORM_EPSILON);
            }
        }

        if let Some((ik_local, info)) = ik {
            if info.enabled {
                let parent_model = bone.parent.map(|p| inherited[p]).unwrap_or(Transform::IDENTITY);
                let target = Transform::compose(&parent_model, &ik_local).position;
                ik_targets.push((i, info, target));
            }
        }
    }

    if ik_targets.is_empty() {
        return locals;
    }

    let mut solve_pose = SkeletonPose::from_skeleton(skeleton, locals);
    for (index, info, target) in ik_targets {
        let Some(mut solver) = IkSolver::for_bone(skeleton, index, &info) else {
            log::debug!("骨骼 {} 不能使用 IK", bones[index].id);
            continue;
        };
        if solver.enforce_constraints {
            for &joint in &solver.chain {
                if let Some(limit) = joint_limit(bones[joint].name()) {
                    solver.limits.insert(joint, limit);
                }
            }
        }
        solver.solve(&mut solve_pose, target);
    }
    solve_pose.locals().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{MirrorTable, PoseEdit};
    use crate::skeleton::{BoneId, BoneIkInfo, IkSolverOptions, PoseSlot, TransformComponents};
    use glam::{Quat, Vec3};

    fn chain() -> Skeleton {
        let mut skeleton = Skeleton::new(PoseSlot::Character);
        let root = skeleton.add_bone("n_root", 0, None, Transform::IDENTITY);
        let upper = skeleton.add_bone("j_ude_a_l", 0, Some(root), Transform::IDENTITY);
        let lower = skeleton.add_bone("j_ude_b_l", 0, Some(upper), Transform::from_position(Vec3::X));
        skeleton.add_bone("j_te_l", 0, Some(lower), Transform::from_position(Vec3::X));
        skeleton.build_hierarchy();
        skeleton
    }

    fn edit(pose: &mut PoseInfo, name: &str, edit: PoseEdit) {
        pose.apply(&BoneId::character(name), &edit, &MirrorTable::default(), |_| true);
    }

    #[test]
    fn test_no_overrides_returns_raw() {
        let skeleton = chain();
        let locals = compose_skeleton(&skeleton, &PoseInfo::new(), |_| None);
        assert_eq!(locals, skeleton.raw_locals());
    }

    #[test]
    fn test_rotation_is_inherited() {
        let skeleton = chain();
        let mut pose = PoseInfo::new();
        let rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        edit(&mut pose, "j_ude_a_l", PoseEdit::new(Transform::from_rotation(rotation), None));

        let locals = compose_skeleton(&skeleton, &pose, |_| None);
        let solve = SkeletonPose::from_skeleton(&skeleton, locals);
        let hand = solve.model(3).position;
        assert!((hand - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_unpropagated_rotation_is_compensated() {
        let skeleton = chain();
        let mut pose = PoseInfo::new();
        let rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        edit(
            &mut pose,
            "j_ude_a_l",
            PoseEdit::new(Transform::from_rotation(rotation), None)
                .with_propagate(TransformComponents::POSITION | TransformComponents::SCALE),
        );

        let locals = compose_skeleton(&skeleton, &pose, |_| None);
        let solve = SkeletonPose::from_skeleton(&skeleton, locals);
        // 上臂转了，但子骨骼留在原处
        assert!(solve.model(1).rotation.dot(rotation).abs() > 0.9999);
        assert!((solve.model(3).position - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_ik_entry_moves_end_effector() {
        let skeleton = chain();
        let mut pose = PoseInfo::new();
        let ik = BoneIkInfo {
            enabled: true,
            enforce_constraints: false,
            solver: IkSolverOptions::TwoJoint {
                first_bone: 2,
                second_bone: 1,
                end_bone: 0,
                rotation_axis: Vec3::Z,
            },
        };
        // 目标：手从 (2, 0, 0) 移到 (1, 1, 0)
        let raw = skeleton.find_bone_by_name("j_te_l").unwrap().last_raw_transform;
        let target = Transform::from_position(raw.position + Vec3::new(-1.0, 1.0, 0.0));
        edit(&mut pose, "j_te_l", PoseEdit::new(target, Some(raw)).with_ik(ik));

        let locals = compose_skeleton(&skeleton, &pose, |_| None);
        let solve = SkeletonPose::from_skeleton(&skeleton, locals);
        assert!((solve.model(3).position - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-3);
    }
}
