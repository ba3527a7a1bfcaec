//! 单骨骼的叠加栈

use serde::{Deserialize, Serialize};

use crate::skeleton::{BoneId, BoneIkInfo, IkDefaults, Transform, TransformComponents};

/// 镜像模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MirrorMode {
    #[default]
    None,
    /// 对侧骨骼收到相同的增量
    Copy,
    /// 对侧骨骼收到翻转后的增量
    Mirror,
}

/// 叠加栈中的一项：一段独立的编辑
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseStackEntry {
    /// 增量（只在 `components` 中的通道非单位）
    pub transform: Transform,
    /// 子骨骼继承的通道
    pub propagate: TransformComponents,
    pub components: TransformComponents,
    pub ik: BoneIkInfo,
}

impl PoseStackEntry {
    pub fn is_identity(&self) -> bool {
        self.transform.is_identity()
    }

    /// 非单位变换，或者带有启用的 IK（单位变换的 IK 项固定肢体位置）
    pub fn is_effective(&self) -> bool {
        !self.is_identity() || self.ik.enabled
    }
}

/// 一次编辑请求
#[derive(Clone, Copy, Debug)]
pub struct PoseEdit {
    pub target: Transform,
    /// 计算增量的基准，缺省为单位变换
    pub reference: Option<Transform>,
    pub propagate: TransformComponents,
    pub components: TransformComponents,
    pub ik: Option<BoneIkInfo>,
    pub mirror_mode: Option<MirrorMode>,
    /// 镜像产生的另一半编辑，不再继续镜像
    pub is_flip: bool,
    pub force_new_stack: bool,
}

impl PoseEdit {
    pub fn new(target: Transform, reference: Option<Transform>) -> Self {
        Self {
            target,
            reference,
            propagate: TransformComponents::ALL,
            components: TransformComponents::ALL,
            ik: None,
            mirror_mode: None,
            is_flip: false,
            force_new_stack: false,
        }
    }

    pub fn with_components(mut self, components: TransformComponents) -> Self {
        self.components = components;
        self
    }

    pub fn with_propagate(mut self, propagate: TransformComponents) -> Self {
        self.propagate = propagate;
        self
    }

    pub fn with_ik(mut self, ik: BoneIkInfo) -> Self {
        self.ik = Some(ik);
        self
    }

    pub fn with_mirror_mode(mut self, mode: MirrorMode) -> Self {
        self.mirror_mode = Some(mode);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force_new_stack = true;
        self
    }
}

/// 叠加到骨骼本地变换上的结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComposedBone {
    /// 直接写回的本地变换（IK 项的位移除外）
    pub local: Transform,
    /// 子骨骼继承的本地变换
    pub propagated: Transform,
    /// IK 目标（含 IK 项位移的本地变换）和生效的 IK 参数
    pub ik: Option<(Transform, BoneIkInfo)>,
}

/// 单个骨骼的叠加信息
#[derive(Clone, Debug, PartialEq)]
pub struct BonePoseInfo {
    id: BoneId,
    stacks: Vec<PoseStackEntry>,
    pub mirror_mode: MirrorMode,
    pub default_ik: BoneIkInfo,
}

impl BonePoseInfo {
    pub fn new(id: BoneId) -> Self {
        let default_ik = IkDefaults::for_bone_name(&id.bone_name);
        Self {
            id,
            stacks: Vec::new(),
            mirror_mode: MirrorMode::None,
            default_ik,
        }
    }

    pub fn id(&self) -> &BoneId {
        &self.id
    }

    pub fn stacks(&self) -> &[PoseStackEntry] {
        &self.stacks
    }

    /// 应用一次编辑，返回叠加栈是否变化
    ///
    /// 最后一项的通道、继承掩码和 IK 参数都一致时原地合并，否则压入新项。
    /// 同一组 (target, reference) 重复应用不会产生新的项。
    /// 只切换 IK 模式的单位编辑改写已有的 IK 项。
    pub fn apply(&mut self, edit: &PoseEdit) -> bool {
        let mut changed = false;
        if let Some(mode) = edit.mirror_mode {
            changed |= self.mirror_mode != mode;
            self.mirror_mode = mode;
        }

        let reference = edit.reference.unwrap_or(Transform::IDENTITY);
        let delta = Transform::difference(&edit.target, &reference).masked(edit.components);
        if !delta.is_finite() {
            log::warn!("忽略非法变换: {}", self.id);
            return false;
        }

        if let Some(ik) = edit.ik {
            let previous = self.default_ik;
            self.default_ik = ik;
            if delta.is_identity() && !edit.force_new_stack {
                return self.retarget_ik(edit) || changed || previous != ik;
            }
        }

        let ik = self.default_ik;
        if !edit.force_new_stack {
            if let Some(last) = self.stacks.last_mut() {
                if last.components == edit.components
                    && last.propagate == edit.propagate
                    && last.ik == ik
                {
                    if delta.is_identity() {
                        return false;
                    }
                    last.transform = last.transform.apply_delta(&delta);
                    return true;
                }
            }
        }

        if delta.is_identity() && !ik.enabled {
            return changed;
        }
        self.stacks.push(PoseStackEntry {
            transform: delta,
            propagate: edit.propagate,
            components: edit.components,
            ik,
        });
        true
    }

    /// 只切换 IK 模式：改写已有的 IK 项，不压入新项
    ///
    /// 关闭 IK 时 IK 项的位移（IK 目标）一并丢弃，之后为单位变换的项被删除。
    fn retarget_ik(&mut self, edit: &PoseEdit) -> bool {
        let ik = self.default_ik;
        let mut changed = false;
        for entry in self.stacks.iter_mut().filter(|s| s.ik.enabled) {
            if !ik.enabled {
                entry.transform = entry
                    .transform
                    .masked(TransformComponents::ROTATION | TransformComponents::SCALE);
            }
            changed |= entry.ik != ik;
            entry.ik = ik;
        }

        if ik.enabled {
            if !self.has_ik_stacks() {
                self.stacks.push(PoseStackEntry {
                    transform: Transform::IDENTITY,
                    propagate: edit.propagate,
                    components: edit.components,
                    ik,
                });
                changed = true;
            }
        } else {
            let before = self.stacks.len();
            self.stacks.retain(PoseStackEntry::is_effective);
            changed |= self.stacks.len() != before;
        }
        changed
    }

    /// 原样压入一项（反序列化时使用）
    pub fn push(&mut self, entry: PoseStackEntry) {
        self.stacks.push(entry);
    }

    pub fn clear(&mut self) {
        self.stacks.clear();
    }

    pub fn has_stacks(&self) -> bool {
        self.stacks.iter().any(PoseStackEntry::is_effective)
    }

    pub fn has_ik_stacks(&self) -> bool {
        self.stacks.iter().any(|s| s.ik.enabled)
    }

    /// 有叠加，或者 IK / 镜像设置偏离默认值
    pub fn has_overrides(&self) -> bool {
        self.has_stacks()
            || self.mirror_mode != MirrorMode::None
            || self.default_ik != IkDefaults::for_bone_name(&self.id.bone_name)
    }

    /// 从左到右把叠加栈作用到 `base` 上
    pub fn effective(&self, base: &Transform) -> Transform {
        self.stacks
            .iter()
            .fold(*base, |acc, entry| acc.apply_delta(&entry.transform))
    }

    pub fn compose(&self, base: &Transform) -> ComposedBone {
        let mut local = *base;
        let mut propagated = *base;
        let mut ik_local = *base;
        let mut ik = None;

        for entry in &self.stacks {
            let direct = if entry.ik.enabled {
                ik = Some(entry.ik);
                entry.transform.masked(TransformComponents::ROTATION | TransformComponents::SCALE)
            } else {
                entry.transform
            };
            local = local.apply_delta(&direct);
            propagated = propagated.apply_delta(&direct.masked(entry.propagate));
            ik_local = ik_local.apply_delta(&entry.transform);
        }

        ComposedBone {
            local,
            propagated,
            ik: ik.map(|info| (ik_local, info)),
        }
    }

    /// 把叠加栈合并成一项；各项继承掩码或 IK 不一致时不合并
    pub fn collapse(&mut self) -> bool {
        let Some(first) = self.stacks.first().copied() else {
            return false;
        };
        if self.stacks.len() < 2
            || self
                .stacks
                .iter()
                .any(|s| s.propagate != first.propagate || s.ik != first.ik)
        {
            return false;
        }
        let components = self
            .stacks
            .iter()
            .fold(TransformComponents::empty(), |acc, s| acc | s.components);
        let transform = self.effective(&Transform::IDENTITY);
        self.stacks = vec![PoseStackEntry {
            transform,
            propagate: first.propagate,
            components,
            ik: first.ik,
        }];
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn rotated(degrees: f32) -> Transform {
        Transform::from_rotation(Quat::from_rotation_x(degrees.to_radians()))
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut bone = BonePoseInfo::new(BoneId::character("j_kubi"));
        let target = rotated(20.0);
        let reference = rotated(5.0);
        let edit = PoseEdit::new(target, Some(reference));

        assert!(bone.apply(&edit));
        let after_first = bone.clone();
        let edit_again = PoseEdit::new(target, Some(target));
        assert!(!bone.apply(&edit_again));
        assert!(!bone.apply(&edit_again));
        assert_eq!(bone, after_first);
    }

    #[test]
    fn test_same_components_merge_in_place() {
        let mut bone = BonePoseInfo::new(BoneId::character("j_kubi"));
        bone.apply(&PoseEdit::new(rotated(10.0), None));
        bone.apply(&PoseEdit::new(rotated(20.0), Some(rotated(10.0))));
        assert_eq!(bone.stacks().len(), 1);
        assert!(bone
            .effective(&Transform::IDENTITY)
            .approximately_eq(&rotated(20.0), 1e-5));

        bone.apply(
            &PoseEdit::new(Transform::from_position(Vec3::Y), None)
                .with_components(TransformComponents::POSITION),
        );
        assert_eq!(bone.stacks().len(), 2);
    }

    #[test]
    fn test_forced_edit_pushes_new_entry() {
        let mut bone = BonePoseInfo::new(BoneId::character("j_kubi"));
        bone.apply(&PoseEdit::new(rotated(10.0), None));
        bone.apply(&PoseEdit::new(rotated(20.0), Some(rotated(10.0))).forced());
        assert_eq!(bone.stacks().len(), 2);
        assert!(bone.collapse());
        assert_eq!(bone.stacks().len(), 1);
        assert!(bone
            .effective(&Transform::IDENTITY)
            .approximately_eq(&rotated(20.0), 1e-5));
    }

    #[test]
    fn test_masked_channels_are_dropped() {
        let mut bone = BonePoseInfo::new(BoneId::character("j_kubi"));
        let target = Transform::new(Vec3::Y, Quat::from_rotation_z(0.5), Vec3::ONE);
        bone.apply(&PoseEdit::new(target, None).with_components(TransformComponents::ROTATION));
        let effective = bone.effective(&Transform::IDENTITY);
        assert_eq!(effective.position, Vec3::ZERO);
    }

    #[test]
    fn test_compose_routes_ik_position_to_target() {
        let mut bone = BonePoseInfo::new(BoneId::character("j_te_l"));
        let mut ik = bone.default_ik;
        ik.enabled = true;
        bone.apply(&PoseEdit::new(Transform::from_position(Vec3::Y), None).with_ik(ik));

        let composed = bone.compose(&Transform::IDENTITY);
        assert_eq!(composed.local.position, Vec3::ZERO);
        let (target, info) = composed.ik.unwrap();
        assert_eq!(target.position, Vec3::Y);
        assert!(info.enabled);
        assert!(bone.has_ik_stacks());
    }

    #[test]
    fn test_non_propagated_channels() {
        let mut bone = BonePoseInfo::new(BoneId::character("j_kosi"));
        bone.apply(
            &PoseEdit::new(rotated(45.0), None).with_propagate(TransformComponents::POSITION),
        );
        let composed = bone.compose(&Transform::IDENTITY);
        assert!(composed.propagated.is_identity());
        assert!(!composed.local.is_identity());
    }

    #[test]
    fn test_ik_mode_cycle_retargets_single_entry() {
        let mut bone = BonePoseInfo::new(BoneId::character("j_te_l"));
        let toggle = |bone: &mut BonePoseInfo| {
            let next = bone.default_ik.next_mode("j_te_l");
            bone.apply(&PoseEdit::new(Transform::IDENTITY, None).with_ik(next))
        };

        assert!(toggle(&mut bone));
        assert_eq!(bone.stacks().len(), 1);
        assert!(toggle(&mut bone));
        assert_eq!(bone.stacks().len(), 1);
        assert!(bone.stacks()[0].ik.enabled && bone.stacks()[0].ik.solver.is_two_joint());

        assert!(toggle(&mut bone));
        assert!(bone.stacks().is_empty());
        assert!(!bone.has_ik_stacks());
        assert!(!bone.has_overrides());
        assert_eq!(bone.compose(&Transform::IDENTITY).ik, None);
    }

    #[test]
    fn test_disabling_ik_keeps_rotation_and_drops_target() {
        let mut bone = BonePoseInfo::new(BoneId::character("j_te_l"));
        let mut ik = bone.default_ik;
        ik.enabled = true;
        let target = Transform::new(Vec3::Y, Quat::from_rotation_z(0.4), Vec3::ONE);
        bone.apply(&PoseEdit::new(target, None).with_ik(ik));

        let off = bone.default_ik.next_mode("j_te_l");
        assert!(bone.apply(&PoseEdit::new(Transform::IDENTITY, None).with_ik(off)));
        assert!(!bone.has_ik_stacks());
        let effective = bone.effective(&Transform::IDENTITY);
        assert_eq!(effective.position, Vec3::ZERO);
        assert!(effective.rotation.dot(Quat::from_rotation_z(0.4)).abs() > 0.9999);
    }
}
