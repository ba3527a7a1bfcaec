//! 姿势导入
//!
//! 导入不直接改写叠加表，而是登记为下一次骨架更新时执行的逐骨骼动作。

use super::bone_filter::{BoneFilter, WEAPON_CATEGORY};
use super::pose_file::PoseFile;
use crate::pose::{BonePoseInfo, PoseEdit};
use crate::skeleton::{Bone, Transform, TransformComponents};

const HEAD_CATEGORIES: [&str; 7] = ["head", "ears", "hair", "face", "eyes", "lips", "jaw"];

/// 导入选项
#[derive(Clone, Debug)]
pub struct PoseImporterOptions {
    pub filter: BoneFilter,
    pub components: TransformComponents,
    pub apply_model_transform: bool,
}

impl Default for PoseImporterOptions {
    /// 只导入旋转，不含武器和 ex 骨骼
    fn default() -> Self {
        let mut options = Self::new(TransformComponents::ROTATION);
        options.filter.disable_category(WEAPON_CATEGORY);
        options.filter.disable_category("ex");
        options
    }
}

impl PoseImporterOptions {
    pub fn new(components: TransformComponents) -> Self {
        Self {
            filter: BoneFilter::default(),
            components,
            apply_model_transform: false,
        }
    }

    /// 只导入身体：头部相关分类关闭
    pub fn body() -> Self {
        let mut options = Self::new(TransformComponents::ROTATION | TransformComponents::POSITION);
        options.filter.disable_category(WEAPON_CATEGORY);
        options.filter.disable_category("ex");
        for id in HEAD_CATEGORIES {
            options.filter.disable_category(id);
        }
        options
    }

    /// 只导入表情：仅头部相关分类
    pub fn expression() -> Self {
        let mut options = Self::new(TransformComponents::ALL);
        options.filter.disable_all();
        for id in HEAD_CATEGORIES {
            options.filter.enable_category(id);
        }
        options
    }

    /// 远端同步和场景导入：全部骨骼和通道
    pub fn ipc() -> Self {
        Self::new(TransformComponents::ALL)
    }

    pub fn scene(apply_model_transform: bool) -> Self {
        Self {
            apply_model_transform,
            ..Self::new(TransformComponents::ALL)
        }
    }
}

/// 一次待执行的导入
#[derive(Clone, Debug)]
pub struct PoseImporter {
    file: PoseFile,
    options: PoseImporterOptions,
}

impl PoseImporter {
    pub fn new(file: PoseFile, options: PoseImporterOptions) -> Self {
        Self { file, options }
    }

    pub fn options(&self) -> &PoseImporterOptions {
        &self.options
    }

    /// 需要叠加到模型变换上的差值
    pub fn model_difference(&self) -> Option<Transform> {
        self.file
            .model_difference
            .filter(|_| self.options.apply_model_transform)
    }

    /// 把文件中对应骨骼的变换写入叠加栈，返回叠加栈是否变化
    ///
    /// 基准是当前生效的本地变换，所以导入的结果就是文件中的值。
    /// 直接作用在单个骨骼上，不触发镜像。
    pub fn apply_bone(&self, bone: &Bone, info: &mut BonePoseInfo) -> bool {
        if !self
            .options
            .filter
            .is_bone_valid(bone.name(), bone.id.slot, bone.is_hidden, false)
        {
            return false;
        }
        let Some(target) = self
            .file
            .bones_for_slot(bone.id.slot)
            .and_then(|bones| bones.get(bone.name()))
        else {
            return false;
        };

        let reference = info.effective(&bone.last_raw_transform);
        let edit = PoseEdit::new(*target, Some(reference)).with_components(self.options.components);
        info.apply(&edit)
    }
}
