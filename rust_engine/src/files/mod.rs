//! 姿势文档
//!
//! 四种格式在进入引擎之前统一归一化：
//! - 标准姿势文件（按槽位保存本地变换）
//! - 旧版 CMTool 文件（只有旋转字符串，升级为标准文件）
//! - VPD 文件（Shift-JIS 文本）
//! - 实时姿势文件（完整的同步数据）

mod bone_filter;
mod importer;
mod pose_file;
mod vpd_file;

pub use bone_filter::{
    BoneCategory, BoneCategoryType, BoneFilter, DEFAULT_BONE_CATEGORIES, ORNAMENT_CATEGORY,
    OTHER_CATEGORY, WEAPON_CATEGORY,
};
pub use importer::{PoseImporter, PoseImporterOptions};
pub use pose_file::{CmToolPoseFile, PoseFile};
pub use vpd_file::{VpdBone, VpdFile};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::ipc::CharacterPoseData;
use crate::{PoseError, Result};

pub const LIVE_POSE_TYPE_NAME: &str = "Live Pose";
pub const LIVE_POSE_FILE_VERSION: u32 = 1;

/// 实时姿势文件：完整的同步数据
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LivePoseFile {
    pub type_name: String,
    pub version: u32,
    pub data: CharacterPoseData,
}

impl LivePoseFile {
    pub fn new(data: CharacterPoseData) -> Self {
        Self {
            type_name: LIVE_POSE_TYPE_NAME.to_string(),
            version: LIVE_POSE_FILE_VERSION,
            data,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// 任意一种姿势文档
#[derive(Clone, Debug, PartialEq)]
pub enum PoseDocument {
    Standard(PoseFile),
    CmTool(CmToolPoseFile),
    Vpd(VpdFile),
    LivePose(LivePoseFile),
}

/// 归一化后的姿势
#[derive(Clone, Debug, PartialEq)]
pub enum NormalizedPose {
    /// 按骨骼名的本地变换，走导入流程
    Transforms(PoseFile),
    /// 完整叠加数据，直接灌入缓存
    Live(CharacterPoseData),
}

impl PoseDocument {
    /// 按扩展名读取
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "vpd" => Ok(PoseDocument::Vpd(VpdFile::load(path)?)),
            "cmp" => {
                let text = fs::read_to_string(path)?;
                Ok(PoseDocument::CmTool(serde_json::from_str(&text)?))
            }
            _ => Self::from_json(&fs::read_to_string(path)?),
        }
    }

    /// 按内容判断 JSON 文档的种类
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| PoseError::Document("pose document is not an object".to_string()))?;

        if object.contains_key("Data") && object.contains_key("TypeName") {
            return Ok(PoseDocument::LivePose(serde_json::from_value(value)?));
        }
        if object.contains_key("Rotations") && !object.contains_key("Bones") {
            return Ok(PoseDocument::CmTool(serde_json::from_value(value)?));
        }
        Ok(PoseDocument::Standard(serde_json::from_value(value)?))
    }

    /// 升级并检查；空姿势视为无效
    pub fn normalize(self) -> Result<NormalizedPose> {
        let normalized = match self {
            PoseDocument::Standard(file) => NormalizedPose::Transforms(file),
            PoseDocument::CmTool(file) => NormalizedPose::Transforms(file.upgrade()?),
            PoseDocument::Vpd(file) => NormalizedPose::Transforms(file.to_pose_file()),
            PoseDocument::LivePose(file) => {
                if file.version > LIVE_POSE_FILE_VERSION {
                    return Err(PoseError::Document(format!(
                        "unsupported live pose version {}",
                        file.version
                    )));
                }
                NormalizedPose::Live(file.data)
            }
        };

        match normalized {
            NormalizedPose::Transforms(mut file) => {
                file.sanitize_bone_names();
                if file.is_empty() {
                    log::warn!("无效的姿势文件：没有骨骼");
                    return Err(PoseError::Document("pose file has no bones".to_string()));
                }
                Ok(NormalizedPose::Transforms(file))
            }
            NormalizedPose::Live(data) => {
                if data.is_empty() {
                    log::warn!("无效的实时姿势文件：没有数据");
                    return Err(PoseError::Document("live pose file is empty".to_string()));
                }
                Ok(NormalizedPose::Live(data))
            }
        }
    }
}

impl From<PoseFile> for PoseDocument {
    fn from(file: PoseFile) -> Self {
        PoseDocument::Standard(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::Transform;
    use std::io::Write;

    #[test]
    fn test_sniff_json_kinds() {
        let standard = r#"{"Bones": {"j_kao": {"position": [0,0,0], "rotation": [0,0,0,1], "scale": [1,1,1]}}}"#;
        assert!(matches!(PoseDocument::from_json(standard).unwrap(), PoseDocument::Standard(_)));

        let legacy = r#"{"Rotations": {"j_kao": "0, 0, 0, 1"}}"#;
        assert!(matches!(PoseDocument::from_json(legacy).unwrap(), PoseDocument::CmTool(_)));

        let live = LivePoseFile::new(CharacterPoseData {
            frozen: true,
            ..Default::default()
        });
        let text = live.to_json().unwrap();
        assert_eq!(PoseDocument::from_json(&text).unwrap(), PoseDocument::LivePose(live));
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let result = PoseDocument::Standard(PoseFile::default()).normalize();
        assert!(matches!(result, Err(PoseError::Document(_))));
        let result = PoseDocument::LivePose(LivePoseFile::new(CharacterPoseData::default())).normalize();
        assert!(result.is_err());
    }

    #[test]
    fn test_load_vpd_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".vpd").tempfile().unwrap();
        write!(
            file,
            "Vocaloid Pose Data file\n\nmodel.osm;\n1;\n\nBone0{{j_kao\n  0,0,0;\n  0,0,0,1;\n}}\n"
        )
        .unwrap();
        let document = PoseDocument::load(file.path()).unwrap();
        match document.normalize().unwrap() {
            NormalizedPose::Transforms(pose) => {
                assert!(pose.bones["j_kao"].approximately_eq(&Transform::IDENTITY, 1e-5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
