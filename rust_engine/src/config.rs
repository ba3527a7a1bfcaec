//! 引擎配置与按角色保存的姿势缓存
//!
//! 配置以 JSON 保存；字段扁平化，缺失字段取默认值。

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ipc::{BodyPoseData, CharacterPoseData, FacePoseData, MinionPoseData};
use crate::pose::{MirrorTable, PoseCache};
use crate::skeleton::JointLimit;
use crate::Result;

/// 引擎配置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub posing: PosingConfiguration,
    pub import: ImportConfiguration,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// 姿势编辑配置（扁平化，不嵌套）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PosingConfiguration {
    // ========== 历史 ==========
    /// 撤销栈长度，默认 50；0 表示关闭历史
    pub undo_stack_size: usize,

    // ========== 缓存 ==========
    /// 诅咒模式：本机角色不按时间轴分区缓存，默认 false
    pub cursed_mode: bool,
    /// 导入姿势后保持冻结，默认 false
    pub freeze_actor_on_pose_import: bool,
    /// 本机角色销毁时自动保存缓存，默认 true
    pub auto_save_on_destroy: bool,
    /// 按角色保存缓存的目录，默认不保存
    pub character_directory: Option<PathBuf>,

    // ========== 同步 ==========
    /// 本机姿势标签的防抖帧数，默认 30
    pub replication_debounce_frames: u32,

    // ========== 骨骼 ==========
    /// 界面上启用的骨骼分类；为空时全部启用
    pub enabled_bone_categories: Vec<String>,
    /// 左右镜像对照表
    pub mirror: MirrorTable,
    /// IK 约束使用的关节限制
    pub joint_limits: Vec<JointLimitRule>,
}

impl Default for PosingConfiguration {
    fn default() -> Self {
        Self {
            // ====== 历史 ======
            // 每个角色最多能撤销多少步
            undo_stack_size: 50,

            // ====== 缓存 ======
            cursed_mode: false,
            freeze_actor_on_pose_import: false,
            auto_save_on_destroy: true,
            character_directory: None,

            // ====== 同步 ======
            // 连续编辑时只在停下来之后发送一次
            replication_debounce_frames: 30,

            // ====== 骨骼 ======
            enabled_bone_categories: Vec::new(),
            mirror: MirrorTable::default(),
            // 膝盖和手肘只能单向弯曲
            joint_limits: vec![
                JointLimitRule::new("j_asi_c_l", Vec3::new(-150.0, -5.0, -5.0), Vec3::new(0.0, 5.0, 5.0)),
                JointLimitRule::new("j_asi_c_r", Vec3::new(-150.0, -5.0, -5.0), Vec3::new(0.0, 5.0, 5.0)),
                JointLimitRule::new("j_ude_b_l", Vec3::new(-5.0, -5.0, -150.0), Vec3::new(5.0, 5.0, 0.0)),
                JointLimitRule::new("j_ude_b_r", Vec3::new(-5.0, -5.0, 0.0), Vec3::new(5.0, 5.0, 150.0)),
            ],
        }
    }
}

impl PosingConfiguration {
    pub fn joint_limit(&self, bone_name: &str) -> Option<JointLimit> {
        self.joint_limits
            .iter()
            .find(|rule| rule.bone == bone_name)
            .map(|rule| rule.limit)
    }
}

/// 按骨骼名的关节限制
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointLimitRule {
    pub bone: String,
    pub limit: JointLimit,
}

impl JointLimitRule {
    pub fn new(bone: &str, min: Vec3, max: Vec3) -> Self {
        Self {
            bone: bone.to_string(),
            limit: JointLimit { min, max },
        }
    }
}

/// 导入配置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfiguration {
    /// 场景导入时应用文件中的模型变换差值，默认 false
    pub apply_model_transform: bool,
}

/// 宿主提供的角色身份，用作保存文件名
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterIdentity {
    pub content_id: u64,
    pub name: String,
    pub world: u16,
}

/// 按角色保存的姿势缓存
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfiguration {
    pub content_id: u64,
    pub name: String,
    pub world: u16,
    /// 保存时间（Unix 秒）
    pub save_time: u64,
    pub body_poses: Vec<BodyPoseData>,
    pub face_poses: Vec<FacePoseData>,
    pub minion_poses: Vec<MinionPoseData>,
}

impl CharacterConfiguration {
    pub fn from_cache(identity: &CharacterIdentity, cache: &PoseCache, save_time: u64) -> Self {
        let data = CharacterPoseData::default().with_cache(cache);
        Self {
            content_id: identity.content_id,
            name: identity.name.clone(),
            world: identity.world,
            save_time,
            body_poses: data.body_poses,
            face_poses: data.face_poses,
            minion_poses: data.minion_poses,
        }
    }

    /// 写入缓存（已有的同键分区被覆盖）
    pub fn fill_cache(&self, cache: &mut PoseCache) {
        let data = CharacterPoseData {
            body_poses: self.body_poses.clone(),
            face_poses: self.face_poses.clone(),
            minion_poses: self.minion_poses.clone(),
            ..Default::default()
        };
        data.fill_cache(cache);
    }

    pub fn is_empty(&self) -> bool {
        self.body_poses.is_empty() && self.face_poses.is_empty() && self.minion_poses.is_empty()
    }

    /// 目录下该角色的文件路径
    pub fn path_in(directory: &Path, identity: &CharacterIdentity) -> PathBuf {
        directory.join(format!("{:016X}.json", identity.content_id))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{MirrorTable, PoseEdit, PoseInfo, TimelineKeys};
    use crate::skeleton::{BoneId, Transform};
    use glam::Quat;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_and_partial_json() {
        let config = Configuration::from_json(r#"{"posing": {"undo_stack_size": 5}}"#).unwrap();
        assert_eq!(config.posing.undo_stack_size, 5);
        assert!(config.posing.auto_save_on_destroy);
        assert_eq!(config.posing.replication_debounce_frames, 30);
        assert!(!config.import.apply_model_transform);
        assert!(config.posing.joint_limit("j_asi_c_l").is_some());
    }

    #[test]
    fn test_configuration_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Configuration::default();
        config.posing.cursed_mode = true;
        config.posing.enabled_bone_categories = vec!["head".to_string()];
        config.save(&path).unwrap();
        assert_eq!(Configuration::load(&path).unwrap(), config);
    }

    #[test]
    fn test_character_configuration_round_trip() {
        let mut cache = PoseCache::new();
        let mut live = PoseInfo::new();
        cache.update(&mut live, TimelineKeys::new((1, 2), 3, 0), |_| false);
        live.apply(
            &BoneId::character("j_kosi"),
            &PoseEdit::new(Transform::from_rotation(Quat::from_rotation_y(0.25)), None),
            &MirrorTable::default(),
            |_| true,
        );
        cache.flush(&live, |_| false);

        let identity = CharacterIdentity {
            content_id: 0xABCD,
            name: "Test Character".to_string(),
            world: 42,
        };
        let saved = CharacterConfiguration::from_cache(&identity, &cache, 1_700_000_000);
        let dir = tempfile::tempdir().unwrap();
        let path = CharacterConfiguration::path_in(dir.path(), &identity);
        saved.save(&path).unwrap();

        let loaded = CharacterConfiguration::load(&path).unwrap();
        assert_eq!(loaded, saved);
        let mut restored = PoseCache::new();
        loaded.fill_cache(&mut restored);
        assert_eq!(restored.body_poses, cache.body_poses);
    }
}
