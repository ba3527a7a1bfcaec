//! 标准姿势文件与旧版 CMTool 姿势文件

use glam::Quat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::skeleton::{PoseSlot, Transform};
use crate::{PoseError, Result};

/// 标准姿势文件：按槽位保存骨骼名到本地变换的映射
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PoseFile {
    pub bones: BTreeMap<String, Transform>,
    pub main_hand: BTreeMap<String, Transform>,
    pub off_hand: BTreeMap<String, Transform>,
    pub model_difference: Option<Transform>,
}

impl PoseFile {
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

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty() && self.main_hand.is_empty() && self.off_hand.is_empty()
    }

    pub fn bones_for_slot(&self, slot: PoseSlot) -> Option<&BTreeMap<String, Transform>> {
        match slot {
            PoseSlot::Character => Some(&self.bones),
            PoseSlot::MainHand => Some(&self.main_hand),
            PoseSlot::OffHand => Some(&self.off_hand),
            _ => None,
        }
    }

    pub fn bones_for_slot_mut(&mut self, slot: PoseSlot) -> Option<&mut BTreeMap<String, Transform>> {
        match slot {
            PoseSlot::Character => Some(&mut self.bones),
            PoseSlot::MainHand => Some(&mut self.main_hand),
            PoseSlot::OffHand => Some(&mut self.off_hand),
            _ => None,
        }
    }

    /// 去掉名称首尾空白，丢弃空名和非法变换
    pub fn sanitize_bone_names(&mut self) {
        for map in [&mut self.bones, &mut self.main_hand, &mut self.off_hand] {
            let cleaned = std::mem::take(map)
                .into_iter()
                .filter(|(_, t)| t.is_finite())
                .map(|(name, t)| (name.trim().to_string(), t))
                .filter(|(name, _)| !name.is_empty())
                .collect();
            *map = cleaned;
        }
    }
}

/// 旧版 CMTool 姿势文件：只有旋转，每个值是 "x, y, z, w" 字符串
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CmToolPoseFile {
    pub rotations: BTreeMap<String, String>,
}

impl CmToolPoseFile {
    /// 升级为标准姿势文件；任何一条旋转无法解析都视为损坏
    pub fn upgrade(&self) -> Result<PoseFile> {
        let mut file = PoseFile::default();
        for (name, value) in &self.rotations {
            let rotation = parse_quat(value).ok_or_else(|| {
                PoseError::Document(format!("invalid rotation for {name}: {value}"))
            })?;
            file.bones.insert(name.clone(), Transform::from_rotation(rotation));
        }
        Ok(file)
    }
}

fn parse_quat(value: &str) -> Option<Quat> {
    let parts: Vec<f32> = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f32>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [x, y, z, w] => {
            let q = Quat::from_xyzw(*x, *y, *z, *w);
            (q.is_finite() && q.length_squared() > 1e-6).then(|| q.normalize())
        }
        _ => None,
    }
}
