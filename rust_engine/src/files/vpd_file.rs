//! VPD (Vocaloid Pose Data) 姿势文件
//!
//! Shift-JIS 编码的文本文件。只读取骨骼块；表情块跳过。
//! 坐标系与引擎相反，读取时翻转 Z 轴。

use glam::{Quat, Vec3};
use std::fs;
use std::path::Path;

use super::pose_file::PoseFile;
use crate::skeleton::Transform;
use crate::{PoseError, Result};

const VPD_HEADER: &str = "Vocaloid Pose Data file";

/// VPD 骨骼数据
#[derive(Clone, Debug, PartialEq)]
pub struct VpdBone {
    pub name: String,
    pub translation: Vec3,
    pub rotation: Quat,
}

/// VPD 文件数据
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VpdFile {
    pub model_name: String,
    pub bones: Vec<VpdBone>,
}

impl VpdFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }

    /// 解析 VPD 字节
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let content = decode_shift_jis(bytes);
        if !content.trim_start().starts_with(VPD_HEADER) {
            return Err(PoseError::Document("Invalid VPD header".to_string()));
        }

        let mut model_name = String::new();
        let mut bones = Vec::new();
        let lines: Vec<&str> = content.lines().collect();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i].trim();

            if line.is_empty() || line.starts_with("//") {
                i += 1;
                continue;
            }

            // 模型名行，如 "xxx.osm;"
            if line.ends_with(".osm;") || line.ends_with(".pmx;") || line.ends_with(".pmd;") {
                model_name = line.trim_end_matches(';').to_string();
                i += 1;
                continue;
            }

            if line.starts_with("Bone") && line.contains('{') {
                if let Some(bone) = Self::parse_bone_block(&lines, &mut i) {
                    bones.push(bone);
                }
                continue;
            }

            // Morph 块和骨骼数量行都跳过
            if line.starts_with("Morph") && line.contains('{') {
                Self::skip_block(&lines, &mut i);
                continue;
            }

            i += 1;
        }

        log::info!("VPD 解析完成: {} 个骨骼", bones.len());
        Ok(Self { model_name, bones })
    }

    /// 转为标准姿势文件（全部放在角色本体槽位）
    pub fn to_pose_file(&self) -> PoseFile {
        let mut file = PoseFile::default();
        for bone in &self.bones {
            file.bones.insert(
                bone.name.clone(),
                Transform::new(bone.translation, bone.rotation, Vec3::ONE),
            );
        }
        file
    }

    fn parse_bone_block(lines: &[&str], index: &mut usize) -> Option<VpdBone> {
        let start_line = lines[*index].trim();
        *index += 1;

        // "Bone0{骨骼名" 或者名称在下一行
        let name = if !start_line.ends_with('{') {
            start_line.split('{').nth(1)?.trim().to_string()
        } else {
            let name_line = lines.get(*index)?.trim();
            *index += 1;
            name_line.to_string()
        };

        let mut translation = Vec3::ZERO;
        let mut rotation = Quat::IDENTITY;

        while *index < lines.len() {
            let line = lines[*index].trim();
            *index += 1;

            if line.starts_with('}') {
                break;
            }

            if line.contains("Quaternion") || Self::value_count(line) >= 4 {
                if let Some(quat) = Self::parse_quat(line) {
                    rotation = quat;
                }
            } else if line.contains("trans") || Self::value_count(line) == 3 {
                if let Some(trans) = Self::parse_vec3(line) {
                    translation = trans;
                }
            }
        }

        Some(VpdBone {
            name,
            translation,
            rotation,
        })
    }

    fn skip_block(lines: &[&str], index: &mut usize) {
        *index += 1;
        while *index < lines.len() {
            let done = lines[*index].trim().starts_with('}');
            *index += 1;
            if done {
                break;
            }
        }
    }

    fn values(line: &str) -> Option<Vec<&str>> {
        let clean = line.split("//").next()?.trim().trim_end_matches(';');
        Some(clean.split(',').map(str::trim).collect())
    }

    fn value_count(line: &str) -> usize {
        Self::values(line).map(|v| v.len()).unwrap_or(0)
    }

    /// "0.1,0.2,0.3; // trans x,y,z"
    fn parse_vec3(line: &str) -> Option<Vec3> {
        let parts = Self::values(line)?;
        if parts.len() < 3 {
            return None;
        }
        let x = parts[0].parse::<f32>().ok()?;
        let y = parts[1].parse::<f32>().ok()?;
        let z = parts[2].parse::<f32>().ok()?;
        Some(Vec3::new(x, y, -z))
    }

    /// "x,y,z,w; // Quaternion x,y,z,w"
    fn parse_quat(line: &str) -> Option<Quat> {
        let parts = Self::values(line)?;
        if parts.len() < 4 {
            return None;
        }
        let x = parts[0].parse::<f32>().ok()?;
        let y = parts[1].parse::<f32>().ok()?;
        let z = parts[2].parse::<f32>().ok()?;
        let w = parts[3].parse::<f32>().ok()?;
        Some(Quat::from_xyzw(x, y, -z, -w))
    }
}

fn decode_shift_jis(bytes: &[u8]) -> String {
    use encoding_rs::SHIFT_JIS;
    let (decoded, _, _) = SHIFT_JIS.decode(bytes);
    decoded.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Vocaloid Pose Data file\r\n\r\nmiku.osm;\r\n2;\r\n\r\n\
Bone0{j_kubi\r\n  0.000000,0.100000,0.000000;\r\n  0.000000,0.000000,0.258819,0.965926;\r\n}\r\n\r\n\
Morph0{smile\r\n  0.5;\r\n}\r\n\r\n\
Bone1{j_kao\r\n  0.000000,0.000000,0.000000;\r\n  0.000000,0.000000,0.000000,1.000000;\r\n}\r\n";

    #[test]
    fn test_parse_vec3() {
        let v = VpdFile::parse_vec3("0.1,0.2,0.3; // trans x,y,z").unwrap();
        assert!((v.x - 0.1).abs() < 0.001);
        assert!((v.y - 0.2).abs() < 0.001);
        assert!((v.z + 0.3).abs() < 0.001);
    }

    #[test]
    fn test_parse_document() {
        let file = VpdFile::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(file.model_name, "miku.osm");
        assert_eq!(file.bones.len(), 2);
        assert_eq!(file.bones[0].name, "j_kubi");
        assert!((file.bones[0].translation.y - 0.1).abs() < 1e-6);

        let pose = file.to_pose_file();
        assert!(pose.bones.contains_key("j_kao"));
    }

    #[test]
    fn test_rejects_missing_header() {
        assert!(VpdFile::parse(b"not a pose").is_err());
    }
}
