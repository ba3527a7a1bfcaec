//! 伴随插件的角色标签通道
//!
//! 标签值为 `base64(gzip(姿势字符串))`。

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::actor::ActorId;
use crate::{PoseError, Result};

pub const POSE_TAG_NAME: &str = "LivePose_v2";
/// 接受标签变化的角色索引范围 [2, 200)
pub const REMOTE_ACTOR_INDEX_RANGE: std::ops::Range<u16> = 2..200;

/// 外部的按角色字符串标签服务
pub trait TagChannel {
    fn is_available(&self) -> bool {
        true
    }
    fn set_tag(&mut self, actor: ActorId, tag: &str, value: &str);
    fn remove_tag(&mut self, actor: ActorId, tag: &str);
    fn get_tag(&self, actor: ActorId, tag: &str) -> Option<String>;
}

pub fn compress(text: &str) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| PoseError::Compression(e.to_string()))?;
    let bytes = encoder
        .finish()
        .map_err(|e| PoseError::Compression(e.to_string()))?;
    Ok(STANDARD.encode(bytes))
}

pub fn decompress(text: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| PoseError::Compression(format!("invalid base64: {e}")))?;
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| PoseError::Compression(e.to_string()))?;
    Ok(out)
}
