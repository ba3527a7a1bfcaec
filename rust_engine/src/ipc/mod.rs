//! 跨进程同步
//!
//! - 同步数据结构（按时间轴分区的叠加表、速度、锁定、动画时间）
//! - 紧凑二进制编码与 base64 传输字符串
//! - 伴随插件的标签通道（gzip 压缩）
//! - 对外的取 / 设姿势接口

mod live_pose_data;
mod service;
pub mod tag;
pub mod wire;

pub use live_pose_data::{
    BodyPoseData, BonePoseData, CharacterPoseData, FacePoseData, MinionPoseData, PoseData,
};
pub use service::{
    IpcService, API_VERSION, API_VERSION_NAME, GET_POSE_NAME, MAX_ACTOR_INDEX, SET_POSE_NAME,
};
pub use tag::{TagChannel, POSE_TAG_NAME, REMOTE_ACTOR_INDEX_RANGE};
