//! LivePose Engine - 实时骨骼姿势叠加引擎
//!
//! 在宿主动画系统之上叠加逐骨骼的姿势编辑：
//! - 叠加栈、镜像编辑和 IK 求解
//! - 按动画时间轴分区的姿势缓存
//! - 撤销 / 重做历史
//! - 姿势文件导入导出（JSON / CMTool / VPD）
//! - 二进制传输格式与远端同步

pub mod actor;
pub mod animation;
pub mod config;
pub mod engine;
pub mod events;
pub mod files;
pub mod host;
pub mod ipc;
pub mod pose;
pub mod scheduler;
pub mod skeleton;

pub use actor::{Actor, ActorId, Selection};
pub use config::Configuration;
pub use engine::{FrameTask, PoseEngine};
pub use files::{PoseDocument, PoseFile, PoseImporterOptions};
pub use host::AnimationHost;
pub use ipc::{CharacterPoseData, IpcService, TagChannel};
pub use pose::{PoseEdit, PoseInfo};
pub use skeleton::{BoneId, PoseSlot, Skeleton, Transform};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Wire format error: {0}")]
    Wire(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Pose document error: {0}")]
    Document(String),

    #[error("Unknown actor: {0}")]
    UnknownActor(actor::ActorId),
}

pub type Result<T> = std::result::Result<T, PoseError>;
