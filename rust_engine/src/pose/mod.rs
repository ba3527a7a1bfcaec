//! 姿势叠加：单骨骼叠加栈、整表、时间轴缓存、历史与每帧合成

mod bone_pose;
mod cache;
mod compose;
mod history;
mod mirror;
mod pose_info;

pub use bone_pose::{BonePoseInfo, ComposedBone, MirrorMode, PoseEdit, PoseStackEntry};
pub use cache::{BodyKey, CacheTransition, FaceKey, MinionKey, PoseCache, TimelineKeys};
pub use compose::compose_skeleton;
pub use history::{GroupedHistory, History, HistoryEntry, PoseHistory};
pub use mirror::{flip_rotation, flip_transform, AffixPosition, MirrorRule, MirrorTable};
pub use pose_info::PoseInfo;
