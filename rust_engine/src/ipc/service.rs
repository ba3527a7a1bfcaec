//! 对外的姿势接口
//!
//! 入口名称与宿主的跨插件调用约定一致；索引超出范围或角色不存在时返回空值。

use crate::engine::PoseEngine;
use crate::host::AnimationHost;

pub const API_VERSION: (i32, i32) = (1, 0);

pub const API_VERSION_NAME: &str = "LivePose.ApiVersion";
pub const GET_POSE_NAME: &str = "LivePose.GetPose";
pub const SET_POSE_NAME: &str = "LivePose.SetPose";

/// 接受的最大角色索引（含）
pub const MAX_ACTOR_INDEX: u16 = 200;

pub trait IpcService {
    fn api_version(&self) -> (i32, i32) {
        API_VERSION
    }

    /// 角色当前姿势的传输字符串；角色不存在时为空串
    fn get_pose(&mut self, index: u16) -> String;

    /// 下一帧应用远端姿势；负载无法解析时清空姿势并返回 false
    fn set_pose(&mut self, index: u16, payload: &str) -> bool;
}

// ============================================================================
// 引擎实现
// ============================================================================

impl<H: AnimationHost> IpcService for PoseEngine<H> {
    fn get_pose(&mut self, index: u16) -> String {
        PoseEngine::get_pose(self, index)
    }

    fn set_pose(&mut self, index: u16, payload: &str) -> bool {
        PoseEngine::set_pose(self, index, payload)
    }
}
