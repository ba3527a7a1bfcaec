//! 动作时间轴能力：播放速度覆盖和冻结状态
//!
//! 速度覆盖记录设置时角色的位置，角色移动后覆盖自动失效。

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// 角色位移超过该值（平方）后速度覆盖失效
const SPEED_ANCHOR_DISTANCE_SQ: f32 = 0.01;
/// 冻结后多少帧重置暂停中的动画时间
pub const RESET_TIMELINE_DELAY_FRAMES: u32 = 4;
/// 冻结动作结束后多少帧恢复原速度
pub const RESTORE_SPEED_DELAY_FRAMES: u32 = 2;

/// 动画控制器的时间状态
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimationState {
    pub partial_index: u32,
    pub control_index: u32,
    pub local_time: f32,
    pub playback_speed: f32,
}

/// 时间轴状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineState {
    Playing,
    /// 速度被覆盖为 0
    Frozen,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct SpeedOverride {
    speed: f32,
    anchor: Option<Vec3>,
}

/// 动作时间轴
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionTimeline {
    speed_override: Option<SpeedOverride>,
    minion_speed_override: Option<f32>,
}

impl ActionTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前的速度覆盖；角色离开锚点后返回 None 并清除覆盖
    pub fn speed_multiplier_override(&mut self, position: Option<Vec3>) -> Option<f32> {
        let valid = match (self.speed_override, position) {
            (Some(SpeedOverride { anchor: Some(anchor), .. }), Some(position)) => {
                anchor.distance_squared(position) <= SPEED_ANCHOR_DISTANCE_SQ
            }
            (Some(SpeedOverride { anchor: None, .. }), _) => true,
            (Some(_), None) => false,
            (None, _) => false,
        };
        if !valid {
            if self.speed_override.is_some() {
                log::debug!("角色已移动，速度覆盖失效");
            }
            self.speed_override = None;
        }
        self.speed_override.map(|o| o.speed)
    }

    /// 不做位置校验地读取
    pub fn peek_speed_override(&self) -> Option<f32> {
        self.speed_override.map(|o| o.speed)
    }

    /// 有效速度：覆盖值或宿主当前速度
    pub fn speed_multiplier(&mut self, position: Option<Vec3>, host_speed: f32) -> f32 {
        self.speed_multiplier_override(position).unwrap_or(host_speed)
    }

    pub fn set_speed_override(&mut self, speed: f32, anchor: Option<Vec3>) {
        self.speed_override = Some(SpeedOverride { speed, anchor });
    }

    pub fn reset_speed_override(&mut self) {
        self.speed_override = None;
    }

    pub fn minion_speed_override(&self) -> Option<f32> {
        self.minion_speed_override
    }

    pub fn set_minion_speed_override(&mut self, speed: f32) {
        self.minion_speed_override = Some(speed);
    }

    pub fn reset_minion_speed_override(&mut self) {
        self.minion_speed_override = None;
    }

    pub fn state(&self) -> TimelineState {
        match self.peek_speed_override() {
            Some(speed) if speed == 0.0 => TimelineState::Frozen,
            _ => TimelineState::Playing,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.state() == TimelineState::Frozen
    }
}
