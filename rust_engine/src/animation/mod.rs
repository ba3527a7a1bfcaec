//! 动画时间轴控制

mod timeline;

pub use timeline::{
    ActionTimeline, AnimationState, TimelineState, RESET_TIMELINE_DELAY_FRAMES,
    RESTORE_SPEED_DELAY_FRAMES,
};
