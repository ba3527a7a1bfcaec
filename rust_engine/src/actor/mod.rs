//! 角色与能力表
//!
//! 能力是封闭的枚举，按种类存放在有序表中；角色销毁时订阅句柄随之释放。

mod posing;
mod skeleton_posing;

pub use posing::{Posing, Selection};
pub use skeleton_posing::SkeletonPosing;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::animation::ActionTimeline;
use crate::events::Subscription;

/// 宿主对象表中的索引
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u16);

impl ActorId {
    /// 本机玩家
    pub const LOCAL: ActorId = ActorId(0);

    pub fn is_local(&self) -> bool {
        *self == Self::LOCAL
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Actor#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CapabilityKind {
    SkeletonPosing,
    Posing,
    ActionTimeline,
}

#[derive(Debug)]
pub enum Capability {
    SkeletonPosing(SkeletonPosing),
    Posing(Posing),
    ActionTimeline(ActionTimeline),
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::SkeletonPosing(_) => CapabilityKind::SkeletonPosing,
            Capability::Posing(_) => CapabilityKind::Posing,
            Capability::ActionTimeline(_) => CapabilityKind::ActionTimeline,
        }
    }
}

/// 一个被附加的角色
#[derive(Debug)]
pub struct Actor {
    id: ActorId,
    capabilities: BTreeMap<CapabilityKind, Capability>,
    _config_subscription: Subscription<ActorId>,
}

impl Actor {
    pub fn new(id: ActorId, config_subscription: Subscription<ActorId>) -> Self {
        Self {
            id,
            capabilities: BTreeMap::new(),
            _config_subscription: config_subscription,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    /// 同种能力只保留一个
    pub fn add_capability(&mut self, capability: Capability) {
        self.capabilities.insert(capability.kind(), capability);
    }

    pub fn has_capability(&self, kind: CapabilityKind) -> bool {
        self.capabilities.contains_key(&kind)
    }

    pub fn skeleton_posing(&self) -> Option<&SkeletonPosing> {
        match self.capabilities.get(&CapabilityKind::SkeletonPosing)? {
            Capability::SkeletonPosing(c) => Some(c),
            _ => None,
        }
    }

    pub fn skeleton_posing_mut(&mut self) -> Option<&mut SkeletonPosing> {
        match self.capabilities.get_mut(&CapabilityKind::SkeletonPosing)? {
            Capability::SkeletonPosing(c) => Some(c),
            _ => None,
        }
    }

    pub fn posing(&self) -> Option<&Posing> {
        match self.capabilities.get(&CapabilityKind::Posing)? {
            Capability::Posing(c) => Some(c),
            _ => None,
        }
    }

    pub fn posing_mut(&mut self) -> Option<&mut Posing> {
        match self.capabilities.get_mut(&CapabilityKind::Posing)? {
            Capability::Posing(c) => Some(c),
            _ => None,
        }
    }

    pub fn timeline(&self) -> Option<&ActionTimeline> {
        match self.capabilities.get(&CapabilityKind::ActionTimeline)? {
            Capability::ActionTimeline(c) => Some(c),
            _ => None,
        }
    }

    pub fn timeline_mut(&mut self) -> Option<&mut ActionTimeline> {
        match self.capabilities.get_mut(&CapabilityKind::ActionTimeline)? {
            Capability::ActionTimeline(c) => Some(c),
            _ => None,
        }
    }
}
