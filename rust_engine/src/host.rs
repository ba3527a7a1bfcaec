//! 宿主动画系统接口
//!
//! 骨架、时间轴、播放速度和模型变换都归宿主所有。
//! 引擎每帧读取骨架的原始本地变换，只写回合成后的结果。

use glam::Vec3;

use crate::actor::ActorId;
use crate::animation::AnimationState;
use crate::config::CharacterIdentity;
use crate::pose::TimelineKeys;
use crate::skeleton::{PoseSlot, Skeleton, Transform};

pub trait AnimationHost {
    /// 角色当前是否存在
    fn has_actor(&self, actor: ActorId) -> bool;

    fn skeleton(&self, actor: ActorId, slot: PoseSlot) -> Option<&Skeleton>;

    /// 写回本地变换；索引是骨架中的骨骼索引
    fn write_local_transforms(&mut self, actor: ActorId, slot: PoseSlot, transforms: &[(usize, Transform)]);

    /// 当前的身体 / 表情时间轴和宠物种类；角色没有动画时为 None
    fn timeline_keys(&self, actor: ActorId) -> Option<TimelineKeys>;

    fn actor_position(&self, actor: ActorId) -> Option<Vec3>;

    fn model_transform(&self, actor: ActorId) -> Transform;
    fn set_model_transform(&mut self, actor: ActorId, transform: Transform);

    fn overall_speed(&self, actor: ActorId) -> f32;
    fn set_overall_speed(&mut self, actor: ActorId, speed: f32);
    fn minion_speed(&self, actor: ActorId) -> f32;
    fn set_minion_speed(&mut self, actor: ActorId, speed: f32);

    /// 各分部动画控制器的时间状态
    fn animation_states(&self, actor: ActorId) -> Vec<AnimationState>;
    fn set_animation_local_time(&mut self, actor: ActorId, partial_index: u32, control_index: u32, local_time: f32);

    fn set_minion_world_transform(&mut self, actor: ActorId, transform: Transform);

    /// 用于按角色保存缓存；没有身份的角色不保存
    fn character_identity(&self, _actor: ActorId) -> Option<CharacterIdentity> {
        None
    }
}

#[cfg(test)]
pub mod testing {
    //! 测试用的内存宿主

    use super::*;
    use std::collections::{BTreeMap, HashMap};

    use crate::ipc::TagChannel;

    #[derive(Clone, Debug)]
    pub struct FakeActor {
        pub skeletons: HashMap<PoseSlot, Skeleton>,
        pub keys: Option<TimelineKeys>,
        pub position: Vec3,
        pub model_transform: Transform,
        pub overall_speed: f32,
        pub minion_speed: f32,
        pub animation_states: Vec<AnimationState>,
        pub minion_world_transform: Option<Transform>,
        pub identity: Option<CharacterIdentity>,
        pub writes: usize,
    }

    impl FakeActor {
        pub fn new(skeleton: Skeleton) -> Self {
            let mut skeletons = HashMap::new();
            skeletons.insert(skeleton.slot(), skeleton);
            Self {
                skeletons,
                keys: Some(TimelineKeys::new((1, 0), 1, 0)),
                position: Vec3::ZERO,
                model_transform: Transform::IDENTITY,
                overall_speed: 1.0,
                minion_speed: 1.0,
                animation_states: vec![AnimationState {
                    partial_index: 0,
                    control_index: 0,
                    local_time: 1.5,
                    playback_speed: 1.0,
                }],
                minion_world_transform: None,
                identity: None,
                writes: 0,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct FakeHost {
        pub actors: BTreeMap<ActorId, FakeActor>,
    }

    impl FakeHost {
        pub fn with_actor(id: ActorId, skeleton: Skeleton) -> Self {
            let mut host = Self::default();
            host.actors.insert(id, FakeActor::new(skeleton));
            host
        }

        pub fn actor(&self, id: ActorId) -> &FakeActor {
            &self.actors[&id]
        }

        pub fn actor_mut(&mut self, id: ActorId) -> &mut FakeActor {
            self.actors.get_mut(&id).expect("unknown fake actor")
        }

        pub fn skeleton_mut(&mut self, id: ActorId, slot: PoseSlot) -> &mut Skeleton {
            self.actor_mut(id).skeletons.get_mut(&slot).expect("missing fake skeleton")
        }

        /// 当前可见的本地变换
        pub fn visible(&self, id: ActorId, name: &str) -> Transform {
            self.actor(id).skeletons[&PoseSlot::Character]
                .find_bone_by_name(name)
                .map(|bone| bone.last_transform)
                .expect("missing fake bone")
        }
    }

    impl AnimationHost for FakeHost {
        fn has_actor(&self, actor: ActorId) -> bool {
            self.actors.contains_key(&actor)
        }

        fn skeleton(&self, actor: ActorId, slot: PoseSlot) -> Option<&Skeleton> {
            self.actors.get(&actor)?.skeletons.get(&slot)
        }

        fn write_local_transforms(&mut self, actor: ActorId, slot: PoseSlot, transforms: &[(usize, Transform)]) {
            let Some(fake) = self.actors.get_mut(&actor) else {
                return;
            };
            fake.writes += 1;
            if let Some(skeleton) = fake.skeletons.get_mut(&slot) {
                for (index, transform) in transforms {
                    skeleton.set_visible_transform(*index, *transform);
                }
            }
        }

        fn timeline_keys(&self, actor: ActorId) -> Option<TimelineKeys> {
            self.actors.get(&actor)?.keys
        }

        fn actor_position(&self, actor: ActorId) -> Option<Vec3> {
            self.actors.get(&actor).map(|a| a.position)
        }

        fn model_transform(&self, actor: ActorId) -> Transform {
            self.actors
                .get(&actor)
                .map(|a| a.model_transform)
                .unwrap_or_default()
        }

        fn set_model_transform(&mut self, actor: ActorId, transform: Transform) {
            if let Some(fake) = self.actors.get_mut(&actor) {
                fake.model_transform = transform;
            }
        }

        fn overall_speed(&self, actor: ActorId) -> f32 {
            self.actors.get(&actor).map(|a| a.overall_speed).unwrap_or(1.0)
        }

        fn set_overall_speed(&mut self, actor: ActorId, speed: f32) {
            if let Some(fake) = self.actors.get_mut(&actor) {
                fake.overall_speed = speed;
                for state in &mut fake.animation_states {
                    state.playback_speed = speed;
                }
            }
        }

        fn minion_speed(&self, actor: ActorId) -> f32 {
            self.actors.get(&actor).map(|a| a.minion_speed).unwrap_or(1.0)
        }

        fn set_minion_speed(&mut self, actor: ActorId, speed: f32) {
            if let Some(fake) = self.actors.get_mut(&actor) {
                fake.minion_speed = speed;
            }
        }

        fn animation_states(&self, actor: ActorId) -> Vec<AnimationState> {
            self.actors
                .get(&actor)
                .map(|a| a.animation_states.clone())
                .unwrap_or_default()
        }

        fn set_animation_local_time(&mut self, actor: ActorId, partial_index: u32, control_index: u32, local_time: f32) {
            if let Some(fake) = self.actors.get_mut(&actor) {
                for state in &mut fake.animation_states {
                    if state.partial_index == partial_index && state.control_index == control_index {
                        state.local_time = local_time;
                    }
                }
            }
        }

        fn set_minion_world_transform(&mut self, actor: ActorId, transform: Transform) {
            if let Some(fake) = self.actors.get_mut(&actor) {
                fake.minion_world_transform = Some(transform);
            }
        }

        fn character_identity(&self, actor: ActorId) -> Option<CharacterIdentity> {
            self.actors.get(&actor)?.identity.clone()
        }
    }

    /// 内存标签服务
    #[derive(Clone, Debug, Default)]
    pub struct FakeTags {
        pub tags: BTreeMap<(ActorId, String), String>,
    }

    impl TagChannel for FakeTags {
        fn set_tag(&mut self, actor: ActorId, tag: &str, value: &str) {
            self.tags.insert((actor, tag.to_string()), value.to_string());
        }

        fn remove_tag(&mut self, actor: ActorId, tag: &str) {
            self.tags.remove(&(actor, tag.to_string()));
        }

        fn get_tag(&self, actor: ActorId, tag: &str) -> Option<String> {
            self.tags.get(&(actor, tag.to_string())).cloned()
        }
    }
}
