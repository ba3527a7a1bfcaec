//! 帧调度器
//!
//! 任务按到期帧排在优先队列里。防抖键和所属角色各带一个代数，
//! 重新调度或角色销毁时代数加一；出队时先核对代数再执行。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::actor::ActorId;

/// 调度句柄，可用于取消
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

/// 防抖键：同一个键只保留最后一次调度
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DebounceKey {
    PlayerPoseTag,
    Snapshot(ActorId),
    Reconcile(ActorId),
}

struct Scheduled<T> {
    due: u64,
    seq: u64,
    owner: Option<(ActorId, u64)>,
    debounce: Option<(DebounceKey, u64)>,
    task: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scheduled<T> {
    // BinaryHeap 是大顶堆，反转后最早到期的先出
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 帧调度器
pub struct FrameScheduler<T> {
    frame: u64,
    next_seq: u64,
    queue: BinaryHeap<Scheduled<T>>,
    cancelled: HashSet<u64>,
    debounce_generations: HashMap<DebounceKey, u64>,
    owner_epochs: HashMap<ActorId, u64>,
}

impl<T> Default for FrameScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameScheduler<T> {
    pub fn new() -> Self {
        Self {
            frame: 0,
            next_seq: 0,
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
            debounce_generations: HashMap::new(),
            owner_epochs: HashMap::new(),
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// `delay_frames` 帧之后执行；0 与 1 都表示下一帧
    pub fn schedule(&mut self, delay_frames: u32, owner: Option<ActorId>, task: T) -> TaskHandle {
        self.push(delay_frames, owner, None, task)
    }

    /// 防抖调度：同键的旧任务作废
    pub fn schedule_debounced(
        &mut self,
        key: DebounceKey,
        delay_frames: u32,
        owner: Option<ActorId>,
        task: T,
    ) -> TaskHandle {
        let generation = self.debounce_generations.entry(key).or_insert(0);
        *generation += 1;
        let generation = *generation;
        self.push(delay_frames, owner, Some((key, generation)), task)
    }

    /// 作废仍在排队的任务；已执行或已出队的句柄返回 false
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        if !self.queue.iter().any(|s| s.seq == handle.0) {
            return false;
        }
        self.cancelled.insert(handle.0)
    }

    pub fn cancel_debounced(&mut self, key: DebounceKey) {
        *self.debounce_generations.entry(key).or_insert(0) += 1;
    }

    /// 角色销毁时作废它的所有任务
    pub fn cancel_owner(&mut self, owner: ActorId) {
        *self.owner_epochs.entry(owner).or_insert(0) += 1;
    }

    /// 进入下一帧，返回到期且仍然有效的任务
    pub fn tick(&mut self) -> Vec<T> {
        self.frame += 1;
        let mut due = Vec::new();
        while self.queue.peek().map(|s| s.due <= self.frame).unwrap_or(false) {
            let Some(scheduled) = self.queue.pop() else {
                break;
            };
            if self.is_live(&scheduled) {
                due.push(scheduled.task);
            }
            self.cancelled.remove(&scheduled.seq);
        }
        due
    }

    /// 仍在排队的任务数（含已作废、尚未出队的）
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn push(
        &mut self,
        delay_frames: u32,
        owner: Option<ActorId>,
        debounce: Option<(DebounceKey, u64)>,
        task: T,
    ) -> TaskHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let owner = owner.map(|id| (id, self.owner_epochs.get(&id).copied().unwrap_or(0)));
        self.queue.push(Scheduled {
            due: self.frame + u64::from(delay_frames.max(1)),
            seq,
            owner,
            debounce,
            task,
        });
        TaskHandle(seq)
    }

    fn is_live(&self, scheduled: &Scheduled<T>) -> bool {
        if self.cancelled.contains(&scheduled.seq) {
            return false;
        }
        if let Some((key, generation)) = scheduled.debounce {
            if self.debounce_generations.get(&key).copied().unwrap_or(0) != generation {
                return false;
            }
        }
        if let Some((owner, epoch)) = scheduled.owner {
            if self.owner_epochs.get(&owner).copied().unwrap_or(0) != epoch {
                return false;
            }
        }
        true
    }
}
