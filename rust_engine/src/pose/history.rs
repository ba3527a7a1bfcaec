//! 撤销 / 重做历史

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use super::pose_info::PoseInfo;
use crate::actor::ActorId;
use crate::skeleton::Transform;

/// 一条历史：叠加表 + 模型变换
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryEntry {
    pub pose: PoseInfo,
    /// 引导项没有模型变换，撤销到它时不改动模型
    pub model_transform: Option<Transform>,
}

impl HistoryEntry {
    pub fn new(pose: &PoseInfo, model_transform: Option<Transform>) -> Self {
        Self {
            pose: pose.clone_filtered(|_| true),
            model_transform,
        }
    }
}

/// 有界的撤销 / 重做栈
///
/// 第一次快照前压入一条引导项，所以 `can_undo` 要求深度大于 1。
#[derive(Clone, Debug)]
pub struct History<T: Clone> {
    undo: VecDeque<T>,
    redo: Vec<T>,
    bootstrap: T,
    max_size: usize,
}

impl<T: Clone> History<T> {
    pub fn new(bootstrap: T, max_size: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            bootstrap,
            max_size,
        }
    }

    /// 历史长度为 0 时关闭历史
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        if max_size == 0 {
            self.clear();
        } else {
            self.trim();
        }
    }

    pub fn snapshot(&mut self, entry: T) {
        if self.max_size == 0 {
            self.clear();
            return;
        }
        self.redo.clear();
        if self.undo.is_empty() {
            self.undo.push_back(self.bootstrap.clone());
        }
        self.undo.push_back(entry);
        self.trim();
    }

    /// 回到上一条，返回需要应用的状态
    pub fn undo(&mut self) -> Option<&T> {
        if !self.can_undo() {
            return None;
        }
        let top = self.undo.pop_back()?;
        self.redo.push(top);
        self.undo.back()
    }

    pub fn redo(&mut self) -> Option<&T> {
        let entry = self.redo.pop()?;
        self.undo.push_back(entry);
        self.undo.back()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.len() > 1
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    fn trim(&mut self) {
        while self.undo.len() > self.max_size + 1 {
            self.undo.pop_front();
        }
    }
}

/// 单角色历史
pub type PoseHistory = History<HistoryEntry>;

impl PoseHistory {
    pub fn with_max_size(max_size: usize) -> Self {
        History::new(HistoryEntry::default(), max_size)
    }
}

/// 多选时的组历史，以选中角色集合为键
#[derive(Clone, Debug)]
pub struct GroupedHistory {
    groups: HashMap<BTreeSet<ActorId>, History<BTreeMap<ActorId, HistoryEntry>>>,
    max_size: usize,
}

impl GroupedHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            groups: HashMap::new(),
            max_size,
        }
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        for history in self.groups.values_mut() {
            history.set_max_size(max_size);
        }
    }

    pub fn snapshot(
        &mut self,
        members: &BTreeSet<ActorId>,
        entries: BTreeMap<ActorId, HistoryEntry>,
    ) {
        let max_size = self.max_size;
        let bootstrap = members
            .iter()
            .map(|id| (*id, HistoryEntry::default()))
            .collect();
        self.groups
            .entry(members.clone())
            .or_insert_with(|| History::new(bootstrap, max_size))
            .snapshot(entries);
    }

    pub fn undo(&mut self, members: &BTreeSet<ActorId>) -> Option<BTreeMap<ActorId, HistoryEntry>> {
        self.groups.get_mut(members)?.undo().cloned()
    }

    pub fn redo(&mut self, members: &BTreeSet<ActorId>) -> Option<BTreeMap<ActorId, HistoryEntry>> {
        self.groups.get_mut(members)?.redo().cloned()
    }

    pub fn can_undo(&self, members: &BTreeSet<ActorId>) -> bool {
        self.groups.get(members).map(|h| h.can_undo()).unwrap_or(false)
    }

    pub fn can_redo(&self, members: &BTreeSet<ActorId>) -> bool {
        self.groups.get(members).map(|h| h.can_redo()).unwrap_or(false)
    }

    /// 角色销毁时丢弃包含它的组
    pub fn forget_actor(&mut self, actor: ActorId) {
        self.groups.retain(|members, _| !members.contains(&actor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{MirrorTable, PoseEdit};
    use crate::skeleton::BoneId;
    use glam::Quat;

    fn posed(angle: f32) -> PoseInfo {
        let mut pose = PoseInfo::new();
        let target = Transform::from_rotation(Quat::from_rotation_z(angle));
        pose.apply(
            &BoneId::character("j_kosi"),
            &PoseEdit::new(target, None),
            &MirrorTable::default(),
            |_| true,
        );
        pose
    }

    #[test]
    fn test_first_snapshot_is_undoable_to_bootstrap() {
        let mut history = PoseHistory::with_max_size(50);
        assert!(!history.can_undo());
        history.snapshot(HistoryEntry::new(&posed(0.2), None));
        assert!(history.can_undo());

        let restored = history.undo().cloned().unwrap();
        assert!(restored.pose.is_empty());
        assert!(!history.can_undo());
        assert!(history.undo().is_none());

        let redone = history.redo().cloned().unwrap();
        assert_eq!(redone.pose, posed(0.2));
    }

    #[test]
    fn test_snapshot_clears_redo_and_trims() {
        let mut history = PoseHistory::with_max_size(2);
        for i in 0..5 {
            history.snapshot(HistoryEntry::new(&posed(i as f32 * 0.1), None));
        }
        assert_eq!(history.undo_depth(), 3);

        history.undo();
        assert!(history.can_redo());
        history.snapshot(HistoryEntry::new(&posed(1.0), None));
        assert!(!history.can_redo());
    }

    #[test]
    fn test_zero_size_disables_history() {
        let mut history = PoseHistory::with_max_size(0);
        history.snapshot(HistoryEntry::new(&posed(0.3), None));
        assert!(!history.can_undo());
        assert_eq!(history.undo_depth(), 0);
    }

    #[test]
    fn test_grouped_history_is_keyed_by_member_set() {
        let mut grouped = GroupedHistory::new(10);
        let members: BTreeSet<_> = [ActorId(0), ActorId(3)].into_iter().collect();
        let entries = members
            .iter()
            .map(|id| (*id, HistoryEntry::new(&posed(0.5), None)))
            .collect();
        grouped.snapshot(&members, entries);

        let other: BTreeSet<_> = [ActorId(0)].into_iter().collect();
        assert!(!grouped.can_undo(&other));
        let restored = grouped.undo(&members).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(restored.values().all(|entry| entry.pose.is_empty()));

        grouped.forget_actor(ActorId(3));
        assert!(!grouped.can_redo(&members));
    }
}
