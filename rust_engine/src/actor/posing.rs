//! 编辑能力：选择状态和撤销历史

use crate::pose::{HistoryEntry, PoseHistory};
use crate::skeleton::BoneId;

/// 当前选中的对象
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    None,
    Bone(BoneId),
    ModelTransform,
}

#[derive(Clone, Debug)]
pub struct Posing {
    selected: Selection,
    hovered: Option<BoneId>,
    history: PoseHistory,
}

impl Posing {
    pub fn new(undo_stack_size: usize) -> Self {
        Self {
            selected: Selection::None,
            hovered: None,
            history: PoseHistory::with_max_size(undo_stack_size),
        }
    }

    pub fn selected(&self) -> &Selection {
        &self.selected
    }

    pub fn selected_bone(&self) -> Option<&BoneId> {
        match &self.selected {
            Selection::Bone(id) => Some(id),
            _ => None,
        }
    }

    pub fn select(&mut self, selection: Selection) {
        self.selected = selection;
    }

    pub fn hovered(&self) -> Option<&BoneId> {
        self.hovered.as_ref()
    }

    pub fn hover(&mut self, bone: Option<BoneId>) {
        self.hovered = bone;
    }

    pub fn history(&self) -> &PoseHistory {
        &self.history
    }

    pub fn snapshot(&mut self, entry: HistoryEntry) {
        self.history.snapshot(entry);
    }

    pub fn undo(&mut self) -> Option<HistoryEntry> {
        self.history.undo().cloned()
    }

    pub fn redo(&mut self) -> Option<HistoryEntry> {
        self.history.redo().cloned()
    }

    pub fn set_undo_stack_size(&mut self, size: usize) {
        self.history.set_max_size(size);
    }
}
