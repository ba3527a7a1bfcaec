//! 骨骼分类与过滤

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use crate::skeleton::PoseSlot;

pub const WEAPON_CATEGORY: &str = "weapon";
pub const ORNAMENT_CATEGORY: &str = "ornament";
pub const OTHER_CATEGORY: &str = "other";

/// 分类的匹配方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoneCategoryType {
    /// 骨骼名以列表中的某项开头
    Prefix,
    /// 骨骼名与列表中的某项完全相同
    Exact,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoneCategory {
    pub id: String,
    pub kind: BoneCategoryType,
    pub bones: Vec<String>,
}

impl BoneCategory {
    fn prefix(id: &str, bones: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            kind: BoneCategoryType::Prefix,
            bones: bones.iter().map(|b| b.to_string()).collect(),
        }
    }

    pub fn matches(&self, bone_name: &str) -> bool {
        match self.kind {
            BoneCategoryType::Prefix => self.bones.iter().any(|b| bone_name.starts_with(b.as_str())),
            BoneCategoryType::Exact => self.bones.iter().any(|b| b == bone_name),
        }
    }

    fn is_pseudo(&self) -> bool {
        matches!(self.id.as_str(), WEAPON_CATEGORY | ORNAMENT_CATEGORY | OTHER_CATEGORY)
    }
}

/// 内置分类表，末尾是三个不按名称匹配的伪分类
pub static DEFAULT_BONE_CATEGORIES: Lazy<Vec<BoneCategory>> = Lazy::new(|| {
    vec![
        BoneCategory::prefix("head", &["j_kao", "j_kubi"]),
        BoneCategory::prefix("ears", &["j_mimi", "j_zera"]),
        BoneCategory::prefix("hair", &["j_kami"]),
        BoneCategory::prefix("face", &["j_f_"]),
        BoneCategory::prefix("eyes", &["j_f_eye", "j_f_mab", "j_f_umab", "j_f_dmab"]),
        BoneCategory::prefix("lips", &["j_f_lip", "j_f_ulip", "j_f_dlip"]),
        BoneCategory::prefix("jaw", &["j_f_ago", "j_ago"]),
        BoneCategory::prefix("body", &["n_root", "n_hara", "j_kosi", "j_sebo", "j_mune", "j_sako"]),
        BoneCategory::prefix("arms", &["j_ude", "n_hhiji", "n_hte", "n_hkata"]),
        BoneCategory::prefix("hands", &["j_te", "j_oya", "j_hito", "j_naka", "j_kusu", "j_ko_"]),
        BoneCategory::prefix("legs", &["j_asi", "n_hizasoboro"]),
        BoneCategory::prefix("tail", &["n_sippo"]),
        BoneCategory::prefix("clothing", &["j_sk_"]),
        BoneCategory::prefix("ex", &["j_ex_"]),
        BoneCategory::prefix(WEAPON_CATEGORY, &[]),
        BoneCategory::prefix(ORNAMENT_CATEGORY, &[]),
        BoneCategory::prefix(OTHER_CATEGORY, &[]),
    ]
});

/// 按分类开关过滤骨骼
///
/// 武器槽位只看 weapon 分类；不属于任何分类的骨骼看 other 分类。
#[derive(Clone, Debug)]
pub struct BoneFilter {
    categories: Vec<BoneCategory>,
    allowed: BTreeSet<String>,
    excluded_prefixes: BTreeSet<String>,
    cache: RefCell<HashMap<String, bool>>,
}

impl Default for BoneFilter {
    fn default() -> Self {
        Self::new(DEFAULT_BONE_CATEGORIES.clone())
    }
}

impl BoneFilter {
    /// 所有分类默认启用；伪分类总是补齐
    pub fn new(categories: Vec<BoneCategory>) -> Self {
        let mut categories: Vec<BoneCategory> =
            categories.into_iter().filter(|c| !c.is_pseudo()).collect();
        for id in [WEAPON_CATEGORY, ORNAMENT_CATEGORY, OTHER_CATEGORY] {
            categories.push(BoneCategory::prefix(id, &[]));
        }
        let allowed = categories.iter().map(|c| c.id.clone()).collect();
        Self {
            categories,
            allowed,
            excluded_prefixes: BTreeSet::new(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn categories(&self) -> &[BoneCategory] {
        &self.categories
    }

    pub fn is_bone_valid(&self, bone_name: &str, slot: PoseSlot, is_hidden: bool, consider_hidden: bool) -> bool {
        if is_hidden && !consider_hidden {
            return false;
        }
        if self.excluded_prefixes.iter().any(|p| bone_name.starts_with(p.as_str())) {
            return false;
        }
        if slot.is_weapon() {
            return self.weapons_allowed();
        }
        if let Some(&valid) = self.cache.borrow().get(bone_name) {
            return valid;
        }

        let mut found = false;
        let mut valid = false;
        for category in self.categories.iter().filter(|c| c.matches(bone_name)) {
            found = true;
            if self.allowed.contains(&category.id) {
                valid = true;
                break;
            }
        }
        if !found {
            valid = self.other_allowed();
        }
        self.cache.borrow_mut().insert(bone_name.to_string(), valid);
        valid
    }

    pub fn weapons_allowed(&self) -> bool {
        self.allowed.contains(WEAPON_CATEGORY)
    }

    pub fn other_allowed(&self) -> bool {
        self.allowed.contains(OTHER_CATEGORY)
    }

    pub fn is_category_enabled(&self, id: &str) -> bool {
        self.allowed.contains(id)
    }

    pub fn enable_category(&mut self, id: &str) {
        self.cache.get_mut().clear();
        self.allowed.insert(id.to_string());
    }

    pub fn disable_category(&mut self, id: &str) {
        self.cache.get_mut().clear();
        self.allowed.remove(id);
    }

    pub fn enable_only(&mut self, id: &str) {
        self.cache.get_mut().clear();
        self.allowed.clear();
        self.allowed.insert(id.to_string());
    }

    pub fn enable_all(&mut self) {
        self.cache.get_mut().clear();
        self.allowed = self.categories.iter().map(|c| c.id.clone()).collect();
    }

    pub fn disable_all(&mut self) {
        self.cache.get_mut().clear();
        self.allowed.clear();
    }

    pub fn add_excluded_prefix(&mut self, prefix: &str) {
        self.cache.get_mut().clear();
        self.excluded_prefixes.insert(prefix.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_toggle() {
        let mut filter = BoneFilter::default();
        assert!(filter.is_bone_valid("j_kao", PoseSlot::Character, false, false));
        filter.disable_category("head");
        assert!(!filter.is_bone_valid("j_kao", PoseSlot::Character, false, false));
        filter.enable_only("head");
        assert!(filter.is_bone_valid("j_kubi", PoseSlot::Character, false, false));
        assert!(!filter.is_bone_valid("j_asi_a_l", PoseSlot::Character, false, false));
    }

    #[test]
    fn test_face_bone_in_any_enabled_category() {
        // j_f_eye_l 同时属于 face 和 eyes
        let mut filter = BoneFilter::default();
        filter.disable_category("face");
        assert!(filter.is_bone_valid("j_f_eye_l", PoseSlot::Character, false, false));
        assert!(!filter.is_bone_valid("j_f_mayu_l", PoseSlot::Character, false, false));
    }

    #[test]
    fn test_weapon_and_other() {
        let mut filter = BoneFilter::default();
        assert!(filter.is_bone_valid("n_buki", PoseSlot::MainHand, false, false));
        assert!(filter.is_bone_valid("n_unknown", PoseSlot::Character, false, false));
        filter.disable_category(WEAPON_CATEGORY);
        filter.disable_category(OTHER_CATEGORY);
        assert!(!filter.is_bone_valid("n_buki", PoseSlot::MainHand, false, false));
        assert!(!filter.is_bone_valid("n_unknown", PoseSlot::Character, false, false));
    }

    #[test]
    fn test_hidden_and_excluded() {
        let mut filter = BoneFilter::default();
        assert!(!filter.is_bone_valid("j_kao", PoseSlot::Character, true, false));
        assert!(filter.is_bone_valid("j_kao", PoseSlot::Character, true, true));
        filter.add_excluded_prefix("j_ka");
        assert!(!filter.is_bone_valid("j_kao", PoseSlot::Character, false, false));
    }
}
