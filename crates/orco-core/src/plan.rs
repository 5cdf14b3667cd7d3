//! The §3 data model: [`Item`], [`Plan`], and the invariants that must hold
//! between top-level state transitions.

use std::collections::HashMap;

use orco_ids::HierarchicalId;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One item's position in its §4.12 replan lineage: a chain of
/// parent→child replans. Bounded at [`Replanner::MAX_LINEAGE_ROUNDS`]
/// (see `crate::replanner`); children inherit their parent's count + 1.
pub type ReplanRound = u32;

/// An item's lifecycle state. Transitions within the terminal set
/// `{Completed, Failed, Skipped, Replanned}` are one-way (invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not yet attempted; dependencies may or may not be satisfied.
    Pending,
    /// Dependencies unsatisfied as of the last scheduler visit.
    Blocked,
    /// Actively being planned/executed/verified.
    InProgress,
    /// Verified successfully.
    Completed,
    /// Exhausted its retry/replan budget with no successful replan.
    Failed,
    /// Abandoned by the Replanner or the blocked-check bound.
    Skipped,
    /// Superseded by child items; "resolved" once all children complete.
    Replanned,
}

impl ItemStatus {
    /// `true` for any status in the terminal set (invariant 4). Note that
    /// `Replanned` is terminal for *this* item even though its lineage
    /// continues through its children.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Replanned
        )
    }
}

/// A single plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Hierarchical identity; stable across replans.
    pub id: HierarchicalId,
    /// Natural-language imperative.
    pub action: String,
    /// Natural-language predicate the Verifier adjudicates.
    pub success_criteria: String,
    /// Ids that must be `completed` (or resolved-`replanned`) before this
    /// item is runnable.
    pub dependencies: Vec<HierarchicalId>,
    /// Set when this item was inserted by a replan.
    pub parent_id: Option<HierarchicalId>,
    /// Current lifecycle state.
    pub status: ItemStatus,
    /// Attempts made at primary execution (not counting replans).
    pub attempt: u32,
    /// Attempt budget before escalating to the Replanner. Default 1.
    pub max_attempts: u32,
    /// How many times the scheduler has found this item's dependencies
    /// unsatisfied (bounds starvation; invariant 7).
    pub blocked_check_count: u32,
    /// Replan rounds consumed by this item's lineage so far.
    pub replan_round: ReplanRound,
    /// Diagnostic: the last tool-call plan produced for this item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_plan: Option<serde_json::Value>,
    /// Diagnostic: the last execution summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<serde_json::Value>,
    /// Diagnostic: the last verification outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification: Option<serde_json::Value>,
    /// Why this item was replanned, when `status == Replanned`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replan_reason: Option<String>,
    /// Why this item was skipped, when `status == Skipped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Optional router pre-filter naming providers to prefer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<Vec<String>>,
    /// Opaque text for the event sink's TTS consumer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<String>,
}

impl Item {
    /// Construct a fresh, unattempted item.
    #[must_use]
    pub fn new(
        id: HierarchicalId,
        action: impl Into<String>,
        success_criteria: impl Into<String>,
        dependencies: Vec<HierarchicalId>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id,
            action: action.into(),
            success_criteria: success_criteria.into(),
            dependencies,
            parent_id: None,
            status: ItemStatus::Pending,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            blocked_check_count: 0,
            replan_round: 0,
            last_plan: None,
            last_execution: None,
            last_verification: None,
            replan_reason: None,
            skip_reason: None,
            provider_hint: None,
            tts: None,
        }
    }

    /// Whether this item still has primary-execution attempts left.
    #[must_use]
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// Planning mode chosen by the Planner's feasibility stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// The common case: a bounded, linear-ish plan.
    Standard,
    /// A plan the Planner judged to need deeper decomposition.
    Extended,
}

/// Context carried alongside a plan: the verbatim original request plus any
/// caller-supplied preferences (opaque key/value pairs; the core does not
/// interpret them).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanContext {
    /// The request exactly as received, before any normalization.
    pub original_request: String,
    /// Caller-supplied preferences, passed through untouched.
    #[serde(default)]
    pub preferences: HashMap<String, serde_json::Value>,
}

/// Running tally the engine updates as items complete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionProgress {
    /// Items that have reached `completed`.
    pub completed: usize,
    /// Items that have reached `failed` or `skipped`.
    pub failed_or_skipped: usize,
    /// Total items created so far (including replan-injected children).
    pub total: usize,
}

/// The mutable TODO list driving one session's run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identity (typically the session id).
    pub id: String,
    /// The request this plan answers.
    pub request: String,
    /// `standard` or `extended`, from the Planner's feasibility stage.
    pub mode: PlanMode,
    /// Planner's self-assessed complexity, `1..=10`.
    pub complexity: u8,
    /// Items in canonical insertion order (not natural-id order).
    pub items: Vec<Item>,
    /// Request context.
    pub context: PlanContext,
    /// Running progress tally.
    pub execution_progress: ExecutionProgress,
}

/// Upper bound on total items a single plan may accumulate across its
/// lifetime (initial items + every replan injection). Backs invariant 6.
pub const MAX_TOTAL_ITEMS: usize = 200;

impl Plan {
    /// Construct a plan from the Planner's initial item set. Ids are
    /// assigned by the caller (the Planner), in declaration order, as root
    /// ids — this constructor does not reassign them.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        request: impl Into<String>,
        mode: PlanMode,
        complexity: u8,
        items: Vec<Item>,
        context: PlanContext,
    ) -> Self {
        let total = items.len();
        Self {
            id: id.into(),
            request: request.into(),
            mode,
            complexity: complexity.clamp(1, 10),
            items,
            context,
            execution_progress: ExecutionProgress {
                total,
                ..Default::default()
            },
        }
    }

    /// Look up an item by id.
    #[must_use]
    pub fn find(&self, id: &HierarchicalId) -> Option<&Item> {
        self.items.iter().find(|i| &i.id == id)
    }

    /// Look up an item by id, mutably.
    #[must_use]
    pub fn find_mut(&mut self, id: &HierarchicalId) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| &i.id == id)
    }

    /// Index of an item by id, for the scheduler's index-based walk.
    #[must_use]
    pub fn index_of(&self, id: &HierarchicalId) -> Option<usize> {
        self.items.iter().position(|i| &i.id == id)
    }

    /// All current item ids, used as the "population" for
    /// [`orco_ids::HierarchicalId`] generator functions.
    #[must_use]
    pub fn ids(&self) -> Vec<HierarchicalId> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }

    /// Whether `dep` is satisfied: `completed`, or `replanned` with every
    /// direct child `completed` (§4.13 scheduler rule).
    #[must_use]
    pub fn dependency_satisfied(&self, dep: &HierarchicalId) -> bool {
        let Some(item) = self.find(dep) else {
            return false;
        };
        match item.status {
            ItemStatus::Completed => true,
            ItemStatus::Replanned => {
                let children = dep.children_of(&self.ids());
                !children.is_empty()
                    && children
                        .iter()
                        .all(|c| self.find(c).is_some_and(|i| i.status == ItemStatus::Completed))
            }
            _ => false,
        }
    }

    /// Dependencies of `item` that are not yet satisfied.
    #[must_use]
    pub fn unsatisfied_dependencies(&self, item: &Item) -> Vec<HierarchicalId> {
        item.dependencies
            .iter()
            .filter(|d| !self.dependency_satisfied(d))
            .cloned()
            .collect()
    }

    /// Rewrite `item`'s dependencies, substituting any `replanned` parent
    /// with its direct children (§4.13: after 5 blocked-checks).
    pub fn rewrite_replanned_dependencies(&mut self, id: &HierarchicalId) {
        let ids = self.ids();
        let replanned: std::collections::HashSet<HierarchicalId> = self
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Replanned)
            .map(|i| i.id.clone())
            .collect();

        let Some(item) = self.find_mut(id) else {
            return;
        };
        item.dependencies = item
            .dependencies
            .iter()
            .cloned()
            .flat_map(|dep| {
                if replanned.contains(&dep) {
                    dep.children_of(&ids).into_iter().cloned().collect::<Vec<_>>()
                } else {
                    vec![dep]
                }
            })
            .collect();
    }

    /// Assign fresh child ids under `parent_id` (in the order given),
    /// splice them into the plan immediately after the parent, and mark
    /// the parent `replanned`. Returns the new items' ids.
    ///
    /// Fails (without mutating) if any generated id would exceed the
    /// depth cap, or if the total item count would exceed
    /// [`MAX_TOTAL_ITEMS`] (invariant 6).
    pub fn inject_children(
        &mut self,
        parent_id: &HierarchicalId,
        new_items: Vec<(String, String, Vec<HierarchicalId>, u32)>,
        reason: impl Into<String>,
    ) -> Result<Vec<HierarchicalId>> {
        if self.items.len() + new_items.len() > MAX_TOTAL_ITEMS {
            return Err(Error::BudgetExhausted {
                item_id: parent_id.clone(),
                reason: "plan-wide item cap reached".into(),
            });
        }
        let parent_index = self
            .index_of(parent_id)
            .ok_or_else(|| Error::Invariant(format!("replan target {parent_id} not found")))?;
        let parent_round = self.items[parent_index].replan_round;

        let mut population = self.ids();
        let mut new_ids = Vec::with_capacity(new_items.len());
        let mut fresh_items = Vec::with_capacity(new_items.len());
        for (action, success_criteria, dependencies, max_attempts) in new_items {
            let child_id = orco_ids::HierarchicalId::generate_next_child(parent_id, &population)?;
            population.push(child_id.clone());
            let mut item = Item::new(child_id.clone(), action, success_criteria, dependencies, max_attempts);
            item.parent_id = Some(parent_id.clone());
            item.replan_round = parent_round + 1;
            new_ids.push(child_id);
            fresh_items.push(item);
        }

        self.items.splice(parent_index + 1..parent_index + 1, fresh_items);
        self.execution_progress.total = self.items.len();

        let parent = self
            .find_mut(parent_id)
            .expect("parent index resolved above");
        parent.status = ItemStatus::Replanned;
        parent.replan_reason = Some(reason.into());

        Ok(new_ids)
    }

    /// Recompute `execution_progress` from current item statuses.
    pub fn refresh_progress(&mut self) {
        let completed = self.items.iter().filter(|i| i.status == ItemStatus::Completed).count();
        let failed_or_skipped = self
            .items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Failed | ItemStatus::Skipped))
            .count();
        self.execution_progress = ExecutionProgress {
            completed,
            failed_or_skipped,
            total: self.items.len(),
        };
    }

    /// `true` once every item has reached a terminal status.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|i| i.status.is_terminal())
    }

    /// Success rate over non-replanned items (a `replanned` item's outcome
    /// is carried entirely by its children, so counting it separately
    /// would double-count).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let counted: Vec<&Item> = self
            .items
            .iter()
            .filter(|i| i.status != ItemStatus::Replanned)
            .collect();
        if counted.is_empty() {
            return 100.0;
        }
        let completed = counted.iter().filter(|i| i.status == ItemStatus::Completed).count();
        (completed as f64 / counted.len() as f64) * 100.0
    }

    /// Validate the §3 invariants that must hold between top-level state
    /// transitions. Intended for tests and defensive assertions, not the
    /// hot path.
    pub fn check_invariants(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for item in &self.items {
            if !seen.insert(item.id.clone()) {
                return Err(Error::Invariant(format!("duplicate item id {}", item.id)));
            }
            if let Some(parent) = &item.parent_id {
                let expected_parent = item.id.parent();
                if expected_parent.as_ref() != Some(parent) {
                    return Err(Error::Invariant(format!(
                        "item {} has parent_id {parent} but its id implies parent {:?}",
                        item.id, expected_parent
                    )));
                }
                if self.find(parent).is_none() {
                    return Err(Error::Invariant(format!(
                        "item {}'s parent_id {parent} does not exist",
                        item.id
                    )));
                }
            }
            if matches!(
                item.status,
                ItemStatus::Pending | ItemStatus::InProgress | ItemStatus::Blocked
            ) {
                for dep in &item.dependencies {
                    if self.find(dep).is_none() {
                        return Err(Error::Invariant(format!(
                            "item {}'s dependency {dep} does not exist",
                            item.id
                        )));
                    }
                }
            }
            if item.status == ItemStatus::Replanned {
                let children = item.id.children_of(&self.ids());
                if children.is_empty() {
                    return Err(Error::Invariant(format!(
                        "item {} is replanned but has no children",
                        item.id
                    )));
                }
            }
            if item.blocked_check_count > 10 {
                return Err(Error::Invariant(format!(
                    "item {}'s blocked_check_count {} exceeds bound",
                    item.id, item.blocked_check_count
                )));
            }
        }
        if self.items.len() > MAX_TOTAL_ITEMS {
            return Err(Error::Invariant(format!(
                "plan has {} items, exceeding cap {MAX_TOTAL_ITEMS}",
                self.items.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> HierarchicalId {
        s.parse().unwrap()
    }

    fn plan_with(items: Vec<Item>) -> Plan {
        Plan::new("p1", "do things", PlanMode::Standard, 3, items, PlanContext::default())
    }

    #[test]
    fn dependency_satisfied_requires_completed() {
        let mut a = Item::new(id("1"), "a", "a done", vec![], 1);
        a.status = ItemStatus::InProgress;
        let plan = plan_with(vec![a]);
        assert!(!plan.dependency_satisfied(&id("1")));
    }

    #[test]
    fn dependency_satisfied_via_replanned_children() {
        let mut a = Item::new(id("1"), "a", "a done", vec![], 1);
        a.status = ItemStatus::Replanned;
        let mut c1 = Item::new(id("1.1"), "a1", "a1 done", vec![], 1);
        c1.status = ItemStatus::Completed;
        let mut c2 = Item::new(id("1.2"), "a2", "a2 done", vec![], 1);
        c2.status = ItemStatus::Completed;
        let plan = plan_with(vec![a, c1, c2]);
        assert!(plan.dependency_satisfied(&id("1")));
    }

    #[test]
    fn dependency_not_satisfied_while_a_child_is_incomplete() {
        let mut a = Item::new(id("1"), "a", "a done", vec![], 1);
        a.status = ItemStatus::Replanned;
        let mut c1 = Item::new(id("1.1"), "a1", "a1 done", vec![], 1);
        c1.status = ItemStatus::Completed;
        let c2 = Item::new(id("1.2"), "a2", "a2 done", vec![], 1);
        let plan = plan_with(vec![a, c1, c2]);
        assert!(!plan.dependency_satisfied(&id("1")));
    }

    #[test]
    fn inject_children_assigns_ids_and_marks_parent_replanned() {
        let a = Item::new(id("2"), "open calc", "calc opens", vec![], 1);
        let mut plan = plan_with(vec![a]);
        let new_ids = plan
            .inject_children(
                &id("2"),
                vec![
                    ("wait".into(), "ready".into(), vec![], 1),
                    ("click".into(), "clicked".into(), vec![], 1),
                ],
                "verification failed",
            )
            .unwrap();
        assert_eq!(new_ids, vec![id("2.1"), id("2.2")]);
        assert_eq!(plan.find(&id("2")).unwrap().status, ItemStatus::Replanned);
        assert_eq!(plan.items.len(), 3);
        // spliced immediately after the parent
        assert_eq!(plan.items[1].id, id("2.1"));
        assert_eq!(plan.items[2].id, id("2.2"));
    }

    #[test]
    fn rewrite_replanned_dependencies_substitutes_children() {
        let mut a = Item::new(id("1"), "a", "a done", vec![], 1);
        a.status = ItemStatus::Replanned;
        let c1 = Item::new(id("1.1"), "a1", "a1 done", vec![], 1);
        let c2 = Item::new(id("1.2"), "a2", "a2 done", vec![], 1);
        let b = Item::new(id("2"), "b", "b done", vec![id("1")], 1);
        let mut plan = plan_with(vec![a, c1, c2, b]);
        plan.rewrite_replanned_dependencies(&id("2"));
        let deps = &plan.find(&id("2")).unwrap().dependencies;
        assert_eq!(deps, &vec![id("1.1"), id("1.2")]);
    }

    #[test]
    fn success_rate_ignores_replanned_markers() {
        let mut a = Item::new(id("1"), "a", "done", vec![], 1);
        a.status = ItemStatus::Completed;
        let mut b = Item::new(id("2"), "b", "done", vec![], 1);
        b.status = ItemStatus::Replanned;
        let mut c1 = Item::new(id("2.1"), "b1", "done", vec![], 1);
        c1.status = ItemStatus::Completed;
        let plan = plan_with(vec![a, b, c1]);
        assert_eq!(plan.success_rate(), 100.0);
    }

    #[test]
    fn check_invariants_catches_duplicate_ids() {
        let a = Item::new(id("1"), "a", "done", vec![], 1);
        let b = Item::new(id("1"), "b", "done", vec![], 1);
        let plan = plan_with(vec![a, b]);
        assert!(plan.check_invariants().is_err());
    }

    #[test]
    fn check_invariants_catches_replanned_without_children() {
        let mut a = Item::new(id("1"), "a", "done", vec![], 1);
        a.status = ItemStatus::Replanned;
        let plan = plan_with(vec![a]);
        assert!(plan.check_invariants().is_err());
    }
}
