//! Plan Validator
//!
//! Turns any draft plan into one that is safe to execute:
//!
//! 1. Drop steps naming tools outside the whitelist
//! 2. De-duplicate by tool, keeping the first occurrence
//! 3. Append missing whitelisted tools with their default identifiers
//! 4. Add precedence edges for every pair ordered against the canonical order
//! 5. Stable topological sort; canonical order if no valid order exists
//! 6. Enforce expansion < trim < render explicitly
//!
//! Validation never fails. A non-empty `errors` list on the result means the
//! canonical fallback was used.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use tracing::{debug, warn};

use crate::conductor::types::{Plan, PlanStep, ValidatedPlan};
use sdk::ToolKind;

#[derive(Debug, Default)]
pub struct PlanValidator;

impl PlanValidator {
    pub fn new() -> Self {
        Self
    }

    /// Produce an executable plan from a draft.
    pub fn validate(&self, draft: &Plan) -> ValidatedPlan {
        let mut repairs = Vec::new();
        let mut errors = Vec::new();

        // 1 + 2: whitelist and de-duplicate
        let mut seen = HashSet::new();
        let mut steps: Vec<(ToolKind, PlanStep)> = Vec::with_capacity(ToolKind::ALL.len());
        for step in &draft.steps {
            let Some(kind) = step.kind() else {
                repairs.push(format!(
                    "dropped step '{}': unknown tool '{}'",
                    step.id, step.tool
                ));
                continue;
            };
            if !seen.insert(kind) {
                repairs.push(format!(
                    "dropped step '{}': duplicate of tool '{}'",
                    step.id, kind
                ));
                continue;
            }
            steps.push((kind, step.clone()));
        }

        // 3: insert whatever is missing
        for kind in ToolKind::ALL {
            if seen.insert(kind) {
                repairs.push(format!(
                    "inserted missing tool '{}' as step '{}'",
                    kind,
                    kind.default_step_id()
                ));
                steps.push((kind, PlanStep::canonical(kind)));
            }
        }

        make_ids_unique(&mut steps, &mut repairs);

        // 4: edges for pairs that disagree with canonical order
        let mut edges = Vec::new();
        for p in 0..steps.len() {
            for q in (p + 1)..steps.len() {
                let (earlier, later) = (steps[p].0, steps[q].0);
                if earlier.canonical_index() > later.canonical_index() {
                    edges.push((q, p));
                }
            }
        }

        // 5: stable topological sort
        let keys: Vec<(usize, usize)> = steps
            .iter()
            .enumerate()
            .map(|(position, (kind, _))| (kind.canonical_index(), position))
            .collect();
        let mut ordered: Vec<(ToolKind, PlanStep)> =
            match stable_topological_sort(&keys, &edges) {
                Some(order) => {
                    if !edges.is_empty() {
                        repairs.push(format!(
                            "reordered plan to respect {} precedence constraint(s)",
                            edges.len()
                        ));
                    }
                    let mut slots: Vec<Option<(ToolKind, PlanStep)>> =
                        steps.into_iter().map(Some).collect();
                    order.into_iter().filter_map(|i| slots[i].take()).collect()
                }
                None => {
                    errors.push(
                        "precedence constraints contain a cycle; using canonical order"
                            .to_string(),
                    );
                    steps.sort_by_key(|(kind, _)| kind.canonical_index());
                    steps
                }
            };

        // 6: hard constraints, checked regardless of the sort
        enforce_after(
            &mut ordered,
            ToolKind::Render,
            ToolKind::TrimToLength,
            &mut repairs,
        );
        enforce_after(
            &mut ordered,
            ToolKind::TrimToLength,
            ToolKind::TemporalExpansion,
            &mut repairs,
        );

        for message in &repairs {
            debug!("Plan repair: {}", message);
        }
        for error in &errors {
            warn!("Plan validation error: {}", error);
        }

        ValidatedPlan {
            steps: ordered.into_iter().map(|(_, step)| step).collect(),
            repaired: !repairs.is_empty() || !errors.is_empty(),
            repairs,
            errors,
        }
    }
}

/// Rename steps whose identifier is already taken so resume-by-id is unambiguous.
fn make_ids_unique(steps: &mut [(ToolKind, PlanStep)], repairs: &mut Vec<String>) {
    let mut taken = HashSet::new();
    for (_, step) in steps.iter_mut() {
        if taken.insert(step.id.clone()) {
            continue;
        }
        let mut n = 2;
        let mut candidate = format!("{}-{}", step.id, n);
        while taken.contains(&candidate) {
            n += 1;
            candidate = format!("{}-{}", step.id, n);
        }
        repairs.push(format!(
            "renamed duplicate step id '{}' to '{}'",
            step.id, candidate
        ));
        step.id = candidate.clone();
        taken.insert(candidate);
    }
}

/// Kahn's algorithm; ready nodes are taken smallest key first.
///
/// Returns `None` when the edges contain a cycle.
fn stable_topological_sort(keys: &[(usize, usize)], edges: &[(usize, usize)]) -> Option<Vec<usize>> {
    let n = keys.len();
    let mut indegree = vec![0usize; n];
    let mut successors = vec![Vec::new(); n];
    for &(from, to) in edges {
        successors[from].push(to);
        indegree[to] += 1;
    }

    let mut ready: BinaryHeap<Reverse<((usize, usize), usize)>> = (0..n)
        .filter(|&i| indegree[i] == 0)
        .map(|i| Reverse((keys[i], i)))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse((_, node))) = ready.pop() {
        order.push(node);
        for &next in &successors[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse((keys[next], next)));
            }
        }
    }

    (order.len() == n).then_some(order)
}

/// Move `tool` directly after `anchor` if it currently comes before it.
fn enforce_after(
    steps: &mut Vec<(ToolKind, PlanStep)>,
    tool: ToolKind,
    anchor: ToolKind,
    repairs: &mut Vec<String>,
) {
    let position = |steps: &[(ToolKind, PlanStep)], kind: ToolKind| {
        steps.iter().position(|(k, _)| *k == kind)
    };
    let (Some(tool_at), Some(anchor_at)) = (position(steps, tool), position(steps, anchor)) else {
        return;
    };
    if tool_at < anchor_at {
        let moved = steps.remove(tool_at);
        // anchor shifted one slot left by the removal
        steps.insert(anchor_at, moved);
        repairs.push(format!("moved '{}' directly after '{}'", tool, anchor));
    }
}
