//! Lineage graph traversal
//!
//! All queries walk the edge relation of the store one hop at a time. The
//! transitive ones are breadth-first with a visited set, so diamond-shaped
//! lineage yields each artifact once.

use std::collections::{HashSet, VecDeque};

use super::load_artifact;
use crate::domain::entities::{ArtifactId, PrepTemplateId};
use crate::error::Result;
use crate::repository::{LineageTx, RowLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

async fn neighbours(
    tx: &mut dyn LineageTx,
    id: ArtifactId,
    direction: Direction,
) -> Result<Vec<ArtifactId>> {
    match direction {
        Direction::Up => tx.parent_ids(id).await,
        Direction::Down => tx.child_ids(id).await,
    }
}

/// Every artifact reachable from `id` in `direction`, in discovery order
async fn closure(
    tx: &mut dyn LineageTx,
    id: ArtifactId,
    direction: Direction,
) -> Result<Vec<ArtifactId>> {
    load_artifact(tx, id, RowLock::None).await?;

    let mut reached = Vec::new();
    let mut visited = HashSet::from([id]);
    let mut queue = VecDeque::from([id]);

    while let Some(current) = queue.pop_front() {
        for next in neighbours(tx, current, direction).await? {
            if visited.insert(next) {
                reached.push(next);
                queue.push_back(next);
            }
        }
    }

    Ok(reached)
}

/// Direct parents of `id`
pub async fn parents_tx(tx: &mut dyn LineageTx, id: ArtifactId) -> Result<Vec<ArtifactId>> {
    load_artifact(tx, id, RowLock::None).await?;
    tx.parent_ids(id).await
}

/// Direct children of `id`
pub async fn children_tx(tx: &mut dyn LineageTx, id: ArtifactId) -> Result<Vec<ArtifactId>> {
    load_artifact(tx, id, RowLock::None).await?;
    tx.child_ids(id).await
}

/// Parentless artifacts `id` descends from, ascending.
///
/// A root artifact is its own root.
pub async fn roots_tx(tx: &mut dyn LineageTx, id: ArtifactId) -> Result<Vec<ArtifactId>> {
    load_artifact(tx, id, RowLock::None).await?;

    let mut roots = Vec::new();
    let mut visited = HashSet::from([id]);
    let mut queue = VecDeque::from([id]);

    while let Some(current) = queue.pop_front() {
        let parents = tx.parent_ids(current).await?;
        if parents.is_empty() {
            roots.push(current);
            continue;
        }
        for parent in parents {
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }

    roots.sort();
    Ok(roots)
}

/// All transitive parents of `id`, excluding `id`
pub async fn ancestors_tx(tx: &mut dyn LineageTx, id: ArtifactId) -> Result<Vec<ArtifactId>> {
    closure(tx, id, Direction::Up).await
}

/// All transitive children of `id`, excluding `id`
pub async fn descendants_tx(tx: &mut dyn LineageTx, id: ArtifactId) -> Result<Vec<ArtifactId>> {
    closure(tx, id, Direction::Down).await
}

/// Upload templates feeding `id` directly or through any ancestor
pub async fn prep_templates_tx(
    tx: &mut dyn LineageTx,
    id: ArtifactId,
) -> Result<Vec<PrepTemplateId>> {
    let roots = roots_tx(tx, id).await?;
    tx.prep_templates_linked_to(&roots).await
}
