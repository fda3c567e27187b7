//! Breadth-first traversals over group membership edges
//!
//! Every traversal keeps a visited set, so diamonds are expanded once and a
//! corrupt cyclic graph still terminates.

use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

use crate::error::Result;
use crate::store::StoreTransaction;
use crate::types::GroupId;

#[derive(Debug, Clone, Copy)]
enum Direction {
    Parents,
    Children,
}

/// Groups reachable from `seeds` (inclusive) following `direction`
async fn walk(
    tx: &mut dyn StoreTransaction,
    seeds: Vec<GroupId>,
    direction: Direction,
) -> Result<BTreeSet<GroupId>> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<GroupId> = seeds.into();

    while let Some(group) = queue.pop_front() {
        if !visited.insert(group) {
            continue;
        }
        let next = match direction {
            Direction::Parents => tx.parent_group_ids(group).await?,
            Direction::Children => tx.child_group_ids(group).await?,
        };
        queue.extend(next.into_iter().filter(|g| !visited.contains(g)));
    }

    Ok(visited)
}

/// Whether `user` is a direct or transitive member of `group`
pub async fn is_user_member_of(
    tx: &mut dyn StoreTransaction,
    user: &str,
    group: GroupId,
) -> Result<bool> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<GroupId> = tx.groups_with_user(user).await?.into();

    while let Some(current) = queue.pop_front() {
        if current == group {
            return Ok(true);
        }
        if !visited.insert(current) {
            continue;
        }
        let parents = tx.parent_group_ids(current).await?;
        queue.extend(parents.into_iter().filter(|g| !visited.contains(g)));
    }

    Ok(false)
}

/// Every group `user` belongs to, directly or through child groups
pub async fn groups_user_is_member_of(
    tx: &mut dyn StoreTransaction,
    user: &str,
) -> Result<BTreeSet<GroupId>> {
    let direct = tx.groups_with_user(user).await?;
    let groups = walk(tx, direct, Direction::Parents).await?;

    debug!("User '{}' is member of groups {:?}", user, groups);
    Ok(groups)
}

/// Groups having `group` as a (transitive) child, excluding `group` itself
pub async fn ancestors(tx: &mut dyn StoreTransaction, group: GroupId) -> Result<BTreeSet<GroupId>> {
    let parents = tx.parent_group_ids(group).await?;
    walk(tx, parents, Direction::Parents).await
}

/// Groups reachable from `group` through child edges, excluding `group` itself
pub async fn descendants(
    tx: &mut dyn StoreTransaction,
    group: GroupId,
) -> Result<BTreeSet<GroupId>> {
    let children = tx.child_group_ids(group).await?;
    walk(tx, children, Direction::Children).await
}

/// Groups that must not become children of `group`
///
/// `group` itself (self-loop), its ancestors (cycle) and its descendants
/// (duplicate or redundant edge).
pub async fn disallowed_child_group_ids_for(
    tx: &mut dyn StoreTransaction,
    group: GroupId,
) -> Result<BTreeSet<GroupId>> {
    let mut disallowed = ancestors(tx, group).await?;
    disallowed.extend(descendants(tx, group).await?);
    disallowed.insert(group);
    Ok(disallowed)
}
