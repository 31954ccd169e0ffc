//! Cached-result cursor for one filter and the diff between its snapshots.

use std::collections::HashMap;

use super::changes::ChangeRecord;
use crate::cache::CachedRow;

/// Snapshot of the cached rows of one filter, sorted by order.
#[derive(Debug)]
pub struct CacheCursor<E> {
  filter_id: String,
  rows: Vec<CachedRow<E>>,
}

impl<E: PartialEq> CacheCursor<E> {
  pub fn new(filter_id: impl Into<String>) -> Self {
    Self {
      filter_id: filter_id.into(),
      rows: Vec::new(),
    }
  }

  pub fn filter_id(&self) -> &str {
    &self.filter_id
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn rows(&self) -> &[CachedRow<E>] {
    &self.rows
  }

  /// Swap in a fresh snapshot and return the changes between what was and
  /// what will be visible: the first `old_visible` old rows against at most
  /// `limit` new rows.
  pub fn replace(
    &mut self,
    rows: Vec<CachedRow<E>>,
    old_visible: usize,
    limit: Option<usize>,
  ) -> Vec<ChangeRecord> {
    let old_visible = old_visible.min(self.rows.len());
    let new_visible = limit.map_or(rows.len(), |limit| limit.min(rows.len()));
    let changes = diff_rows(&self.rows[..old_visible], &rows[..new_visible]);
    self.rows = rows;
    changes
  }
}

/// Keyed diff of two row snapshots.
///
/// Rows are matched by key (and occurrence, for repeated keys). Unmatched old
/// rows are deletes, unmatched new rows are inserts. Matched rows outside one
/// longest order-preserving run are moves; the rest are updates when their
/// entity changed.
fn diff_rows<E: PartialEq>(old: &[CachedRow<E>], new: &[CachedRow<E>]) -> Vec<ChangeRecord> {
  let old_ids = identities(old);
  let new_ids = identities(new);

  let old_index: HashMap<(&str, usize), usize> =
    old_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
  let new_index: HashMap<(&str, usize), usize> =
    new_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

  let mut changes = Vec::new();
  let mut common: Vec<(usize, usize)> = Vec::new();

  for (old_pos, id) in old_ids.iter().enumerate() {
    match new_index.get(id) {
      Some(&new_pos) => common.push((old_pos, new_pos)),
      None => changes.push(ChangeRecord::Delete(old_pos)),
    }
  }

  for (new_pos, id) in new_ids.iter().enumerate() {
    if !old_index.contains_key(id) {
      changes.push(ChangeRecord::Insert(new_pos));
    }
  }

  let targets: Vec<usize> = common.iter().map(|&(_, new_pos)| new_pos).collect();
  let stable = longest_increasing_run(&targets);

  for (i, &(old_pos, new_pos)) in common.iter().enumerate() {
    if !stable[i] {
      changes.push(ChangeRecord::Move {
        from: old_pos,
        to: new_pos,
      });
    } else if old[old_pos].entity != new[new_pos].entity {
      changes.push(ChangeRecord::Update(old_pos));
    }
  }

  changes
}

fn identities<E>(rows: &[CachedRow<E>]) -> Vec<(&str, usize)> {
  let mut seen: HashMap<&str, usize> = HashMap::new();
  rows
    .iter()
    .map(|row| {
      let occurrence = seen.entry(row.key.as_str()).or_insert(0);
      let id = (row.key.as_str(), *occurrence);
      *occurrence += 1;
      id
    })
    .collect()
}

/// Marks the members of one longest strictly increasing subsequence.
fn longest_increasing_run(values: &[usize]) -> Vec<bool> {
  // tails[k]: index of the smallest tail of an increasing run of length k + 1
  let mut tails: Vec<usize> = Vec::new();
  let mut previous: Vec<Option<usize>> = vec![None; values.len()];

  for (i, &value) in values.iter().enumerate() {
    let pos = tails.partition_point(|&t| values[t] < value);
    if pos > 0 {
      previous[i] = Some(tails[pos - 1]);
    }
    if pos == tails.len() {
      tails.push(i);
    } else {
      tails[pos] = i;
    }
  }

  let mut member = vec![false; values.len()];
  let mut cursor = tails.last().copied();
  while let Some(i) = cursor {
    member[i] = true;
    cursor = previous[i];
  }
  member
}
