//! Row-level change records emitted to list consumers.

/// One row change. Deletes and updates carry old positions, inserts new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeRecord {
  Insert(usize),
  Update(usize),
  Delete(usize),
  Move { from: usize, to: usize },
}

impl ChangeRecord {
  /// Whether the change fits a list that showed `old_rows` rows and now shows
  /// `new_rows`: old positions below the former, new positions below the latter.
  pub fn is_within(&self, old_rows: usize, new_rows: usize) -> bool {
    match *self {
      ChangeRecord::Insert(pos) => pos < new_rows,
      ChangeRecord::Update(pos) | ChangeRecord::Delete(pos) => pos < old_rows,
      ChangeRecord::Move { from, to } => from < old_rows && to < new_rows,
    }
  }
}
