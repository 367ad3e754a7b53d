// RFC 5267 CONTEXT/UPDATE: a search-with-UPDATE becomes a named live result set keyed by the
// command tag (spec.md §4.4). Membership/position changes are diffed against the previous
// snapshot and rendered as ADDTO/REMOVEFROM; default cap of 8 live contexts per session.

use crate::wire::types::{SearchKey, SortCriterion};

pub const MAX_CONTEXTS_PER_SESSION: usize = 8;

#[derive(Debug, Clone)]
pub struct LiveContext {
  pub tag: String,
  pub uid: bool,
  pub sorted: Option<Vec<SortCriterion>>,
  /// Ordered (for sorted contexts, rank order; otherwise ascending UID) snapshot of member UIDs.
  pub members: Vec<u32>,
  /// The SEARCH key this context was registered with, re-evaluated against the mailbox on every
  /// change so ADDTO/REMOVEFROM deltas (RFC 5267 §4) can be computed.
  pub key: SearchKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
  AddTo { position: Option<u32>, uid: u32 },
  RemoveFrom { position: Option<u32>, uid: u32 },
}

impl LiveContext {
  pub fn new(tag: String, uid: bool, sorted: Option<Vec<SortCriterion>>, members: Vec<u32>, key: SearchKey) -> Self {
    Self { tag, uid, sorted, members, key }
  }

  /// Replaces the live member list with `new_members` (already filtered+sorted/ranked by the
  /// caller) and returns the ADDTO/REMOVEFROM deltas, in observation order.
  pub fn diff_and_update(&mut self, new_members: Vec<u32>) -> Vec<Update> {
    let mut updates = Vec::new();
    for (i, uid) in self.members.iter().enumerate() {
      if !new_members.contains(uid) {
        let position = self.sorted.is_some().then_some(i as u32 + 1);
        updates.push(Update::RemoveFrom { position, uid: *uid });
      }
    }
    for (i, uid) in new_members.iter().enumerate() {
      if !self.members.contains(uid) {
        let position = self.sorted.is_some().then_some(i as u32 + 1);
        updates.push(Update::AddTo { position, uid: *uid });
      }
    }
    self.members = new_members;
    updates
  }
}

pub struct ContextTable {
  contexts: Vec<LiveContext>,
}

impl Default for ContextTable {
  fn default() -> Self {
    Self::new()
  }
}

impl ContextTable {
  pub fn new() -> Self {
    Self { contexts: Vec::new() }
  }

  pub fn try_register(&mut self, context: LiveContext) -> Result<(), &'static str> {
    if self.contexts.len() >= MAX_CONTEXTS_PER_SESSION {
      return Err("NOUPDATE");
    }
    self.contexts.push(context);
    Ok(())
  }

  pub fn cancel(&mut self, tag: &str) -> bool {
    let before = self.contexts.len();
    self.contexts.retain(|c| c.tag != tag);
    self.contexts.len() != before
  }

  pub fn get_mut(&mut self, tag: &str) -> Option<&mut LiveContext> {
    self.contexts.iter_mut().find(|c| c.tag == tag)
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LiveContext> {
    self.contexts.iter_mut()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_member_produces_addto() {
    let mut ctx = LiveContext::new("a1".into(), true, None, vec![1, 2], SearchKey::All);
    let updates = ctx.diff_and_update(vec![1, 2, 3]);
    assert_eq!(updates, vec![Update::AddTo { position: None, uid: 3 }]);
  }

  #[test]
  fn removed_member_produces_removefrom() {
    let mut ctx = LiveContext::new("a1".into(), true, None, vec![1, 2, 3], SearchKey::All);
    let updates = ctx.diff_and_update(vec![1, 3]);
    assert_eq!(updates, vec![Update::RemoveFrom { position: None, uid: 2 }]);
  }

  #[test]
  fn sorted_context_reports_rank_positions() {
    let mut ctx = LiveContext::new("a1".into(), true, Some(vec![]), vec![1], SearchKey::All);
    let updates = ctx.diff_and_update(vec![1, 2]);
    assert_eq!(updates, vec![Update::AddTo { position: Some(2), uid: 2 }]);
  }

  #[test]
  fn table_rejects_beyond_cap() {
    let mut table = ContextTable::new();
    for i in 0..MAX_CONTEXTS_PER_SESSION {
      table.try_register(LiveContext::new(format!("t{i}"), false, None, vec![], SearchKey::All)).unwrap();
    }
    let result = table.try_register(LiveContext::new("overflow".into(), false, None, vec![], SearchKey::All));
    assert_eq!(result, Err("NOUPDATE"));
  }

  #[test]
  fn cancel_removes_by_tag() {
    let mut table = ContextTable::new();
    table.try_register(LiveContext::new("t1".into(), false, None, vec![], SearchKey::All)).unwrap();
    assert!(table.cancel("t1"));
    assert!(table.get_mut("t1").is_none());
  }
}
