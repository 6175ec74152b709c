//! Component B: the replicated state machine. A fixed-length mapping
//! from `Position` to `String`, plus reversible application of
//! `Command`s so a follower that discovers a log inconsistency can
//! undo entries it had already applied (spec.md §4.B, §9 "Reversible
//! application").

use std::collections::HashMap;

use crate::types::{Action, Command, Position};

/// The replicated register: `K` string slots, indexed from 1.
#[derive(Debug, Clone, Default)]
pub struct SlotStore {
    slots: HashMap<Position, String>,
}

impl SlotStore {
    /// Builds a store from the cluster-wide seed in configuration
    /// (spec.md §4.G, §6 `dict_data`).
    pub fn from_seed(seed: HashMap<Position, String>) -> Self {
        SlotStore { slots: seed }
    }

    pub fn get(&self, position: Position) -> Option<&str> {
        self.slots.get(&position).map(String::as_str)
    }

    /// A plain clone of the current slots, for serializing into a
    /// snapshot (spec.md §6 `dict_data`).
    pub fn to_map(&self) -> HashMap<Position, String> {
        self.slots.clone()
    }

    /// Applies `cmd` to the store if it has not already been applied.
    ///
    /// On a fresh application: records the pre-image in `cmd.old_value`,
    /// writes `cmd.new_value` into the slot for `SET`, and marks
    /// `cmd.executed`. `GET` never mutates the store but still records
    /// `old_value` for symmetry with `SET`, per spec.md §4.B.
    ///
    /// Idempotent: a command already marked `executed` is a no-op, which
    /// is how duplicate application of the same log entry (e.g. a
    /// restart replay) is made safe.
    pub fn apply(&mut self, cmd: &mut Command) {
        if cmd.executed {
            return;
        }

        let prior = self.slots.get(&cmd.position).cloned();
        cmd.old_value = prior;

        if cmd.action == Action::Set {
            // The wire codec doesn't enforce this: `Command.new_value` is a
            // plain `Option` (codec.rs), so a malformed `WireMessage` with
            // `action: SET` and no `new_value` decodes successfully and
            // reaches here. `Command::new_set` is the only constructor used
            // on every path that builds one, so this holds in practice.
            let new_value = cmd
                .new_value
                .clone()
                .expect("SET command must carry a new_value");
            self.slots.insert(cmd.position, new_value);
        }

        cmd.executed = true;
    }

    /// Reverses a previously applied command, restoring the pre-image
    /// captured in `cmd.old_value`.
    ///
    /// Deliberately leaves `cmd.executed` unchanged: the command object
    /// still remembers it was once applied, so a later re-apply of the
    /// *same* log entry (e.g. because it survived truncation and was
    /// re-appended unchanged) is still recognizable as already-applied
    /// by log-matching, and a genuinely different command at the same
    /// index is a fresh `Command` with `executed = false`.
    pub fn revert(&mut self, cmd: &Command) {
        if !cmd.executed {
            return;
        }

        match &cmd.old_value {
            Some(v) => {
                self.slots.insert(cmd.position, v.clone());
            }
            None => {
                self.slots.remove(&cmd.position);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Command;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn set_records_old_value_and_marks_executed() {
        let mut store = SlotStore::from_seed(HashMap::from([(1, "a".to_string())]));
        let mut cmd = Command::new_set(addr(), "s-1".into(), 1, "b".into());

        store.apply(&mut cmd);

        assert_eq!(store.get(1), Some("b"));
        assert_eq!(cmd.old_value.as_deref(), Some("a"));
        assert!(cmd.executed);
    }

    #[test]
    fn get_does_not_mutate_but_records_old_value() {
        let mut store = SlotStore::from_seed(HashMap::from([(2, "x".to_string())]));
        let mut cmd = Command::new_get(addr(), "s-2".into(), 2);

        store.apply(&mut cmd);

        assert_eq!(store.get(2), Some("x"));
        assert_eq!(cmd.old_value.as_deref(), Some("x"));
        assert!(cmd.executed);
    }

    #[test]
    fn double_apply_is_a_no_op() {
        let mut store = SlotStore::from_seed(HashMap::from([(1, "a".to_string())]));
        let mut cmd = Command::new_set(addr(), "s-1".into(), 1, "b".into());

        store.apply(&mut cmd);
        store.apply(&mut cmd); // already executed; must not re-derive old_value from "b"

        assert_eq!(cmd.old_value.as_deref(), Some("a"));
        assert_eq!(store.get(1), Some("b"));
    }

    #[test]
    fn revert_restores_pre_image_and_keeps_executed_flag() {
        let mut store = SlotStore::from_seed(HashMap::from([(1, "a".to_string())]));
        let mut cmd = Command::new_set(addr(), "s-1".into(), 1, "b".into());
        store.apply(&mut cmd);

        store.revert(&cmd);

        assert_eq!(store.get(1), Some("a"));
        assert!(cmd.executed);
    }

    #[test]
    fn revert_of_unexecuted_command_is_a_no_op() {
        let mut store = SlotStore::from_seed(HashMap::from([(1, "a".to_string())]));
        let cmd = Command::new_set(addr(), "s-1".into(), 1, "b".into());

        store.revert(&cmd);

        assert_eq!(store.get(1), Some("a"));
    }
}
