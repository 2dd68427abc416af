use std::collections;

use tracing::{debug, warn};

use crate::config;
use crate::model::document;
use crate::model::document::change;
use crate::model::document::structure::ObjectId;

/// An applied change together with the change that reverts it.
#[derive(Debug, Clone)]
pub struct Command {
    pub forward: change::Change,
    pub inverse: change::Change,
    pub description: String,
}

impl Command {
    /// Folds a later update of the same object into this one. The earliest old values are kept, so undoing the
    /// merged command lands where the first update started.
    fn merge(&mut self, later: Command) -> Result<(), Command> {
        match (&mut self.forward, &mut self.inverse, later.forward, later.inverse) {
            (change::Change::Update { object, values },
             change::Change::Update { values: old_values, .. },
             change::Change::Update { object: later_object, values: later_values },
             change::Change::Update { values: later_old_values, .. }) if *object == later_object => {
                for (name, value) in later_values {
                    match values.iter_mut().find(|(n, _)| *n == name) {
                        Some(slot) => slot.1 = value,
                        None => values.push((name, value)),
                    }
                }

                for (name, old) in later_old_values {
                    if !old_values.iter().any(|(n, _)| *n == name) {
                        old_values.push((name, old));
                    }
                }

                self.description = later.description;
                Ok(())
            },
            (_, _, forward, inverse) => Err(Command {
                forward,
                inverse,
                description: later.description,
            }),
        }
    }
}

/// One undo step, with what was selected before its first command and after its last.
#[derive(Debug, Clone, Default)]
pub struct UndoItem {
    commands: Vec<Command>,
    selection_before: Vec<ObjectId>,
    selection_after: Vec<ObjectId>,
}

impl UndoItem {
    pub fn description(&self) -> Option<&str> {
        self.commands.last().map(|c| c.description.as_str())
    }

    /// Applies the inverses, last command first. Returns false if any of them no longer applied.
    pub fn revert(&mut self, host: &document::DocumentHost) -> bool {
        let mut intact = true;
        for command in self.commands.iter_mut().rev() {
            match host.change(command.inverse.clone()) {
                Ok((_, _, record)) => command.forward = record.inverse,
                Err(error) => {
                    warn!(%error, description = %command.description, "skipping undo command that no longer applies");
                    intact = false;
                },
            }
        }
        intact
    }

    /// Applies the forward changes again. Returns false if any of them no longer applied.
    pub fn replay(&mut self, host: &document::DocumentHost) -> bool {
        let mut intact = true;
        for command in self.commands.iter_mut() {
            match host.change(command.forward.clone()) {
                Ok((_, _, record)) => command.inverse = record.inverse,
                Err(error) => {
                    warn!(%error, description = %command.description, "skipping redo command that no longer applies");
                    intact = false;
                },
            }
        }
        intact
    }
}

/// Undo and redo stacks of command groups.
///
/// Commands accumulate in a current group. Outside combine mode each new command closes the previous group, so
/// every command is its own undo step. In combine mode everything executed joins one group until combining is
/// switched off again.
///
/// The selection reported through [`set_selection`](Self::set_selection) is remembered around each group and handed
/// back by undo and redo.
#[derive(Debug)]
pub struct UndoManager {
    undo_stack: collections::VecDeque<UndoItem>,
    redo_stack: Vec<UndoItem>,
    commands: Vec<Command>,
    selection: Vec<ObjectId>,
    selection_before_first_command: Vec<ObjectId>,
    combine_commands: bool,
    depth: usize,
    merge_updates: bool,
}

impl UndoManager {
    pub fn new(config: &config::Config) -> UndoManager {
        UndoManager {
            undo_stack: collections::VecDeque::new(),
            redo_stack: Vec::new(),
            commands: Vec::new(),
            selection: Vec::new(),
            selection_before_first_command: Vec::new(),
            combine_commands: false,
            depth: config.undo_depth,
            merge_updates: config.merge_updates_while_combining,
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.commands.clear();
    }

    fn push_item(&mut self, item: UndoItem) {
        self.undo_stack.push_back(item);
        if self.depth > 0 {
            while self.undo_stack.len() > self.depth {
                self.undo_stack.pop_front();
            }
        }
    }

    fn push_to_undo_stack(&mut self) {
        if !self.commands.is_empty() {
            let item = UndoItem {
                commands: std::mem::take(&mut self.commands),
                selection_before: std::mem::take(&mut self.selection_before_first_command),
                selection_after: self.selection.clone(),
            };
            self.push_item(item);
        }
    }

    /// Tells the manager what is selected now. Call it before executing, undoing or redoing.
    pub fn set_selection(&mut self, selection: Vec<ObjectId>) {
        self.selection = selection;
    }

    pub fn set_combine_commands(&mut self, value: bool) {
        self.push_to_undo_stack();
        self.combine_commands = value;
    }

    pub fn is_combining(&self) -> bool {
        self.combine_commands
    }

    /// Records a command whose forward change has already been applied.
    pub fn execute_command(&mut self, mut command: Command) {
        self.redo_stack.clear();

        if !self.combine_commands {
            self.push_to_undo_stack();
        }

        if self.commands.is_empty() {
            self.selection_before_first_command = self.selection.clone();
        } else if self.merge_updates {
            if let Some(last) = self.commands.last_mut() {
                match last.merge(command) {
                    Ok(()) => return,
                    Err(unmerged) => command = unmerged,
                }
            }
        }

        self.commands.push(command);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty() || !self.commands.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        match self.commands.last() {
            Some(command) => Some(command.description.as_str()),
            None => self.undo_stack.back().and_then(UndoItem::description),
        }
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().and_then(UndoItem::description)
    }

    /// Undo steps available, counting the group still being built.
    pub fn undo_len(&self) -> usize {
        self.undo_stack.len() + if self.commands.is_empty() { 0 } else { 1 }
    }

    /// Closes the current group and hands out the most recent step for reverting.
    pub fn take_undo(&mut self) -> Option<UndoItem> {
        self.push_to_undo_stack();
        self.undo_stack.pop_back()
    }

    pub fn take_redo(&mut self) -> Option<UndoItem> {
        self.redo_stack.pop()
    }

    /// Files a reverted step on the redo stack, or drops it if it didn't revert cleanly. Returns the selection from
    /// before the step.
    pub fn finish_undo(&mut self, item: UndoItem, intact: bool) -> Vec<ObjectId> {
        let selection = item.selection_before.clone();
        self.selection = selection.clone();

        if intact {
            debug!(description = item.description(), "undo");
            self.redo_stack.push(item);
        } else {
            warn!(description = item.description(), "discarding undo item that failed to replay");
        }

        selection
    }

    /// Files a replayed step back on the undo stack, or drops it. Returns the selection from after the step.
    pub fn finish_redo(&mut self, item: UndoItem, intact: bool) -> Vec<ObjectId> {
        let selection = item.selection_after.clone();
        self.selection = selection.clone();

        if intact {
            debug!(description = item.description(), "redo");
            self.push_item(item);
        } else {
            warn!(description = item.description(), "discarding redo item that failed to replay");
        }

        selection
    }

    /// Reverts the most recent group. Commands that no longer apply are skipped and the group is dropped instead
    /// of moving to the redo stack. Returns the selection to restore, or `None` if there was nothing to undo.
    pub fn undo(&mut self, host: &document::DocumentHost) -> Option<Vec<ObjectId>> {
        let mut item = self.take_undo()?;
        let intact = item.revert(host);
        Some(self.finish_undo(item, intact))
    }

    pub fn redo(&mut self, host: &document::DocumentHost) -> Option<Vec<ObjectId>> {
        let mut item = self.take_redo()?;
        let intact = item.replay(host);
        Some(self.finish_redo(item, intact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::document::structure::{ObjectId, Value};
    use crate::schema;

    fn run(host: &document::DocumentHost, undo: &mut UndoManager, change: change::Change, description: &str) {
        let (_, forward, record) = host.change(change).unwrap();
        undo.execute_command(Command {
            forward,
            inverse: record.inverse,
            description: description.to_string(),
        });
    }

    fn set_x(object: ObjectId, x: i32) -> change::Change {
        change::Change::update(object, vec![("x".to_string(), x.into())])
    }

    fn x(host: &document::DocumentHost, object: ObjectId) -> Option<f64> {
        host.get().get(object).and_then(|o| o.property("x")).and_then(Value::as_number)
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config::default());
        let a = sample.items[0];

        assert!(!undo.can_undo());
        assert!(undo.undo(&host).is_none());
        assert!(undo.redo(&host).is_none());

        run(&host, &mut undo, set_x(a, 5), "move a");
        assert!(undo.can_undo());
        assert_eq!(undo.undo_description(), Some("move a"));

        assert!(undo.undo(&host).is_some());
        assert_eq!(x(&host, a), Some(0.0));
        assert!(!undo.can_undo());
        assert!(undo.can_redo());
        assert_eq!(undo.redo_description(), Some("move a"));

        assert!(undo.redo(&host).is_some());
        assert_eq!(x(&host, a), Some(5.0));
        assert!(!undo.can_redo());
    }

    #[test]
    fn test_structural_round_trip_keeps_ids() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config::default());
        let b = sample.items[1];

        run(&host, &mut undo, change::Change::Detach { object: b }, "delete b");
        assert!(!host.get().contains(b));

        undo.undo(&host);
        assert_eq!(host.get().children(sample.widgets), sample.items);

        undo.redo(&host);
        assert!(!host.get().contains(b));

        undo.undo(&host);
        assert_eq!(host.get().children(sample.widgets), sample.items);
        host.get().check_invariants().unwrap();
    }

    #[test]
    fn test_new_command_clears_redo() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config::default());

        run(&host, &mut undo, set_x(sample.items[0], 1), "one");
        undo.undo(&host);
        assert!(undo.can_redo());

        run(&host, &mut undo, set_x(sample.items[1], 2), "two");
        assert!(!undo.can_redo());
    }

    #[test]
    fn test_combine_groups_commands() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config::default());

        run(&host, &mut undo, set_x(sample.items[2], 7), "before");

        undo.set_combine_commands(true);
        assert!(undo.is_combining());
        run(&host, &mut undo, set_x(sample.items[0], 1), "a");
        run(&host, &mut undo, set_x(sample.items[1], 2), "b");
        run(&host, &mut undo, change::Change::Detach { object: sample.items[2] }, "delete c");
        undo.set_combine_commands(false);

        assert_eq!(undo.undo_len(), 2);
        assert_eq!(undo.undo_description(), Some("delete c"));

        /* one undo reverts the whole group */
        undo.undo(&host);
        assert_eq!(x(&host, sample.items[0]), Some(0.0));
        assert_eq!(x(&host, sample.items[1]), Some(10.0));
        assert_eq!(x(&host, sample.items[2]), Some(7.0));

        undo.undo(&host);
        assert_eq!(x(&host, sample.items[2]), Some(0.0));
    }

    #[test]
    fn test_updates_merge_while_combining() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config::default());
        let a = sample.items[0];

        undo.set_combine_commands(true);
        run(&host, &mut undo, set_x(a, 1), "drag");
        run(&host, &mut undo, set_x(a, 2), "drag");
        run(&host, &mut undo, change::Change::update(a, vec![("x".to_string(), 3.into()), ("y".to_string(), 4.into())]), "drag end");
        undo.set_combine_commands(false);

        assert_eq!(undo.undo_stack.back().map(|item| item.commands.len()), Some(1));
        assert_eq!(undo.undo_description(), Some("drag end"));

        undo.undo(&host);
        assert_eq!(x(&host, a), Some(0.0));
        assert_eq!(host.get().get(a).and_then(|o| o.property("y")).cloned(), Some(Value::Number(0.0)));

        undo.redo(&host);
        assert_eq!(x(&host, a), Some(3.0));
    }

    #[test]
    fn test_merging_can_be_disabled() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config {
            merge_updates_while_combining: false,
            ..config::Config::default()
        });

        undo.set_combine_commands(true);
        run(&host, &mut undo, set_x(sample.items[0], 1), "drag");
        run(&host, &mut undo, set_x(sample.items[0], 2), "drag");
        undo.set_combine_commands(false);

        assert_eq!(undo.undo_stack.back().map(|item| item.commands.len()), Some(2));
    }

    #[test]
    fn test_replay_failure_skips_and_discards() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config::default());
        let [a, b] = [sample.items[0], sample.items[1]];

        undo.set_combine_commands(true);
        run(&host, &mut undo, set_x(a, 1), "a");
        run(&host, &mut undo, set_x(b, 2), "b");
        undo.set_combine_commands(false);

        /* someone removes a behind the undo manager's back */
        host.change(change::Change::Detach { object: a }).unwrap();

        assert!(undo.undo(&host).is_some());
        assert_eq!(x(&host, b), Some(10.0));
        assert!(!undo.can_redo());
        assert!(!undo.can_undo());
    }

    #[test]
    fn test_depth_limit() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config {
            undo_depth: 2,
            ..config::Config::default()
        });
        let a = sample.items[0];

        for i in 1..=3 {
            run(&host, &mut undo, set_x(a, i), "step");
        }

        assert!(undo.undo(&host).is_some());
        assert!(undo.undo(&host).is_some());
        assert!(undo.undo(&host).is_none());
        assert_eq!(x(&host, a), Some(1.0));
    }

    #[test]
    fn test_clear() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config::default());

        run(&host, &mut undo, set_x(sample.items[0], 1), "one");
        run(&host, &mut undo, set_x(sample.items[0], 2), "two");
        undo.undo(&host);
        undo.clear();

        assert!(!undo.can_undo());
        assert!(!undo.can_redo());
        assert_eq!(undo.undo_description(), None);
    }

    #[test]
    fn test_selection_restored() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config::default());
        let [a, b, c] = [sample.items[0], sample.items[1], sample.items[2]];

        undo.set_selection(vec![a]);
        run(&host, &mut undo, set_x(a, 1), "move a");

        undo.set_selection(vec![b, c]);
        run(&host, &mut undo, change::Change::Detach { object: b }, "delete b");
        undo.set_selection(vec![]);

        /* undo goes back to what was selected before each step */
        assert_eq!(undo.undo(&host), Some(vec![b, c]));
        assert_eq!(undo.undo(&host), Some(vec![a]));

        /* redo to what was selected when the step was closed */
        assert_eq!(undo.redo(&host), Some(vec![b, c]));
        assert_eq!(undo.redo(&host), Some(vec![]));
    }

    #[test]
    fn test_unmatched_combine_keeps_folding() {
        let schema = schema::GuiSchema::new();
        let sample = schema.sample_document().unwrap();
        let host = document::DocumentHost::new(sample.document);
        let mut undo = UndoManager::new(&config::Config::default());
        let [a, b] = [sample.items[0], sample.items[1]];

        undo.set_combine_commands(true);
        run(&host, &mut undo, set_x(a, 1), "a");
        run(&host, &mut undo, set_x(b, 2), "b");
        run(&host, &mut undo, change::Change::Detach { object: sample.items[2] }, "delete c");

        /* nobody switched combining off */
        assert!(undo.is_combining());
        assert_eq!(undo.undo_len(), 1);
        assert_eq!(undo.undo_description(), Some("delete c"));

        assert!(undo.undo(&host).is_some());
        assert_eq!(x(&host, a), Some(0.0));
        assert_eq!(x(&host, b), Some(10.0));
        assert_eq!(host.get().children(sample.widgets), sample.items);
        assert!(!undo.can_undo());
        assert!(undo.is_combining());
    }
}
