//! Per-record attribute storage with persisted, in-flight and local layers.

use keel_value::{Attributes, Value};
use std::collections::BTreeMap;

/// Attribute layers of one record.
///
/// Reads see `modified` over `in_flight` over `persisted`. A local edit goes
/// to `modified`; a save moves `modified` into `in_flight`; an acknowledged
/// save folds `in_flight` into `persisted`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSnapshot {
    persisted: Attributes,
    in_flight: Attributes,
    modified: Attributes,
}

impl AttributeSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of an attribute.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.modified
            .get(name)
            .or_else(|| self.in_flight.get(name))
            .or_else(|| self.persisted.get(name))
    }

    /// Returns the local edits.
    pub fn modified(&self) -> &Attributes {
        &self.modified
    }

    /// Returns every current value, merged across layers.
    pub fn current(&self) -> Attributes {
        let mut merged = self.persisted.clone();
        merged.extend(self.in_flight.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(self.modified.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Applies persisted values from the collaborator.
    ///
    /// Local edits that now equal the persisted value are dropped; edits that
    /// still differ survive the reload. Returns the names whose observable
    /// value changed.
    pub fn set_raw(&mut self, attrs: Attributes) -> Vec<String> {
        let mut changed = Vec::new();
        for (name, value) in attrs {
            let before = self.get(&name).cloned();
            if self.modified.get(&name) == Some(&value) {
                self.modified.remove(&name);
            }
            self.persisted.insert(name.clone(), value);
            if self.get(&name) != before.as_ref() {
                changed.push(name);
            }
        }
        changed
    }

    /// Records a local edit. Returns true if the observable value changed.
    ///
    /// Setting an attribute back to its persisted value removes the edit.
    pub fn set_local(&mut self, name: &str, value: Value) -> bool {
        if self.get(name) == Some(&value) {
            return false;
        }

        let baseline = self.in_flight.get(name).or_else(|| self.persisted.get(name));
        if baseline == Some(&value) {
            self.modified.remove(name);
        } else {
            self.modified.insert(name.to_string(), value);
        }
        true
    }

    /// True iff a local edit differs from the persisted value.
    pub fn is_dirty(&self) -> bool {
        self.modified
            .iter()
            .any(|(name, value)| self.persisted.get(name) != Some(value))
            || !self.in_flight.is_empty()
    }

    /// Changed attributes: name to `(persisted, current)`.
    pub fn changed(&self) -> BTreeMap<String, (Option<Value>, Value)> {
        self.in_flight
            .iter()
            .chain(self.modified.iter())
            .filter(|(name, value)| self.persisted.get(*name) != Some(*value))
            .map(|(name, value)| {
                (
                    name.clone(),
                    (self.persisted.get(name).cloned(), value.clone()),
                )
            })
            .collect()
    }

    /// Discards local edits. Returns the names whose value changed.
    pub fn rollback(&mut self) -> Vec<String> {
        let names: Vec<String> = std::mem::take(&mut self.modified).into_keys().collect();
        names
    }

    /// Replaces the local edits wholesale (transaction restore).
    pub fn restore_modified(&mut self, modified: Attributes) {
        self.modified = modified;
    }

    /// Moves local edits into the in-flight layer.
    pub fn will_commit(&mut self) {
        let modified = std::mem::take(&mut self.modified);
        self.in_flight.extend(modified);
    }

    /// Folds in-flight values into the persisted layer, then applies any
    /// authoritative values returned by the collaborator.
    pub fn commit_success(&mut self, server: Option<Attributes>) {
        let in_flight = std::mem::take(&mut self.in_flight);
        self.persisted.extend(in_flight);
        if let Some(server) = server {
            self.persisted.extend(server);
        }
        let persisted = &self.persisted;
        self.modified
            .retain(|name, value| persisted.get(name) != Some(value));
    }

    /// Returns in-flight values to the local layer after a failed save.
    ///
    /// Edits made since the save started (none, while edits are blocked in
    /// flight) take precedence over the in-flight values.
    pub fn commit_failed(&mut self) {
        let in_flight = std::mem::take(&mut self.in_flight);
        for (name, value) in in_flight {
            self.modified.entry(name).or_insert(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn local_edit_makes_dirty_and_reverting_cleans() {
        let mut snapshot = AttributeSnapshot::new();
        snapshot.set_raw(attrs(&[("name", "Tom")]));
        assert!(!snapshot.is_dirty());

        assert!(snapshot.set_local("name", Value::from("Yehuda")));
        assert!(snapshot.is_dirty());
        assert_eq!(snapshot.get("name"), Some(&Value::from("Yehuda")));

        assert!(snapshot.set_local("name", Value::from("Tom")));
        assert!(!snapshot.is_dirty());
        assert!(snapshot.modified().is_empty());
    }

    #[test]
    fn setting_same_value_is_not_a_change() {
        let mut snapshot = AttributeSnapshot::new();
        snapshot.set_raw(attrs(&[("name", "Tom")]));
        assert!(!snapshot.set_local("name", Value::from("Tom")));
        assert!(!snapshot.is_dirty());
    }

    #[test]
    fn reload_keeps_differing_edit_and_drops_matching_edit() {
        let mut snapshot = AttributeSnapshot::new();
        snapshot.set_raw(attrs(&[("name", "Tom"), ("city", "Portland")]));
        snapshot.set_local("name", Value::from("Yehuda"));
        snapshot.set_local("city", Value::from("Seattle"));

        let changed = snapshot.set_raw(attrs(&[("name", "Yehuda"), ("city", "Chicago")]));

        // "name" now matches the edit, so it is clean; "city" edit survives.
        assert_eq!(snapshot.get("name"), Some(&Value::from("Yehuda")));
        assert_eq!(snapshot.get("city"), Some(&Value::from("Seattle")));
        assert!(changed.is_empty());
        assert!(snapshot.is_dirty());
        assert_eq!(snapshot.changed().len(), 1);
        assert!(snapshot.changed().contains_key("city"));
    }

    #[test]
    fn rollback_restores_persisted() {
        let mut snapshot = AttributeSnapshot::new();
        snapshot.set_raw(attrs(&[("name", "Tom")]));
        snapshot.set_local("name", Value::from("Yehuda"));

        assert_eq!(snapshot.rollback(), vec!["name".to_string()]);
        assert_eq!(snapshot.get("name"), Some(&Value::from("Tom")));
        assert!(!snapshot.is_dirty());
    }

    #[test]
    fn commit_cycle() {
        let mut snapshot = AttributeSnapshot::new();
        snapshot.set_local("name", Value::from("Tom"));
        snapshot.will_commit();
        assert!(snapshot.modified().is_empty());
        assert_eq!(snapshot.get("name"), Some(&Value::from("Tom")));
        assert!(snapshot.is_dirty());

        snapshot.commit_success(Some(attrs(&[("slug", "tom")])));
        assert!(!snapshot.is_dirty());
        assert_eq!(snapshot.get("slug"), Some(&Value::from("tom")));

        // "Tom" is the persisted value now.
        snapshot.set_local("name", Value::from("Tomster"));
        assert!(snapshot.is_dirty());
        snapshot.set_local("name", Value::from("Tom"));
        assert!(!snapshot.is_dirty());
    }

    #[test]
    fn failed_commit_returns_edits() {
        let mut snapshot = AttributeSnapshot::new();
        snapshot.set_local("name", Value::from("Tom"));
        snapshot.will_commit();
        snapshot.commit_failed();

        assert_eq!(snapshot.modified().get("name"), Some(&Value::from("Tom")));
        assert!(snapshot.is_dirty());
    }

    #[test]
    fn server_values_win_over_in_flight() {
        let mut snapshot = AttributeSnapshot::new();
        snapshot.set_local("name", Value::from("tom"));
        snapshot.will_commit();
        snapshot.commit_success(Some(attrs(&[("name", "Tom")])));

        assert_eq!(snapshot.get("name"), Some(&Value::from("Tom")));
        assert!(snapshot.changed().is_empty());
    }
}
