//! Commands whose invocation runs as a job on the fiber pool.
//!
//! A command never runs inside the caller that invokes it: [`CommandRegistry::invoke`]
//! pushes a job, and the command's `on_call` executes on a later tick.

use crate::queue::Submitter;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A named action exposed by the overlay.
pub trait Command: Send {
    fn name(&self) -> &str;

    fn label(&self) -> &str;

    fn description(&self) -> &str;

    /// Runs the command. Called from inside a pool context.
    fn on_call(&mut self);

    /// Current state, for persistence.
    fn save_state(&self) -> Value;

    /// Restores state saved by [`save_state`](Self::save_state).
    /// Values of the wrong shape are ignored.
    fn load_state(&mut self, value: &Value);
}

type ChangeHook = Box<dyn FnMut(i32) + Send>;

/// Selects one entry of a list of `(value, label)` pairs.
///
/// The list is kept sorted by value. Calling the command advances to the next
/// entry, wrapping at the end.
pub struct ListCommand {
    name: String,
    label: String,
    description: String,
    list: Vec<(i32, String)>,
    state: i32,
    on_change: Option<ChangeHook>,
}

impl ListCommand {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
        list: Vec<(i32, String)>,
        default_value: i32,
    ) -> Self {
        let mut command = ListCommand {
            name: name.into(),
            label: label.into(),
            description: description.into(),
            list: Vec::new(),
            state: default_value,
            on_change: None,
        };
        command.set_list(list);
        command
    }

    /// Installs a callback fired with the new value whenever the state changes.
    pub fn on_change<F>(mut self, hook: F) -> Self
    where
        F: FnMut(i32) + Send + 'static,
    {
        self.on_change = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> i32 {
        self.state
    }

    pub fn set_state(&mut self, state: i32) {
        if self.state != state {
            self.state = state;
            if let Some(hook) = self.on_change.as_mut() {
                hook(state);
            }
        }
    }

    pub fn set_list(&mut self, mut list: Vec<(i32, String)>) {
        list.sort_by_key(|(value, _)| *value);
        self.list = list;
    }

    pub fn list(&self) -> &[(i32, String)] {
        &self.list
    }

    /// Label of the selected entry, if the state matches one.
    pub fn selected_label(&self) -> Option<&str> {
        self.list
            .iter()
            .find(|(value, _)| *value == self.state)
            .map(|(_, label)| label.as_str())
    }
}

impl Command for ListCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn on_call(&mut self) {
        if self.list.is_empty() {
            return;
        }
        let next = match self.list.iter().position(|(value, _)| *value == self.state) {
            Some(i) => (i + 1) % self.list.len(),
            None => 0,
        };
        let value = self.list[next].0;
        self.set_state(value);
    }

    fn save_state(&self) -> Value {
        Value::from(self.state)
    }

    fn load_state(&mut self, value: &Value) {
        if let Some(state) = value.as_i64().and_then(|v| i32::try_from(v).ok()) {
            self.set_state(state);
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("command {0:?} is already registered")]
    Duplicate(String),
    #[error("fiber pool is not accepting work")]
    PoolClosed,
}

pub type SharedCommand = Arc<Mutex<dyn Command>>;

/// Commands by name, invoked through the fiber pool.
pub struct CommandRegistry {
    commands: BTreeMap<String, SharedCommand>,
    submitter: Submitter,
}

impl CommandRegistry {
    pub fn new(submitter: Submitter) -> Self {
        CommandRegistry {
            commands: BTreeMap::new(),
            submitter,
        }
    }

    /// Registers a command and returns the shared handle to it.
    pub fn register<C>(&mut self, command: C) -> Result<SharedCommand, CommandError>
    where
        C: Command + 'static,
    {
        let name = command.name().to_string();
        if self.commands.contains_key(&name) {
            return Err(CommandError::Duplicate(name));
        }
        let shared: SharedCommand = Arc::new(Mutex::new(command));
        self.commands.insert(name, shared.clone());
        Ok(shared)
    }

    pub fn get(&self, name: &str) -> Option<SharedCommand> {
        self.commands.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Schedules `name`'s `on_call` for the next tick.
    pub fn invoke(&self, name: &str) -> Result<(), CommandError> {
        let command = self
            .get(name)
            .ok_or_else(|| CommandError::Unknown(name.to_string()))?;
        let job_name = name.to_string();
        let accepted = self.submitter.push(move || {
            debug!(command = %job_name, "running command");
            command.lock().on_call();
        });
        if accepted {
            Ok(())
        } else {
            Err(CommandError::PoolClosed)
        }
    }

    /// Collects every command's state into a JSON object keyed by name.
    pub fn save_states(&self) -> Value {
        let map: Map<String, Value> = self
            .commands
            .iter()
            .map(|(name, command)| (name.clone(), command.lock().save_state()))
            .collect();
        Value::Object(map)
    }

    /// Restores states saved by [`save_states`](Self::save_states).
    /// Unknown names are ignored.
    pub fn load_states(&self, states: &Value) {
        let Some(map) = states.as_object() else {
            return;
        };
        for (name, value) in map {
            if let Some(command) = self.commands.get(name) {
                command.lock().load_state(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::fiber_pool::{FiberPool, TickOutcome};
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn modes() -> Vec<(i32, String)> {
        vec![
            (2, "Fast".to_string()),
            (0, "Off".to_string()),
            (1, "Slow".to_string()),
        ]
    }

    #[test]
    fn test_list_command_cycles_sorted() {
        let mut cmd = ListCommand::new("speed", "Speed", "Movement speed", modes(), 0);
        assert_eq!(cmd.list()[0].1, "Off");
        assert_eq!(cmd.selected_label(), Some("Off"));

        cmd.on_call();
        assert_eq!(cmd.state(), 1);
        cmd.on_call();
        cmd.on_call();
        assert_eq!(cmd.state(), 0);
    }

    #[test]
    fn test_on_change_fires_only_on_change() {
        let last = Arc::new(AtomicI32::new(-1));
        let last_clone = last.clone();
        let mut cmd = ListCommand::new("speed", "Speed", "", modes(), 0)
            .on_change(move |v| last_clone.store(v, Ordering::SeqCst));

        cmd.set_state(0);
        assert_eq!(last.load(Ordering::SeqCst), -1);
        cmd.set_state(2);
        assert_eq!(last.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invoke_runs_on_tick_not_synchronously() {
        let mut pool = FiberPool::new(PoolConfig::default());
        pool.init(1);
        let mut registry = CommandRegistry::new(pool.submitter());
        let speed = registry
            .register(ListCommand::new("speed", "Speed", "", modes(), 0))
            .unwrap();

        registry.invoke("speed").unwrap();
        assert_eq!(speed.lock().save_state(), json!(0));

        assert_eq!(pool.tick(), TickOutcome::Ran);
        assert_eq!(speed.lock().save_state(), json!(1));
    }

    #[test]
    fn test_registry_errors() {
        let mut pool = FiberPool::new(PoolConfig::default());
        pool.init(1);
        let mut registry = CommandRegistry::new(pool.submitter());
        registry
            .register(ListCommand::new("speed", "Speed", "", modes(), 0))
            .unwrap();

        assert!(matches!(
            registry.register(ListCommand::new("speed", "Again", "", vec![], 0)),
            Err(CommandError::Duplicate(_))
        ));
        assert!(matches!(
            registry.invoke("missing"),
            Err(CommandError::Unknown(_))
        ));

        pool.destroy();
        assert!(matches!(
            registry.invoke("speed"),
            Err(CommandError::PoolClosed)
        ));
    }

    #[test]
    fn test_states_persist_by_name() {
        let mut pool = FiberPool::new(PoolConfig::default());
        pool.init(1);
        let mut registry = CommandRegistry::new(pool.submitter());
        let speed = registry
            .register(ListCommand::new("speed", "Speed", "", modes(), 2))
            .unwrap();

        let saved = registry.save_states();
        assert_eq!(saved, json!({ "speed": 2 }));

        speed.lock().load_state(&json!(0));
        registry.load_states(&json!({ "speed": 1, "unknown": 5 }));
        assert_eq!(speed.lock().save_state(), json!(1));

        registry.load_states(&json!({ "speed": "fast" }));
        assert_eq!(speed.lock().save_state(), json!(1));
    }
}
