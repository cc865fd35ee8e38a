//! Registry of running core instances.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use thiserror::Error;

use graphgate_host::{CoreInstance, SpawnError};
use graphgate_protocol::{ClientId, CoreId};

use super::Event;

/// Errors raised while creating a core instance.
#[derive(Debug, Error)]
pub(crate) enum CreateCoreError {
    /// An instance with the requested name is already registered.
    #[error("an instance with this name already exists.")]
    DuplicateName,
    /// The core process could not be spawned; nothing was registered.
    #[error("{0}")]
    Spawn(#[from] SpawnError),
}

/// Owns every running core, indexed by id with a secondary name index.
///
/// Mutated only by the router thread.
pub(crate) struct CoreRegistry {
    cores: HashMap<CoreId, CoreInstance>,
    names: HashMap<String, CoreId>,
    next_core: u64,
    core_binary: PathBuf,
    events: Sender<Event>,
}

impl CoreRegistry {
    pub fn new(core_binary: PathBuf, events: Sender<Event>) -> Self {
        Self {
            cores: HashMap::new(),
            names: HashMap::new(),
            next_core: 1,
            core_binary,
            events,
        }
    }

    /// Spawns a core for the named graph and registers it.
    ///
    /// Name uniqueness is enforced before the spawn is attempted.
    pub fn create(&mut self, name: &str) -> Result<&mut CoreInstance, CreateCoreError> {
        if self.names.contains_key(name) {
            return Err(CreateCoreError::DuplicateName);
        }
        let id = CoreId(self.next_core);
        let events = self.events.clone();
        let instance = CoreInstance::spawn(id, name, &self.core_binary, move |event| {
            let _ = events.send(Event::Core(event));
        })?;
        self.next_core += 1;
        self.names.insert(name.to_string(), id);
        Ok(self.cores.entry(id).or_insert(instance))
    }

    /// Removes an instance from both indexes, returning it for teardown.
    pub fn remove(&mut self, id: CoreId) -> Option<CoreInstance> {
        let instance = self.cores.remove(&id)?;
        self.names.remove(instance.name());
        Some(instance)
    }

    pub fn find(&self, id: CoreId) -> Option<&CoreInstance> {
        self.cores.get(&id)
    }

    pub fn find_mut(&mut self, id: CoreId) -> Option<&mut CoreInstance> {
        self.cores.get_mut(&id)
    }

    pub fn find_named(&self, name: &str) -> Option<CoreId> {
        self.names.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.cores.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoreInstance> {
        self.cores.values()
    }

    pub fn ids(&self) -> Vec<CoreId> {
        self.cores.keys().copied().collect()
    }

    /// True when any core still owes output to the given client.
    pub fn any_owes(&self, client: ClientId) -> bool {
        self.cores.values().any(|core| core.owes_client(client))
    }

    /// Drops not-yet-flushed queue entries owned by a departed client.
    pub fn purge_client(&mut self, client: ClientId) {
        for core in self.cores.values_mut() {
            core.purge_client(client);
        }
    }

    /// Registers a processless instance writing to the given sink.
    #[cfg(test)]
    pub fn insert_fake(
        &mut self,
        name: &str,
        writer: Box<dyn std::io::Write + Send>,
    ) -> CoreId {
        let id = CoreId(self.next_core);
        self.next_core += 1;
        self.names.insert(name.to_string(), id);
        self.cores.insert(id, CoreInstance::with_link(id, name, writer));
        id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use graphgate_protocol::CoreId;

    use super::*;

    fn registry() -> CoreRegistry {
        let (tx, _rx) = mpsc::channel();
        CoreRegistry::new(PathBuf::from("/nonexistent/graphcore"), tx)
    }

    fn register_fake(registry: &mut CoreRegistry, name: &str) -> CoreId {
        registry.insert_fake(name, Box::new(Vec::new()))
    }

    #[test]
    fn spawn_failure_registers_nothing() {
        let mut registry = registry();
        let error = registry.create("wiki").expect_err("spawn should fail");
        assert!(matches!(error, CreateCoreError::Spawn(_)));
        assert_eq!(registry.len(), 0);
        assert!(registry.find_named("wiki").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected_before_spawn() {
        let mut registry = registry();
        register_fake(&mut registry, "wiki");
        let error = registry.create("wiki").expect_err("duplicate");
        assert!(matches!(error, CreateCoreError::DuplicateName));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removal_clears_both_indexes() {
        let mut registry = registry();
        let id = register_fake(&mut registry, "wiki");
        assert_eq!(registry.find_named("wiki"), Some(id));
        let instance = registry.remove(id).expect("instance");
        assert_eq!(instance.name(), "wiki");
        assert!(registry.find(id).is_none());
        assert!(registry.find_named("wiki").is_none());
    }
}
