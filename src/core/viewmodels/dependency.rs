use super::command::{CommandId, Requery};
use super::property::PropertyName;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Result of one [`DependencyGraph::notify`] walk.
#[derive(Default)]
pub struct Propagation {
    /// Properties to report as changed, in breadth-first order, each once
    pub properties: Vec<PropertyName>,
    /// Commands to requery, each once
    pub commands: Vec<Arc<dyn Requery>>,
}

impl Propagation {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.commands.is_empty()
    }

    pub fn command_ids(&self) -> Vec<CommandId> {
        self.commands.iter().map(|command| command.command_id()).collect()
    }
}

impl fmt::Debug for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Propagation")
            .field("properties", &self.properties)
            .field("commands", &self.command_ids())
            .finish()
    }
}

/// Which properties and commands depend on which property.
///
/// Edges keep insertion order so a walk always reports in the same order.
/// Self-edges are ignored and duplicates collapse into one edge.
#[derive(Default)]
pub struct DependencyGraph {
    properties: HashMap<PropertyName, Vec<PropertyName>>,
    commands: HashMap<PropertyName, Vec<Arc<dyn Requery>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a new edge was added.
    pub fn add_edge(
        &mut self,
        source: impl Into<PropertyName>,
        dependent: impl Into<PropertyName>,
    ) -> bool {
        let source = source.into();
        let dependent = dependent.into();

        if source == dependent {
            return false;
        }

        let dependents = self.properties.entry(source).or_default();
        if dependents.contains(&dependent) {
            return false;
        }
        dependents.push(dependent);
        true
    }

    pub fn add_edges<I, D>(&mut self, source: impl Into<PropertyName>, dependents: I)
    where
        I: IntoIterator<Item = D>,
        D: Into<PropertyName>,
    {
        let source = source.into();
        for dependent in dependents {
            self.add_edge(source.clone(), dependent);
        }
    }

    /// Returns whether a new edge was added.
    pub fn add_command_edge(
        &mut self,
        source: impl Into<PropertyName>,
        command: Arc<dyn Requery>,
    ) -> bool {
        let commands = self.commands.entry(source.into()).or_default();
        let id = command.command_id();
        if commands.iter().any(|existing| existing.command_id() == id) {
            return false;
        }
        commands.push(command);
        true
    }

    pub fn dependents_of(&self, source: &str) -> &[PropertyName] {
        self.properties.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn commands_of(&self, source: &str) -> Vec<CommandId> {
        self.commands
            .get(source)
            .map(|commands| commands.iter().map(|command| command.command_id()).collect())
            .unwrap_or_default()
    }

    pub fn command_edge_count(&self) -> usize {
        self.commands.values().map(Vec::len).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.properties.values().map(Vec::len).sum()
    }

    /// Drop every command edge, releasing the commands.
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Walk the graph from `property`.
    ///
    /// Without `cascade` only `property` itself is reported. With it, every
    /// reachable property is reported once in breadth-first order, followed
    /// by the commands attached to any of them, each once. Cycles terminate.
    pub fn notify(&self, property: &PropertyName, cascade: bool) -> Propagation {
        let mut visited: HashSet<&PropertyName> = HashSet::new();
        let mut queue: VecDeque<&PropertyName> = VecDeque::new();
        let mut propagation = Propagation::default();

        queue.push_back(property);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            propagation.properties.push(current.clone());

            if cascade && let Some(dependents) = self.properties.get(current) {
                queue.extend(dependents.iter());
            }
        }

        if cascade {
            let mut seen_commands = HashSet::new();
            for name in &propagation.properties {
                let Some(commands) = self.commands.get(name) else {
                    continue;
                };
                for command in commands {
                    if seen_commands.insert(command.command_id()) {
                        propagation.commands.push(Arc::clone(command));
                    }
                }
            }
        }

        propagation
    }
}

impl fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("properties", &self.properties)
            .field("command_edges", &self.command_edge_count())
            .finish()
    }
}
