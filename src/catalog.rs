//! Command catalog
//!
//! The set of remotely triggerable commands is fixed for the lifetime of the
//! process. It is read once at startup from a JSON file, or falls back to a
//! built-in list when no file is present.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A command a device may implement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Command {
    fn new(id: i64, name: &str, description: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Read-only mapping of command id to command
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    /// Sorted by id
    commands: Vec<Command>,
}

impl CommandCatalog {
    /// Build a catalog from a list of commands
    ///
    /// # Errors
    ///
    /// Returns `Config` on an empty name, a duplicate id, or two names that
    /// differ only in case
    pub fn new(mut commands: Vec<Command>) -> Result<Self> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for command in &commands {
            if command.name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "command {} has an empty name",
                    command.id
                )));
            }
            if !ids.insert(command.id) {
                return Err(Error::Config(format!(
                    "duplicate command id {}",
                    command.id
                )));
            }
            if !names.insert(command.name.to_lowercase()) {
                return Err(Error::Config(format!(
                    "duplicate command name '{}'",
                    command.name
                )));
            }
        }

        commands.sort_by_key(|c| c.id);
        Ok(Self { commands })
    }

    /// Catalog used when no commands file exists
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            commands: vec![
                Command::new(0, "locate", "Report the current location"),
                Command::new(1, "ring", "Play a loud sound"),
                Command::new(2, "lock", "Lock the screen"),
                Command::new(3, "wipe", "Erase all user data"),
                Command::new(4, "start_tracking", "Report location periodically"),
                Command::new(5, "stop_tracking", "Stop periodic location reports"),
            ],
        }
    }

    /// Load a catalog from a JSON array of `{id, name, description}`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or fails validation
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let commands: Vec<Command> = serde_json::from_str(&content)?;
        let catalog = Self::new(commands)?;
        tracing::info!(path = %path.display(), count = catalog.len(), "loaded command catalog");
        Ok(catalog)
    }

    /// Load from `path` if it exists, otherwise use the built-in catalog
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but is invalid
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no command catalog file, using built-in");
            Ok(Self::builtin())
        }
    }

    /// Look up a command by id
    #[must_use]
    pub fn command_by_id(&self, id: i64) -> Option<&Command> {
        self.commands
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|idx| &self.commands[idx])
    }

    /// Whether `id` names a command in the catalog
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        self.command_by_id(id).is_some()
    }

    /// All commands, ordered by id
    #[must_use]
    pub fn all(&self) -> &[Command] {
        &self.commands
    }

    /// Resolve ids to commands, skipping ids the catalog does not know
    #[must_use]
    pub fn resolve(&self, ids: &[i64]) -> Vec<Command> {
        ids.iter()
            .filter_map(|&id| {
                let command = self.command_by_id(id);
                if command.is_none() {
                    tracing::warn!(command_id = id, "device references unknown command");
                }
                command.cloned()
            })
            .collect()
    }

    /// Number of commands
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_builtin_is_valid() {
        let builtin = CommandCatalog::builtin();
        let rebuilt = CommandCatalog::new(builtin.all().to_vec()).unwrap();
        assert_eq!(rebuilt.len(), 6);
        assert_eq!(rebuilt.command_by_id(0).unwrap().name, "locate");
    }

    #[test]
    fn test_rejects_duplicate_id() {
        let result = CommandCatalog::new(vec![
            Command::new(1, "ring", ""),
            Command::new(1, "lock", ""),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_case_insensitive_duplicate_name() {
        let result = CommandCatalog::new(vec![
            Command::new(1, "Locate", ""),
            Command::new(2, "LOCATE", ""),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_lookup_and_resolve() {
        let catalog = CommandCatalog::new(vec![
            Command::new(7, "wipe", "Erase"),
            Command::new(3, "ring", "Beep"),
        ])
        .unwrap();

        assert_eq!(catalog.all()[0].id, 3);
        assert!(catalog.contains(7));
        assert!(catalog.command_by_id(4).is_none());

        let resolved = catalog.resolve(&[7, 99, 3]);
        let names: Vec<_> = resolved.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["wipe", "ring"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 10, "name": "ring", "description": "Beep"}}, {{"id": 11, "name": "photo"}}]"#
        )
        .unwrap();

        let catalog = CommandCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.command_by_id(11).unwrap().description, "");
    }

    #[test]
    fn test_missing_file_uses_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CommandCatalog::load_or_builtin(&dir.path().join("commands.json")).unwrap();
        assert_eq!(catalog.len(), CommandCatalog::builtin().len());
    }
}
