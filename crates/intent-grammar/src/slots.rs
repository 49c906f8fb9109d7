//! Slot value lists
//!
//! A slots directory holds one file per slot, named after the slot. Each
//! non-blank line is a value; values use the sentence syntax but may not
//! reference rules or other slots.

use crate::error::{GrammarError, Result};
use crate::template::{parse_template, Template};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct Slots {
    values: BTreeMap<String, Vec<Template>>,
}

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slot from value lines
    pub fn insert<S: AsRef<str>>(&mut self, name: &str, lines: &[S]) -> Result<()> {
        let label = format!("${name}");
        let mut values = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let template = parse_template(line, &label, index + 1)?;
            if !template.references().is_empty() {
                return Err(GrammarError::syntax(
                    &label,
                    index + 1,
                    "slot values cannot reference rules or slots",
                ));
            }
            values.push(template);
        }
        if values.is_empty() {
            tracing::warn!("Slot {} has no values", label);
        }
        self.values.insert(name.to_string(), values);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&[Template]> {
        self.values.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply a word transform to every value
    pub fn map_words(&mut self, transform: &dyn Fn(&str) -> String) {
        for template in self.values.values_mut().flatten() {
            template.map_words(transform);
        }
    }
}

/// Load every slot file in `dir`. A missing directory yields no slots.
pub fn load_slots_dir(dir: impl AsRef<Path>) -> Result<Slots> {
    let dir = dir.as_ref();
    let mut slots = Slots::new();
    if !dir.is_dir() {
        tracing::warn!("Slots directory {} does not exist", dir.display());
        return Ok(slots);
    }

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            entries.push(path);
        }
    }
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| GrammarError::Io(format!("reading slot {}: {e}", path.display())))?;
        let lines: Vec<&str> = raw.lines().collect();
        slots.insert(name, &lines)?;
        tracing::debug!("Loaded slot ${} from {}", name, path.display());
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut slots = Slots::new();
        slots.insert("room", &["kitchen", "", "living room:den"]).unwrap();
        let values = slots.get("room").unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], Template::word("kitchen"));
        assert!(slots.names().contains("room"));
    }

    #[test]
    fn test_values_may_not_reference() {
        let mut slots = Slots::new();
        let err = slots.insert("room", &["kitchen", "<other>"]).unwrap_err();
        assert!(matches!(err, GrammarError::Syntax { intent, line: 2, .. } if intent == "$room"));
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("room"), "kitchen\nhall\n").unwrap();
        fs::write(dir.path().join("color"), "red\n(dark | light) blue\n").unwrap();
        fs::write(dir.path().join(".hidden"), "x\n").unwrap();

        let slots = load_slots_dir(dir.path()).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots.get("room").unwrap().len(), 2);
        assert_eq!(slots.get("color").unwrap().len(), 2);

        let missing = load_slots_dir(dir.path().join("nope")).unwrap();
        assert!(missing.is_empty());
    }
}
