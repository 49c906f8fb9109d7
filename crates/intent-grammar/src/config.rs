//! Profile configuration for training and recognition

use crate::error::{GrammarError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Case transform applied to words before they reach the automaton
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordCasing {
    #[default]
    Ignore,
    Upper,
    Lower,
}

impl WordCasing {
    pub fn apply(self, word: &str) -> String {
        match self {
            WordCasing::Ignore => word.to_string(),
            WordCasing::Upper => word.to_uppercase(),
            WordCasing::Lower => word.to_lowercase(),
        }
    }

    /// Split text on whitespace and apply the casing to every token
    pub fn tokenize(self, text: &str) -> Vec<String> {
        text.split_whitespace().map(|w| self.apply(w)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub sentences_file: PathBuf,
    pub slots_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub word_casing: WordCasing,
    /// Only compile these intents (all when empty)
    pub intent_whitelist: Vec<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            sentences_file: PathBuf::from("sentences.ini"),
            slots_dir: PathBuf::from("slots"),
            artifacts_dir: PathBuf::from("fsts"),
            word_casing: WordCasing::Ignore,
            intent_whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub fuzzy: bool,
    pub skip_unknown: bool,
    pub drop_unknown: bool,
    pub stop_words_file: Option<PathBuf>,
    /// Only report these intents (all when empty)
    pub intent_filter: Vec<String>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            fuzzy: true,
            skip_unknown: true,
            drop_unknown: false,
            stop_words_file: Some(PathBuf::from("stop_words.txt")),
            intent_filter: Vec::new(),
        }
    }
}

/// Training and recognition settings, usually read from `profile.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub training: TrainingConfig,
    pub recognition: RecognitionConfig,
    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Profile {
    /// Load a YAML profile. Relative paths are resolved against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| GrammarError::Config(format!("reading {}: {e}", path.display())))?;
        let mut profile: Profile = serde_yaml::from_str(&raw)
            .map_err(|e| GrammarError::Config(format!("parsing {}: {e}", path.display())))?;
        profile.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(profile)
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn sentences_file(&self) -> PathBuf {
        self.resolve(&self.training.sentences_file)
    }

    pub fn slots_dir(&self) -> PathBuf {
        self.resolve(&self.training.slots_dir)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.resolve(&self.training.artifacts_dir)
    }

    pub fn intent_whitelist(&self) -> Option<BTreeSet<String>> {
        non_empty_set(&self.training.intent_whitelist)
    }

    pub fn intent_filter(&self) -> Option<BTreeSet<String>> {
        non_empty_set(&self.recognition.intent_filter)
    }

    /// Stop words, or an empty set when not configured or missing
    pub fn stop_words(&self) -> BTreeSet<String> {
        match &self.recognition.stop_words_file {
            Some(path) => load_word_set(self.resolve(path)),
            None => BTreeSet::new(),
        }
    }
}

fn non_empty_set(names: &[String]) -> Option<BTreeSet<String>> {
    if names.is_empty() {
        None
    } else {
        Some(names.iter().cloned().collect())
    }
}

/// Read a word-per-line file. A missing or unreadable file yields an empty set.
pub fn load_word_set(path: impl AsRef<Path>) -> BTreeSet<String> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(raw) => raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect(),
        Err(e) => {
            tracing::warn!("Skipping {} ({})", path.display(), e);
            BTreeSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_casing() {
        assert_eq!(WordCasing::Upper.apply("Kitchen"), "KITCHEN");
        assert_eq!(WordCasing::Lower.apply("Kitchen"), "kitchen");
        assert_eq!(WordCasing::Ignore.apply("Kitchen"), "Kitchen");
        assert_eq!(
            WordCasing::Lower.tokenize("  Turn ON\tthe light "),
            vec!["turn", "on", "the", "light"]
        );
    }

    #[test]
    fn test_profile_defaults_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.yml");
        fs::write(
            &path,
            "training:\n  word_casing: lower\n  intent_whitelist: [GetTime]\nrecognition:\n  fuzzy: false\n",
        )
        .unwrap();

        let profile = Profile::load(&path).unwrap();
        assert_eq!(profile.training.word_casing, WordCasing::Lower);
        assert!(!profile.recognition.fuzzy);
        assert!(profile.recognition.skip_unknown);
        assert_eq!(profile.sentences_file(), dir.path().join("sentences.ini"));
        assert_eq!(
            profile.intent_whitelist(),
            Some(["GetTime".to_string()].into_iter().collect())
        );
        assert_eq!(profile.intent_filter(), None);
    }

    #[test]
    fn test_missing_stop_words_degrade_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.yml");
        fs::write(&path, "{}\n").unwrap();
        let profile = Profile::load(&path).unwrap();
        assert!(profile.stop_words().is_empty());

        fs::write(dir.path().join("stop_words.txt"), "uh\n\nplease\n").unwrap();
        let words: Vec<String> = profile.stop_words().into_iter().collect();
        assert_eq!(words, vec!["please".to_string(), "uh".into()]);
    }

    #[test]
    fn test_bad_yaml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.yml");
        fs::write(&path, "training: [not, a, map]\n").unwrap();
        assert!(matches!(Profile::load(&path), Err(GrammarError::Config(_))));
    }
}
