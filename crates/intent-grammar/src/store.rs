//! On-disk storage for compiled automata
//!
//! Layout under the store directory:
//! - `fsts/<name>.fst.json` for every slot (`$room`), rule (`Intent.rule`) and intent
//! - `intent.fst.json` for the merged recognizer

use crate::error::{GrammarError, Result};
use crate::fst::Automaton;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MERGED_FILE: &str = "intent.fst.json";
const PARTS_DIR: &str = "fsts";
const EXTENSION: &str = "fst.json";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(PARTS_DIR))
            .map_err(|e| GrammarError::Io(format!("creating {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(PARTS_DIR).join(format!("{name}.{EXTENSION}"))
    }

    pub fn merged_path(&self) -> PathBuf {
        self.dir.join(MERGED_FILE)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    pub fn write(&self, name: &str, fst: &Automaton) -> Result<()> {
        write_atomic(&self.path_for(name), fst)
    }

    pub fn read(&self, name: &str) -> Result<Automaton> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(GrammarError::MissingArtifact(name.to_string()));
        }
        read_automaton(&path)
    }

    pub fn write_merged(&self, fst: &Automaton) -> Result<()> {
        write_atomic(&self.merged_path(), fst)
    }

    pub fn read_merged(&self) -> Result<Automaton> {
        let path = self.merged_path();
        if !path.is_file() {
            return Err(GrammarError::MissingArtifact(MERGED_FILE.to_string()));
        }
        read_automaton(&path)
    }

    /// Drop a previously merged recognizer so a failed run cannot leave it behind
    pub fn remove_merged(&self) -> Result<()> {
        match fs::remove_file(self.merged_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read an automaton from any JSON artifact path
pub fn read_automaton(path: impl AsRef<Path>) -> Result<Automaton> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| GrammarError::Io(format!("opening {}: {e}", path.display())))?;
    Automaton::read_from(BufReader::new(file))
}

fn write_atomic(path: &Path, fst: &Automaton) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)
            .map_err(|e| GrammarError::Io(format!("creating {}: {e}", tmp.display())))?;
        let mut writer = BufWriter::new(file);
        fst.write_to(&mut writer)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    tracing::debug!("Wrote {}", path.display());
    Ok(())
}
