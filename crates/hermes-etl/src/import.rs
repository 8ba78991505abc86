use std::fs;
use std::path::Path;

use serde::Deserialize;

use hermes_core::{HermesError, Result};
use hermes_store::Store;

/// `replace_words.json`: a flat `{source: target}` map.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct ReplaceWordsFile(std::collections::HashMap<String, String>);

/// `special_words.json` / `meaningless_words.json`: a plain array of words.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct WordListFile(Vec<String>);

#[derive(Debug, Default, Clone, Copy)]
pub struct ImportReport {
    pub replace_words: usize,
    pub special_words: usize,
    pub meaningless_words: usize,
}

/// `import_dicts` (spec §4.5.3): reads the three well-known JSON files out of
/// `dir` (any that are absent are simply skipped — this is a manual,
/// best-effort job, not a validation gate) and upserts them into the active
/// tables. Schema/indexes are guaranteed to exist by [`Store::new`], which
/// every caller of this function has already gone through.
pub fn import_dicts_from_dir(store: &Store, dir: &Path) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    let replace_path = dir.join("replace_words.json");
    if replace_path.exists() {
        let file: ReplaceWordsFile = read_json(&replace_path)?;
        let entries: Vec<(String, String)> = file.0.into_iter().collect();
        report.replace_words = store.import_replace_words(&entries)?;
    }

    let special_path = dir.join("special_words.json");
    if special_path.exists() {
        let file: WordListFile = read_json(&special_path)?;
        report.special_words = store.import_special_words(&file.0)?;
    }

    let meaningless_path = dir.join("meaningless_words.json");
    if meaningless_path.exists() {
        let file: WordListFile = read_json(&meaningless_path)?;
        report.meaningless_words = store.import_meaningless_words(&file.0)?;
    }

    Ok(report)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| HermesError::Internal(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn imports_whatever_files_are_present() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("replace_words.json"),
            r#"{"foo": "bar", "baz": "qux"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("special_words.json"), r#"["bar", "qux"]"#).unwrap();
        // meaningless_words.json intentionally omitted.

        let store = Store::open_in_memory().unwrap();
        let report = import_dicts_from_dir(&store, dir.path()).unwrap();
        assert_eq!(report.replace_words, 2);
        assert_eq!(report.special_words, 2);
        assert_eq!(report.meaningless_words, 0);

        let (map, special, _) = store.get_active_dictionaries().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(special.len(), 2);
    }

    #[test]
    fn missing_directory_files_are_not_an_error() {
        let dir = tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let report = import_dicts_from_dir(&store, dir.path()).unwrap();
        assert_eq!(report.replace_words, 0);
        assert_eq!(report.special_words, 0);
        assert_eq!(report.meaningless_words, 0);
    }
}
