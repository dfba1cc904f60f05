//! Dataset discovery.
//!
//! A dataset root holds one sub-directory per case; each case directory holds
//! one `.obj` mesh and one `.json` label file. Cases are visited in sorted
//! (optionally reversed) order and filtered to an inclusive 1-based window.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset root {} does not exist or is not a directory", .0.display())]
    RootMissing(PathBuf),
    #[error("failed to list {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid case window: start {start}, end {end}")]
    InvalidWindow { start: usize, end: usize },
    #[error("case '{case}' has no .{extension} file")]
    MissingInput { case: String, extension: &'static str },
}

/// Where the cases live and which of them to process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Directory containing one sub-directory per case
    pub root: PathBuf,
    /// Output root (default: `<root parent>/output`)
    pub output: Option<PathBuf>,
    /// First case to process, 1-based (default: 1)
    pub start_case: usize,
    /// Last case to process, inclusive (default: all)
    pub end_case: Option<usize>,
    /// Visit cases in reverse sorted order (default: false)
    pub reverse: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dataset"),
            output: None,
            start_case: 1,
            end_case: None,
            reverse: false,
        }
    }
}

impl DatasetConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Explicit output root, or `output` next to the dataset root.
    pub fn output_root(&self) -> PathBuf {
        if let Some(output) = &self.output {
            return output.clone();
        }
        match self.root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join("output"),
            _ => PathBuf::from("output"),
        }
    }

    /// File name prefix: the dataset root's directory name.
    pub fn prefix(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string())
    }
}

/// One case directory and the inputs found in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseEntry {
    /// 1-based position in the full sorted case list
    pub index: usize,
    /// Directory name
    pub id: String,
    pub dir: PathBuf,
    pub obj: Option<PathBuf>,
    pub labels: Option<PathBuf>,
}

impl CaseEntry {
    /// Inspect a case directory. With several candidates the
    /// lexicographically last one wins.
    pub fn scan(index: usize, dir: &Path) -> Result<Self, DatasetError> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| DatasetError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let last_with = |extension: &str| {
            files
                .iter()
                .rev()
                .find(|p| {
                    p.extension()
                        .map(|e| e.eq_ignore_ascii_case(extension))
                        .unwrap_or(false)
                })
                .cloned()
        };

        Ok(Self {
            index,
            id: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            dir: dir.to_path_buf(),
            obj: last_with("obj"),
            labels: last_with("json"),
        })
    }

    /// Entry for a directory that could not be listed; it is skipped later
    /// like any case with missing inputs.
    fn unreadable(index: usize, dir: &Path) -> Self {
        Self {
            index,
            id: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            dir: dir.to_path_buf(),
            obj: None,
            labels: None,
        }
    }

    /// Mesh and label paths, or which one is missing.
    pub fn inputs(&self) -> Result<(&Path, &Path), DatasetError> {
        let missing = |extension| DatasetError::MissingInput {
            case: self.id.clone(),
            extension,
        };
        let obj = self.obj.as_deref().ok_or_else(|| missing("obj"))?;
        let labels = self.labels.as_deref().ok_or_else(|| missing("json"))?;
        Ok((obj, labels))
    }
}

/// Sorted case directories of a dataset, restricted to the window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset {
    pub prefix: String,
    pub root: PathBuf,
    /// Number of case directories before windowing
    pub total_cases: usize,
    pub cases: Vec<CaseEntry>,
}

impl Dataset {
    /// List the dataset root. A missing root is fatal; everything else about
    /// individual cases is checked when they are loaded.
    pub fn discover(config: &DatasetConfig) -> Result<Self, DatasetError> {
        let root = &config.root;
        if !root.is_dir() {
            return Err(DatasetError::RootMissing(root.clone()));
        }
        if config.start_case == 0 {
            return Err(DatasetError::InvalidWindow {
                start: 0,
                end: config.end_case.unwrap_or(0),
            });
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(root)
            .map_err(|source| DatasetError::Io {
                path: root.clone(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        if config.reverse {
            dirs.reverse();
        }

        let total_cases = dirs.len();
        let end = config.end_case.unwrap_or(total_cases).min(total_cases);
        let start = config.start_case - 1;
        if start > end {
            warn!(
                "Case window {}..={} is empty ({} cases available)",
                config.start_case, end, total_cases
            );
        }

        let cases = dirs
            .iter()
            .enumerate()
            .skip(start)
            .take(end.saturating_sub(start))
            .map(|(i, dir)| {
                CaseEntry::scan(i + 1, dir).unwrap_or_else(|e| {
                    warn!("{}", e);
                    CaseEntry::unreadable(i + 1, dir)
                })
            })
            .collect::<Vec<_>>();

        debug!(
            "Found {} cases under {}, {} selected",
            total_cases,
            root.display(),
            cases.len()
        );

        Ok(Self {
            prefix: config.prefix(),
            root: root.clone(),
            total_cases,
            cases,
        })
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_case(root: &Path, name: &str, files: &[&str]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for file in files {
            fs::write(dir.join(file), "").unwrap();
        }
    }

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("scans");
        for name in ["case_03", "case_01", "case_02", "case_04"] {
            make_case(&root, name, &["mesh.obj", "labels.json"]);
        }
        fs::write(root.join("notes.txt"), "not a case").unwrap();
        temp
    }

    #[test]
    fn test_discover_sorted() {
        let temp = fixture();
        let dataset = Dataset::discover(&DatasetConfig::new(temp.path().join("scans"))).unwrap();
        let ids: Vec<_> = dataset.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["case_01", "case_02", "case_03", "case_04"]);
        assert_eq!(dataset.total_cases, 4);
        assert_eq!(dataset.prefix, "scans");
        assert_eq!(dataset.cases[0].index, 1);
    }

    #[test]
    fn test_window_and_reverse() {
        let temp = fixture();
        let config = DatasetConfig {
            start_case: 2,
            end_case: Some(3),
            ..DatasetConfig::new(temp.path().join("scans"))
        };
        let ids: Vec<_> = Dataset::discover(&config)
            .unwrap()
            .cases
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, ["case_02", "case_03"]);

        let reversed = DatasetConfig {
            reverse: true,
            ..config
        };
        let dataset = Dataset::discover(&reversed).unwrap();
        let ids: Vec<_> = dataset.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["case_03", "case_02"]);
        assert_eq!(dataset.cases[0].index, 2);
    }

    #[test]
    fn test_window_past_end() {
        let temp = fixture();
        let config = DatasetConfig {
            start_case: 3,
            end_case: Some(100),
            ..DatasetConfig::new(temp.path().join("scans"))
        };
        assert_eq!(Dataset::discover(&config).unwrap().len(), 2);

        let empty = DatasetConfig {
            start_case: 9,
            ..DatasetConfig::new(temp.path().join("scans"))
        };
        assert!(Dataset::discover(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_missing_root() {
        let temp = TempDir::new().unwrap();
        let config = DatasetConfig::new(temp.path().join("absent"));
        assert!(matches!(
            Dataset::discover(&config),
            Err(DatasetError::RootMissing(_))
        ));
    }

    #[test]
    fn test_zero_start_rejected() {
        let temp = fixture();
        let config = DatasetConfig {
            start_case: 0,
            ..DatasetConfig::new(temp.path().join("scans"))
        };
        assert!(matches!(
            Dataset::discover(&config),
            Err(DatasetError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_missing_inputs() {
        let temp = TempDir::new().unwrap();
        make_case(temp.path(), "only_mesh", &["a.obj"]);
        let entry = CaseEntry::scan(1, &temp.path().join("only_mesh")).unwrap();
        assert!(matches!(
            entry.inputs(),
            Err(DatasetError::MissingInput { extension: "json", .. })
        ));
    }

    #[test]
    fn test_last_candidate_wins() {
        let temp = TempDir::new().unwrap();
        make_case(temp.path(), "multi", &["a.obj", "b.obj", "a.json", "z.JSON"]);
        let entry = CaseEntry::scan(1, &temp.path().join("multi")).unwrap();
        let (obj, labels) = entry.inputs().unwrap();
        assert!(obj.ends_with("b.obj"));
        assert!(labels.ends_with("z.JSON"));
    }

    #[test]
    fn test_output_root() {
        let config = DatasetConfig::new("/data/scans");
        assert_eq!(config.output_root(), PathBuf::from("/data/output"));
        let explicit = DatasetConfig {
            output: Some(PathBuf::from("/tmp/out")),
            ..config
        };
        assert_eq!(explicit.output_root(), PathBuf::from("/tmp/out"));
        assert_eq!(DatasetConfig::new("scans").output_root(), PathBuf::from("output"));
    }
}
