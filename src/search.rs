//! Two-phase artefact matching.
//!
//! Phase 1 runs during the MFT scan and only looks at file names. Phase 2
//! runs once the directory tree is known and checks the full path.

use log::{debug, info};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::attributes::{AttributeList, DataAttribute, DataContent, FileNameAttribute};
use crate::error::{CollectError, Result};
use crate::runs::DataRun;
use crate::tree::{DirectoryTree, SEPARATOR, join, volume_root};

/// Case-insensitive test against an already lower-cased string.
#[derive(Debug, Clone)]
pub enum Matcher {
    Exact(String),
    Regex(Regex),
}

impl Matcher {
    pub fn exact(value: &str) -> Self {
        Matcher::Exact(value.to_lowercase())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        let re = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Matcher::Regex(re))
    }

    pub fn is_match(&self, lowered: &str) -> bool {
        match self {
            Matcher::Exact(s) => s == lowered,
            Matcher::Regex(re) => re.is_match(lowered),
        }
    }
}

/// One requested artefact.
#[derive(Debug, Clone)]
pub struct SearchTerm {
    pub full_path: Matcher,
    pub file_name: Matcher,
}

impl SearchTerm {
    pub fn new(full_path: Matcher, file_name: Matcher) -> Self {
        Self {
            full_path,
            file_name,
        }
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.file_name.is_match(&name.to_lowercase())
    }

    /// Phase 2 test. The last path component must also satisfy the
    /// file-name matcher.
    pub fn matches_path(&self, full_path: &str) -> bool {
        let lowered = full_path.to_lowercase();
        let leaf = lowered.rsplit(SEPARATOR).next().unwrap_or(&lowered);
        self.file_name.is_match(leaf) && self.full_path.is_match(&lowered)
    }
}

/// A target as written in a configuration file. `full_path` is the
/// directory holding the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub full_path: String,
    #[serde(default)]
    pub full_path_is_regex: bool,
    pub file_name: String,
    #[serde(default)]
    pub file_name_is_regex: bool,
}

impl TargetConfig {
    pub fn exact(dir: &str, file_name: &str) -> Self {
        Self {
            full_path: dir.to_string(),
            full_path_is_regex: false,
            file_name: file_name.to_string(),
            file_name_is_regex: false,
        }
    }

    pub fn regex(dir: &str, dir_is_regex: bool, file_name: &str, name_is_regex: bool) -> Self {
        Self {
            full_path: dir.to_string(),
            full_path_is_regex: dir_is_regex,
            file_name: file_name.to_string(),
            file_name_is_regex: name_is_regex,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.full_path.is_empty() {
            return Err(CollectError::InvalidTarget(format!(
                "empty fullPath for fileName '{}'",
                self.file_name
            )));
        }
        if self.file_name.is_empty() {
            return Err(CollectError::InvalidTarget(format!(
                "empty fileName for fullPath '{}'",
                self.full_path
            )));
        }
        let ends_with_separator =
            self.full_path.ends_with(SEPARATOR) || self.full_path.ends_with('/');
        if self.full_path_is_regex && !ends_with_separator {
            return Err(CollectError::InvalidTarget(format!(
                "regex fullPath '{}' must end with a path separator",
                self.full_path
            )));
        }
        if !self.full_path_is_regex && ends_with_separator {
            return Err(CollectError::InvalidTarget(format!(
                "fullPath '{}' must not end with a path separator",
                self.full_path
            )));
        }
        Ok(())
    }

    pub fn to_search_term(&self) -> Result<SearchTerm> {
        self.validate()?;

        let file_name = if self.file_name_is_regex {
            Matcher::regex(&self.file_name)?
        } else {
            Matcher::exact(&self.file_name)
        };

        // matches_path checks the last component against the file-name matcher
        let full_path = if !self.full_path_is_regex && !self.file_name_is_regex {
            Matcher::exact(&join(&self.full_path, &self.file_name))
        } else {
            let dir = if self.full_path_is_regex {
                self.full_path.clone()
            } else {
                format!("^{}{}", regex::escape(&self.full_path), regex::escape("\\"))
            };
            Matcher::regex(&format!(r"(?:{})[^\\]+$", dir))?
        };

        Ok(SearchTerm::new(full_path, file_name))
    }

    /// Read a JSON array of targets.
    pub fn load_json<R: Read>(reader: R) -> Result<Vec<TargetConfig>> {
        let targets: Vec<TargetConfig> = serde_json::from_reader(reader)?;
        for t in &targets {
            t.validate()?;
        }
        Ok(targets)
    }

    /// The usual triage set for a Windows system volume.
    pub fn defaults(volume: &str) -> Vec<TargetConfig> {
        let root = volume_root(volume);
        let esc_root = regex::escape(&root);
        let config = join(&root, r"Windows\System32\config");
        vec![
            TargetConfig::exact(&root, "$MFT"),
            TargetConfig::exact(&root, "$LogFile"),
            TargetConfig::exact(&config, "SAM"),
            TargetConfig::exact(&config, "SYSTEM"),
            TargetConfig::exact(&config, "SOFTWARE"),
            TargetConfig::exact(&config, "SECURITY"),
            TargetConfig::exact(&config, "DEFAULT"),
            TargetConfig::exact(&join(&root, r"Windows\AppCompat\Programs"), "Amcache.hve"),
            TargetConfig::exact(&join(&root, r"Windows\System32\drivers\etc"), "hosts"),
            TargetConfig::regex(
                &format!(r"^{}\\Users\\[^\\]+\\", esc_root),
                true,
                "NTUSER.DAT",
                false,
            ),
            TargetConfig::regex(
                &format!(r"^{}\\Users\\[^\\]+\\AppData\\Local\\Microsoft\\Windows\\", esc_root),
                true,
                "UsrClass.dat",
                false,
            ),
            TargetConfig::regex(
                &join(&root, r"Windows\System32\winevt\Logs"),
                false,
                r"^.*\.evtx$",
                true,
            ),
            TargetConfig::regex(&join(&root, r"Windows\Prefetch"), false, r"^.*\.pf$", true),
        ]
    }
}

/// Compile and validate a whole target list before any scanning starts.
pub fn compile_targets(targets: &[TargetConfig]) -> Result<Vec<SearchTerm>> {
    targets.iter().map(TargetConfig::to_search_term).collect()
}

/// Phase 1: the first human-readable name of a record that some term's
/// file-name matcher accepts. DOS 8.3 names never match.
pub fn match_file_name<'a>(
    terms: &[SearchTerm],
    names: &'a [FileNameAttribute],
) -> Option<&'a FileNameAttribute> {
    names
        .iter()
        .filter(|n| n.namespace.is_human_readable())
        .find(|n| {
            let lowered = n.name.to_lowercase();
            terms.iter().any(|t| t.file_name.is_match(&lowered))
        })
}

/// A record whose name passed phase 1.
#[derive(Debug, Clone)]
pub struct PossibleMatch {
    pub record_number: u64,
    pub file_name: FileNameAttribute,
    /// Unnamed $DATA fragments, in the order they were found.
    pub data: Vec<DataAttribute>,
    pub attribute_list: Option<AttributeList>,
}

impl PossibleMatch {
    pub fn new(record_number: u64, file_name: FileNameAttribute) -> Self {
        Self {
            record_number,
            file_name,
            data: Vec::new(),
            attribute_list: None,
        }
    }

    /// Runs of all fragments, ordered by starting VCN.
    pub fn runs(&self) -> Vec<DataRun> {
        let mut fragments: Vec<&DataAttribute> = self.data.iter().collect();
        fragments.sort_by_key(|d| d.lowest_vcn());
        fragments.iter().flat_map(|d| d.runs().iter().copied()).collect()
    }

    pub fn resident(&self) -> Option<&[u8]> {
        self.data.iter().find_map(|d| match &d.content {
            DataContent::Resident(bytes) => Some(bytes.as_slice()),
            DataContent::NonResident { .. } => None,
        })
    }

    /// Real size from the first fragment, else what the $FILE_NAME claims.
    pub fn size(&self) -> u64 {
        self.data
            .iter()
            .find_map(DataAttribute::size)
            .unwrap_or(self.file_name.logical_size)
    }

    fn into_confirmed(self, full_path: String) -> ConfirmedFile {
        ConfirmedFile {
            record_number: self.record_number,
            runs: self.runs(),
            resident: self.resident().map(<[u8]>::to_vec),
            size: self.size(),
            full_path,
        }
    }
}

/// A fully matched file, ready for extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedFile {
    pub record_number: u64,
    pub full_path: String,
    pub runs: Vec<DataRun>,
    #[serde(skip)]
    pub resident: Option<Vec<u8>>,
    pub size: u64,
}

/// Phase 2: place every possible match under its parent directory and keep
/// those whose full path some term accepts.
pub fn confirm_matches(
    terms: &[SearchTerm],
    matches: Vec<PossibleMatch>,
    tree: &DirectoryTree,
) -> Vec<ConfirmedFile> {
    let candidates = matches.len();
    let mut confirmed = Vec::new();
    for m in matches {
        let Some(parent) = tree.get(m.file_name.parent_record) else {
            debug!(
                "Record {} ('{}'): parent {} never resolved, dropping",
                m.record_number, m.file_name.name, m.file_name.parent_record
            );
            continue;
        };
        let full_path = join(parent, &m.file_name.name);
        if terms.iter().any(|t| t.matches_path(&full_path)) {
            debug!("Confirmed record {} as '{}'", m.record_number, full_path);
            confirmed.push(m.into_confirmed(full_path));
        }
    }
    info!("{} of {} possible matches confirmed", confirmed.len(), candidates);
    confirmed
}
