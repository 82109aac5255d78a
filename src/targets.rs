//! Target-list files: one URL per line.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::TargetListError;
use crate::models::{SourceKind, Target};

/// Load the ordered target list from `path`.
///
/// Blank lines and `#` comments are skipped. The source of each line is
/// inferred from its host unless `site` forces one for every line.
pub fn load_targets(path: &Path, site: Option<SourceKind>) -> Result<Vec<Target>, TargetListError> {
    let content = fs::read_to_string(path).map_err(|source| TargetListError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let targets = parse_targets(&content, site)?;
    debug!("Loaded {} targets from {}", targets.len(), path.display());
    Ok(targets)
}

pub fn parse_targets(content: &str, site: Option<SourceKind>) -> Result<Vec<Target>, TargetListError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut targets = Vec::new();

    for (number, line) in content.lines().enumerate() {
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            continue;
        }
        let source = match site.or_else(|| SourceKind::infer(url)) {
            Some(source) => source,
            None => {
                return Err(TargetListError::UnknownSource {
                    line: number + 1,
                    url: url.to_string(),
                })
            }
        };
        targets.push(Target::new(url, source));
    }

    Ok(targets)
}

/// Default run key: the target list's file stem.
pub fn run_key_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "targets".to_string())
}
