//! List harvested CSV files.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use console::style;

/// A file that could not be inspected is listed as busy rather than failing
/// the listing; the harvester may be appending to it right now.
pub fn cmd_outputs(dir: &Path) -> anyhow::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!(
                "{} No output directory at {}",
                style("!").yellow(),
                dir.display()
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("csv"))
        .collect();
    files.sort();

    if files.is_empty() {
        println!("No output files in {}", dir.display());
        return Ok(());
    }

    println!("{:<60} {:>10}  {}", "File", "Size", "Modified");
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match fs::metadata(path) {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|_| "-".to_string());
                println!(
                    "{:<60} {:>10}  {}",
                    truncate_name(&name, 60),
                    format_size(meta.len()),
                    modified
                );
            }
            Err(_) => {
                println!(
                    "{:<60} {:>10}  {}",
                    truncate_name(&name, 60),
                    "-",
                    style("(in use)").dim()
                );
            }
        }
    }
    println!("{} files", files.len());
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Shorten a name for display, keeping the tail (`_comments.csv`) visible.
fn truncate_name(name: &str, max_chars: usize) -> String {
    let count = name.chars().count();
    if count <= max_chars {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - (max_chars - 3)).collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("steam_1_comments.csv", 30), "steam_1_comments.csv");
        assert_eq!(
            truncate_name("bili_BV1xx_长长的标题_comments.csv", 16),
            "..._comments.csv"
        );
    }

    #[test]
    fn test_missing_dir_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_outputs(&dir.path().join("missing")).is_ok());
    }
}
