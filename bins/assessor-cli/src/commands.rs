// CLI commands for inspecting submissions and detector output
use anyhow::{bail, Context, Result};
use assessor_common::config::{AssessorConfig, DEFAULT_CONFIG_PATH};
use assessor_common::types::{SimilarityPair, Submission};
use assessor_core::clustering;
use assessor_core::validate_submissions;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// One row of `validate` output.
#[derive(Debug, Serialize)]
pub struct ValidationRow {
    pub id: u64,
    pub name: String,
    pub valid: bool,
    pub missing: Vec<String>,
}

impl From<&Submission> for ValidationRow {
    fn from(submission: &Submission) -> Self {
        Self {
            id: submission.id,
            name: submission.name.clone(),
            valid: submission.is_valid(),
            missing: submission.missing_files().into_iter().map(str::to_string).collect(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<AssessorConfig> {
    AssessorConfig::load_or_default(path)?.apply_env()
}

pub fn validation_rows(root: &Path, expected: &[String]) -> Result<Vec<ValidationRow>> {
    let expected: BTreeSet<String> = expected.iter().cloned().collect();
    let submissions = validate_submissions(root, &expected)?;
    Ok(submissions.iter().map(ValidationRow::from).collect())
}

pub fn validate(root: &Path, expected: &[String], json: bool) -> Result<()> {
    let rows = validation_rows(root, expected)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No submissions found in {}", root.display());
        return Ok(());
    }

    println!("📋 Submissions in {}:\n", root.display());
    println!("{:<6} {:<30} {:<10} {}", "ID", "NAME", "STATUS", "MISSING");
    println!("{}", "─".repeat(80));
    for row in &rows {
        println!(
            "{:<6} {:<30} {:<10} {}",
            row.id,
            row.name,
            if row.valid { "complete" } else { "missing" },
            row.missing.join(", ")
        );
    }

    let complete = rows.iter().filter(|r| r.valid).count();
    println!("\n✅ {} of {} submission(s) complete", complete, rows.len());
    Ok(())
}

pub async fn read_pairs(path: &Path) -> Result<Vec<SimilarityPair>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub async fn cluster(path: &Path, threshold: f64) -> Result<()> {
    let pairs = read_pairs(path).await?;
    let clusters = clustering::cluster(&pairs, threshold);
    info!(pairs = pairs.len(), clusters = clusters.len(), threshold, "Clustering finished");

    if clusters.is_empty() {
        println!("No clusters at threshold {}", threshold);
        return Ok(());
    }

    println!("📊 Clusters at threshold {}:\n", threshold);
    for (index, members) in clusters.iter().enumerate() {
        let names: Vec<&str> = members.iter().map(String::as_str).collect();
        println!("  {}. {{{}}}", index + 1, names.join(", "));
    }
    println!("\n✅ Total: {} cluster(s)", clusters.len());
    Ok(())
}

pub fn show_config(config: &AssessorConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Write the default configuration under `path`.
pub async fn init_project(path: &Path, force: bool) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG_PATH);
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(&AssessorConfig::default())?;
    tokio::fs::write(&config_path, content)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("✅ Wrote {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validation_rows() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("alice")).unwrap();
        fs::write(dir.path().join("alice/Queue.java"), "").unwrap();
        fs::create_dir_all(dir.path().join("bob")).unwrap();

        let rows = validation_rows(dir.path(), &["Queue.java".to_string()]).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].valid);
        assert_eq!(rows[1].name, "bob");
        assert_eq!(rows[1].missing, vec!["Queue.java".to_string()]);
    }

    #[tokio::test]
    async fn test_read_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.json");
        fs::write(
            &path,
            r#"[{"first": "alice", "second": "bob", "score": 1.0},
                {"first": "bob", "second": "carol", "score": 0.4}]"#,
        )
        .unwrap();

        let pairs = read_pairs(&path).await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(clustering::cluster(&pairs, 1.0).len(), 1);
        assert!(read_pairs(&dir.path().join("missing.json")).await.is_err());
    }

    #[tokio::test]
    async fn test_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        init_project(dir.path(), false).await.unwrap();

        let written = AssessorConfig::load(&dir.path().join(DEFAULT_CONFIG_PATH)).unwrap();
        assert_eq!(written, AssessorConfig::default());

        assert!(init_project(dir.path(), false).await.is_err());
        assert!(init_project(dir.path(), true).await.is_ok());
    }
}
