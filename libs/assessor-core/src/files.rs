// File lookup inside a submission directory
use crate::levenshtein::Levenshtein;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every regular file below `root`, shallowest first, then by path.
pub fn walk(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<(usize, PathBuf)> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| (e.depth(), e.into_path()))
        .collect();
    files.sort();
    files.into_iter().map(|(_, path)| path).collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn extension(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|e| e.to_str())
}

/// First file named exactly `name`.
pub fn find_descendant(root: &Path, name: &str) -> Option<PathBuf> {
    walk(root).into_iter().find(|p| file_name(p) == name)
}

/// File named `name`, or the closest name with the same extension within
/// `tolerance`. Shallower files win ties.
pub fn find_closest_descendant(root: &Path, name: &str, metric: &Levenshtein, tolerance: f64) -> Option<PathBuf> {
    let files = walk(root);
    if let Some(exact) = files.iter().find(|p| file_name(p) == name) {
        return Some(exact.clone());
    }

    let wanted = extension(name);
    let mut best: Option<(f64, PathBuf)> = None;
    for path in files {
        let candidate = file_name(&path);
        if extension(&candidate) != wanted || !metric.similar(name, &candidate, tolerance) {
            continue;
        }
        let distance = metric.distance(name, &candidate);
        if best.as_ref().map_or(true, |(d, _)| distance < *d) {
            best = Some((distance, path));
        }
    }
    best.map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/deep")).unwrap();
        fs::write(dir.path().join("README.md"), "").unwrap();
        fs::write(dir.path().join("src/queue.java"), "").unwrap();
        fs::write(dir.path().join("src/Queue.txt"), "").unwrap();
        fs::write(dir.path().join("src/deep/Stack.java"), "").unwrap();
        dir
    }

    #[test]
    fn test_walk_is_breadth_first() {
        let dir = make_tree();
        let names: Vec<String> = walk(dir.path()).iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["README.md", "Queue.txt", "queue.java", "Stack.java"]);
    }

    #[test]
    fn test_find_descendant_exact_only() {
        let dir = make_tree();
        assert!(find_descendant(dir.path(), "Stack.java").is_some());
        assert!(find_descendant(dir.path(), "Queue.java").is_none());
    }

    #[test]
    fn test_find_closest_keeps_extension() {
        let dir = make_tree();
        let metric = Levenshtein::default();
        let found = find_closest_descendant(dir.path(), "Queue.java", &metric, 0.2).unwrap();
        assert_eq!(file_name(&found), "queue.java");

        let exact = find_closest_descendant(dir.path(), "Stack.java", &metric, 0.2).unwrap();
        assert!(exact.ends_with("src/deep/Stack.java"));

        assert!(find_closest_descendant(dir.path(), "Heap.java", &metric, 0.2).is_none());
    }
}
