use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walk::SortedDir;

use crate::entry::FileEntry;
use crate::error::InventoryError;
use crate::FileInventory;

#[derive(Clone, Debug)]
enum Input {
    /// A file or directory named directly on the command line.
    Path(PathBuf),
    /// A text file whose lines name further inputs.
    ListFile(PathBuf),
}

/// Configures and runs input discovery.
///
/// Inputs are processed in the order they are added. Directories expand
/// recursively with sorted entry order, descending while the current depth is
/// below the recursion limit (a negative limit means unbounded). Duplicate
/// paths are not deduplicated: a path supplied twice, or reachable both
/// directly and through a directory root, appears twice in the inventory.
#[derive(Clone, Debug)]
pub struct InventoryBuilder {
    inputs: Vec<Input>,
    recursion_limit: i32,
}

impl Default for InventoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryBuilder {
    /// Creates a builder with no inputs and unbounded recursion.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            recursion_limit: -1,
        }
    }

    /// Sets the maximum directory depth to descend below a root.
    ///
    /// Zero keeps only a root directory's immediate files; negative values
    /// remove the bound entirely.
    #[must_use]
    pub const fn recursion_limit(mut self, limit: i32) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Adds a file or directory input.
    #[must_use]
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.inputs.push(Input::Path(path.into()));
        self
    }

    /// Adds a list file whose lines name further inputs.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    #[must_use]
    pub fn list_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.inputs.push(Input::ListFile(path.into()));
        self
    }

    /// Discovers all input files and builds the inventory.
    ///
    /// Fails atomically: a missing root, an unreadable directory mid-walk, or
    /// an unreadable list file aborts the whole construction.
    pub fn build(self) -> Result<FileInventory, InventoryError> {
        let mut inventory = FileInventory::default();

        for input in &self.inputs {
            match input {
                Input::Path(path) => {
                    self.add_root(&mut inventory, path)?;
                }
                Input::ListFile(path) => {
                    self.add_list_file(&mut inventory, path)?;
                }
            }
        }

        if inventory.is_empty() {
            return Err(InventoryError::Empty);
        }

        debug!(
            files = inventory.len(),
            bytes = inventory.total_bytes(),
            "inventory built"
        );

        Ok(inventory)
    }

    fn add_root(&self, inventory: &mut FileInventory, path: &Path) -> Result<(), InventoryError> {
        let path = normalize(path);
        let metadata = fs::metadata(&path).map_err(|source| InventoryError::RootInaccessible {
            path: path.clone(),
            source,
        })?;

        if metadata.is_dir() {
            self.add_dir(inventory, &path, 0)
        } else if metadata.is_file() {
            inventory.push(FileEntry::new(path, metadata.len()));
            Ok(())
        } else {
            Err(InventoryError::NotRegular { path })
        }
    }

    fn add_dir(
        &self,
        inventory: &mut FileInventory,
        dir: &Path,
        depth: i32,
    ) -> Result<(), InventoryError> {
        debug!(path = %dir.display(), depth, "scanning directory");
        let sorted = SortedDir::open(dir)?;

        for name in &sorted {
            let path = dir.join(name);
            let metadata = fs::metadata(&path).map_err(|source| InventoryError::Metadata {
                path: path.clone(),
                source,
            })?;

            if metadata.is_dir() {
                if self.recursion_limit < 0 || depth < self.recursion_limit {
                    self.add_dir(inventory, &path, depth + 1)?;
                } else {
                    debug!(path = %path.display(), "recursion limit reached, not descending");
                }
            } else if metadata.is_file() {
                inventory.push(FileEntry::new(path, metadata.len()));
            } else {
                warn!(path = %path.display(), "skipping non-regular file");
            }
        }

        Ok(())
    }

    fn add_list_file(
        &self,
        inventory: &mut FileInventory,
        path: &Path,
    ) -> Result<(), InventoryError> {
        debug!(path = %path.display(), "reading list file");
        let file = fs::File::open(path).map_err(|source| InventoryError::ListFile {
            path: path.to_path_buf(),
            source,
        })?;

        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| InventoryError::ListFile {
                path: path.to_path_buf(),
                source,
            })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add_root(inventory, Path::new(line))?;
        }

        Ok(())
    }
}

/// Strips a trailing path separator so `dir/` and `dir` classify identically.
fn normalize(path: &Path) -> PathBuf {
    let mut components = path.components();
    let normalized: PathBuf = components.by_ref().collect();
    if normalized.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn paths(inventory: &FileInventory) -> Vec<PathBuf> {
        inventory.iter().map(|e| e.path().to_path_buf()).collect()
    }

    #[test]
    fn missing_root_aborts_construction() {
        let error = InventoryBuilder::new()
            .path("/nonexistent/input/file")
            .build()
            .expect_err("missing root must fail");
        assert!(matches!(error, InventoryError::RootInaccessible { .. }));
    }

    #[test]
    fn explicit_files_keep_argument_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let b = temp.path().join("b.mseed");
        let a = temp.path().join("a.mseed");
        fs::write(&b, b"x").expect("write");
        fs::write(&a, b"x").expect("write");

        let inventory = InventoryBuilder::new()
            .path(&b)
            .path(&a)
            .build()
            .expect("build");
        assert_eq!(paths(&inventory), vec![b, a]);
    }

    #[test]
    fn directory_contents_are_sorted_and_recursive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("root");
        fs::create_dir(&root).expect("mkdir");
        fs::create_dir(root.join("sub")).expect("mkdir");
        fs::write(root.join("z.mseed"), b"x").expect("write");
        fs::write(root.join("a.mseed"), b"x").expect("write");
        fs::write(root.join("sub").join("n.mseed"), b"x").expect("write");

        let inventory = InventoryBuilder::new().path(&root).build().expect("build");
        assert_eq!(
            paths(&inventory),
            vec![
                root.join("a.mseed"),
                root.join("sub").join("n.mseed"),
                root.join("z.mseed"),
            ]
        );
    }

    #[test]
    fn recursion_limit_zero_stays_at_top_level() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("sub")).expect("mkdir");
        fs::write(root.join("top.mseed"), b"x").expect("write");
        fs::write(root.join("sub").join("deep.mseed"), b"x").expect("write");

        let inventory = InventoryBuilder::new()
            .recursion_limit(0)
            .path(&root)
            .build()
            .expect("build");
        assert_eq!(paths(&inventory), vec![root.join("top.mseed")]);
    }

    #[test]
    fn trailing_separator_is_normalized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("root");
        fs::create_dir(&root).expect("mkdir");
        fs::write(root.join("f.mseed"), b"x").expect("write");

        let mut with_slash = root.clone().into_os_string();
        with_slash.push("/");
        let inventory = InventoryBuilder::new()
            .path(PathBuf::from(with_slash))
            .build()
            .expect("build");
        assert_eq!(paths(&inventory), vec![root.join("f.mseed")]);
    }

    #[test]
    fn list_file_lines_expand_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let one = temp.path().join("one.mseed");
        let two = temp.path().join("two.mseed");
        fs::write(&one, b"x").expect("write");
        fs::write(&two, b"x").expect("write");
        let list = temp.path().join("inputs.list");
        fs::write(
            &list,
            format!("# comment\n{}\n\n{}\n", two.display(), one.display()),
        )
        .expect("write list");

        let inventory = InventoryBuilder::new()
            .list_file(&list)
            .build()
            .expect("build");
        assert_eq!(paths(&inventory), vec![two, one]);
    }

    #[test]
    fn duplicate_roots_are_not_deduplicated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("f.mseed");
        fs::write(&file, b"x").expect("write");

        let inventory = InventoryBuilder::new()
            .path(&file)
            .path(&file)
            .build()
            .expect("build");
        assert_eq!(inventory.len(), 2);
    }

    #[test]
    fn empty_result_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = InventoryBuilder::new()
            .path(temp.path())
            .build()
            .expect_err("empty directory yields no inputs");
        assert!(matches!(error, InventoryError::Empty));
    }

    #[test]
    fn sizes_are_captured_at_discovery() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("f.mseed");
        fs::write(&file, vec![0u8; 1536]).expect("write");

        let inventory = InventoryBuilder::new().path(&file).build().expect("build");
        assert_eq!(inventory.get(0).map(FileEntry::size), Some(1536));
        assert_eq!(inventory.total_bytes(), 1536);
    }
}
