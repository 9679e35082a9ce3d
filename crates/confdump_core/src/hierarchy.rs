use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

use crate::export::ExportedPage;

/// Reorganize the flat per-page directories under `out_dir` into the tree
/// implied by each record's parent pointer.
///
/// Every page must already be exported: this only relocates directories.
/// Children are resolved up front, so a dangling parent id fails the run
/// before any directory is moved. The walk is post-order (leaves first,
/// roots never moved), so each directory is moved into its parent while the
/// parent still sits at the output root, carrying already-nested
/// descendants along with it.
pub fn apply_hierarchy(out_dir: &Path, pages: &[ExportedPage]) -> Result<()> {
    let mut by_id: HashMap<&str, usize> = HashMap::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        by_id.insert(page.page_id.as_str(), index);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); pages.len()];
    let mut roots = Vec::new();
    for (index, page) in pages.iter().enumerate() {
        match &page.parent_id {
            None => roots.push(index),
            Some(parent_id) => match by_id.get(parent_id.as_str()) {
                Some(&parent_index) => children[parent_index].push(index),
                None => bail!(
                    "page {} ({}) references parent id {} which is not part of the export",
                    page.page_id,
                    page.folder,
                    parent_id
                ),
            },
        }
    }

    let mut visited = 0usize;
    for &root in &roots {
        visited += nest_subtree(out_dir, pages, &children, root, None)?;
    }
    if visited != pages.len() {
        bail!(
            "parent references form a cycle; relocated {visited} of {} pages",
            pages.len()
        );
    }
    Ok(())
}

fn nest_subtree(
    out_dir: &Path,
    pages: &[ExportedPage],
    children: &[Vec<usize>],
    index: usize,
    parent: Option<(usize, &Path)>,
) -> Result<usize> {
    // Where this directory ends up once the whole tree is applied. The move
    // itself targets the parent's pre-move path, which only matches this for
    // children of roots.
    let final_dir = match parent {
        Some((_, parent_final)) => parent_final.join(&pages[index].folder),
        None => out_dir.join(&pages[index].folder),
    };
    let mut visited = 1usize;
    for &child in &children[index] {
        visited += nest_subtree(out_dir, pages, children, child, Some((index, &final_dir)))?;
    }
    if let Some((parent, _)) = parent {
        let source = out_dir.join(&pages[index].folder);
        let target = out_dir
            .join(&pages[parent].folder)
            .join(&pages[index].folder);
        move_dir(&source, &target, &final_dir)?;
    }
    Ok(visited)
}

/// Relocate `source` to `target`. A missing source whose final destination
/// already exists counts as already applied (re-runs over a nested tree are
/// a no-op); a missing source with no final destination is an error.
fn move_dir(source: &Path, target: &Path, final_destination: &Path) -> Result<()> {
    if !source.exists() {
        if final_destination.exists() {
            return Ok(());
        }
        bail!("cannot relocate {}: directory does not exist", source.display());
    }
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::CrossesDevices => {
            copy_dir(source, target)?;
            fs::remove_dir_all(source)
                .with_context(|| format!("failed to remove {}", source.display()))?;
            Ok(())
        }
        Err(error) => Err(error).with_context(|| {
            format!(
                "failed to move {} into {}",
                source.display(),
                target.display()
            )
        }),
    }
}

fn copy_dir(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("failed to relativize {}", entry.path().display()))?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)
                .with_context(|| format!("failed to create {}", destination.display()))?;
        } else {
            fs::copy(entry.path(), &destination)
                .with_context(|| format!("failed to copy to {}", destination.display()))?;
        }
    }
    Ok(())
}
