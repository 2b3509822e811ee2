//! Process-tree discovery from the per-task children listing.
//!
//! Linux exposes the direct children of every thread under
//! `/proc/<pid>/task/<tid>/children` as space-separated decimal pids. Walking
//! those files is linear in the number of descendants rather than in the size
//! of the process table. When the listing is unavailable the target is
//! treated as childless.

use std::{
    collections::{HashSet, VecDeque},
    fs,
    path::Path,
};

/// Default mount point of the process filesystem.
pub const PROC_ROOT: &str = "/proc";

/// Direct children of `pid` according to `/proc`.
#[must_use]
pub fn children_of(pid: u32) -> Vec<u32> {
    children_of_in(Path::new(PROC_ROOT), pid)
}

/// Direct children of `pid` according to the process filesystem at `root`.
///
/// Children reported by several threads are listed once, in first-seen order.
#[must_use]
pub fn children_of_in(root: &Path, pid: u32) -> Vec<u32> {
    let task_dir = root.join(pid.to_string()).join("task");
    let Ok(entries) = fs::read_dir(&task_dir) else {
        return Vec::new();
    };
    let mut tasks: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();
    tasks.sort();

    let mut seen = HashSet::new();
    let mut children = Vec::new();
    for task in tasks {
        let Ok(listing) = fs::read_to_string(task.join("children")) else {
            continue;
        };
        for child in parse_children(&listing) {
            if seen.insert(child) {
                children.push(child);
            }
        }
    }
    children
}

fn parse_children(listing: &str) -> impl Iterator<Item = u32> + '_ {
    listing
        .split_whitespace()
        .filter_map(|token| token.parse::<u32>().ok())
}

/// Every descendant of `pid` in breadth-first discovery order.
#[must_use]
pub fn descendants(pid: u32) -> Vec<u32> {
    descendants_with(pid, children_of)
}

/// Breadth-first walk using `children` to list direct children.
///
/// A visited set (seeded with `pid`) guards against pid wrap-around producing
/// cycles; the root itself is never part of the result.
pub fn descendants_with<F>(pid: u32, mut children: F) -> Vec<u32>
where
    F: FnMut(u32) -> Vec<u32>,
{
    let mut visited = HashSet::from([pid]);
    let mut queue = VecDeque::from([pid]);
    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        for child in children(current) {
            if visited.insert(child) {
                order.push(child);
                queue.push_back(child);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn write_children(root: &Path, pid: u32, tid: u32, listing: &str) {
        let dir = root.join(pid.to_string()).join("task").join(tid.to_string());
        fs::create_dir_all(&dir).expect("create task dir");
        fs::write(dir.join("children"), listing).expect("write children listing");
    }

    #[test]
    fn children_are_collected_across_threads() {
        let temp = tempdir().expect("fake proc root");
        write_children(temp.path(), 10, 10, "11 12 \n");
        write_children(temp.path(), 10, 13, "12 14\n");
        assert_eq!(children_of_in(temp.path(), 10), vec![11, 12, 14]);
    }

    #[test]
    fn missing_listing_means_no_children() {
        let temp = tempdir().expect("fake proc root");
        assert!(children_of_in(temp.path(), 42).is_empty());
    }

    #[test]
    fn walk_is_breadth_first_and_cycle_safe() {
        let tree: HashMap<u32, Vec<u32>> = HashMap::from([
            (1, vec![2, 3]),
            (2, vec![4]),
            (3, vec![5, 1]),
            (4, vec![2]),
        ]);
        let order = descendants_with(1, |pid| tree.get(&pid).cloned().unwrap_or_default());
        assert_eq!(order, vec![2, 3, 4, 5]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn live_children_are_discovered() {
        use std::process::{Command, Stdio};
        let mut parent = Command::new("sh")
            .args(["-c", "sleep 5 & wait"])
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn parent shell");
        let pid = parent.id();
        let mut found = Vec::new();
        for _ in 0..50 {
            found = descendants(pid);
            if !found.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        for child in &found {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(i32::try_from(*child).expect("pid fits")),
                nix::sys::signal::Signal::SIGKILL,
            );
        }
        let _ = parent.kill();
        let _ = parent.wait();
        assert_eq!(found.len(), 1, "sleep should be the only descendant");
    }
}
