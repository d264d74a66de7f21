//! Default log path suggestion
//!
//! Containers usually receive web server logs through a bind mount. This
//! module guesses that mount from `/proc/self/mountinfo` and sniffs whether it
//! holds plain (`*.log`) or rotated (`*.gz`) files, producing a glob such as
//! `/share/logs/*.log`. It has no link to the storage engine.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const PREFERRED_LOG_DIR: &str = "/share/logs";
const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";
const MAX_WALK_ENTRIES: usize = 4000;
const MAX_WALK_DEPTH: usize = 3;

const PSEUDO_FS_TYPES: &[&str] = &[
    "proc",
    "sysfs",
    "devtmpfs",
    "devpts",
    "tmpfs",
    "cgroup",
    "cgroup2",
    "mqueue",
    "pstore",
    "debugfs",
    "tracefs",
    "securityfs",
    "fusectl",
    "configfs",
    "autofs",
    "rpc_pipefs",
    "squashfs",
    "nsfs",
];

const SYSTEM_PREFIXES: &[&str] = &["/proc", "/sys", "/dev", "/run"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub path: String,
    pub fs_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogExtension {
    Log,
    Gz,
}

impl LogExtension {
    pub fn as_str(self) -> &'static str {
        match self {
            LogExtension::Log => "log",
            LogExtension::Gz => "gz",
        }
    }

    fn of(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".log") {
            Some(LogExtension::Log)
        } else if name.ends_with(".gz") {
            Some(LogExtension::Gz)
        } else {
            None
        }
    }
}

/// Suggested glob for the access logs, or `None` when nothing looks right
pub fn suggest_default_log_path() -> Option<PathBuf> {
    let preferred = Path::new(PREFERRED_LOG_DIR);
    if preferred.is_dir() {
        if let Some(ext) = detect_log_extension(preferred) {
            return Some(glob_for(preferred, ext));
        }
    }

    let mountinfo = fs::read_to_string(MOUNTINFO_PATH).ok()?;
    let mounts = parse_mountinfo(&mountinfo);
    let root = first_usable_mount(&mounts, |path| Path::new(path).is_dir())?;
    let root = Path::new(root);
    detect_log_extension(root).map(|ext| glob_for(root, ext))
}

fn glob_for(root: &Path, ext: LogExtension) -> PathBuf {
    root.join(format!("*.{}", ext.as_str()))
}

/// Mount points in mountinfo order, first occurrence of each path only
pub fn parse_mountinfo(content: &str) -> Vec<MountPoint> {
    let mut seen = HashSet::new();
    let mut mounts = Vec::new();

    for line in content.lines() {
        let Some((left, right)) = line.split_once(" - ") else {
            continue;
        };
        let Some(raw_path) = left.split_whitespace().nth(4) else {
            continue;
        };
        let Some(fs_type) = right.split_whitespace().next() else {
            continue;
        };

        let path = unescape_mount_path(raw_path);
        if path.is_empty() || !seen.insert(path.clone()) {
            continue;
        }
        mounts.push(MountPoint {
            path,
            fs_type: fs_type.to_string(),
        });
    }
    mounts
}

/// Undo the octal escapes the kernel applies to mount paths
pub fn unescape_mount_path(path: &str) -> String {
    path.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn is_candidate(mount: &MountPoint) -> bool {
    if mount.path.is_empty() {
        return false;
    }
    if mount.path == "/" && mount.fs_type == "overlay" {
        return false;
    }
    if PSEUDO_FS_TYPES.contains(&mount.fs_type.as_str()) {
        return false;
    }
    !SYSTEM_PREFIXES.iter().any(|prefix| {
        mount.path == *prefix
            || mount
                .path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// First non-root candidate that `is_dir` accepts; `/` only as a fallback
pub fn first_usable_mount<'a, F>(mounts: &'a [MountPoint], is_dir: F) -> Option<&'a str>
where
    F: Fn(&str) -> bool,
{
    let mut fallback = None;
    for mount in mounts {
        let usable = is_candidate(mount) && is_dir(&mount.path);
        if mount.path == "/" {
            if fallback.is_none() && usable {
                fallback = Some(mount.path.as_str());
            }
            continue;
        }
        if usable {
            return Some(mount.path.as_str());
        }
    }
    fallback
}

/// `log` if any `.log` file is found, else `gz` if any `.gz` file is
///
/// Files directly under `root` are checked first, then a bounded walk
/// descends into subdirectories.
pub fn detect_log_extension(root: &Path) -> Option<LogExtension> {
    let top_level: Vec<LogExtension> = log_files(root, 1)
        .filter_map(|entry| LogExtension::of(entry.path()))
        .collect();
    if top_level.contains(&LogExtension::Log) {
        return Some(LogExtension::Log);
    }
    if top_level.contains(&LogExtension::Gz) {
        return Some(LogExtension::Gz);
    }

    let mut found = None;
    for entry in log_files(root, MAX_WALK_DEPTH + 1).take(MAX_WALK_ENTRIES) {
        match LogExtension::of(entry.path()) {
            Some(LogExtension::Log) => return Some(LogExtension::Log),
            Some(LogExtension::Gz) => found = Some(LogExtension::Gz),
            None => {}
        }
    }
    found
}

/// Non-directory entries below `root`, at most `max_depth` levels down
fn log_files(root: &Path, max_depth: usize) -> impl Iterator<Item = walkdir::DirEntry> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_type().is_dir())
}
