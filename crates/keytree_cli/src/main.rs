//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `keytree_core` linkage with a deterministic ping.
//! - Print the group outline of a store file opened read-only.
//! - Start file logging when `KEYTREE_LOG_DIR` names an absolute directory;
//!   `KEYTREE_LOG_LEVEL` overrides the default level.

use keytree_core::{GroupId, NodeTree, StoreHandle, StoreOptions};
use std::process::ExitCode;

const LOG_DIR_VAR: &str = "KEYTREE_LOG_DIR";
const LOG_LEVEL_VAR: &str = "KEYTREE_LOG_LEVEL";

fn main() -> ExitCode {
    let log_dir = std::env::var(LOG_DIR_VAR).ok();
    let log_level = std::env::var(LOG_LEVEL_VAR).ok();
    if let Some((level, dir)) = logging_config(log_level, log_dir) {
        if let Err(err) = keytree_core::init_logging(&level, &dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    println!("keytree_core ping={}", keytree_core::ping());
    println!("keytree_core version={}", keytree_core::core_version());

    let Some(path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };

    let options = StoreOptions {
        read_only: true,
        ..StoreOptions::default()
    };
    match StoreHandle::open_sqlite(&path, &options) {
        Ok(store) => {
            store.read(|tree| print_outline(tree, tree.root_id(), 0));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("failed to open `{path}`: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Level and directory for `init_logging`, or `None` when no directory is set.
fn logging_config(level: Option<String>, dir: Option<String>) -> Option<(String, String)> {
    let dir = dir.filter(|dir| !dir.trim().is_empty())?;
    let level = level
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| keytree_core::default_log_level().to_string());
    Some((level, dir))
}

fn print_outline(tree: &NodeTree, group: GroupId, depth: usize) {
    let indent = "  ".repeat(depth);
    if let Ok(current) = tree.lookup_group(group) {
        println!(
            "{indent}{} ({} entries)",
            current.name,
            current.entries.len()
        );
        for child in &current.groups {
            print_outline(tree, *child, depth + 1);
        }
    }
}
