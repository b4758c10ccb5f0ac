//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command. Commands return
//! `Result<(), String>`; `main` turns an error into a non-zero exit.

pub mod agents;
pub mod history;
pub mod run;
pub mod validate;

use relay_core::{Database, ExecutionStore};

/// Open the execution archive at the given SQLite path.
pub fn open_store(db_path: &str) -> Result<ExecutionStore, String> {
    let db = Database::open(db_path)
        .map_err(|e| format!("Failed to open database '{}': {}", db_path, e))?;
    Ok(ExecutionStore::new(db))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Serialize and pretty-print any value.
pub fn print_serialized<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let value = serde_json::to_value(value).map_err(|e| format!("Failed to encode output: {}", e))?;
    print_json(&value);
    Ok(())
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("architect", 16), "architect");
        assert_eq!(truncate("performance-reviewer", 10), "performa…");
        assert_eq!(truncate("ééééé", 3), "éé…");
    }
}
