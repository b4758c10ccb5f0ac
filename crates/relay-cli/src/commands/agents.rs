//! `relay agents`: list the capability catalog.

use std::path::Path;

use relay_core::agents::registry::descriptors_from_file;
use relay_core::models::AgentDescriptor;
use relay_core::CapabilityRegistry;

use super::{print_serialized, truncate};

/// Descriptors from a catalog file, or the built-in catalog.
pub fn catalog(agents_file: Option<&str>) -> Result<Vec<AgentDescriptor>, String> {
    match agents_file {
        Some(path) => descriptors_from_file(Path::new(path)).map_err(|e| e.to_string()),
        None => Ok(CapabilityRegistry::builtin_descriptors()),
    }
}

pub fn list(agents_file: Option<&str>, json: bool) -> Result<(), String> {
    let descriptors = catalog(agents_file)?;
    if json {
        return print_serialized(&descriptors);
    }

    let source = agents_file.unwrap_or("built-in");
    println!("{} agent(s) from {}", descriptors.len(), source);
    println!();
    println!("┌──────────────────────┬──────────────────────────┬──────────────────────────┬────────────────────┐");
    println!("│ Name                 │ Strengths                │ Capabilities             │ Outputs            │");
    println!("├──────────────────────┼──────────────────────────┼──────────────────────────┼────────────────────┤");
    for descriptor in &descriptors {
        println!(
            "│ {:<20} │ {:<24} │ {:<24} │ {:<18} │",
            truncate(&descriptor.name, 20),
            truncate(&descriptor.strengths.join(", "), 24),
            truncate(&descriptor.capabilities.join(", "), 24),
            truncate(&descriptor.output_formats.join(", "), 18)
        );
    }
    println!("└──────────────────────┴──────────────────────────┴──────────────────────────┴────────────────────┘");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let descriptors = catalog(None).unwrap();
        assert_eq!(descriptors.len(), 7);
        assert_eq!(descriptors[0].name, "architect");
    }

    #[test]
    fn test_missing_catalog_file() {
        let err = catalog(Some("/nonexistent/agents.yaml")).unwrap_err();
        assert!(err.contains("agents.yaml"), "{}", err);
    }
}
