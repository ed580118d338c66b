//! Project stack detection from marker files.

use std::path::Path;

/// Marker file to stack name, first match wins.
const MARKERS: &[(&str, &str)] = &[
    ("Cargo.toml", "rust"),
    ("package.json", "node"),
    ("pyproject.toml", "python"),
    ("requirements.txt", "python"),
    ("go.mod", "go"),
];

pub const UNKNOWN: &str = "unknown";

pub fn detect_stack(dir: &Path) -> &'static str {
    MARKERS
        .iter()
        .find(|(marker, _)| dir.join(marker).is_file())
        .map_or(UNKNOWN, |(_, stack)| *stack)
}
