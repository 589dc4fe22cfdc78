//! Environment detection from compose file and directory naming conventions.

use std::path::Path;

use crate::model::Environment;

const DEVELOPMENT_PATTERNS: &[&str] = &[
    "dev",
    "development",
    "local",
    "test",
    "testing",
    "staging",
    "stage",
    "debug",
];

const PRODUCTION_PATTERNS: &[&str] = &["prod", "production", "live", "release", "main", "master"];

/// Guesses whether a compose file targets development or production from its
/// filename, falling back to the parent directory name. Production patterns
/// win over development patterns; the default is development.
pub fn detect_environment(compose_path: &Path) -> Environment {
    let filename = compose_path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(&filename);

    let dir = compose_path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if PRODUCTION_PATTERNS.iter().any(|p| contains_pattern(stem, p)) {
        return Environment::Production;
    }

    if DEVELOPMENT_PATTERNS.iter().any(|p| contains_pattern(stem, p)) {
        return Environment::Development;
    }

    if PRODUCTION_PATTERNS.iter().any(|p| contains_pattern(&dir, p)) {
        return Environment::Production;
    }

    Environment::Development
}

fn contains_pattern(s: &str, pattern: &str) -> bool {
    if s.contains(pattern) {
        return true;
    }

    s.split(['-', '_', '.']).any(|part| part == pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_environment_from_filename() {
        assert_eq!(
            detect_environment(Path::new("/srv/app/docker-compose.prod.yml")),
            Environment::Production
        );
        assert_eq!(
            detect_environment(Path::new("/srv/app/compose.dev.yaml")),
            Environment::Development
        );
        assert_eq!(
            detect_environment(Path::new("/srv/app/docker-compose.staging.yml")),
            Environment::Development
        );
    }

    #[test]
    fn test_production_wins_over_development() {
        assert_eq!(
            detect_environment(Path::new("/srv/app/compose.prod-test.yml")),
            Environment::Production
        );
    }

    #[test]
    fn test_detect_environment_from_directory() {
        assert_eq!(
            detect_environment(Path::new("/srv/production/compose.yml")),
            Environment::Production
        );
        assert_eq!(
            detect_environment(Path::new("/srv/sandbox/compose.yml")),
            Environment::Development
        );
    }

    #[test]
    fn test_delimiter_tokens_match_exactly() {
        assert!(contains_pattern("my-prod-stack", "prod"));
        assert!(contains_pattern("my_live_env", "live"));
        assert!(!contains_pattern("delivery", "dev"));
    }
}
