//! Request and response bodies for the REST surface.

use std::path::PathBuf;

#[derive(Debug, serde::Deserialize)]
pub struct ProtectRequest {
    pub protected: bool,
}

#[derive(Debug, serde::Deserialize)]
pub struct RenameRequest {
    pub display_name: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct HiddenRequest {
    pub hidden: bool,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct PruneRequest {
    pub images: bool,
    pub volumes: bool,
    pub build_cache: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct PruneResponse {
    pub reclaimed: u64,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct StopParams {
    pub force: bool,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LogsParams {
    pub tail: Option<String>,
    pub follow: bool,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct StatsParams {
    pub stream: bool,
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct ScanPaths {
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, serde::Deserialize)]
pub struct PatternRequest {
    pub pattern: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct ProtectedProjectRequest {
    pub path: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_request_defaults() {
        let request: PruneRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.images && !request.volumes && !request.build_cache);

        let request: PruneRequest = serde_json::from_str(r#"{"images":true}"#).unwrap();
        assert!(request.images);
    }

    #[test]
    fn test_rename_request_null_clears() {
        let request: RenameRequest = serde_json::from_str(r#"{"display_name":null}"#).unwrap();
        assert_eq!(request.display_name, None);
    }
}
