//! archiso profile inspection.
//!
//! Exposes the package list and the `profiledef.sh` assignments of the
//! profile the builds start from, so the frontend can show the defaults.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::error;

use crate::AppState;

const PACKAGES_FILE: &str = "packages.x86_64";
const PROFILEDEF_FILE: &str = "profiledef.sh";

pub fn router() -> Router<AppState> {
    Router::new().route("/config", get(get_profile))
}

#[derive(Debug, Serialize)]
struct ProfileResponse {
    packages: Vec<String>,
    profile_settings: BTreeMap<String, String>,
}

async fn get_profile(State(state): State<AppState>) -> Json<ProfileResponse> {
    let packages_path = state.profile_dir.join(PACKAGES_FILE);
    let packages = match tokio::fs::read_to_string(&packages_path).await {
        Ok(text) => parse_packages(&text),
        Err(e) => {
            error!(path = %packages_path.display(), error = %e, "Error reading packages");
            Vec::new()
        }
    };

    let profiledef_path = state.profile_dir.join(PROFILEDEF_FILE);
    let profile_settings = match tokio::fs::read_to_string(&profiledef_path).await {
        Ok(text) => parse_profiledef(&text),
        Err(e) => {
            error!(path = %profiledef_path.display(), error = %e, "Error reading profiledef");
            BTreeMap::from([("error".to_string(), e.to_string())])
        }
    };

    Json(ProfileResponse {
        packages,
        profile_settings,
    })
}

/// One package per line; blank lines and `#` comments are skipped.
fn parse_packages(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Top-level `key=value` assignments with surrounding quotes removed.
fn parse_profiledef(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use crate::testing::{body_json, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use isoforge_config::ServerConfig;
    use tower::ServiceExt;

    #[test]
    fn test_parse_packages_skips_comments_and_blanks() {
        let text = "base\n# kernels\nlinux\n\n  vim  \n";
        assert_eq!(parse_packages(text), vec!["base", "linux", "vim"]);
    }

    #[test]
    fn test_parse_profiledef_strips_quotes() {
        let text = r#"#!/usr/bin/env bash
# shellcheck disable=SC2034

iso_name="archlinux"
iso_label='ARCH_202401'
install_dir="arch"
bootmodes=('bios.syslinux.mbr' 'uefi-x64.systemd-boot.esp')
"#;
        let settings = parse_profiledef(text);
        assert_eq!(settings["iso_name"], "archlinux");
        assert_eq!(settings["iso_label"], "ARCH_202401");
        assert_eq!(settings["install_dir"], "arch");
        assert!(settings["bootmodes"].starts_with("('bios.syslinux.mbr'"));
        assert_eq!(settings.len(), 4);
    }

    #[tokio::test]
    async fn test_profile_endpoint_reads_profile_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PACKAGES_FILE), "base\nlinux\n").unwrap();
        std::fs::write(dir.path().join(PROFILEDEF_FILE), "iso_name=\"archlinux\"\n").unwrap();

        let config = ServerConfig {
            profile_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let app = routes::router(test_state(&config).await);
        let response = app
            .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["packages"], serde_json::json!(["base", "linux"]));
        assert_eq!(body["profile_settings"]["iso_name"], "archlinux");
    }

    #[tokio::test]
    async fn test_missing_profile_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            profile_dir: dir.path().join("absent"),
            ..ServerConfig::default()
        };
        let app = routes::router(test_state(&config).await);
        let response = app
            .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["packages"], serde_json::json!([]));
        assert!(body["profile_settings"]["error"].is_string());
    }
}
