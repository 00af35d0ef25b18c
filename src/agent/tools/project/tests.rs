use super::*;
use crate::agent::tools::testutil::ctx_for;
use crate::config::default_code_extensions;
use serde_json::json;

fn tool() -> ProjectAnalyzeTool {
    ProjectAnalyzeTool::new(default_code_extensions())
}

#[tokio::test]
async fn reports_languages_and_salient_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
    std::fs::write(dir.path().join("src/util.rs"), "").unwrap();
    std::fs::write(dir.path().join("helper.py"), "pass").unwrap();
    std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
    std::fs::write(dir.path().join("README.md"), "# x").unwrap();

    let result = tool()
        .execute(json!({}), &ctx_for(dir.path()))
        .await
        .unwrap();
    assert!(!result.is_error);

    let report: Value = serde_json::from_str(&result.content).unwrap();
    assert_eq!(report["languages"]["rs"], 2);
    assert_eq!(report["languages"]["py"], 1);
    assert_eq!(report["total_files"], 5);
    let salient: Vec<String> = report["salient_files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(salient.contains(&"Cargo.toml".to_string()));
    assert!(salient.contains(&"README.md".to_string()));
}

#[tokio::test]
async fn skips_hidden_and_vendored_directories() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join(".git")).unwrap();
    std::fs::write(dir.path().join(".git/config.rs"), "").unwrap();
    std::fs::create_dir(dir.path().join("target")).unwrap();
    std::fs::write(dir.path().join("target/generated.rs"), "").unwrap();
    std::fs::write(dir.path().join("lib.rs"), "").unwrap();

    let result = tool()
        .execute(json!({}), &ctx_for(dir.path()))
        .await
        .unwrap();
    let report: Value = serde_json::from_str(&result.content).unwrap();
    assert_eq!(report["languages"]["rs"], 1);
    assert_eq!(report["total_files"], 1);
}

#[tokio::test]
async fn empty_workspace_is_fine() {
    let dir = tempfile::tempdir().unwrap();
    let result = tool()
        .execute(json!({}), &ctx_for(dir.path()))
        .await
        .unwrap();
    assert!(!result.is_error);
    let report: Value = serde_json::from_str(&result.content).unwrap();
    assert_eq!(report["total_files"], 0);
}
