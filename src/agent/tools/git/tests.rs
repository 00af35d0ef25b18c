use super::*;
use crate::agent::tools::testutil::ctx_for;
use serde_json::json;

fn open_policy() -> Policy {
    Policy {
        allowed_commands: vec![],
        blocked_commands: vec![],
        ..Policy::default()
    }
}

fn tool() -> GitOperationsTool {
    GitOperationsTool::new(Sandbox::new(), open_policy())
}

/// Initialise a git repo with one commit in `dir`.
async fn init_repo(dir: &std::path::Path) {
    let run = |args: &[&str]| {
        let args: Vec<String> = args.iter().map(|s| (*s).to_string()).collect();
        let dir = dir.to_path_buf();
        async move {
            let status = tokio::process::Command::new("git")
                .args(&args)
                .current_dir(&dir)
                .env("GIT_AUTHOR_NAME", "test")
                .env("GIT_AUTHOR_EMAIL", "test@example.com")
                .env("GIT_COMMITTER_NAME", "test")
                .env("GIT_COMMITTER_EMAIL", "test@example.com")
                .output()
                .await
                .expect("git should be runnable in tests");
            assert!(status.status.success(), "git {:?} failed", args);
        }
    };
    run(&["init", "-q"]).await;
    std::fs::write(dir.join("README"), "hello\n").unwrap();
    run(&["add", "README"]).await;
    run(&["-c", "user.name=test", "-c", "user.email=test@example.com", "commit", "-q", "-m", "init"])
        .await;
}

#[test]
fn build_argv_per_operation() {
    assert_eq!(
        GitOperationsTool::build_argv("status", None, None).unwrap(),
        vec!["status"]
    );
    assert_eq!(
        GitOperationsTool::build_argv("diff", None, Some("src/main.rs")).unwrap(),
        vec!["diff", "src/main.rs"]
    );
    assert_eq!(
        GitOperationsTool::build_argv("commit", Some("fix parser"), None).unwrap(),
        vec!["commit", "-m", "fix parser"]
    );
    assert_eq!(
        GitOperationsTool::build_argv("remote", None, None).unwrap(),
        vec!["remote", "-v"]
    );
    assert_eq!(
        GitOperationsTool::build_argv("log", None, None).unwrap(),
        vec!["log", "--oneline"]
    );
}

#[test]
fn commit_requires_message() {
    assert!(matches!(
        GitOperationsTool::build_argv("commit", None, None),
        Err(AgentError::InvalidArgs(_))
    ));
    assert!(matches!(
        GitOperationsTool::build_argv("commit", Some("   "), None),
        Err(AgentError::InvalidArgs(_))
    ));
}

#[test]
fn branch_verbs() {
    assert_eq!(
        GitOperationsTool::build_argv("branch", None, None).unwrap(),
        vec!["branch", "--list"]
    );
    assert_eq!(
        GitOperationsTool::build_argv("branch", Some("create feature-x"), None).unwrap(),
        vec!["branch", "feature-x"]
    );
    assert_eq!(
        GitOperationsTool::build_argv("branch", Some("new feature-x"), None).unwrap(),
        vec!["branch", "feature-x"]
    );
    assert_eq!(
        GitOperationsTool::build_argv("branch", Some("switch main"), None).unwrap(),
        vec!["checkout", "main"]
    );
    assert_eq!(
        GitOperationsTool::build_argv("branch", Some("delete old"), None).unwrap(),
        vec!["branch", "-d", "old"]
    );
}

#[test]
fn branch_requires_name() {
    assert!(GitOperationsTool::build_argv("branch", Some("create"), None).is_err());
    assert!(GitOperationsTool::build_argv("branch", Some("bogus x"), None).is_err());
}

#[test]
fn unknown_operation_is_invalid() {
    assert!(matches!(
        GitOperationsTool::build_argv("push --force", None, None),
        Err(AgentError::InvalidArgs(_))
    ));
}

#[test]
fn truncate_lines_appends_marker() {
    let output = (0..10).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
    let truncated = GitOperationsTool::truncate_lines(&output, 3);
    assert!(truncated.starts_with("line0\nline1\nline2"));
    assert!(truncated.contains("truncated to 3 of 10 lines"));
    // Under the cap: untouched
    assert_eq!(GitOperationsTool::truncate_lines("a\nb", 5), "a\nb");
}

#[tokio::test]
async fn status_runs_in_a_repo() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;
    let ctx = ctx_for(dir.path());

    let result = tool()
        .execute(json!({"operation": "status"}), &ctx)
        .await
        .unwrap();
    assert!(!result.is_error, "{}", result.content);
}

#[tokio::test]
async fn log_truncates_to_max_lines() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).await;
    let ctx = ctx_for(dir.path());

    let result = tool()
        .execute(json!({"operation": "log", "max_lines": 1}), &ctx)
        .await
        .unwrap();
    assert!(!result.is_error, "{}", result.content);
    assert!(result.content.lines().count() <= 2);
}

#[tokio::test]
async fn status_outside_a_repo_is_an_error_result() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ctx_for(dir.path());

    let result = tool()
        .execute(json!({"operation": "status"}), &ctx)
        .await
        .unwrap();
    assert!(result.is_error);
}

#[tokio::test]
async fn empty_commit_message_is_an_error_result() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ctx_for(dir.path());

    let result = tool()
        .execute(json!({"operation": "commit", "args": ""}), &ctx)
        .await
        .unwrap();
    assert!(result.is_error);
    assert!(result.content.contains("non-empty message"));
}
