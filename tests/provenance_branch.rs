mod repos;

use ai_context::error::AiContextError;
use ai_context::git::provenance_branch::CommitOrchestrator;
use repos::test_repo::TestRepo;

const BRANCH: &str = "ai-context-Test-User";

fn orchestrator() -> CommitOrchestrator {
    CommitOrchestrator::new("ai-context-")
}

fn commit(repo: &TestRepo, paths: &[&str]) -> Result<Option<String>, AiContextError> {
    let orchestrator = orchestrator();
    let repository = repo.repository();
    let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
    orchestrator.with_provenance_branch(&repository, |switch| {
        orchestrator.commit_matched_files(&repository, switch, &paths)
    })
}

fn seeded_repo() -> TestRepo {
    let repo = TestRepo::new();
    repo.write_file("README.md", "# project\n");
    repo.stage_all_and_commit("initial").unwrap();
    repo
}

#[test]
fn test_first_commit_creates_orphan_branch_and_restores_head() {
    let repo = seeded_repo();
    let main_sha = repo.head_sha().unwrap();
    repo.write_file("src/x.ts", "export const x = 1;\n");

    let hash = commit(&repo, &["src/x.ts"]).unwrap().expect("a commit should be made");

    assert_eq!(repo.current_branch().as_deref(), Some("main"));
    assert_eq!(repo.head_sha().unwrap(), main_sha);
    assert!(repo.branches().contains(&BRANCH.to_string()));

    let tip = repo.git(&["rev-parse", BRANCH]).unwrap();
    assert_eq!(tip.trim(), hash);
    let count = repo.git(&["rev-list", "--count", BRANCH]).unwrap();
    assert_eq!(count.trim(), "1", "provenance branch should start without history");

    let files = repo.git(&["show", "--name-only", "--format=", &hash]).unwrap();
    assert_eq!(files.trim(), "src/x.ts");
    let subject = repo.git(&["log", "-1", "--format=%s", &hash]).unwrap();
    assert!(subject.starts_with("[AI] "), "subject was {}", subject);
}

#[test]
fn test_user_worktree_and_index_are_untouched() {
    let repo = seeded_repo();
    repo.write_file("staged.txt", "staged\n");
    repo.git(&["add", "staged.txt"]).unwrap();
    repo.write_file("README.md", "# project\nlocal edit\n");
    repo.write_file("src/x.ts", "ai code\n");
    let before = repo.porcelain_status();

    commit(&repo, &["src/x.ts"]).unwrap().expect("a commit should be made");

    assert_eq!(repo.porcelain_status(), before);
    assert_eq!(repo.read_file("README.md"), "# project\nlocal edit\n");
    assert_eq!(repo.read_file("src/x.ts"), "ai code\n");
    let cached = repo.git(&["diff", "--cached", "--name-only"]).unwrap();
    assert_eq!(cached.trim(), "staged.txt");
}

#[test]
fn test_later_commits_extend_the_branch() {
    let repo = seeded_repo();
    repo.write_file("a.rs", "one\n");
    let first = commit(&repo, &["a.rs"]).unwrap().unwrap();

    repo.write_file("a.rs", "one\ntwo\n");
    let second = commit(&repo, &["a.rs"]).unwrap().unwrap();

    assert_ne!(first, second);
    let parent = repo.git(&["rev-parse", &format!("{}^", second)]).unwrap();
    assert_eq!(parent.trim(), first);
}

#[test]
fn test_unchanged_files_produce_no_commit() {
    let repo = seeded_repo();
    repo.write_file("a.rs", "one\n");
    commit(&repo, &["a.rs"]).unwrap().unwrap();

    assert_eq!(commit(&repo, &["a.rs"]).unwrap(), None);
    assert_eq!(repo.current_branch().as_deref(), Some("main"));
}

#[test]
fn test_deleted_file_is_removed_from_branch() {
    let repo = seeded_repo();
    repo.write_file("tmp.rs", "x\n");
    commit(&repo, &["tmp.rs"]).unwrap().unwrap();

    std::fs::remove_file(repo.path().join("tmp.rs")).unwrap();
    let hash = commit(&repo, &["tmp.rs"]).unwrap().expect("deletion should commit");
    let files = repo.git(&["ls-tree", "-r", "--name-only", &hash]).unwrap();
    assert!(!files.contains("tmp.rs"));
}

#[test]
fn test_detached_head_is_restored() {
    let repo = seeded_repo();
    let sha = repo.head_sha().unwrap();
    repo.git(&["checkout", "--quiet", "--detach"]).unwrap();
    repo.write_file("a.rs", "x\n");

    commit(&repo, &["a.rs"]).unwrap().unwrap();

    assert_eq!(repo.current_branch(), None);
    assert_eq!(repo.head_sha().unwrap(), sha);
}

#[test]
fn test_unborn_branch_is_restored() {
    let repo = TestRepo::new();
    repo.write_file("a.rs", "x\n");

    commit(&repo, &["a.rs"]).unwrap().unwrap();

    let head = repo.git(&["symbolic-ref", "HEAD"]).unwrap();
    assert_eq!(head.trim(), "refs/heads/main");
    assert!(!repo.branches().contains(&"main".to_string()));
}

#[test]
fn test_head_restored_when_closure_fails() {
    let repo = seeded_repo();
    let orchestrator = orchestrator();
    let repository = repo.repository();

    let result: Result<(), AiContextError> = orchestrator.with_provenance_branch(&repository, |_| {
        Err(AiContextError::Generic("boom".into()))
    });

    assert!(result.is_err());
    assert_eq!(repo.current_branch().as_deref(), Some("main"));
}

#[test]
fn test_not_a_repository_is_repository_error() {
    let dir = TestRepo::new_plain_dir();
    dir.write_file("a.rs", "x\n");

    let err = commit(&dir, &["a.rs"]).unwrap_err();
    assert!(matches!(err, AiContextError::RepositoryError(_)), "got {:?}", err);
}
