mod repos;

use std::sync::Arc;
use std::time::Duration;

use ai_context::detection::source::{AiResponse, InMemoryChatSource, Role};
use ai_context::provenance::commit_store::CommitContextStore;
use ai_context::provenance::lookup::{LineProvenance, ProvenanceLookup};
use ai_context::provenance::pipeline::{CorrelationPipeline, PipelineSettings, RangeSource};
use ai_context::provenance::store::ProvenanceStore;
use ai_context::provenance::types::{LineRange, NO_PROMPT, NO_RESPONSE};
use ai_context::tracking::change_tracker::{ChangeTracker, ChangeTrackerSettings};
use ai_context::utils::ManualClock;
use repos::test_repo::TestRepo;

const T: i64 = 1_700_000_000_000;

fn message(id: &str, role: Role, timestamp: i64, text: &str) -> AiResponse {
    AiResponse {
        id: id.into(),
        conversation_id: "c1".into(),
        timestamp,
        role,
        text: text.into(),
        tokens: None,
    }
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        after_window: Duration::from_secs(60),
        ..PipelineSettings::default()
    }
}

struct Harness {
    tracker: Arc<ChangeTracker>,
    pipeline: CorrelationPipeline,
}

fn harness(repo: &TestRepo, source: InMemoryChatSource, settings: PipelineSettings) -> Harness {
    let clock = Arc::new(ManualClock::new(T + 5_000));
    let tracker = Arc::new(ChangeTracker::with_clock(ChangeTrackerSettings::default(), clock));
    let pipeline = CorrelationPipeline::new(repo.path(), tracker.clone(), Arc::new(source), settings);
    Harness { tracker, pipeline }
}

fn conversation() -> InMemoryChatSource {
    InMemoryChatSource::with_messages(vec![
        message("u1", Role::User, T - 1_000, "add logging"),
        message("b1", Role::Assistant, T, "Sure, adding logging."),
    ])
}

fn numbered_lines(count: usize) -> String {
    (1..=count).map(|i| format!("line {}\n", i)).collect()
}

fn repo_with_x_ts() -> TestRepo {
    let repo = TestRepo::new();
    repo.write_file("src/x.ts", &numbered_lines(10));
    repo.stage_all_and_commit("initial").unwrap();
    repo
}

fn edit_lines_3_to_6(repo: &TestRepo) {
    let mut lines: Vec<String> = numbered_lines(10).lines().map(str::to_string).collect();
    for line in &mut lines[2..6] {
        *line = format!("{} // logged", line);
    }
    repo.write_file("src/x.ts", &(lines.join("\n") + "\n"));
}

#[test]
fn test_response_is_attributed_to_following_edit() {
    let repo = repo_with_x_ts();
    let h = harness(&repo, conversation(), settings());
    edit_lines_3_to_6(&repo);
    h.tracker.record("src/x.ts", T + 1_000);
    let status_before = repo.porcelain_status();

    let response = message("b1", Role::Assistant, T, "Sure, adding logging.");
    let report = h.pipeline.process(&response).expect("a record should be written");

    assert_eq!(report.range_source, RangeSource::Candidates);
    assert_eq!(report.branch_created.as_deref(), Some("ai-context-Test-User"));
    let record = &report.record;
    assert_eq!(record.response_id, "b1");
    assert_eq!(record.conversation_id, "c1");
    assert_eq!(record.prompt, "add logging");
    assert_eq!(record.thinking, "Sure, adding logging.");
    assert_eq!(record.files.len(), 1);
    assert_eq!(record.files[0].file_path, "src/x.ts");
    assert_eq!(record.files[0].line_ranges, vec![LineRange::new(3, 6).unwrap()]);
    let hash = record.commit_hash.clone().expect("provenance commit should be made");

    assert_eq!(repo.current_branch().as_deref(), Some("main"));
    assert_eq!(repo.porcelain_status(), status_before);

    let store = h.pipeline.store();
    let hits = store.by_file_and_line("src/x.ts", 4).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].response_id, "b1");
    assert!(store.by_file_and_line("src/x.ts", 7).unwrap().is_empty());

    let commits = CommitContextStore::for_workspace(repo.path(), ".ai-context");
    let context = commits.read(&hash).unwrap().expect("commit context should exist");
    assert_eq!(context.response_ids, vec!["b1".to_string()]);
    assert_eq!(context.prompt.as_deref(), Some("add logging"));
}

#[test]
fn test_rerun_is_idempotent() {
    let repo = repo_with_x_ts();
    let h = harness(&repo, conversation(), settings());
    edit_lines_3_to_6(&repo);
    h.tracker.record("src/x.ts", T + 1_000);
    let response = message("b1", Role::Assistant, T, "Sure, adding logging.");

    let first = h.pipeline.process(&response).unwrap().record;
    let second = h.pipeline.process(&response).unwrap().record;

    let store = h.pipeline.store();
    let all = store.read_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(second.files, first.files);
    // Nothing new to commit the second time, so the first hash is kept
    assert_eq!(second.commit_hash, first.commit_hash);
    assert!(store.read_index().unwrap().is_consistent_with(&all));
}

#[test]
fn test_outside_git_falls_back_to_touched_marker() {
    let dir = TestRepo::new_plain_dir();
    dir.write_file("a.ts", "const a = 1;\n");
    let h = harness(&dir, conversation(), settings());
    h.tracker.record("a.ts", T + 2_000);

    let report = h
        .pipeline
        .process(&message("b1", Role::Assistant, T, "done"))
        .expect("degraded record should be written");

    assert_eq!(report.range_source, RangeSource::Degraded);
    assert_eq!(report.record.files.len(), 1);
    assert_eq!(report.record.files[0].file_path, "a.ts");
    assert_eq!(report.record.files[0].line_ranges, vec![LineRange::single(1).unwrap()]);
    assert_eq!(report.record.commit_hash, None);
    assert!(dir.path().join(".ai-context/metadata.json").exists());
}

#[test]
fn test_no_changes_writes_nothing() {
    let repo = repo_with_x_ts();
    let h = harness(&repo, conversation(), settings());

    assert!(!h.pipeline.run(&message("b1", Role::Assistant, T, "hi")));
    assert!(!repo.path().join(".ai-context/metadata.json").exists());
    assert!(!repo.branches().iter().any(|b| b.starts_with("ai-context-")));
}

#[test]
fn test_edit_outside_window_uses_working_tree_diff() {
    let repo = repo_with_x_ts();
    let h = harness(&repo, conversation(), settings());
    edit_lines_3_to_6(&repo);
    // Before the response; not a candidate
    h.tracker.record("src/x.ts", T - 3_000);

    let report = h
        .pipeline
        .process(&message("b1", Role::Assistant, T, "Sure, adding logging."))
        .unwrap();
    assert_eq!(report.range_source, RangeSource::WorkingTree);
    assert_eq!(report.record.files[0].line_ranges, vec![LineRange::new(3, 6).unwrap()]);
}

#[test]
fn test_commits_can_be_disabled() {
    let repo = repo_with_x_ts();
    let h = harness(
        &repo,
        conversation(),
        PipelineSettings {
            provenance_commits: false,
            ..settings()
        },
    );
    edit_lines_3_to_6(&repo);
    h.tracker.record("src/x.ts", T + 1_000);

    let report = h
        .pipeline
        .process(&message("b1", Role::Assistant, T, "ok"))
        .unwrap();
    assert_eq!(report.record.commit_hash, None);
    assert_eq!(report.branch_created, None);
    assert!(!repo.branches().iter().any(|b| b.starts_with("ai-context-")));
}

#[test]
fn test_missing_prompt_and_text_use_placeholders() {
    let repo = repo_with_x_ts();
    let h = harness(&repo, InMemoryChatSource::new(), settings());
    edit_lines_3_to_6(&repo);
    h.tracker.record("src/x.ts", T + 1_000);

    let report = h
        .pipeline
        .process(&message("b9", Role::Assistant, T, "   "))
        .unwrap();
    assert_eq!(report.record.prompt, NO_PROMPT);
    assert_eq!(report.record.thinking, NO_RESPONSE);
}

#[test]
fn test_lookup_finds_record_and_commit_context() {
    let repo = repo_with_x_ts();
    let h = harness(&repo, conversation(), settings());
    edit_lines_3_to_6(&repo);
    h.tracker.record("src/x.ts", T + 1_000);
    h.pipeline
        .process(&message("b1", Role::Assistant, T, "Sure, adding logging."))
        .unwrap();

    let lookup = ProvenanceLookup::for_workspace(repo.path(), ".ai-context");
    let hits = lookup.at_line("src/x.ts", 5).unwrap();
    assert!(matches!(&hits[0], LineProvenance::Record(r) if r.response_id == "b1"));

    // Without the primary store, the per-commit documents still answer
    std::fs::remove_file(repo.path().join(".ai-context/metadata.json")).unwrap();
    std::fs::remove_file(repo.path().join(".ai-context/index.json")).unwrap();
    let hits = lookup.at_line("src/x.ts", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(matches!(&hits[0], LineProvenance::Commit(_)));
    assert_eq!(hits[0].prompt(), Some("add logging"));
}

#[test]
fn test_store_directory_stays_out_of_git_status() {
    let repo = repo_with_x_ts();
    let store = ProvenanceStore::for_workspace(repo.path(), ".ai-context");
    store.ensure().unwrap();
    repo.write_file(".ai-context/metadata.json", "[]\n");
    assert_eq!(repo.porcelain_status(), "");

    // Recreating the directory does not duplicate the entry
    std::fs::remove_dir_all(repo.path().join(".ai-context")).unwrap();
    store.ensure().unwrap();
    let exclude = repo.read_file(".git/info/exclude");
    assert_eq!(exclude.lines().filter(|l| *l == "/.ai-context/").count(), 1);

    let nested = ProvenanceStore::for_workspace(&repo.path().join("pkg"), ".ai-context");
    nested.ensure().unwrap();
    repo.write_file("pkg/.ai-context/metadata.json", "[]\n");
    assert!(repo.read_file(".git/info/exclude").contains("/pkg/.ai-context/"));
    assert_eq!(repo.porcelain_status(), "");
}

#[test]
fn test_superseded_rerun_leaves_record_untouched() {
    let repo = repo_with_x_ts();
    let h = harness(&repo, conversation(), settings());
    let older = message("b0", Role::Assistant, T - 500, "earlier answer");

    edit_lines_3_to_6(&repo);
    h.tracker.record("src/x.ts", T + 1_000);

    // The newer response replaced the follow-up before the older rerun got the lock
    assert!(!h.pipeline.rerun_if(&older, || false));
    assert!(h.pipeline.store().by_id("b0").unwrap().is_none());

    assert!(h.pipeline.rerun_if(&older, || true));
    assert!(h.pipeline.store().by_id("b0").unwrap().is_some());
}
