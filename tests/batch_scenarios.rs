mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_test::assert_ok;

use common::{
    fast_options, items, validator, write_index, write_result, ScriptedExecutor,
    ScriptedRewriter, Step,
};
use patent_batch::error::BatchError;
use patent_batch::models::load_work_items;
use patent_batch::orchestrator::BatchStatus;
use patent_batch::{
    BatchScheduler, Config, ItemState, ResultCompiler, ResultRewriter, ResultValidator, WorkItem,
};

#[tokio::test]
async fn test_happy_path_stops_after_max_batches() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    let scheduler = BatchScheduler::new(executor.clone(), validator(), fast_options());

    let list = items(12);
    let report = scheduler.run_batches(&list, 5, Some(2), dir.path()).await;

    assert_eq!(report.total_batches, 3);
    assert_eq!(report.batches.len(), 2);
    assert_eq!(
        report.batches.iter().map(|b| b.size).collect::<Vec<_>>(),
        vec![5, 5]
    );
    assert_eq!(report.attempted(), 10);
    assert_eq!(report.validated(), 10);
    assert_eq!(report.not_attempted, 2);
    assert_eq!(executor.total_calls(), 10);

    let root = dir.path().join("nlp");
    assert!(root.join("0").join("US-000_output.json").exists());
    assert!(root.join("1").join("US-009_output.json").exists());
    assert!(!root.join("2").exists());
}

#[tokio::test]
async fn test_rejected_result_is_never_persisted_or_compiled() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new().script("US-002", vec![Step::Concept("T".repeat(120))]));
    let scheduler = BatchScheduler::new(executor, validator(), fast_options());

    let list = items(5);
    let report = scheduler.run_batches(&list, 5, None, dir.path()).await;

    let rejected: Vec<_> = report
        .outcomes()
        .filter(|o| o.state == ItemState::Rejected)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].identifier, "US-002");
    assert!(rejected[0].reason.as_deref().unwrap().contains("title"));

    let root = dir.path().join("nlp");
    assert!(!root.join("0").join("US-002_output.json").exists());

    let index = dir.path().join("nlp.jsonl");
    write_index(&index, &["US-000", "US-001", "US-002", "US-003", "US-004"]);
    let output = root.join("nlp_output.jsonl");
    let compiled = assert_ok!(
        ResultCompiler::new(validator(), "_output.json")
            .compile(&root, Some(index.as_path()), &output)
            .await
    );

    assert_eq!(compiled.compiled, 4);
    assert_eq!(
        compiled.missing.into_iter().collect::<Vec<_>>(),
        vec!["US-002".to_string()]
    );
    assert!(!std::fs::read_to_string(output).unwrap().contains("US-002"));
}

#[tokio::test]
async fn test_unrecoverable_error_fails_only_its_batch() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new().script("US-007", vec![Step::Unrecoverable]));
    let scheduler = BatchScheduler::new(executor.clone(), validator(), fast_options());

    let list = items(15);
    let report = scheduler.run_batches(&list, 5, None, dir.path()).await;

    assert_eq!(report.batches.len(), 3);
    assert_eq!(report.failed_batches(), vec![1]);
    assert_eq!(report.batches[0].validated(), 5);
    assert_eq!(report.batches[2].validated(), 5);

    // 同批其他专利照常完成
    assert_eq!(report.batches[1].validated(), 4);
    assert_eq!(report.batches[1].failed(), 1);
    assert!(matches!(
        &report.batches[1].status,
        BatchStatus::Failed(errors)
            if matches!(errors.as_slice(), [BatchError::Unrecoverable { identifier, .. }] if identifier == "US-007")
    ));

    // 不可恢复的错误不重试
    assert_eq!(executor.calls("US-007"), 1);
}

#[tokio::test]
async fn test_failed_batch_is_followed_by_cooldown_not_pacing() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new().script("US-002", vec![Step::Unrecoverable]));
    let mut options = fast_options();
    options.pacing = Duration::from_secs(3600);
    options.cooldown = Duration::from_millis(10);
    let scheduler = BatchScheduler::new(executor.clone(), validator(), options);

    let list = items(10);
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        scheduler.run_batches(&list, 5, None, dir.path()),
    )
    .await
    .expect("a failed batch should wait for the cooldown, not the pacing interval");

    assert_eq!(report.failed_batches(), vec![0]);
    assert_eq!(report.batches.len(), 2);
    assert_eq!(report.batches[1].validated(), 5);
    assert!(!report.interrupted);
}

#[tokio::test]
async fn test_successful_batch_is_followed_by_pacing() {
    let dir = TempDir::new().unwrap();
    let mut options = fast_options();
    options.pacing = Duration::from_secs(3600);
    options.cooldown = Duration::ZERO;
    let scheduler = BatchScheduler::new(Arc::new(ScriptedExecutor::new()), validator(), options);

    let list = items(10);
    let waited = tokio::time::timeout(
        Duration::from_millis(500),
        scheduler.run_batches(&list, 5, None, dir.path()),
    )
    .await;

    assert!(waited.is_err());
}

#[tokio::test]
async fn test_similar_identifiers_in_one_batch_keep_separate_records() {
    let dir = TempDir::new().unwrap();
    let scheduler = BatchScheduler::new(Arc::new(ScriptedExecutor::new()), validator(), fast_options());

    let list = vec![
        WorkItem::new("WO/2021/1", "nlp"),
        WorkItem::new("WO_2021_1", "nlp"),
        WorkItem::new("WO\\2021\\1", "nlp"),
    ];
    let report = scheduler.run_batches(&list, 5, None, dir.path()).await;

    assert_eq!(report.validated(), 3);
    let mut paths: Vec<_> = report.outcomes().map(|o| o.path.clone().unwrap()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 3);

    let root = dir.path().join("nlp");
    let compiled = ResultCompiler::new(validator(), "_output.json")
        .compile(&root, None, &root.join("nlp_output.jsonl"))
        .await
        .unwrap();
    assert_eq!(compiled.compiled, 3);
    assert_eq!(compiled.duplicates, 0);
}

#[tokio::test]
async fn test_panicking_task_is_contained() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new().script("US-001", vec![Step::Panic]));
    let scheduler = BatchScheduler::new(executor, validator(), fast_options());

    let list = items(10);
    let report = scheduler.run_batches(&list, 5, None, dir.path()).await;

    assert_eq!(report.failed_batches(), vec![0]);
    assert!(matches!(
        &report.batches[0].status,
        BatchStatus::Failed(errors)
            if matches!(errors.as_slice(), [BatchError::TaskAborted { .. }])
    ));
    assert_eq!(report.validated(), 9);
}

#[tokio::test]
async fn test_recoverable_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .script("US-000", vec![Step::Timeout, Step::Timeout])
            .script("US-001", vec![Step::Timeout; 5]),
    );
    let scheduler = BatchScheduler::new(executor.clone(), validator(), fast_options());

    let list = items(2);
    let report = scheduler.run_batches(&list, 5, None, dir.path()).await;

    let outcomes: Vec<_> = report.outcomes().collect();
    assert_eq!(outcomes[0].state, ItemState::Validated);
    assert_eq!(outcomes[0].attempts, 3);
    assert_eq!(outcomes[1].state, ItemState::ExecutionFailed);
    assert_eq!(outcomes[1].attempts, 3);
    assert_eq!(executor.calls("US-001"), 3);

    // 专利级失败不会让批次失败
    assert!(report.failed_batches().is_empty());
    assert_eq!(report.failed(), 1);
}

#[tokio::test]
async fn test_run_then_compile_round_trips_every_record_once() {
    let dir = TempDir::new().unwrap();
    let scheduler = BatchScheduler::new(Arc::new(ScriptedExecutor::new()), validator(), fast_options());

    let list = items(7);
    let report = scheduler.run_batches(&list, 3, None, dir.path()).await;
    assert_eq!(report.validated(), 7);

    let root = dir.path().join("nlp");
    let output = root.join("nlp_output.jsonl");
    let compiled = ResultCompiler::new(validator(), "_output.json")
        .compile(&root, None, &output)
        .await
        .unwrap();

    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let identifiers: Vec<&str> = lines
        .iter()
        .map(|line| line["publication_number"].as_str().unwrap())
        .collect();

    assert_eq!(compiled.compiled, 7);
    assert_eq!(
        identifiers,
        list.iter().map(|i| i.identifier.as_str()).collect::<Vec<_>>()
    );
    assert_eq!(lines[0]["title"], "Concept for US-000");
}

#[test]
fn test_compile_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nlp");
    write_result(&root, 1, "US-B", "second batch");
    write_result(&root, 0, "US-C", "first batch");
    write_result(&root, 0, "US-A", "first batch");
    let output = root.join("nlp_output.jsonl");
    let compiler = ResultCompiler::new(validator(), "_output.json");

    tokio_test::block_on(compiler.compile(&root, None, &output)).unwrap();
    let first = std::fs::read(&output).unwrap();
    tokio_test::block_on(compiler.compile(&root, None, &output)).unwrap();
    let second = std::fs::read(&output).unwrap();

    assert_eq!(first, second);
    let text = String::from_utf8(first).unwrap();
    let order: Vec<usize> = ["US-A", "US-B", "US-C"]
        .iter()
        .map(|id| text.find(id).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_discrepancy_report() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nlp");
    for id in ["B", "C", "D"] {
        write_result(&root, 0, id, "concept");
    }
    let index = dir.path().join("nlp.jsonl");
    write_index(&index, &["A", "B", "C"]);

    let report = ResultCompiler::new(validator(), "_output.json")
        .compile(&root, Some(index.as_path()), &root.join("nlp_output.jsonl"))
        .await
        .unwrap();

    assert_eq!(report.missing.into_iter().collect::<Vec<_>>(), vec!["A"]);
    assert_eq!(report.unexpected.into_iter().collect::<Vec<_>>(), vec!["D"]);
}

#[tokio::test]
async fn test_unreadable_index_yields_empty_expectations() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nlp");
    write_result(&root, 0, "B", "concept");

    let report = ResultCompiler::new(validator(), "_output.json")
        .compile(&root, Some(dir.path().join("absent.jsonl").as_path()), &root.join("out.jsonl"))
        .await
        .unwrap();

    assert!(report.missing.is_empty());
    assert_eq!(report.unexpected.len(), 1);
    assert_eq!(report.compiled, 1);
}

#[tokio::test]
async fn test_items_loaded_from_index_keep_their_positions() {
    let dir = TempDir::new().unwrap();
    let index = dir.path().join("nlp.jsonl");
    write_index(&index, &["US-9", "US-1", "US-5", "US-1"]);

    let list = load_work_items(&index, "nlp").await.unwrap();
    assert_eq!(
        list.iter().map(|i| i.identifier.as_str()).collect::<Vec<_>>(),
        vec!["US-9", "US-1", "US-5"]
    );

    let scheduler = BatchScheduler::new(Arc::new(ScriptedExecutor::new()), validator(), fast_options());
    let report = scheduler.run_batches(&list, 2, None, dir.path()).await;

    assert_eq!(report.validated(), 3);
    assert!(dir.path().join("nlp/0/US-1_output.json").exists());
    assert!(dir.path().join("nlp/1/US-5_output.json").exists());
}

#[tokio::test]
async fn test_rewrite_retries_until_guardrail_passes() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nlp");
    write_result(&root, 0, "US-1", "original title");
    write_result(&root, 0, "US-2", "another title");

    let config = Config {
        rewrite_max_chars: 20,
        ..Default::default()
    };
    let rewriter = Arc::new(ScriptedRewriter::new(&[
        "this title is clearly longer than twenty characters",
        "short title",
    ]));

    let report = ResultRewriter::new(
        rewriter.clone(),
        ResultValidator::new(config.schema()),
        ResultValidator::new(config.rewrite_schema()),
    )
    .with_max_attempts(3)
    .rewrite_all(&root, Some("US-1"))
    .await
    .unwrap();

    assert_eq!(rewriter.calls(), 2);
    assert_eq!(report.rewritten, vec![root.join("0").join("US-1_output_short.json")]);
    assert!(report.failed.is_empty());
    assert!(!root.join("0").join("US-2_output_short.json").exists());

    let written: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&report.rewritten[0]).unwrap(),
    )
    .unwrap();
    assert_eq!(written["title"], "short title");
    assert_eq!(written["publication_number"], "US-1");
}

#[tokio::test]
async fn test_rewrite_gives_up_after_max_attempts() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nlp");
    write_result(&root, 0, "US-1", "original title");

    let config = Config {
        rewrite_max_chars: 5,
        ..Default::default()
    };
    let rewriter = Arc::new(ScriptedRewriter::new(&["too long", "still too long", "nope!!"]));

    let report = ResultRewriter::new(
        rewriter.clone(),
        ResultValidator::new(config.schema()),
        ResultValidator::new(config.rewrite_schema()),
    )
    .with_max_attempts(2)
    .rewrite_all(&root, None)
    .await
    .unwrap();

    assert_eq!(rewriter.calls(), 2);
    assert!(report.rewritten.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(!root.join("0").join("US-1_output_short.json").exists());
}
