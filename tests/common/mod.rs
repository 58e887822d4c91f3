#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use patent_batch::error::ExecutionError;
use patent_batch::models::FieldMap;
use patent_batch::{
    Config, PipelineExecutor, RawResult, RecordRewriter, ResultValidator, SchedulerOptions,
    ValidatedResult, WorkItem,
};

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum Step {
    /// 返回一个标题为给定文本的产品概念
    Concept(String),
    /// 可恢复的失败
    Timeout,
    /// 不可恢复的失败
    Unrecoverable,
    /// 任务 panic
    Panic,
}

/// 按标识符预先编排返回结果的执行器
///
/// 脚本用完之后返回一个合法的产品概念。
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, identifier: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(identifier.to_string(), steps.into());
        self
    }

    pub fn calls(&self, identifier: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(identifier)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl PipelineExecutor for ScriptedExecutor {
    async fn execute(&self, item: &WorkItem) -> Result<RawResult, ExecutionError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(item.identifier.clone())
            .or_default() += 1;

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&item.identifier)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Step::Concept(format!("Concept for {}", item.identifier)));

        tokio::time::sleep(Duration::from_millis(5)).await;

        match step {
            Step::Concept(title) => Ok(RawResult::new(
                item.identifier.clone(),
                concept(&item.identifier, &title),
            )),
            Step::Timeout => Err(ExecutionError::Timeout { secs: 1 }),
            Step::Unrecoverable => Err(ExecutionError::Unrecoverable("quota revoked".into())),
            Step::Panic => panic!("executor crashed on {}", item.identifier),
        }
    }
}

/// 按顺序返回给定文本的改写器，每个字段都改写成同一段文本
pub struct ScriptedRewriter {
    titles: Mutex<VecDeque<String>>,
    calls: Mutex<usize>,
}

impl ScriptedRewriter {
    pub fn new(titles: &[&str]) -> Self {
        Self {
            titles: Mutex::new(titles.iter().map(|t| t.to_string()).collect()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl RecordRewriter for ScriptedRewriter {
    async fn rewrite(&self, record: &ValidatedResult) -> Result<RawResult, ExecutionError> {
        *self.calls.lock().unwrap() += 1;
        let text = self
            .titles
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "short".to_string());

        let mut fields = record.fields().clone();
        for (name, value) in fields.iter_mut() {
            if name != "publication_number" {
                *value = serde_json::Value::String(text.clone());
            }
        }
        Ok(RawResult::new(record.identifier(), fields))
    }
}

/// 满足默认约束的产品概念
pub fn concept(identifier: &str, title: &str) -> FieldMap {
    json!({
        "publication_number": identifier,
        "title": title,
        "product_description": "A handheld device that summarises documents.",
        "implementation": "Runs a compact language model on the device.",
        "differentiation": "Works offline and keeps documents private.",
    })
    .as_object()
    .cloned()
    .unwrap()
}

pub fn items(n: usize) -> Vec<WorkItem> {
    (0..n)
        .map(|i| WorkItem::new(format!("US-{:03}", i), "nlp"))
        .collect()
}

pub fn validator() -> ResultValidator {
    ResultValidator::new(Config::default().schema())
}

pub fn fast_options() -> SchedulerOptions {
    SchedulerOptions {
        concurrency: 5,
        pacing: Duration::ZERO,
        cooldown: Duration::ZERO,
        max_attempts: 3,
        retry_delay: Duration::ZERO,
        result_suffix: "_output.json".to_string(),
    }
}

/// 写一个索引文件，每行只包含标识符和文档路径
pub fn write_index(path: &Path, identifiers: &[&str]) {
    let content: String = identifiers
        .iter()
        .map(|id| {
            format!(
                "{}\n",
                json!({"publication_number": id, "json_file_path": format!("/k/{}.json", id)})
            )
        })
        .collect();
    std::fs::write(path, content).unwrap();
}

/// 在 `<root>/<batch>/` 下写一个结果文件
pub fn write_result(root: &Path, batch: usize, identifier: &str, title: &str) {
    let dir = root.join(batch.to_string());
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(format!("{}_output.json", identifier)),
        serde_json::to_string_pretty(&concept(identifier, title)).unwrap(),
    )
    .unwrap();
}
