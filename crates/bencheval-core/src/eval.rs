//! BrowseComp-style grading loop and metrics.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::logging::{append_json_line, sanitize_text};
use crate::sampler::{ChatMessage, Sampler};

/// One benchmark question with its reference answer.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    pub problem: String,
    pub answer: String,
}

/// Load cases from a JSONL dataset, optionally subsampling `num_examples`.
pub fn load_cases(path: &Path, num_examples: Option<usize>) -> Result<Vec<EvalCase>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open dataset {}", path.display()))?;

    let mut cases = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let case: EvalCase = serde_json::from_str(&line)
            .with_context(|| format!("malformed dataset line in {}", path.display()))?;
        cases.push(case);
    }

    if let Some(count) = num_examples {
        if count < cases.len() {
            cases.shuffle(&mut rand::thread_rng());
            cases.truncate(count);
        }
    }

    Ok(cases)
}

/// Wrap a problem with the answer-format instructions given to the model.
pub fn format_query(problem: &str) -> String {
    format!(
        "{problem}\n\n\
         Your response should be in the following format:\n\
         Explanation: {{your explanation for your final answer}}\n\
         Exact Answer: {{your succinct, final answer}}\n\
         Confidence: {{your confidence score between 0% and 100% for your answer}}"
    )
}

/// Build the grading prompt comparing a response against the reference.
pub fn format_grader_prompt(problem: &str, answer: &str, response: &str) -> String {
    format!(
        "Judge whether the following [response] to [question] is correct or not \
         based on [correct_answer] below. Focus only on whether the extracted \
         final answer matches the correct answer; ignore formatting.\n\n\
         [question]: {problem}\n\n\
         [response]: {response}\n\n\
         [correct_answer]: {answer}\n\n\
         Reply with exactly one line of the form `correct: yes` or `correct: no`."
    )
}

/// Lenient scan for the grader verdict. Anything unparseable is incorrect.
pub fn parse_grade(text: &str) -> bool {
    text.lines()
        .filter_map(|line| {
            let line = line.trim().to_ascii_lowercase();
            line.strip_prefix("correct:").map(|rest| rest.trim().starts_with("yes"))
        })
        .next_back()
        .unwrap_or(false)
}

/// Per-case record appended to the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub run_id: String,
    pub case_index: usize,
    pub problem: String,
    pub expected: String,
    pub response: String,
    pub correct: bool,
    pub graded_at: String,
}

/// Running accuracy over graded cases.
#[derive(Debug, Default, Clone)]
pub struct EvalMetrics {
    pub total_cases: usize,
    pub graded_cases: usize,
    pub correct_cases: usize,
    pub failures: Vec<usize>,
}

impl EvalMetrics {
    pub fn record(&mut self, case_index: usize, correct: bool) {
        self.graded_cases += 1;
        if correct {
            self.correct_cases += 1;
        } else {
            self.failures.push(case_index);
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.graded_cases == 0 {
            0.0
        } else {
            self.correct_cases as f64 / self.graded_cases as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "graded {}/{} cases • accuracy {:.1}% • {} failure(s)",
            self.graded_cases,
            self.total_cases,
            self.accuracy() * 100.0,
            self.failures.len()
        )
    }
}

/// Drives the query-then-grade loop for one sampler/grader pair.
pub struct BrowseCompRunner {
    sampler: Arc<dyn Sampler>,
    grader: Arc<dyn Sampler>,
    log_path: Option<PathBuf>,
    run_id: String,
}

impl BrowseCompRunner {
    pub fn new(sampler: Arc<dyn Sampler>, grader: Arc<dyn Sampler>, run_id: String) -> Self {
        Self {
            sampler,
            grader,
            log_path: None,
            run_id,
        }
    }

    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    /// Query the sampler for every case, grade each response, aggregate.
    /// A failed model call marks the case as a failure and the run goes on.
    pub async fn run(&self, cases: &[EvalCase]) -> Result<EvalMetrics> {
        let mut metrics = EvalMetrics {
            total_cases: cases.len(),
            ..EvalMetrics::default()
        };

        for (case_index, case) in cases.iter().enumerate() {
            let correct = match self.grade_case(case).await {
                Ok((response, correct)) => {
                    self.append_record(case_index, case, &response, correct)?;
                    correct
                }
                Err(err) => {
                    warn!(case_index, error = %err, "case evaluation failed");
                    self.append_record(case_index, case, &format!("[error] {err}"), false)?;
                    false
                }
            };
            metrics.record(case_index, correct);
            info!(case_index, correct, "case graded");
        }

        info!(run_id = %self.run_id, summary = %metrics.summary(), "eval run finished");
        Ok(metrics)
    }

    async fn grade_case(&self, case: &EvalCase) -> Result<(String, bool)> {
        let query = vec![ChatMessage::user(format_query(&case.problem))];
        let sampled = self.sampler.sample(&query).await?;

        let grading = vec![ChatMessage::user(format_grader_prompt(
            &case.problem,
            &case.answer,
            &sampled.response_text,
        ))];
        let verdict = self.grader.sample(&grading).await?;

        Ok((sampled.response_text, parse_grade(&verdict.response_text)))
    }

    fn append_record(
        &self,
        case_index: usize,
        case: &EvalCase,
        response: &str,
        correct: bool,
    ) -> Result<()> {
        let Some(path) = &self.log_path else {
            return Ok(());
        };

        let mut redactions = HashSet::new();
        let record = CaseRecord {
            run_id: self.run_id.clone(),
            case_index,
            problem: case.problem.clone(),
            expected: case.answer.clone(),
            response: sanitize_text(response, &mut redactions),
            correct,
            graded_at: Utc::now().to_rfc3339(),
        };
        if !redactions.is_empty() {
            warn!(case_index, fields = ?redactions, "redacted potential secrets from case record");
        }
        append_json_line(path, &record)
    }
}

/// Recompute metrics from a run log, skipping malformed lines.
pub fn analyze_log(path: &Path) -> Result<EvalMetrics> {
    let file = File::open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let mut metrics = EvalMetrics::default();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CaseRecord>(&line) {
            Ok(record) => {
                metrics.total_cases += 1;
                metrics.record(record.case_index, record.correct);
            }
            Err(err) => {
                tracing::debug!(%err, "skipping malformed eval log entry");
            }
        }
    }

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;
    use uuid::Uuid;

    use crate::sampler::SamplerResponse;

    struct ScriptedSampler {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedSampler {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl Sampler for ScriptedSampler {
        async fn sample(&self, messages: &[ChatMessage]) -> Result<SamplerResponse> {
            let mut responses = self.responses.lock().expect("lock");
            let text = responses.pop().ok_or_else(|| anyhow!("script exhausted"))?;
            Ok(SamplerResponse {
                response_text: text,
                queried_messages: messages.to_vec(),
            })
        }
    }

    #[test]
    fn grade_parsing_is_lenient() {
        assert!(parse_grade("correct: yes"));
        assert!(parse_grade("Reasoning first.\nCorrect: YES\n"));
        assert!(!parse_grade("correct: no"));
        assert!(!parse_grade("the answer looks right to me"));
        assert!(!parse_grade(""));
    }

    #[test]
    fn query_template_demands_exact_answer() {
        let query = format_query("Who wrote it?");
        assert!(query.starts_with("Who wrote it?"));
        assert!(query.contains("Exact Answer:"));
        assert!(query.contains("Confidence:"));
    }

    #[test]
    fn metrics_track_failures_and_accuracy() {
        let mut metrics = EvalMetrics {
            total_cases: 3,
            ..EvalMetrics::default()
        };
        metrics.record(0, true);
        metrics.record(1, false);
        metrics.record(2, true);

        assert_eq!(metrics.graded_cases, 3);
        assert!((metrics.accuracy() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(metrics.failures, vec![1]);
        assert!(metrics.summary().contains("graded 3/3"));
    }

    #[test]
    fn dataset_loading_honors_subsample() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        for idx in 0..5 {
            writeln!(
                file,
                r#"{{"problem": "question {idx}", "answer": "answer {idx}"}}"#
            )
            .expect("write line");
        }

        let all = load_cases(file.path(), None).expect("load");
        assert_eq!(all.len(), 5);

        let sampled = load_cases(file.path(), Some(2)).expect("load sampled");
        assert_eq!(sampled.len(), 2);
    }

    #[tokio::test]
    async fn runner_grades_and_logs_cases() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let log_path = temp.path().join("run.jsonl");

        let sampler = Arc::new(ScriptedSampler::new(vec![
            "Exact Answer: 42",
            "Exact Answer: wrong",
        ]));
        let grader = Arc::new(ScriptedSampler::new(vec!["correct: yes", "correct: no"]));

        let cases = vec![
            EvalCase {
                problem: "What is six times seven?".to_string(),
                answer: "42".to_string(),
            },
            EvalCase {
                problem: "Capital of France?".to_string(),
                answer: "Paris".to_string(),
            },
        ];

        let runner = BrowseCompRunner::new(sampler, grader, Uuid::new_v4().to_string())
            .with_log_path(log_path.clone());
        let metrics = runner.run(&cases).await.expect("run");

        assert_eq!(metrics.graded_cases, 2);
        assert_eq!(metrics.correct_cases, 1);
        assert_eq!(metrics.failures, vec![1]);

        let reloaded = analyze_log(&log_path).expect("analyze");
        assert_eq!(reloaded.graded_cases, 2);
        assert_eq!(reloaded.correct_cases, 1);
    }

    #[tokio::test]
    async fn runner_absorbs_sampler_failures() {
        let sampler = Arc::new(ScriptedSampler::new(vec![]));
        let grader = Arc::new(ScriptedSampler::new(vec![]));
        let cases = vec![EvalCase {
            problem: "q".to_string(),
            answer: "a".to_string(),
        }];

        let runner = BrowseCompRunner::new(sampler, grader, "run".to_string());
        let metrics = runner.run(&cases).await.expect("run survives");
        assert_eq!(metrics.graded_cases, 1);
        assert_eq!(metrics.correct_cases, 0);
    }
}
