//! Mock advisory source for testing without a real model.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use pilot_orchestrator::error::{OrchestratorError, Result};
use pilot_orchestrator::planning::AdvisorySource;

#[derive(Debug, Clone)]
pub enum ResponseScenario {
    Static(String),
    Sequential(Vec<String>),
    Failing(String),
    Slow { delay: Duration, response: String },
}

impl ResponseScenario {
    pub fn static_response(response: impl Into<String>) -> Self {
        Self::Static(response.into())
    }

    pub fn sequential(responses: Vec<impl Into<String>>) -> Self {
        Self::Sequential(responses.into_iter().map(Into::into).collect())
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::Failing(message.into())
    }

    pub fn slow(delay: Duration, response: impl Into<String>) -> Self {
        Self::Slow {
            delay,
            response: response.into(),
        }
    }
}

#[derive(Debug)]
pub struct MockAdvisor {
    scenario: RwLock<ResponseScenario>,
    calls: AtomicUsize,
    prompts: RwLock<Vec<String>>,
}

impl MockAdvisor {
    pub fn new(scenario: ResponseScenario) -> Self {
        Self {
            scenario: RwLock::new(scenario),
            calls: AtomicUsize::new(0),
            prompts: RwLock::new(Vec::new()),
        }
    }

    pub fn set_scenario(&self, scenario: ResponseScenario) {
        *self.scenario.write() = scenario;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn assert_called(&self, times: usize) {
        let count = self.call_count();
        assert_eq!(
            count, times,
            "Expected advisor to be called {} times, but was called {} times",
            times, count
        );
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.read().last().cloned()
    }
}

impl AdvisorySource for MockAdvisor {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.write().push(prompt.to_string());
        let scenario = self.scenario.read().clone();

        Box::pin(async move {
            match scenario {
                ResponseScenario::Static(response) => Ok(response),
                ResponseScenario::Sequential(responses) => {
                    if responses.is_empty() {
                        return Ok(String::new());
                    }
                    Ok(responses[index % responses.len()].clone())
                }
                ResponseScenario::Failing(message) => Err(OrchestratorError::Advisory(message)),
                ResponseScenario::Slow { delay, response } => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
            }
        })
    }
}

/// Assessment reply in the shape the estimator asks for.
pub fn assessment_reply(score: f64, decompose: bool, confidence: f64, subtasks: &[&str]) -> String {
    serde_json::json!({
        "complexity_score": score,
        "estimated_tokens": 6000,
        "estimated_loc": 320,
        "estimated_files": 4,
        "estimated_duration_minutes": 80,
        "should_decompose": decompose,
        "confidence": confidence,
        "reasoning": "touches several layers",
        "suggested_subtasks": subtasks,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequential_response_wraps() {
        let advisor = MockAdvisor::new(ResponseScenario::sequential(vec!["first", "second"]));

        assert_eq!(advisor.generate("a").await.unwrap(), "first");
        assert_eq!(advisor.generate("b").await.unwrap(), "second");
        assert_eq!(advisor.generate("c").await.unwrap(), "first");
        advisor.assert_called(3);
        assert_eq!(advisor.last_prompt().as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_failing_response() {
        let advisor = MockAdvisor::new(ResponseScenario::failing("quota exhausted"));
        let err = advisor.generate("x").await.unwrap_err();
        assert!(err.to_string().contains("quota exhausted"));
    }
}
