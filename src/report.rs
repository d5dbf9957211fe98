//! Result reporting (§1 out of scope) named as a trait interface only: the
//! shape of a completed test's outcome is real (the coordinator and CLI
//! need somewhere to put results), but rendering that shape to text/JSON/
//! JUnit output is an external collaborator with no body, the same
//! treatment `testcase::Source` gets.

use thiserror::Error;

/// One named assertion's outcome within a test (§3 `Expectation`).
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectationResult {
    pub key: String,
    pub passed: bool,
    pub expected: serde_json::Value,
    pub actual: Option<serde_json::Value>,
    pub fatal: bool,
}

/// One test case's outcome (§6 "Configuration" `output_format` consumes
/// this; §7 classifies the error that produced it, if any).
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub id: String,
    pub passed: bool,
    pub expectations: Vec<ExpectationResult>,
    pub error: Option<String>,
    pub duration: std::time::Duration,
}

impl TestResult {
    pub fn passed(id: impl Into<String>, duration: std::time::Duration) -> Self {
        TestResult {
            id: id.into(),
            passed: true,
            expectations: Vec::new(),
            error: None,
            duration,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>, duration: std::time::Duration) -> Self {
        TestResult {
            id: id.into(),
            passed: false,
            expectations: Vec::new(),
            error: Some(error.into()),
            duration,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report rendering for this output format is not implemented by this crate")]
    Unimplemented,
}

/// Renders a completed run's results (§6 `output_format`: `text`/`json`/
/// `junit`). Named only (§1): none of the three marker types below render
/// anything.
pub trait Renderer: Send + Sync {
    fn render(&self, results: &[TestResult]) -> Result<(), ReportError>;
}

#[derive(Debug, Default)]
pub struct Text;

impl Renderer for Text {
    fn render(&self, _results: &[TestResult]) -> Result<(), ReportError> {
        Err(ReportError::Unimplemented)
    }
}

#[derive(Debug, Default)]
pub struct Json;

impl Renderer for Json {
    fn render(&self, _results: &[TestResult]) -> Result<(), ReportError> {
        Err(ReportError::Unimplemented)
    }
}

#[derive(Debug, Default)]
pub struct JUnit;

impl Renderer for JUnit {
    fn render(&self, _results: &[TestResult]) -> Result<(), ReportError> {
        Err(ReportError::Unimplemented)
    }
}

/// Pick the marker renderer matching a configured `OutputFormat` (§6).
pub fn renderer_for(format: crate::config::OutputFormat) -> Box<dyn Renderer> {
    match format {
        crate::config::OutputFormat::Text => Box::new(Text),
        crate::config::OutputFormat::Json => Box::new(Json),
        crate::config::OutputFormat::Junit => Box::new(JUnit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_marker_renderer_reports_unimplemented() {
        let results = vec![TestResult::passed("t1", std::time::Duration::from_secs(1))];
        assert!(matches!(Text.render(&results), Err(ReportError::Unimplemented)));
        assert!(matches!(Json.render(&results), Err(ReportError::Unimplemented)));
        assert!(matches!(JUnit.render(&results), Err(ReportError::Unimplemented)));
    }

    #[test]
    fn failed_result_carries_error_message() {
        let result = TestResult::failed("t2", "device unreachable", std::time::Duration::from_millis(50));
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("device unreachable"));
    }
}
