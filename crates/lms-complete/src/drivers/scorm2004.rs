//! SCORM 2004 (`API_1484_11` object).

use super::scorm::{lowered, ScormDialect, ScormElement};
use super::timefmt::iso_duration;
use crate::types::{format_decimal, CompletionOptions, CompletionStatus, ProtocolKind};

/// The SCORM 2004 run-time environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorm2004;

impl ScormDialect for Scorm2004 {
    const KIND: ProtocolKind = ProtocolKind::Scorm2004;
    const INITIALIZE: &'static str = "Initialize";
    const TERMINATE: &'static str = "Terminate";
    const GET_VALUE: &'static str = "GetValue";
    const SET_VALUE: &'static str = "SetValue";
    const COMMIT: &'static str = "Commit";
    const GET_LAST_ERROR: &'static str = "GetLastError";
    const GET_ERROR_STRING: &'static str = "GetErrorString";
    const ALREADY_INITIALIZED: &'static [&'static str] = &["103"];
    const STATUS_ELEMENTS: &'static [&'static str] =
        &["cmi.success_status", "cmi.completion_status"];
    const SCORE_ELEMENT: &'static str = "cmi.score.raw";

    fn elements(options: &CompletionOptions) -> Vec<ScormElement> {
        let (min, max) = options.bounds();
        let mut out = vec![
            ScormElement::optional("cmi.score.scaled", format_decimal(options.scaled_score(), 4)),
            ScormElement::optional("cmi.score.raw", format_decimal(options.clamped_score(), 2)),
            ScormElement::optional("cmi.score.min", format_decimal(min, 2)),
            ScormElement::optional("cmi.score.max", format_decimal(max, 2)),
        ];
        match options.status {
            CompletionStatus::Passed => {
                out.push(ScormElement::required("cmi.success_status", "passed"));
            }
            CompletionStatus::Failed => {
                out.push(ScormElement::required("cmi.success_status", "failed"));
            }
            CompletionStatus::Completed => {}
        }
        out.push(ScormElement::required("cmi.completion_status", "completed"));
        out.push(ScormElement::optional(
            "cmi.session_time",
            iso_duration(options.session_time_seconds),
        ));
        if options.include_interaction {
            let result = if options.status.is_success() {
                "correct"
            } else {
                "incorrect"
            };
            out.extend([
                ScormElement::optional("cmi.interactions.0.id", "lms_complete_completion"),
                ScormElement::optional("cmi.interactions.0.type", "other"),
                ScormElement::optional("cmi.interactions.0.result", result),
            ]);
        }
        out
    }

    fn judge(expected: CompletionStatus, values: &[String]) -> (bool, String) {
        let success = lowered(values, 0);
        let completion = lowered(values, 1);
        let verified = match expected {
            CompletionStatus::Passed => {
                let undetermined = success.is_empty() || success == "unknown";
                success == "passed" || (undetermined && completion == "completed")
            }
            CompletionStatus::Completed => completion == "completed",
            CompletionStatus::Failed => success == "failed",
        };
        let reported = if success.is_empty() || success == "unknown" {
            completion
        } else {
            success
        };
        (verified, reported)
    }
}
