//! SCORM 1.2 (`API` object, `LMS*` methods).

use super::scorm::{lowered, ScormDialect, ScormElement};
use super::timefmt::scorm12_time;
use crate::types::{format_decimal, CompletionOptions, CompletionStatus, ProtocolKind};

/// The SCORM 1.2 run-time environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorm12;

impl ScormDialect for Scorm12 {
    const KIND: ProtocolKind = ProtocolKind::Scorm12;
    const INITIALIZE: &'static str = "LMSInitialize";
    const TERMINATE: &'static str = "LMSFinish";
    const GET_VALUE: &'static str = "LMSGetValue";
    const SET_VALUE: &'static str = "LMSSetValue";
    const COMMIT: &'static str = "LMSCommit";
    const GET_LAST_ERROR: &'static str = "LMSGetLastError";
    const GET_ERROR_STRING: &'static str = "LMSGetErrorString";
    // 1.2 has no dedicated code; a repeat LMSInitialize reports 101.
    const ALREADY_INITIALIZED: &'static [&'static str] = &["101"];
    const STATUS_ELEMENTS: &'static [&'static str] = &["cmi.core.lesson_status"];
    const SCORE_ELEMENT: &'static str = "cmi.core.score.raw";

    fn elements(options: &CompletionOptions) -> Vec<ScormElement> {
        let (min, max) = options.bounds();
        let mut out = vec![
            ScormElement::optional("cmi.core.score.raw", format_decimal(options.clamped_score(), 2)),
            ScormElement::optional("cmi.core.score.min", format_decimal(min, 2)),
            ScormElement::optional("cmi.core.score.max", format_decimal(max, 2)),
            ScormElement::required("cmi.core.lesson_status", options.status.as_str()),
            ScormElement::optional(
                "cmi.core.session_time",
                scorm12_time(options.session_time_seconds),
            ),
        ];
        if options.include_interaction {
            let result = if options.status.is_success() {
                "correct"
            } else {
                "wrong"
            };
            out.extend([
                ScormElement::optional("cmi.interactions.0.id", "lms_complete_completion"),
                ScormElement::optional("cmi.interactions.0.type", "performance"),
                ScormElement::optional("cmi.interactions.0.result", result),
            ]);
        }
        out
    }

    fn judge(expected: CompletionStatus, values: &[String]) -> (bool, String) {
        let status = lowered(values, 0);
        (expected.accepts(&status), status)
    }
}
