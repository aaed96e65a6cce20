//! Protocol identification by method-name signature.

use crate::host::HostObject;
use crate::types::ProtocolKind;

/// Required and informational method names for one protocol.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolSignature {
    pub kind: ProtocolKind,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

/// Signatures in priority order. Required sets are pairwise disjoint, so
/// the first full match is the only possible one.
pub const SIGNATURES: [ProtocolSignature; 5] = [
    ProtocolSignature {
        kind: ProtocolKind::Scorm2004,
        required: &["Initialize", "SetValue", "GetValue", "Commit", "Terminate"],
        optional: &["GetLastError", "GetErrorString", "GetDiagnostic"],
    },
    ProtocolSignature {
        kind: ProtocolKind::Scorm12,
        required: &[
            "LMSInitialize",
            "LMSSetValue",
            "LMSGetValue",
            "LMSCommit",
            "LMSFinish",
        ],
        optional: &["LMSGetLastError", "LMSGetErrorString", "LMSGetDiagnostic"],
    },
    ProtocolSignature {
        kind: ProtocolKind::Xapi,
        required: &["sendStatement"],
        optional: &[
            "saveStatement",
            "getStatements",
            "changeConfig",
            "sendStatements",
        ],
    },
    ProtocolSignature {
        kind: ProtocolKind::Aicc,
        required: &["PutParam", "GetParam"],
        optional: &["ExitAU"],
    },
    ProtocolSignature {
        kind: ProtocolKind::Custom,
        required: &["setComplete"],
        optional: &["setScore", "setProgress", "getStatus"],
    },
];

/// Free-standing functions that signal course completion on their own.
pub const STANDALONE_FUNCTIONS: [&str; 8] = [
    "SetCourseComplete",
    "setCourseComplete",
    "CompleteCourse",
    "completeCourse",
    "setComplete",
    "markComplete",
    "courseComplete",
    "finishCourse",
];

/// A successful identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMatch {
    pub kind: ProtocolKind,
    /// Required names followed by whichever optional names are present.
    pub methods: Vec<String>,
}

async fn has_all(obj: &dyn HostObject, names: &[&str]) -> bool {
    for name in names {
        if !obj.is_callable(name).await {
            return false;
        }
    }
    true
}

/// Decide which protocol `obj` implements, first match in priority order.
pub async fn identify(obj: &dyn HostObject) -> Option<SignatureMatch> {
    let mut found: Option<SignatureMatch> = None;
    for sig in &SIGNATURES {
        if !has_all(obj, sig.required).await {
            continue;
        }
        if let Some(first) = &found {
            tracing::warn!(
                "object matches both {} and {}; keeping {}",
                first.kind,
                sig.kind,
                first.kind
            );
            continue;
        }
        let mut methods: Vec<String> = sig.required.iter().map(|s| s.to_string()).collect();
        for name in sig.optional {
            if obj.is_callable(name).await {
                methods.push(name.to_string());
            }
        }
        found = Some(SignatureMatch {
            kind: sig.kind,
            methods,
        });
    }
    found
}

/// Completion-shaped functions defined directly on a global scope.
pub async fn search_standalone_functions(global: &dyn HostObject) -> Vec<String> {
    let mut out = Vec::new();
    for name in STANDALONE_FUNCTIONS {
        if global.is_callable(name).await {
            out.push(name.to_string());
        }
    }
    out
}
