//! Protocol drivers behind one `complete`/`verify` contract.

pub mod aicc;
pub mod call;
pub mod custom;
pub mod scorm;
pub mod scorm12;
pub mod scorm2004;
pub mod timefmt;
pub mod xapi;

use async_trait::async_trait;

use crate::config::CompletionConfig;
use crate::discovery::DiscoveredApi;
use crate::http::HttpClient;
use crate::types::{CompletionOptions, CompletionStatus, DriverResult, Operation, ProtocolKind, VerificationResult};

pub use aicc::AiccDriver;
pub use custom::CustomDriver;
pub use scorm::ScormDriver;
pub use scorm12::Scorm12;
pub use scorm2004::Scorm2004;
pub use xapi::XapiDriver;

/// Read/write/verify for one protocol kind.
///
/// Drivers never fail past their boundary: every problem, including host
/// exceptions and timeouts, lands in `DriverResult::errors`.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    /// Drive `api` into the requested completion state.
    async fn complete(&self, api: &DiscoveredApi, options: &CompletionOptions) -> DriverResult;

    /// Read back what the host now reports.
    async fn verify(&self, api: &DiscoveredApi, expected: CompletionStatus) -> VerificationResult;

    /// End the session, for protocols that have one. Called after
    /// verification since most hosts refuse reads once terminated.
    async fn terminate(&self, _api: &DiscoveredApi) -> Option<Operation> {
        None
    }
}

/// One driver per protocol kind.
pub struct DriverSet {
    scorm12: ScormDriver<Scorm12>,
    scorm2004: ScormDriver<Scorm2004>,
    xapi: XapiDriver,
    aicc: AiccDriver,
    custom: CustomDriver,
}

impl DriverSet {
    pub fn new(config: &CompletionConfig, http: HttpClient) -> Self {
        Self {
            scorm12: ScormDriver::new(Scorm12, config.call_timeout()),
            scorm2004: ScormDriver::new(Scorm2004, config.call_timeout()),
            xapi: XapiDriver::new(config.call_timeout(), config.xapi_send_timeout()),
            aicc: AiccDriver::new(http, config.call_timeout(), config.aicc_http_timeout()),
            custom: CustomDriver::new(config.call_timeout()),
        }
    }

    pub fn for_kind(&self, kind: ProtocolKind) -> &dyn ProtocolDriver {
        match kind {
            ProtocolKind::Scorm12 => &self.scorm12,
            ProtocolKind::Scorm2004 => &self.scorm2004,
            ProtocolKind::Xapi => &self.xapi,
            ProtocolKind::Aicc => &self.aicc,
            ProtocolKind::Custom => &self.custom,
        }
    }
}
