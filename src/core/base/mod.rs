//! Shared vocabulary of the engine: the caller-supplied operation context,
//! the two taxonomy axes (category and severity), recovery strategies and
//! the outbound security-event collaborator.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// `OpContext` identifies the operation a failure or a sample belongs to.
/// It round-trips unchanged into every record built from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpContext {
    pub service: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OpContext {
    pub fn new(service: &str, operation: &str) -> Self {
        OpContext {
            service: service.into(),
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_request(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Circuit breakers are keyed per `service:operation` pair.
    pub fn breaker_key(&self) -> String {
        format!("{}:{}", self.service, self.operation)
    }
}

/// Severity drives the logging level and breaker eligibility. It is
/// independent from [`ErrorCategory`], which is the routing axis.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Severity {
        Severity::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", name)
    }
}

/// The routing axis of the error taxonomy, targeted by pattern matching.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Authorization,
    Validation,
    Database,
    Network,
    ExternalApi,
    RateLimit,
    System,
}

impl Default for ErrorCategory {
    fn default() -> ErrorCategory {
        ErrorCategory::System
    }
}

impl ErrorCategory {
    /// Authentication and authorization failures additionally feed the
    /// security-event collaborator.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Authentication | ErrorCategory::Authorization
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Database => "database",
            ErrorCategory::Network => "network",
            ErrorCategory::ExternalApi => "external_api",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::System => "system",
        };
        write!(f, "{}", name)
    }
}

/// Policy attached to an error category by the pattern table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    CircuitBreaker,
    GracefulDegradation,
    ManualIntervention,
}

impl Default for RecoveryStrategy {
    fn default() -> RecoveryStrategy {
        RecoveryStrategy::ManualIntervention
    }
}

/// `SecurityEvent` is handed to the external security-event recorder on
/// authentication/authorization-classified failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: String,
    pub severity: Severity,
    pub source: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Outbound collaborator receiving security events. Delivery is
/// fire-and-forget: the tracker swallows and logs sink failures, they must
/// never affect error tracking itself.
pub trait SecurityEventSink: Send + Sync {
    fn record(&self, event: SecurityEvent) -> Result<()>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn breaker_key_joins_service_and_operation() {
        let ctx = OpContext::new("billing", "charge");
        assert_eq!(ctx.breaker_key(), "billing:charge");
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn security_relevance() {
        assert!(ErrorCategory::Authentication.is_security_relevant());
        assert!(ErrorCategory::Authorization.is_security_relevant());
        assert!(!ErrorCategory::Database.is_security_relevant());
    }

    #[test]
    fn category_serializes_snake_case() {
        let s = serde_json::to_string(&ErrorCategory::ExternalApi).unwrap();
        assert_eq!(s, "\"external_api\"");
    }
}
