//! External collaborators consumed by workflow nodes.
//!
//! The engine treats collaborators as pure functions of the payload:
//! - [`SubmissionValidator`]: synchronous field validation.
//! - [`RiskAssessor`]: asynchronous risk scoring. A failure or timeout is a
//!   fatal node failure; the engine writes no checkpoint for it.
//!
//! `BoxRiskAssessor` type-erases any `RiskAssessor` so graphs can hold one
//! without becoming generic, following the usual Dyn + blanket impl shape.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use procura_types::payload::{RiskAssessment, VendorPayload, WorkflowPayload};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Outcome of validating a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub error_message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error_message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error_message: Some(message.into()),
        }
    }
}

pub trait SubmissionValidator: Send + Sync {
    fn validate(&self, payload: &WorkflowPayload) -> ValidationResult;
}

/// Requires a set of top-level payload fields to be present and non-blank.
///
/// Field names are the payload's JSON (camelCase) names.
#[derive(Debug, Clone)]
pub struct RequiredFieldsValidator {
    fields: Vec<String>,
}

impl RequiredFieldsValidator {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl SubmissionValidator for RequiredFieldsValidator {
    fn validate(&self, payload: &WorkflowPayload) -> ValidationResult {
        let json = payload.to_json();
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|field| match json.get(field.as_str()) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            ValidationResult::ok()
        } else {
            ValidationResult::invalid(format!(
                "Missing required fields: {}",
                missing.join(", ")
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Risk assessment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
#[error("risk assessment failed: {0}")]
pub struct AssessmentError(pub String);

/// Scores the risk of onboarding a vendor.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RiskAssessor: Send + Sync {
    fn assess(
        &self,
        vendor: &VendorPayload,
    ) -> impl Future<Output = Result<RiskAssessment, AssessmentError>> + Send;
}

/// Object-safe version of [`RiskAssessor`] with boxed futures.
pub trait RiskAssessorDyn: Send + Sync {
    fn assess_boxed<'a>(
        &'a self,
        vendor: &'a VendorPayload,
    ) -> Pin<Box<dyn Future<Output = Result<RiskAssessment, AssessmentError>> + Send + 'a>>;
}

impl<T: RiskAssessor> RiskAssessorDyn for T {
    fn assess_boxed<'a>(
        &'a self,
        vendor: &'a VendorPayload,
    ) -> Pin<Box<dyn Future<Output = Result<RiskAssessment, AssessmentError>> + Send + 'a>> {
        Box::pin(self.assess(vendor))
    }
}

/// Type-erased risk assessor.
pub struct BoxRiskAssessor {
    inner: Box<dyn RiskAssessorDyn>,
}

impl BoxRiskAssessor {
    pub fn new<T: RiskAssessor + 'static>(assessor: T) -> Self {
        Self {
            inner: Box::new(assessor),
        }
    }
}

impl RiskAssessor for BoxRiskAssessor {
    async fn assess(&self, vendor: &VendorPayload) -> Result<RiskAssessment, AssessmentError> {
        self.inner.assess_boxed(vendor).await
    }
}

/// Deterministic rule-based assessor used when no external scoring service
/// is configured.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedRiskAssessor;

impl RiskAssessor for RuleBasedRiskAssessor {
    async fn assess(&self, vendor: &VendorPayload) -> Result<RiskAssessment, AssessmentError> {
        let mut score = 20u32;
        let mut factors = Vec::new();
        let mut recommendations = Vec::new();

        if vendor.contact_email.is_none() {
            score += 15;
            factors.push("no contact email on file".to_string());
            recommendations.push("collect a verified contact email".to_string());
        }
        if vendor.financials.is_none() {
            score += 25;
            factors.push("no financial statements supplied".to_string());
            recommendations.push("request audited financials".to_string());
        }
        if vendor.category.is_none() {
            score += 10;
            factors.push("vendor category not specified".to_string());
        }

        Ok(RiskAssessment {
            score: score.min(100),
            factors,
            recommendations,
        })
    }
}
