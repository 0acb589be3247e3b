//! Function resource identifiers and metric dimensions.
//!
//! A function resource string has the shape
//! `arn:partition:service:region:account:kind:id[:qualifier]`. The
//! qualifier is an optional version or alias suffix; re-serialization with
//! a substituted qualifier is used to tag metrics with the concrete
//! deployed version even when the function was invoked unqualified.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Metric label name → value mapping.
pub type Dimensions = BTreeMap<String, String>;

/// Shutdown cause label on the environment shutdown counter.
pub const DIM_SHUTDOWN_CAUSE: &str = "aws_function_shutdown_cause";
/// Deployment region label.
pub const DIM_REGION: &str = "aws_region";
/// Account id label.
pub const DIM_ACCOUNT_ID: &str = "aws_account_id";
/// Function name label.
pub const DIM_FUNCTION_NAME: &str = "aws_function_name";
/// Concrete function version label.
pub const DIM_FUNCTION_VERSION: &str = "aws_function_version";
/// Full resource string label, re-serialized with the deployed version.
pub const DIM_ARN: &str = "aws_arn";
/// Invoked qualifier (version or alias) label.
pub const DIM_QUALIFIER: &str = "aws_function_qualifier";
/// Runtime identifier label.
pub const DIM_RUNTIME: &str = "aws_function_runtime";
/// Synthetic cross-backend correlation id label.
pub const DIM_AWS_UNIQUE_ID: &str = "AWSUniqueId";

const ARN_PREFIX: &str = "arn";
const DELIMITER: char = ':';

/// Failure to interpret a resource string.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArnError {
    /// The string does not have the six colon-separated ARN segments.
    #[error("not an ARN: {0}")]
    Malformed(String),
    /// The resource segment lacks the mandatory `kind:id` pair.
    #[error("invalid ARN resource, expected at least kind:id: {0}")]
    InvalidResource(String),
}

/// A parsed resource identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    /// Partition segment (e.g. `aws`).
    pub partition: String,
    /// Service segment (e.g. `lambda`).
    pub service: String,
    /// Deployment region.
    pub region: String,
    /// Account id.
    pub account_id: String,
    /// Remaining resource segment, possibly containing delimiters.
    pub resource: String,
}

impl Arn {
    /// Parses an ARN string.
    pub fn parse(input: &str) -> Result<Self, ArnError> {
        let mut segments = input.splitn(6, DELIMITER);

        let malformed = || ArnError::Malformed(input.to_string());

        if segments.next().ok_or_else(malformed)? != ARN_PREFIX {
            return Err(malformed());
        }

        let partition = segments.next().ok_or_else(malformed)?;
        let service = segments.next().ok_or_else(malformed)?;
        let region = segments.next().ok_or_else(malformed)?;
        let account_id = segments.next().ok_or_else(malformed)?;
        let resource = segments.next().ok_or_else(malformed)?;

        Ok(Self {
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            resource: resource.to_string(),
        })
    }

    /// Parses the resource segment into its `kind:id[:qualifier]` parts.
    pub fn function_resource(&self) -> Result<FunctionResource, ArnError> {
        FunctionResource::parse(&self.resource)
    }

    /// Re-serializes the ARN with the resource qualifier replaced.
    pub fn with_qualifier(&self, qualifier: &str) -> Result<String, ArnError> {
        let resource = self.function_resource()?.with_qualifier(qualifier);
        Ok(format!(
            "{ARN_PREFIX}:{}:{}:{}:{}:{resource}",
            self.partition, self.service, self.region, self.account_id
        ))
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ARN_PREFIX}:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

/// The `kind:id[:qualifier]` triple of a function resource.
///
/// The qualifier defaults to empty when the resource string carries none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionResource {
    /// Resource kind, e.g. `function`.
    pub kind: String,
    /// Resource id, e.g. the function name.
    pub id: String,
    /// Optional trailing version or alias, empty when absent.
    pub qualifier: String,
}

impl FunctionResource {
    fn parse(resource: &str) -> Result<Self, ArnError> {
        let mut parts = resource.splitn(3, DELIMITER);

        let kind = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ArnError::InvalidResource(resource.to_string()))?;
        let id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ArnError::InvalidResource(resource.to_string()))?;
        let qualifier = parts.next().unwrap_or_default();

        Ok(Self {
            kind: kind.to_string(),
            id: id.to_string(),
            qualifier: qualifier.to_string(),
        })
    }

    /// Returns the resource with only the trailing qualifier replaced.
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }
}

impl fmt::Display for FunctionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{DELIMITER}{}", self.kind, self.id)?;
        if !self.qualifier.is_empty() {
            write!(f, "{DELIMITER}{}", self.qualifier)?;
        }
        Ok(())
    }
}

/// Synthetic correlation id shared across backends for one deployed
/// function version in one region/account.
pub fn unique_id(name: &str, version: &str, region: &str, account_id: &str) -> String {
    format!("lambda_{name}:{version}_{region}_{account_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUALIFIED: &str = "arn:aws:lambda:us-east-1:123456789012:function:helloworld:42";

    #[test]
    fn test_parse_arn() {
        let arn = Arn::parse(QUALIFIED).unwrap();

        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "lambda");
        assert_eq!(arn.region, "us-east-1");
        assert_eq!(arn.account_id, "123456789012");
        assert_eq!(arn.resource, "function:helloworld:42");
    }

    #[test]
    fn test_parse_rejects_non_arn() {
        assert!(matches!(
            Arn::parse("function:helloworld"),
            Err(ArnError::Malformed(_))
        ));
        assert!(matches!(
            Arn::parse("arn:aws:lambda"),
            Err(ArnError::Malformed(_))
        ));
    }

    #[test]
    fn test_resource_roundtrip() {
        let arn = Arn::parse(QUALIFIED).unwrap();
        let resource = arn.function_resource().unwrap();

        assert_eq!(resource.kind, "function");
        assert_eq!(resource.id, "helloworld");
        assert_eq!(resource.qualifier, "42");
        assert_eq!(resource.to_string(), "function:helloworld:42");
    }

    #[test]
    fn test_resource_without_qualifier() {
        let arn = Arn::parse("arn:aws:lambda:us-east-1:123456789012:function:helloworld").unwrap();
        let resource = arn.function_resource().unwrap();

        assert_eq!(resource.qualifier, "");
        assert_eq!(resource.to_string(), "function:helloworld");
    }

    #[test]
    fn test_replacing_qualifier_in_resource() {
        let arn = Arn::parse(QUALIFIED).unwrap();
        let resource = arn.function_resource().unwrap().with_qualifier("10");

        assert_eq!(resource.to_string(), "function:helloworld:10");
    }

    #[test]
    fn test_arn_with_qualifier() {
        let arn = Arn::parse(QUALIFIED).unwrap();

        assert_eq!(
            arn.with_qualifier("7").unwrap(),
            "arn:aws:lambda:us-east-1:123456789012:function:helloworld:7"
        );
    }

    #[test]
    fn test_invalid_resource() {
        let arn = Arn::parse("arn:aws:lambda:us-east-1:123456789012:function").unwrap();
        assert!(matches!(
            arn.function_resource(),
            Err(ArnError::InvalidResource(_))
        ));
    }

    #[test]
    fn test_unique_id() {
        assert_eq!(
            unique_id("helloworld", "7", "us-east-1", "123456789012"),
            "lambda_helloworld:7_us-east-1_123456789012"
        );
    }
}
