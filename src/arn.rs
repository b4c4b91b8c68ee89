//! Amazon Resource Names.
//!
//! An ARN is written `type:partition:service:region:account:resource`.
//! Two shorthands are accepted when parsing: `*` for the anonymous
//! principal, and a bare account id with no colons.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Arn {
    pub kind: String,
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid ARN {0:?}")]
pub struct ParseArnError(String);

impl Arn {
    /// The ARN S3 uses for a bucket (`arn:aws:s3:<region>::<bucket>`).
    pub fn s3(region: &str, resource: &str) -> Self {
        Self {
            kind: "arn".to_string(),
            partition: "aws".to_string(),
            service: "s3".to_string(),
            region: region.to_string(),
            account: String::new(),
            resource: resource.to_string(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            account: "*".to_string(),
            ..Self::default()
        }
    }

    /// True when every field is empty.
    pub fn is_nil(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        *self == Self::anonymous()
    }

    /// True when only the account field is set (and is not `*`).
    pub fn is_user_id(&self) -> bool {
        !self.account.is_empty()
            && self.account != "*"
            && Arn {
                account: String::new(),
                ..self.clone()
            }
            .is_nil()
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            Ok(())
        } else if self.is_anonymous() {
            f.write_str("*")
        } else if self.is_user_id() {
            f.write_str(&self.account)
        } else {
            write!(
                f,
                "{}:{}:{}:{}:{}:{}",
                self.kind, self.partition, self.service, self.region, self.account, self.resource
            )
        }
    }
}

impl FromStr for Arn {
    type Err = ParseArnError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        if src.is_empty() {
            return Ok(Self::default());
        }
        if src == "*" {
            return Ok(Self::anonymous());
        }
        if !src.contains(':') {
            return Ok(Self {
                account: src.to_string(),
                ..Self::default()
            });
        }

        let fields: Vec<&str> = src.splitn(6, ':').collect();
        let [kind, partition, service, region, account, resource] = fields[..] else {
            return Err(ParseArnError(src.to_string()));
        };
        Ok(Self {
            kind: kind.to_string(),
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account: account.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl TryFrom<String> for Arn {
    type Error = ParseArnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Arn> for String {
    fn from(arn: Arn) -> Self {
        arn.to_string()
    }
}
