use crate::error::{ExporterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Structured form of an ARM resource path such as
/// `/subscriptions/{id}/resourceGroups/{rg}/providers/Microsoft.Batch/batchAccounts/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub provider: Option<String>,
    pub resource_type: Option<String>,
    pub name: Option<String>,
}

impl ResourceId {
    /// Parses a slash-delimited resource path. Segment names are matched
    /// case-insensitively; values are kept verbatim.
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let malformed = || ExporterError::MalformedResourceId(path.to_string());

        let start = segments
            .iter()
            .position(|s| s.eq_ignore_ascii_case("subscriptions"))
            .ok_or_else(malformed)?;

        let rest = &segments[start..];
        if rest.len() < 4 || !rest[2].eq_ignore_ascii_case("resourceGroups") {
            return Err(malformed());
        }

        let subscription_id = rest[1].to_string();
        let resource_group = rest[3].to_string();

        let (provider, resource_type, name) = match rest.get(4) {
            Some(s) if s.eq_ignore_ascii_case("providers") => {
                let provider = rest.get(5).map(|s| s.to_string());
                let resource_type = rest.get(6).map(|s| s.to_string());
                // Nested resources keep the innermost name.
                let name = if rest.len() > 7 {
                    rest.last().map(|s| s.to_string())
                } else {
                    None
                };
                (provider, resource_type, name)
            }
            // Anything else under the group still identifies sub and group.
            Some(_) | None => (None, None, None),
        };

        Ok(Self {
            subscription_id,
            resource_group,
            provider,
            resource_type,
            name,
        })
    }
}

impl FromStr for ResourceId {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )?;
        if let (Some(provider), Some(resource_type)) = (&self.provider, &self.resource_type) {
            write!(f, "/providers/{}/{}", provider, resource_type)?;
            if let Some(name) = &self.name {
                write!(f, "/{}", name)?;
            }
        }
        Ok(())
    }
}
