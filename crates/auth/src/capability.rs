//! Permission catalog: the closed set of administrative capability tags.
//!
//! Tags are closed-world. Anything outside [`Capability::ALL`] is rejected at
//! assignment time and ignored (with a warning) when found in stored grants.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Administrative capability held by operators through explicit grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ManageIdentities,
    ManageArticles,
    ManageTrainings,
    ManageEvents,
    ManageOfferings,
    ManageCategories,
    ManageAffiliations,
    ViewMetrics,
    ManageSettings,
    ManageTeam,
}

/// Error returned when a tag is not part of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown capability '{0}'")]
pub struct UnknownCapability(pub String);

/// Human-facing metadata for a capability (permissions dialog, audit screens).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityMetadata {
    pub tag: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub category: &'static str,
}

impl Capability {
    /// Every capability, in catalog order.
    pub const ALL: [Capability; 10] = [
        Capability::ManageIdentities,
        Capability::ManageArticles,
        Capability::ManageTrainings,
        Capability::ManageEvents,
        Capability::ManageOfferings,
        Capability::ManageCategories,
        Capability::ManageAffiliations,
        Capability::ViewMetrics,
        Capability::ManageSettings,
        Capability::ManageTeam,
    ];

    pub fn as_str(self) -> &'static str {
        self.metadata().tag
    }

    pub fn metadata(self) -> &'static CapabilityMetadata {
        &CATALOG[self as usize]
    }

    /// Parse a whole assignment, rejecting it if any tag is unknown.
    pub fn parse_all<I, S>(tags: I) -> Result<Vec<Capability>, UnknownCapability>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tags.into_iter().map(|t| t.as_ref().parse()).collect()
    }
}

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == tag)
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Indexed by discriminant; order must follow the enum.
static CATALOG: [CapabilityMetadata; 10] = [
    CapabilityMetadata {
        tag: "manage-identities",
        label: "Identities",
        description: "Create, verify and suspend user accounts",
        icon: "users",
        category: "community",
    },
    CapabilityMetadata {
        tag: "manage-articles",
        label: "Articles",
        description: "Publish and moderate articles",
        icon: "file-text",
        category: "content",
    },
    CapabilityMetadata {
        tag: "manage-trainings",
        label: "Trainings",
        description: "Manage training programs offered on the platform",
        icon: "graduation-cap",
        category: "catalog",
    },
    CapabilityMetadata {
        tag: "manage-events",
        label: "Events",
        description: "Schedule and edit platform events",
        icon: "calendar",
        category: "catalog",
    },
    CapabilityMetadata {
        tag: "manage-offerings",
        label: "Offerings",
        description: "Review and approve provider service offerings",
        icon: "briefcase",
        category: "catalog",
    },
    CapabilityMetadata {
        tag: "manage-categories",
        label: "Categories",
        description: "Maintain the service category tree",
        icon: "tags",
        category: "catalog",
    },
    CapabilityMetadata {
        tag: "manage-affiliations",
        label: "Affiliations",
        description: "Manage partner organizations and affiliations",
        icon: "link",
        category: "community",
    },
    CapabilityMetadata {
        tag: "view-metrics",
        label: "Metrics",
        description: "View platform overview and finance dashboards",
        icon: "bar-chart",
        category: "reporting",
    },
    CapabilityMetadata {
        tag: "manage-settings",
        label: "Settings",
        description: "Change platform-wide settings",
        icon: "settings",
        category: "system",
    },
    CapabilityMetadata {
        tag: "manage-team",
        label: "Team",
        description: "Manage operator accounts and their permissions",
        icon: "shield",
        category: "community",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_indexed_by_discriminant() {
        for cap in Capability::ALL {
            let json = serde_json::to_string(&cap).unwrap();
            assert_eq!(json, format!("\"{}\"", cap.metadata().tag));
        }
    }

    #[test]
    fn every_tag_parses_back() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = "manage-everything".parse::<Capability>().unwrap_err();
        assert_eq!(err, UnknownCapability("manage-everything".to_string()));
    }

    #[test]
    fn parse_all_rejects_the_whole_assignment() {
        let err = Capability::parse_all(["view-metrics", "root", "manage-team"]).unwrap_err();
        assert_eq!(err.0, "root");

        let ok = Capability::parse_all(["view-metrics", "manage-team"]).unwrap();
        assert_eq!(ok, vec![Capability::ViewMetrics, Capability::ManageTeam]);
    }
}
