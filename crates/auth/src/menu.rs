//! Static navigation tables and capability-based menu filtering.
//!
//! Operators get the administrative menu filtered by their effective
//! capabilities. Every other role gets a fixed, role-keyed menu.

use serde::Serialize;

use crate::{Capability, CapabilitySet, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub key: &'static str,
    pub label: &'static str,
    pub route: &'static str,
    /// `None` means always visible within the owning menu.
    pub requires: Option<Capability>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MenuGroup {
    pub key: &'static str,
    pub label: &'static str,
    pub items: &'static [MenuItem],
}

/// A group as rendered for a given identity (only the visible items).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleGroup {
    pub key: &'static str,
    pub label: &'static str,
    pub items: Vec<MenuItem>,
}

const fn item(
    key: &'static str,
    label: &'static str,
    route: &'static str,
    requires: Option<Capability>,
) -> MenuItem {
    MenuItem {
        key,
        label,
        route,
        requires,
    }
}

const HOME: MenuItem = item("home", "Home", "/", None);
const PROFILE: MenuItem = item("profile", "Profile", "/profile", None);
const MESSAGES: MenuItem = item("messages", "Messages", "/messages", None);
const APPOINTMENTS: MenuItem = item("appointments", "Appointments", "/appointments", None);

pub static OPERATOR_MENU: &[MenuGroup] = &[
    MenuGroup {
        key: "administration",
        label: "Administration",
        items: &[
            item("home", "Home", "/admin", None),
            item("overview", "Overview", "/admin/overview", Some(Capability::ViewMetrics)),
            item("finance", "Finance", "/admin/finance", Some(Capability::ViewMetrics)),
        ],
    },
    MenuGroup {
        key: "community",
        label: "Community",
        items: &[
            item("identities", "Identities", "/admin/identities", Some(Capability::ManageIdentities)),
            item("team", "Team", "/admin/team", Some(Capability::ManageTeam)),
            item("affiliations", "Affiliations", "/admin/affiliations", Some(Capability::ManageAffiliations)),
        ],
    },
    MenuGroup {
        key: "catalog",
        label: "Catalog",
        items: &[
            item("offerings", "Offerings", "/admin/offerings", Some(Capability::ManageOfferings)),
            item("trainings", "Trainings", "/admin/trainings", Some(Capability::ManageTrainings)),
            item("events", "Events", "/admin/events", Some(Capability::ManageEvents)),
            item("categories", "Categories", "/admin/categories", Some(Capability::ManageCategories)),
        ],
    },
    MenuGroup {
        key: "content",
        label: "Content",
        items: &[item("articles", "Articles", "/admin/articles", Some(Capability::ManageArticles))],
    },
    MenuGroup {
        key: "system",
        label: "System",
        items: &[item("settings", "Settings", "/admin/settings", Some(Capability::ManageSettings))],
    },
];

static REQUESTER_MENU: &[MenuGroup] = &[MenuGroup {
    key: "main",
    label: "Main",
    items: &[
        HOME,
        APPOINTMENTS,
        item("providers", "Providers", "/providers", None),
        MESSAGES,
        PROFILE,
    ],
}];

static TRAINEE_PROVIDER_MENU: &[MenuGroup] = &[MenuGroup {
    key: "main",
    label: "Main",
    items: &[
        HOME,
        APPOINTMENTS,
        item("offerings", "Offerings", "/offerings", None),
        item("upgrade", "Upgrade", "/upgrade", None),
        MESSAGES,
        PROFILE,
    ],
}];

static PROVIDER_MENU: &[MenuGroup] = &[MenuGroup {
    key: "main",
    label: "Main",
    items: &[
        HOME,
        item("calendar", "Calendar", "/calendar", None),
        APPOINTMENTS,
        item("offerings", "Offerings", "/offerings", None),
        item("earnings", "Earnings", "/earnings", None),
        MESSAGES,
        PROFILE,
    ],
}];

fn role_menu(role: Role) -> &'static [MenuGroup] {
    match role {
        Role::Requester => REQUESTER_MENU,
        Role::TraineeProvider => TRAINEE_PROVIDER_MENU,
        Role::Provider => PROVIDER_MENU,
        Role::Operator => OPERATOR_MENU,
    }
}

/// Compute the navigation visible to an identity.
///
/// Operators see the administrative menu reduced to items whose requirement
/// is held, in static definition order, with empty groups dropped. Other
/// roles get their static menu and `capabilities` is ignored.
pub fn visible_menu(role: Role, capabilities: &CapabilitySet) -> Vec<VisibleGroup> {
    let menu = role_menu(role);

    menu.iter()
        .filter_map(|group| {
            let items: Vec<MenuItem> = group
                .items
                .iter()
                .filter(|it| match it.requires {
                    None => true,
                    Some(cap) => role.is_operator() && capabilities.contains(cap),
                })
                .copied()
                .collect();

            (!items.is_empty()).then(|| VisibleGroup {
                key: group.key,
                label: group.label,
                items,
            })
        })
        .collect()
}
