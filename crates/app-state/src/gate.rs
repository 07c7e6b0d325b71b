//! Access gating and navigation for the dashboard shell

use api_client::UserProfile;

use crate::session::Session;

/// What the dashboard shell should show for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGate {
    /// An operation is in flight; show a spinner
    Loading,
    /// Not signed in; send the user to the login page
    RedirectToLogin,
    /// Render the protected page
    Ready,
}

impl AccessGate {
    /// Route taken on [`AccessGate::RedirectToLogin`]
    pub const LOGIN_ROUTE: &'static str = "/login";

    /// Decide what to show for `session`
    pub fn evaluate(session: &Session) -> Self {
        if session.is_loading {
            AccessGate::Loading
        } else if !session.is_authenticated {
            AccessGate::RedirectToLogin
        } else {
            AccessGate::Ready
        }
    }

    /// Whether protected content may render
    pub fn is_ready(&self) -> bool {
        matches!(self, AccessGate::Ready)
    }
}

/// Group a navigation entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavSection {
    /// Entries every signed-in user sees
    Main,
    /// Administration entries
    Admin,
}

/// A sidebar entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavItem {
    /// Label shown in the sidebar
    pub title: &'static str,
    /// Route the entry links to
    pub href: &'static str,
    /// Section the entry belongs to
    pub section: NavSection,
}

impl NavItem {
    const fn new(title: &'static str, href: &'static str, section: NavSection) -> Self {
        Self { title, href, section }
    }

    /// Whether `path` is this entry's route or one of its sub-routes
    pub fn is_active(&self, path: &str) -> bool {
        path == self.href
            || path
                .strip_prefix(self.href)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Every sidebar entry, in display order
pub const NAV_ITEMS: &[NavItem] = &[
    NavItem::new("Dashboard", "/dashboard", NavSection::Main),
    NavItem::new("Virtual Machines", "/vms", NavSection::Main),
    NavItem::new("Templates", "/templates", NavSection::Main),
    NavItem::new("Credits", "/credits", NavSection::Main),
    NavItem::new("Monitoring", "/monitoring", NavSection::Main),
    NavItem::new("Audit Logs", "/logs", NavSection::Main),
    NavItem::new("Users", "/admin/users", NavSection::Admin),
    NavItem::new("Servers", "/admin/servers", NavSection::Admin),
    NavItem::new("Templates", "/admin/templates", NavSection::Admin),
    NavItem::new("Admin Logs", "/admin/logs", NavSection::Admin),
];

impl NavSection {
    /// Whether `user` may see this section
    pub fn is_visible_to(&self, user: Option<&UserProfile>) -> bool {
        match self {
            NavSection::Main => true,
            NavSection::Admin => user.is_some_and(UserProfile::is_admin),
        }
    }
}

/// Sidebar entries visible to `user`
pub fn visible_nav_items(user: Option<&UserProfile>) -> Vec<&'static NavItem> {
    NAV_ITEMS
        .iter()
        .filter(|item| item.section.is_visible_to(user))
        .collect()
}
