//! Protection policy and enforcement.
//!
//! [`ProtectedRoot`] and [`is_protected`] decide what lies inside the tree,
//! [`Enforcer`] turns raw events into actions, [`privilege`] checks the
//! startup precondition and [`Notifier`] receives user-facing outcomes.

mod enforcer;
mod notification;
mod path_policy;
pub mod privilege;

pub use enforcer::{EnforcementAction, EnforcementDecision, Enforcer, Outcome};
pub use notification::{
    CLIPBOARD_BLOCKED, CREATION_BLOCKED, DesktopNotifier, FAILURE_TITLE, LogNotifier, Notifier,
    PROTECTION_TITLE, from_config as notifier_from_config,
};
pub use path_policy::{CASE_INSENSITIVE, ProtectedRoot, is_protected, normalize};
