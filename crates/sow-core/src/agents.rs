//! Fixed registry of agent roles.
//!
//! Task ownership and prompt preambles are keyed by role name; the set is
//! code, not data.

/// Every role a task may be assigned to.
pub const ROLES: &[&str] = &[
    "orchestrator",
    "planner",
    "implementer",
    "reviewer",
    "finalizer",
    "explorer",
    "designer",
    "breakdown",
];

pub fn is_registered(role: &str) -> bool {
    ROLES.contains(&role)
}

/// One-line framing prepended to agent prompts for the role.
pub fn preamble(role: &str) -> &'static str {
    match role {
        "orchestrator" => "You are the orchestrator driving this project.",
        "planner" => "You are the planner. Produce and refine the task list.",
        "implementer" => "You are the implementer. Work the assigned task to completion.",
        "reviewer" => "You are the reviewer. Assess the implementation and record a verdict.",
        "finalizer" => "You are the finalizer. Update documentation and run final checks.",
        "explorer" => "You are the explorer. Investigate and summarize your findings.",
        "designer" => "You are the designer. Produce the design documents.",
        "breakdown" => "You are the breakdown agent. Split the work into publishable units.",
        _ => "You are an agent working on this project.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_roles_are_registered() {
        for role in ROLES {
            assert!(is_registered(role));
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(!is_registered("wizard"));
        assert!(!is_registered(""));
    }

    #[test]
    fn every_role_has_a_specific_preamble() {
        for role in ROLES {
            assert_ne!(preamble(role), preamble("wizard"));
        }
    }
}
