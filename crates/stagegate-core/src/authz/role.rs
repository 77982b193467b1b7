//! Agent identifier → role resolution.

use std::collections::BTreeSet;

/// Separator between a fan-out base role and its per-item discriminator.
pub const INSTANCE_SEPARATOR: char = ':';

/// Maps agent identifiers onto the role whose permission set applies.
///
/// An identifier of the form `"<base>:<discriminator>"` resolves to `<base>`
/// only when `<base>` is a registered fan-out role, so every instance of a
/// fan-out stage shares one permission set. Anything else, including
/// identifiers without a separator, is its own role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleResolver {
    fan_out_roles: BTreeSet<String>,
}

impl RoleResolver {
    pub fn new<I, S>(fan_out_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fan_out_roles: fan_out_roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve `agent_id` to its role.
    pub fn resolve<'a>(&self, agent_id: &'a str) -> &'a str {
        match agent_id.split_once(INSTANCE_SEPARATOR) {
            Some((base, discriminator))
                if !discriminator.is_empty() && self.fan_out_roles.contains(base) =>
            {
                base
            }
            _ => agent_id,
        }
    }

    pub fn fan_out_roles(&self) -> impl Iterator<Item = &str> {
        self.fan_out_roles.iter().map(String::as_str)
    }

    pub fn is_fan_out_role(&self, role: &str) -> bool {
        self.fan_out_roles.contains(role)
    }
}

/// Build the identifier of one fan-out instance.
pub fn instance_id(base_role: &str, discriminator: &str) -> String {
    format!("{base_role}{INSTANCE_SEPARATOR}{discriminator}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> RoleResolver {
        RoleResolver::new(["code_agent", "test_agent"])
    }

    #[test]
    fn test_fan_out_instances_share_base_role() {
        let r = resolver();
        assert_eq!(r.resolve("code_agent:modA"), "code_agent");
        assert_eq!(r.resolve("code_agent:modB"), "code_agent");
        assert_eq!(r.resolve("test_agent:modA"), "test_agent");
    }

    #[test]
    fn test_plain_identifier_is_its_own_role() {
        assert_eq!(resolver().resolve("architecture_agent"), "architecture_agent");
    }

    #[test]
    fn test_unknown_base_is_not_stripped() {
        // "build_agent" is not a fan-out role, so the full id is the role.
        assert_eq!(resolver().resolve("build_agent:x"), "build_agent:x");
    }

    #[test]
    fn test_prefix_without_separator_is_not_stripped() {
        assert_eq!(resolver().resolve("code_agent_v2"), "code_agent_v2");
    }

    #[test]
    fn test_empty_discriminator_is_not_stripped() {
        assert_eq!(resolver().resolve("code_agent:"), "code_agent:");
    }

    #[test]
    fn test_instance_id_round_trips_through_resolver() {
        let id = instance_id("code_agent", "sensor1");
        assert_eq!(id, "code_agent:sensor1");
        assert_eq!(resolver().resolve(&id), "code_agent");
    }
}
