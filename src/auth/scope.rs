//! Scope resolution for badge management.
//!
//! Every authorization decision in the service routes through this module;
//! there are no inline role checks anywhere else. All functions are pure and
//! total: any well-formed input maps to a decision, nothing here performs I/O
//! or panics.

use crate::auth::context::{ActorContext, DataScope, Role};

/// Decide whether `actor` may manage (award/read) resources belonging to the
/// target institution and department.
///
/// Precedence, first match wins:
/// 1. Super-admin: always permitted.
/// 2. Institution-head: permitted within their own institution.
/// 3. Department-admin: permitted within their own institution AND their own
///    department. A department-admin without an assigned department is never
///    authorized (fail closed).
/// 4. Placements-admin: permitted within their own institution, department
///    not checked.
/// 5. Anything else: denied.
pub fn can_manage(
    actor: &ActorContext,
    target_institution: &str,
    target_department: Option<&str>,
) -> bool {
    if actor.has_role(Role::SuperAdmin) {
        return true;
    }
    if actor.has_role(Role::InstitutionHead) {
        return actor.institution_id == target_institution;
    }
    if actor.has_role(Role::DepartmentAdmin) {
        let Some(own_department) = actor.department.as_deref() else {
            return false;
        };
        return actor.institution_id == target_institution
            && target_department == Some(own_department);
    }
    if actor.has_role(Role::PlacementsAdmin) {
        return actor.institution_id == target_institution;
    }
    false
}

/// Resolve the data scope the actor reads/acts within
pub fn resolve_data_scope(actor: &ActorContext) -> DataScope {
    if actor.has_role(Role::SuperAdmin) || actor.has_role(Role::InstitutionHead) {
        return DataScope::Institution;
    }
    if actor.has_role(Role::DepartmentAdmin) {
        return match actor.department.as_deref() {
            Some(dept) => DataScope::Department(dept.to_string()),
            None => DataScope::None,
        };
    }
    if actor.has_role(Role::PlacementsAdmin) {
        return DataScope::PlacementSubset;
    }
    DataScope::None
}

/// Whether the actor can hold badge-awarding authority at all, before any
/// target is known. Used as the pre-flight gate so doomed requests fail
/// before an identity lookup or a rate-limit slot is spent.
pub fn can_award_at_all(actor: &ActorContext) -> bool {
    actor.has_role(Role::SuperAdmin)
        || actor.has_role(Role::InstitutionHead)
        || (actor.has_role(Role::DepartmentAdmin) && actor.department.is_some())
        || actor.has_role(Role::PlacementsAdmin)
}

/// Badge definition creation/deactivation is a stricter subset:
/// only institution-head and super-admin.
pub fn can_create_definition(actor: &ActorContext) -> bool {
    actor.has_role(Role::SuperAdmin) || actor.has_role(Role::InstitutionHead)
}

/// Revocation is restricted to institution-head and super-admin.
/// A department-admin can never revoke, regardless of department match;
/// this is an explicit policy rule, not an incidental one.
pub fn can_revoke(actor: &ActorContext, award_institution: &str) -> bool {
    if actor.has_role(Role::SuperAdmin) {
        return true;
    }
    actor.has_role(Role::InstitutionHead) && actor.institution_id == award_institution
}

/// Only the super scope may create global (institution-less) definitions.
pub fn can_create_global(actor: &ActorContext) -> bool {
    actor.has_role(Role::SuperAdmin)
}

/// Whether the actor may mutate (deactivate) a definition owned by `owner`
/// (None = global). Mutation requires creation rights plus ownership; global
/// definitions belong to the super scope.
pub fn can_mutate_definition(actor: &ActorContext, owner: Option<&str>) -> bool {
    if actor.has_role(Role::SuperAdmin) {
        return true;
    }
    match owner {
        Some(owner) => can_create_definition(actor) && actor.institution_id == owner,
        None => false,
    }
}

/// Whether a definition owned by `owner` (None = global) is usable by an
/// actor of `institution_id`.
pub fn definition_usable_by(owner: Option<&str>, institution_id: &str) -> bool {
    match owner {
        None => true,
        Some(owner) => owner == institution_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(roles: Vec<Role>, institution: &str, department: Option<&str>) -> ActorContext {
        let mut a = ActorContext::new("actor-1", institution).with_roles(roles);
        if let Some(d) = department {
            a = a.with_department(d);
        }
        a
    }

    #[test]
    fn test_super_admin_manages_everything() {
        let a = actor(vec![Role::SuperAdmin], "inst-a", None);
        assert!(can_manage(&a, "inst-a", Some("cs")));
        assert!(can_manage(&a, "inst-b", None));
        assert_eq!(resolve_data_scope(&a), DataScope::Institution);
    }

    #[test]
    fn test_institution_head_limited_to_own_institution() {
        let a = actor(vec![Role::InstitutionHead], "inst-a", None);
        assert!(can_manage(&a, "inst-a", Some("cs")));
        assert!(can_manage(&a, "inst-a", None));
        assert!(!can_manage(&a, "inst-b", Some("cs")));
    }

    #[test]
    fn test_department_admin_needs_matching_department() {
        let a = actor(vec![Role::DepartmentAdmin], "inst-a", Some("cs"));
        assert!(can_manage(&a, "inst-a", Some("cs")));
        assert!(!can_manage(&a, "inst-a", Some("math")));
        assert!(!can_manage(&a, "inst-a", None));
        assert!(!can_manage(&a, "inst-b", Some("cs")));
        assert_eq!(
            resolve_data_scope(&a),
            DataScope::Department("cs".to_string())
        );
    }

    #[test]
    fn test_department_admin_without_department_fails_closed() {
        let a = actor(vec![Role::DepartmentAdmin], "inst-a", None);
        assert!(!can_manage(&a, "inst-a", Some("cs")));
        assert!(!can_award_at_all(&a));
        assert_eq!(resolve_data_scope(&a), DataScope::None);
    }

    #[test]
    fn test_placements_admin_ignores_department() {
        let a = actor(vec![Role::PlacementsAdmin], "inst-a", None);
        assert!(can_manage(&a, "inst-a", Some("cs")));
        assert!(can_manage(&a, "inst-a", None));
        assert!(!can_manage(&a, "inst-b", None));
        assert_eq!(resolve_data_scope(&a), DataScope::PlacementSubset);
    }

    #[test]
    fn test_faculty_denied() {
        let a = actor(vec![Role::Faculty], "inst-a", None);
        assert!(!can_manage(&a, "inst-a", None));
        assert!(!can_award_at_all(&a));
        assert_eq!(resolve_data_scope(&a), DataScope::None);
    }

    #[test]
    fn test_precedence_super_wins_over_broken_department_admin() {
        // Holding a second, weaker role must never narrow access
        let a = actor(vec![Role::DepartmentAdmin, Role::SuperAdmin], "inst-a", None);
        assert!(can_manage(&a, "inst-b", Some("cs")));
    }

    #[test]
    fn test_only_head_and_super_create_definitions() {
        assert!(can_create_definition(&actor(
            vec![Role::InstitutionHead],
            "inst-a",
            None
        )));
        assert!(can_create_definition(&actor(vec![Role::SuperAdmin], "inst-a", None)));
        assert!(!can_create_definition(&actor(
            vec![Role::PlacementsAdmin],
            "inst-a",
            None
        )));
        assert!(!can_create_definition(&actor(
            vec![Role::DepartmentAdmin],
            "inst-a",
            Some("cs")
        )));
    }

    #[test]
    fn test_department_admin_can_never_revoke() {
        let a = actor(vec![Role::DepartmentAdmin], "inst-a", Some("cs"));
        // Even a perfect institution/department match does not grant revoke
        assert!(!can_revoke(&a, "inst-a"));
    }

    #[test]
    fn test_head_revokes_within_institution_only() {
        let a = actor(vec![Role::InstitutionHead], "inst-a", None);
        assert!(can_revoke(&a, "inst-a"));
        assert!(!can_revoke(&a, "inst-b"));
        assert!(can_revoke(&actor(vec![Role::SuperAdmin], "inst-x", None), "inst-b"));
    }

    #[test]
    fn test_definition_mutation_requires_ownership() {
        let head = actor(vec![Role::InstitutionHead], "inst-a", None);
        assert!(can_mutate_definition(&head, Some("inst-a")));
        assert!(!can_mutate_definition(&head, Some("inst-b")));
        // Global definitions belong to the super scope
        assert!(!can_mutate_definition(&head, None));
        assert!(can_mutate_definition(
            &actor(vec![Role::SuperAdmin], "inst-x", None),
            None
        ));
    }

    #[test]
    fn test_only_super_creates_global() {
        assert!(can_create_global(&actor(vec![Role::SuperAdmin], "inst-a", None)));
        assert!(!can_create_global(&actor(
            vec![Role::InstitutionHead],
            "inst-a",
            None
        )));
    }

    #[test]
    fn test_global_definitions_usable_everywhere() {
        assert!(definition_usable_by(None, "inst-a"));
        assert!(definition_usable_by(Some("inst-a"), "inst-a"));
        assert!(!definition_usable_by(Some("inst-b"), "inst-a"));
    }
}
