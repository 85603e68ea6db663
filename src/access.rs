//! Role-scoped access policy.
//!
//! Every component asks the same two questions:
//! - `scope_query(actor, kind)`: which rows of a resource kind may this actor list?
//! - `can_view(actor, resource)`: may this actor see this one row?
//!
//! Both answers come from a single [`Scope`] per (role, kind), so list queries
//! and single-row lookups cannot drift apart. Out-of-scope rows are reported as
//! not found by callers.
//!
//! Rules:
//! 1. Patients: physicians see active patients assigned to them; everyone else
//!    sees all active patients.
//! 2. Visits: admins see all; physicians see visits of patients assigned to
//!    them; other roles see visits they are the clinician on.
//! 3. Assessments and files: admins and non-physician staff see all;
//!    physicians see records of patients assigned to them.
//! 4. Threads: participants only, for every role.

use uuid::Uuid;

use crate::models::Role;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// The authenticated caller, as far as authorization cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Patient,
    Visit,
    Assessment,
    File,
    Thread,
}

/// Row-visibility predicate. Repositories translate it into SQL; `admits`
/// evaluates it in memory against a fetched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every row.
    All,
    /// Patients with `is_active = 1` (child records: unrestricted).
    ActivePatients,
    /// Active patients whose `assigned_physician` is the given user.
    AssignedPatients(Uuid),
    /// Child records whose patient's `assigned_physician` is the given user.
    PatientsUnderCare(Uuid),
    /// Child records whose clinician is the given user.
    OwnRecords(Uuid),
    /// Threads the given user participates in.
    Participant(Uuid),
}

/// What the policy needs to know about a single row.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Patient {
        assigned_physician: Option<Uuid>,
        is_active: bool,
    },
    /// A visit, assessment or file. `clinician` is `None` for files.
    Record {
        patient_physician: Option<Uuid>,
        clinician: Option<Uuid>,
    },
    Thread { participants: &'a [Uuid] },
}

// ═══════════════════════════════════════════════════════════
// Policy
// ═══════════════════════════════════════════════════════════

pub fn scope_query(actor: &Actor, kind: ResourceKind) -> Scope {
    match (kind, actor.role) {
        (ResourceKind::Patient, Role::Physician) => Scope::AssignedPatients(actor.id),
        (ResourceKind::Patient, _) => Scope::ActivePatients,

        (ResourceKind::Visit, Role::Admin) => Scope::All,
        (ResourceKind::Visit, Role::Physician) => Scope::PatientsUnderCare(actor.id),
        (ResourceKind::Visit, _) => Scope::OwnRecords(actor.id),

        (ResourceKind::Assessment | ResourceKind::File, Role::Physician) => {
            Scope::PatientsUnderCare(actor.id)
        }
        (ResourceKind::Assessment | ResourceKind::File, _) => Scope::All,

        (ResourceKind::Thread, _) => Scope::Participant(actor.id),
    }
}

pub fn can_view(actor: &Actor, kind: ResourceKind, resource: Resource<'_>) -> bool {
    scope_query(actor, kind).admits(resource)
}

impl Scope {
    pub fn admits(&self, resource: Resource<'_>) -> bool {
        match (*self, resource) {
            (Scope::All, _) => true,

            (Scope::ActivePatients, Resource::Patient { is_active, .. }) => is_active,
            (Scope::ActivePatients, Resource::Record { .. }) => true,

            (
                Scope::AssignedPatients(user),
                Resource::Patient {
                    assigned_physician,
                    is_active,
                },
            ) => is_active && assigned_physician == Some(user),
            (Scope::AssignedPatients(user), Resource::Record { patient_physician, .. })
            | (Scope::PatientsUnderCare(user), Resource::Record { patient_physician, .. }) => {
                patient_physician == Some(user)
            }

            (Scope::OwnRecords(user), Resource::Record { clinician, .. }) => {
                clinician == Some(user)
            }

            (Scope::Participant(user), Resource::Thread { participants }) => {
                participants.contains(&user)
            }

            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Mutation policy
// ═══════════════════════════════════════════════════════════

/// Opt-in tightening of mutation rules. Both flags default to off, which
/// keeps mutation gated on authentication only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Only admins, the creator, or the assigned physician may update or delete a patient.
    pub enforce_patient_ownership: bool,
    /// Only admins may add or remove user groups.
    pub admin_only_role_assignment: bool,
}

impl AccessPolicy {
    pub fn can_mutate_patient(
        &self,
        actor: &Actor,
        created_by: Option<Uuid>,
        assigned_physician: Option<Uuid>,
    ) -> bool {
        if !self.enforce_patient_ownership || actor.is_admin() {
            return true;
        }
        created_by == Some(actor.id) || assigned_physician == Some(actor.id)
    }

    pub fn can_assign_roles(&self, actor: &Actor) -> bool {
        !self.admin_only_role_assignment || actor.is_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> Actor {
        Actor::new(Uuid::new_v4(), role)
    }

    #[test]
    fn physician_sees_only_assigned_active_patients() {
        let doc = actor(Role::Physician);
        let mine = Resource::Patient {
            assigned_physician: Some(doc.id),
            is_active: true,
        };
        let other = Resource::Patient {
            assigned_physician: Some(Uuid::new_v4()),
            is_active: true,
        };
        let inactive = Resource::Patient {
            assigned_physician: Some(doc.id),
            is_active: false,
        };
        assert!(can_view(&doc, ResourceKind::Patient, mine));
        assert!(!can_view(&doc, ResourceKind::Patient, other));
        assert!(!can_view(&doc, ResourceKind::Patient, inactive));
    }

    #[test]
    fn staff_and_admin_see_all_active_patients() {
        for role in [Role::Admin, Role::Nurse, Role::SocialWorker] {
            let a = actor(role);
            let unassigned = Resource::Patient {
                assigned_physician: None,
                is_active: true,
            };
            let inactive = Resource::Patient {
                assigned_physician: None,
                is_active: false,
            };
            assert!(can_view(&a, ResourceKind::Patient, unassigned));
            assert!(!can_view(&a, ResourceKind::Patient, inactive));
        }
    }

    #[test]
    fn visit_scope_by_role() {
        let nurse = actor(Role::Nurse);
        let doc = actor(Role::Physician);
        let admin = actor(Role::Admin);
        let visit = Resource::Record {
            patient_physician: Some(doc.id),
            clinician: Some(nurse.id),
        };
        let foreign = Resource::Record {
            patient_physician: None,
            clinician: Some(Uuid::new_v4()),
        };

        assert!(can_view(&nurse, ResourceKind::Visit, visit));
        assert!(!can_view(&nurse, ResourceKind::Visit, foreign));
        assert!(can_view(&doc, ResourceKind::Visit, visit));
        assert!(!can_view(&doc, ResourceKind::Visit, foreign));
        assert!(can_view(&admin, ResourceKind::Visit, foreign));
    }

    #[test]
    fn assessments_open_to_staff_but_scoped_for_physicians() {
        let therapist = actor(Role::PhysicalTherapist);
        let doc = actor(Role::Physician);
        let record = Resource::Record {
            patient_physician: None,
            clinician: Some(Uuid::new_v4()),
        };
        assert!(can_view(&therapist, ResourceKind::Assessment, record));
        assert!(!can_view(&doc, ResourceKind::Assessment, record));
        assert!(!can_view(&doc, ResourceKind::File, record));
    }

    #[test]
    fn threads_require_participation_even_for_admin() {
        let admin = actor(Role::Admin);
        let member = actor(Role::Nurse);
        let participants = [member.id];
        let thread = Resource::Thread {
            participants: &participants,
        };
        assert!(can_view(&member, ResourceKind::Thread, thread));
        assert!(!can_view(&admin, ResourceKind::Thread, thread));
    }

    #[test]
    fn default_policy_allows_any_mutation() {
        let policy = AccessPolicy::default();
        let nurse = actor(Role::Nurse);
        assert!(policy.can_mutate_patient(&nurse, None, None));
        assert!(policy.can_assign_roles(&nurse));
    }

    #[test]
    fn strict_policy_requires_ownership() {
        let policy = AccessPolicy {
            enforce_patient_ownership: true,
            admin_only_role_assignment: true,
        };
        let nurse = actor(Role::Nurse);
        let admin = actor(Role::Admin);
        assert!(!policy.can_mutate_patient(&nurse, None, None));
        assert!(policy.can_mutate_patient(&nurse, Some(nurse.id), None));
        assert!(policy.can_mutate_patient(&admin, None, None));
        assert!(!policy.can_assign_roles(&nurse));
        assert!(policy.can_assign_roles(&admin));
    }
}
