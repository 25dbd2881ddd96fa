//! Role-based access control.
//!
//! Every handler asks [`authorize`] before touching a record, and every list
//! query is narrowed with the matching `scope_*` helper, so list and detail
//! fetches can never disagree about what a user may see.

use std::{fmt, str::FromStr};

use diesel::{pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Checksheet, ChecksheetResult};
use crate::schema::{checksheet_results, checksheets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Supervisor,
    Inspector,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Supervisor, Role::Inspector, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Supervisor => "SUPERVISOR",
            Role::Inspector => "INSPECTOR",
            Role::Viewer => "VIEWER",
        }
    }

    fn is_read_only(&self) -> bool {
        matches!(self, Role::Viewer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown role '{value}'"))
    }
}

/// The identity a request acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    pub organization_id: Option<Uuid>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn shares_organization(&self, organization_id: Option<Uuid>) -> bool {
        matches!(
            (self.organization_id, organization_id),
            (Some(mine), Some(theirs)) if mine == theirs
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewChecksheet,
    CreateChecksheet,
    UpdateChecksheet,
    ChangeChecksheetStatus,
    DeleteChecksheet,
    ExecuteChecksheet,
    ViewResult,
    UpdateResult,
    DeleteResult,
    CloneTemplate,
    ManageTemplates,
    GenerateWithAi,
    UploadAsset,
    ManageUsers,
    ViewReports,
}

/// The ownership facts of the record an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    None,
    Checksheet {
        creator_id: Uuid,
        organization_id: Option<Uuid>,
    },
    Result {
        inspector_id: Uuid,
        organization_id: Option<Uuid>,
    },
}

impl Resource {
    pub fn checksheet(checksheet: &Checksheet) -> Self {
        Resource::Checksheet {
            creator_id: checksheet.creator_id,
            organization_id: checksheet.organization_id,
        }
    }

    /// `checksheet_organization` is the organization of the checksheet the
    /// result was executed against.
    pub fn result(result: &ChecksheetResult, checksheet_organization: Option<Uuid>) -> Self {
        Resource::Result {
            inspector_id: result.inspector_id,
            organization_id: checksheet_organization,
        }
    }
}

pub fn can(principal: &Principal, action: Action, resource: &Resource) -> bool {
    if principal.is_admin() {
        return true;
    }

    let visible = match *resource {
        Resource::None => true,
        Resource::Checksheet {
            creator_id,
            organization_id,
        } => creator_id == principal.user_id || principal.shares_organization(organization_id),
        Resource::Result {
            inspector_id,
            organization_id,
        } => inspector_id == principal.user_id || principal.shares_organization(organization_id),
    };
    let owns = match *resource {
        Resource::None => false,
        Resource::Checksheet { creator_id, .. } => creator_id == principal.user_id,
        Resource::Result { inspector_id, .. } => inspector_id == principal.user_id,
    };
    let writer = !principal.role.is_read_only();

    match action {
        Action::ViewChecksheet | Action::ViewResult => visible,
        Action::ViewReports => true,
        Action::CreateChecksheet
        | Action::CloneTemplate
        | Action::GenerateWithAi
        | Action::UploadAsset => writer,
        Action::UpdateChecksheet => owns || (principal.role == Role::Supervisor && visible),
        Action::ChangeChecksheetStatus | Action::DeleteChecksheet => owns,
        Action::ExecuteChecksheet => writer && visible,
        Action::UpdateResult | Action::DeleteResult => owns,
        Action::ManageTemplates | Action::ManageUsers => false,
    }
}

/// Fails with 403 when [`can`] denies the action.
pub fn authorize(principal: &Principal, action: Action, resource: &Resource) -> AppResult<()> {
    if can(principal, action, resource) {
        Ok(())
    } else {
        tracing::debug!(
            user_id = %principal.user_id,
            role = %principal.role,
            ?action,
            "access denied"
        );
        Err(AppError::forbidden())
    }
}

/// Narrows a checksheet query to the rows `principal` may view.
pub fn scope_checksheets<'a>(
    query: checksheets::BoxedQuery<'a, Pg>,
    principal: &Principal,
) -> checksheets::BoxedQuery<'a, Pg> {
    match (principal.role, principal.organization_id) {
        (Role::Admin, _) => query,
        (_, Some(organization_id)) => query.filter(
            checksheets::creator_id
                .eq(principal.user_id)
                .or(checksheets::organization_id.eq(organization_id)),
        ),
        (_, None) => query.filter(checksheets::creator_id.eq(principal.user_id)),
    }
}

/// Narrows a result query to the rows `principal` may view.
pub fn scope_results<'a>(
    query: checksheet_results::BoxedQuery<'a, Pg>,
    principal: &Principal,
) -> checksheet_results::BoxedQuery<'a, Pg> {
    match (principal.role, principal.organization_id) {
        (Role::Admin, _) => query,
        (_, Some(organization_id)) => query.filter(
            checksheet_results::inspector_id
                .eq(principal.user_id)
                .or(checksheet_results::checksheet_id.eq_any(
                    checksheets::table
                        .filter(checksheets::organization_id.eq(organization_id))
                        .select(checksheets::id),
                )),
        ),
        (_, None) => query.filter(checksheet_results::inspector_id.eq(principal.user_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role, organization_id: Option<Uuid>) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            role,
            organization_id,
        }
    }

    fn sheet(creator_id: Uuid, organization_id: Option<Uuid>) -> Resource {
        Resource::Checksheet {
            creator_id,
            organization_id,
        }
    }

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" VIEWER ".parse::<Role>(), Ok(Role::Viewer));
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn admin_sees_everything() {
        let admin = principal(Role::Admin, None);
        let other = sheet(Uuid::new_v4(), Some(Uuid::new_v4()));
        assert!(can(&admin, Action::ViewChecksheet, &other));
        assert!(can(&admin, Action::DeleteChecksheet, &other));
        assert!(can(&admin, Action::ManageUsers, &Resource::None));
    }

    #[test]
    fn non_admin_visibility_requires_creator_or_shared_organization() {
        let org = Uuid::new_v4();
        for role in [Role::Supervisor, Role::Inspector, Role::Viewer] {
            let user = principal(role, Some(org));
            assert!(can(&user, Action::ViewChecksheet, &sheet(user.user_id, None)));
            assert!(can(&user, Action::ViewChecksheet, &sheet(Uuid::new_v4(), Some(org))));
            assert!(!can(
                &user,
                Action::ViewChecksheet,
                &sheet(Uuid::new_v4(), Some(Uuid::new_v4()))
            ));
            assert!(!can(&user, Action::ViewChecksheet, &sheet(Uuid::new_v4(), None)));
        }
    }

    #[test]
    fn missing_organization_never_matches() {
        let user = principal(Role::Inspector, None);
        assert!(!can(&user, Action::ViewChecksheet, &sheet(Uuid::new_v4(), None)));
    }

    #[test]
    fn viewers_are_read_only() {
        let org = Uuid::new_v4();
        let viewer = principal(Role::Viewer, Some(org));
        let shared = sheet(Uuid::new_v4(), Some(org));
        assert!(can(&viewer, Action::ViewChecksheet, &shared));
        assert!(!can(&viewer, Action::ExecuteChecksheet, &shared));
        assert!(!can(&viewer, Action::CreateChecksheet, &Resource::None));
        assert!(!can(&viewer, Action::UploadAsset, &Resource::None));
        assert!(!can(&viewer, Action::GenerateWithAi, &Resource::None));
    }

    #[test]
    fn supervisors_edit_visible_checksheets_but_only_owners_change_status() {
        let org = Uuid::new_v4();
        let supervisor = principal(Role::Supervisor, Some(org));
        let shared = sheet(Uuid::new_v4(), Some(org));
        assert!(can(&supervisor, Action::UpdateChecksheet, &shared));
        assert!(!can(&supervisor, Action::ChangeChecksheetStatus, &shared));
        assert!(!can(&supervisor, Action::DeleteChecksheet, &shared));

        let inspector = principal(Role::Inspector, Some(org));
        assert!(!can(&inspector, Action::UpdateChecksheet, &shared));
        let own = sheet(inspector.user_id, Some(org));
        assert!(can(&inspector, Action::UpdateChecksheet, &own));
        assert!(can(&inspector, Action::ChangeChecksheetStatus, &own));
    }

    #[test]
    fn results_are_writable_by_their_inspector_only() {
        let org = Uuid::new_v4();
        let inspector = principal(Role::Inspector, Some(org));
        let colleague = principal(Role::Supervisor, Some(org));
        let result = Resource::Result {
            inspector_id: inspector.user_id,
            organization_id: Some(org),
        };
        assert!(can(&colleague, Action::ViewResult, &result));
        assert!(!can(&colleague, Action::DeleteResult, &result));
        assert!(can(&inspector, Action::UpdateResult, &result));
    }

    #[test]
    fn administration_is_admin_only() {
        for role in [Role::Supervisor, Role::Inspector, Role::Viewer] {
            let user = principal(role, Some(Uuid::new_v4()));
            assert!(!can(&user, Action::ManageUsers, &Resource::None));
            assert!(!can(&user, Action::ManageTemplates, &Resource::None));
        }
    }

    #[test]
    fn authorize_maps_denial_to_forbidden() {
        let viewer = principal(Role::Viewer, None);
        let err = authorize(&viewer, Action::CreateChecksheet, &Resource::None).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
    }
}
