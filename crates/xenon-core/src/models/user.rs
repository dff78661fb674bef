use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Privilege level of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "gerente")]
    Manager,
    #[serde(rename = "vendedor")]
    Seller,
    #[serde(rename = "operador")]
    Operator,
    #[serde(rename = "visor")]
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "gerente",
            Role::Seller => "vendedor",
            Role::Operator => "operador",
            Role::Viewer => "visor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action that can be granted on a menu section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Edit,
}

/// Menu sections of the admin application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuSection {
    Panel,
    Imports,
    Products,
    Inventory,
    Clients,
    Routes,
    Promotions,
    Reports,
    Statistics,
    Audit,
    Users,
    Settings,
}

impl MenuSection {
    pub const ALL: [MenuSection; 12] = [
        MenuSection::Panel,
        MenuSection::Imports,
        MenuSection::Products,
        MenuSection::Inventory,
        MenuSection::Clients,
        MenuSection::Routes,
        MenuSection::Promotions,
        MenuSection::Reports,
        MenuSection::Statistics,
        MenuSection::Audit,
        MenuSection::Users,
        MenuSection::Settings,
    ];

    /// Key used for this section in grant maps sent by the server.
    pub fn key(&self) -> &'static str {
        match self {
            MenuSection::Panel => "panel",
            MenuSection::Imports => "importaciones",
            MenuSection::Products => "productos",
            MenuSection::Inventory => "inventario",
            MenuSection::Clients => "clientes",
            MenuSection::Routes => "rutas",
            MenuSection::Promotions => "promociones",
            MenuSection::Reports => "reportes",
            MenuSection::Statistics => "estadisticas",
            MenuSection::Audit => "auditoria",
            MenuSection::Users => "usuarios",
            MenuSection::Settings => "configuracion",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key() == key)
    }
}

/// Permissions a user holds in one branch.
///
/// Section keys are kept as strings so sections this client does not know
/// about survive a round trip. A missing key and an empty action set both
/// mean "no access".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct BranchGrant {
    #[serde(rename = "sucursalId", alias = "branchId")]
    pub branch_id: String,
    #[serde(default)]
    pub menus: BTreeMap<String, BTreeSet<Permission>>,
}

impl BranchGrant {
    pub fn actions(&self, section: MenuSection) -> Option<&BTreeSet<Permission>> {
        self.menus.get(section.key())
    }

    pub fn allows(&self, section: MenuSection, action: Permission) -> bool {
        self.actions(section)
            .map(|actions| actions.contains(&action))
            .unwrap_or(false)
    }
}

/// Identity and authorization data of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    pub id: String,
    #[serde(rename = "nombreCompleto", alias = "displayName")]
    pub display_name: String,
    #[serde(rename = "nombreUsuario", alias = "loginName")]
    pub login_name: String,
    pub email: String,
    #[serde(rename = "nivel", alias = "role")]
    pub role: Role,
    #[serde(rename = "imagen", alias = "avatar", default)]
    pub avatar: Option<String>,
    #[serde(rename = "permisosPorSucursal", alias = "branchGrants", default)]
    pub branch_grants: Vec<BranchGrant>,
}

impl UserProfile {
    /// Ids of the branches this user holds a grant for
    pub fn accessible_branches(&self) -> Vec<&str> {
        self.branch_grants.iter().map(|g| g.branch_id.as_str()).collect()
    }

    pub fn has_branch_access(&self, branch_id: &str) -> bool {
        self.branch_grants.iter().any(|g| g.branch_id == branch_id)
    }

    pub fn grant_for(&self, branch_id: &str) -> Option<&BranchGrant> {
        self.branch_grants.iter().find(|g| g.branch_id == branch_id)
    }

    pub fn has_permission(&self, branch_id: &str, section: MenuSection, action: Permission) -> bool {
        self.grant_for(branch_id)
            .map(|grant| grant.allows(section, action))
            .unwrap_or(false)
    }

    pub fn can_view(&self, branch_id: &str, section: MenuSection) -> bool {
        self.has_permission(branch_id, section, Permission::View)
    }

    pub fn can_edit(&self, branch_id: &str, section: MenuSection) -> bool {
        self.has_permission(branch_id, section, Permission::Edit)
    }

    /// True when the section is unreachable in the branch: no grant, no key,
    /// or an empty action set.
    pub fn section_disabled(&self, branch_id: &str, section: MenuSection) -> bool {
        match self.grant_for(branch_id).and_then(|g| g.actions(section)) {
            Some(actions) => actions.is_empty(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> UserProfile {
        let json = r#"{
            "id": "1",
            "nombreCompleto": "Administrador del Sistema",
            "nombreUsuario": "admin",
            "email": "admin@xenon.com",
            "nivel": "gerente",
            "imagen": null,
            "permisosPorSucursal": [
                {
                    "sucursalId": "monterrey",
                    "menus": {
                        "clientes": ["view", "edit"],
                        "productos": ["view"],
                        "reportes": [],
                        "bodega": ["view"]
                    }
                },
                { "sucursalId": "tamaulipas", "menus": { "auditoria": ["edit"] } }
            ]
        }"#;
        serde_json::from_str(json).expect("Failed to parse profile test JSON")
    }

    #[test]
    fn test_parse_profile_wire_names() {
        let profile = sample_profile();
        assert_eq!(profile.display_name, "Administrador del Sistema");
        assert_eq!(profile.login_name, "admin");
        assert_eq!(profile.role, Role::Manager);
        assert!(profile.avatar.is_none());
        assert_eq!(profile.accessible_branches(), vec!["monterrey", "tamaulipas"]);
    }

    #[test]
    fn test_unknown_section_keys_are_kept() {
        let profile = sample_profile();
        let grant = profile.grant_for("monterrey").unwrap();
        assert!(grant.menus.contains_key("bodega"));
        assert_eq!(MenuSection::from_key("bodega"), None);
    }

    #[test]
    fn test_permission_queries() {
        let profile = sample_profile();
        assert!(profile.can_view("monterrey", MenuSection::Clients));
        assert!(profile.can_edit("monterrey", MenuSection::Clients));
        assert!(profile.can_view("monterrey", MenuSection::Products));
        assert!(!profile.can_edit("monterrey", MenuSection::Products));
        assert!(!profile.can_view("san-juan-del-rio", MenuSection::Clients));
    }

    #[test]
    fn test_edit_without_view_is_representable() {
        let profile = sample_profile();
        assert!(profile.can_edit("tamaulipas", MenuSection::Audit));
        assert!(!profile.can_view("tamaulipas", MenuSection::Audit));
        assert!(!profile.section_disabled("tamaulipas", MenuSection::Audit));
    }

    #[test]
    fn test_section_disabled() {
        let profile = sample_profile();
        // empty action set
        assert!(profile.section_disabled("monterrey", MenuSection::Reports));
        // missing key
        assert!(profile.section_disabled("monterrey", MenuSection::Users));
        // missing branch
        assert!(profile.section_disabled("san-juan-del-rio", MenuSection::Panel));
        assert!(!profile.section_disabled("monterrey", MenuSection::Clients));
    }

    #[test]
    fn test_menu_section_keys_round_trip() {
        for section in MenuSection::ALL {
            assert_eq!(MenuSection::from_key(section.key()), Some(section));
        }
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Admin.to_string(), "admin");
        assert_eq!(Role::Viewer.to_string(), "visor");
    }
}
