use serde::{Deserialize, Serialize};

/// Records without a role get the restricted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRole {
    SuperAdmin,
    #[default]
    SubAdmin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminPermission {
    ViewUsers,
    ApproveUsers,
    ViewRevenue,
    ViewRevenueDetails,
    SendNotification,
    EditUserSettings,
    ManageUser,
    ChatUser,
    ManagePackages,
    ManagePtPackages,
    AddPt,
    ViewUserList,
    ManagePromo,
    ManageVoucher,
    ViewSchedule,
    ManageAppInterface,
    ManageBookings,
    CreateQr,
    /// Permission ids this build doesn't know about.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminSettings {
    pub show_floating_menu: bool,
    pub show_popup_noti: bool,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self { show_floating_menu: true, show_popup_noti: true }
    }
}

/// One administrator as stored in the remote `admins` collection.
///
/// Field names follow the remote schema, so `face_template` travels as
/// `faceData`. Passwords are plaintext and compared verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRecord {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(rename = "faceData", default, skip_serializing_if = "Option::is_none")]
    pub face_template: Option<String>,
    #[serde(default)]
    pub role: AdminRole,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<AdminPermission>,
    #[serde(default)]
    pub settings: AdminSettings,
}

impl AdminRecord {
    /// Account seeded into an empty roster so the console is never locked out.
    pub fn default_admin() -> Self {
        Self {
            username: "admin".to_string(),
            password: Some("123456".to_string()),
            phone: Some("0909000000".to_string()),
            avatar: None,
            face_template: None,
            role: AdminRole::SuperAdmin,
            name: "Super Admin".to_string(),
            permissions: Vec::new(),
            settings: AdminSettings::default(),
        }
    }

    /// The stored face template, if there is a non-empty one.
    pub fn stored_template(&self) -> Option<&str> {
        self.face_template.as_deref().filter(|t| !t.is_empty())
    }
}
