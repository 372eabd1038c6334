//! Task owners and their notification preferences

use serde::{Deserialize, Serialize};

use super::id::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OnAssign,
    OnStart,
    DaysBeforeDue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSetting {
    pub kind: NotificationKind,
    pub enabled: bool,
    /// Only meaningful for `DaysBeforeDue`
    #[serde(default)]
    pub days_before: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notification_settings: Vec<NotificationSetting>,
}

impl User {
    pub fn new(id: UserId, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            name: name.into(),
            notification_settings: Vec::new(),
        }
    }

    /// Adds a notification setting, replacing any existing one of the same kind
    /// (for `DaysBeforeDue`, the same kind and day count).
    pub fn with_setting(mut self, setting: NotificationSetting) -> Self {
        self.notification_settings.retain(|s| {
            s.kind != setting.kind
                || (s.kind == NotificationKind::DaysBeforeDue && s.days_before != setting.days_before)
        });
        self.notification_settings.push(setting);
        self
    }

    /// Returns true if an enabled setting of this kind exists
    pub fn wants(&self, kind: NotificationKind) -> bool {
        self.notification_settings
            .iter()
            .any(|s| s.kind == kind && s.enabled)
    }

    /// Day offsets for which the user wants due-date reminders
    pub fn reminder_days(&self) -> impl Iterator<Item = u32> + '_ {
        self.notification_settings
            .iter()
            .filter(|s| s.enabled && s.kind == NotificationKind::DaysBeforeDue)
            .map(|s| s.days_before)
    }
}
