use serde::{Deserialize, Serialize};

/// Configuration stored in ~/.siga/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the SIGA REST backend, e.g. `https://siga.example.org/api/`
    pub api_base_url: String,
    /// Base URL of the web app, used to open notification targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_url: Option<String>,
    /// IANA timezone used for day boundaries and the 08/16 slots
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Program-wide apprentice quota, used when the statistics endpoint omits it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_max: Option<i64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Mirror toasts to the desktop via notify-send
    #[serde(default)]
    pub desktop_toasts: bool,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

fn default_timezone() -> String {
    "America/Bogota".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn new(api_base_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.to_string(),
            app_url: None,
            timezone: default_timezone(),
            quota_max: None,
            request_timeout_secs: default_request_timeout_secs(),
            desktop_toasts: false,
            endpoints: EndpointsConfig::default(),
        }
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<chrono_tz::Tz, crate::error::NotifyError> {
        self.timezone.parse().map_err(|_| {
            crate::error::NotifyError::Configuration(format!(
                "Invalid timezone: {}",
                self.timezone
            ))
        })
    }
}

/// Paths of the four consumed endpoints, relative to `apiBaseUrl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsConfig {
    #[serde(default = "default_tracking_path")]
    pub tracking: String,
    #[serde(default = "default_stats_path")]
    pub stats: String,
    #[serde(default = "default_incomplete_path")]
    pub incomplete: String,
    #[serde(default = "default_selection_tests_path")]
    pub selection_tests: String,
}

fn default_tracking_path() -> String {
    "seguimiento".to_string()
}

fn default_stats_path() -> String {
    "seguimiento/estadisticas".to_string()
}

fn default_incomplete_path() -> String {
    "seguimiento/incompletos".to_string()
}

fn default_selection_tests_path() -> String {
    "seleccion/pruebas".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            tracking: default_tracking_path(),
            stats: default_stats_path(),
            incomplete: default_incomplete_path(),
            selection_tests: default_selection_tests_path(),
        }
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Severity/category of a derived notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Urgent,
    UrgentWarning,
    QuotaOk,
    QuotaUnder,
    QuotaOver,
    Important,
    Info,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Urgent => "urgent",
            NotificationKind::UrgentWarning => "urgent_warning",
            NotificationKind::QuotaOk => "quota_ok",
            NotificationKind::QuotaUnder => "quota_under",
            NotificationKind::QuotaOver => "quota_over",
            NotificationKind::Important => "important",
            NotificationKind::Info => "info",
        }
    }

    /// 1 = urgent, 2 = important/quota, 3 = info
    pub fn priority(&self) -> u8 {
        match self {
            NotificationKind::Urgent | NotificationKind::UrgentWarning => 1,
            NotificationKind::QuotaOk
            | NotificationKind::QuotaUnder
            | NotificationKind::QuotaOver
            | NotificationKind::Important => 2,
            NotificationKind::Info => 3,
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            NotificationKind::QuotaOk | NotificationKind::QuotaUnder | NotificationKind::QuotaOver
        )
    }
}

/// One actionable alert, recomputed on every load cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub badge: String,
    pub title: String,
    pub description: String,
    pub href: String,
    pub priority: u8,
}

impl Notification {
    pub fn new(
        id: String,
        kind: NotificationKind,
        badge: &str,
        title: String,
        description: String,
        href: &str,
    ) -> Self {
        Self {
            id,
            kind,
            badge: badge.to_string(),
            title,
            description,
            href: href.to_string(),
            priority: kind.priority(),
        }
    }

    /// Content signature used to tell unchanged notifications from changed ones.
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.kind.as_str(),
            self.badge,
            self.title,
            self.description,
            self.href
        )
    }
}

// =============================================================================
// Load options
// =============================================================================

/// Why a load was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadReason {
    Init,
    Poll,
    Ui,
    Schedule,
}

/// One of the two daily push slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    #[serde(rename = "08")]
    Morning,
    #[serde(rename = "16")]
    Afternoon,
}

impl Slot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Morning => "08",
            Slot::Afternoon => "16",
        }
    }

    pub fn hour(&self) -> u32 {
        match self {
            Slot::Morning => 8,
            Slot::Afternoon => 16,
        }
    }

    pub fn from_hour(hour: u32) -> Option<Slot> {
        match hour {
            8 => Some(Slot::Morning),
            16 => Some(Slot::Afternoon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub force: bool,
    pub reason: LoadReason,
    pub slot: Option<Slot>,
}

impl LoadOptions {
    pub fn init() -> Self {
        Self {
            force: true,
            reason: LoadReason::Init,
            slot: None,
        }
    }

    pub fn poll() -> Self {
        Self {
            force: false,
            reason: LoadReason::Poll,
            slot: None,
        }
    }

    pub fn ui() -> Self {
        Self {
            force: true,
            reason: LoadReason::Ui,
            slot: None,
        }
    }

    pub fn schedule(slot: Slot) -> Self {
        Self {
            force: true,
            reason: LoadReason::Schedule,
            slot: Some(slot),
        }
    }
}
