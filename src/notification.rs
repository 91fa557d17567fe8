//! Toast delivery and in-app navigation sinks
//!
//! The aggregator decides what to announce; these sinks only show it.
//! Desktop delivery is best-effort via `notify-send` and never fails the caller.

use crate::types::{Notification, NotificationKind};

/// Desktop urgency of a toast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastUrgency {
    Low,
    Normal,
    Critical,
}

impl ToastUrgency {
    pub fn for_kind(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Urgent => ToastUrgency::Critical,
            NotificationKind::UrgentWarning
            | NotificationKind::QuotaUnder
            | NotificationKind::QuotaOver
            | NotificationKind::Important => ToastUrgency::Normal,
            NotificationKind::QuotaOk | NotificationKind::Info => ToastUrgency::Low,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ToastUrgency::Low => "low",
            ToastUrgency::Normal => "normal",
            ToastUrgency::Critical => "critical",
        }
    }
}

/// A pop-up message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub body: String,
    pub urgency: ToastUrgency,
    /// Notification this toast announces, `None` for aggregate summaries
    pub notification_id: Option<String>,
}

impl Toast {
    /// Toast announcing a single notification
    pub fn for_notification(notification: &Notification) -> Self {
        Self {
            title: notification.title.clone(),
            body: notification.description.clone(),
            urgency: ToastUrgency::for_kind(notification.kind),
            notification_id: Some(notification.id.clone()),
        }
    }

    /// Aggregate toast; urgency follows the most urgent item it covers
    pub fn summary(title: String, body: String, top: Option<&Notification>) -> Self {
        Self {
            title,
            body,
            urgency: top
                .map(|n| ToastUrgency::for_kind(n.kind))
                .unwrap_or(ToastUrgency::Normal),
            notification_id: None,
        }
    }
}

/// Shows toasts to the user
pub trait Toaster: Send + Sync {
    fn show(&self, toast: &Toast);
}

/// Writes toasts to the log
pub struct LogToaster;

impl Toaster for LogToaster {
    fn show(&self, toast: &Toast) {
        log::info!("[{}] {}: {}", toast.urgency.as_str(), toast.title, toast.body);
    }
}

/// Logs, then fires a desktop notification via `notify-send`.
/// Silently skipped if notify-send is not installed or no display is available.
pub struct DesktopToaster {
    app_name: String,
}

impl DesktopToaster {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
        }
    }
}

impl Toaster for DesktopToaster {
    fn show(&self, toast: &Toast) {
        LogToaster.show(toast);

        let body = truncate(&toast.body, 200);
        if let Err(e) = std::process::Command::new("notify-send")
            .args([
                "--urgency",
                toast.urgency.as_str(),
                "--app-name",
                self.app_name.as_str(),
                toast.title.as_str(),
                body.as_str(),
            ])
            .spawn()
        {
            log::debug!("notify-send unavailable: {}", e);
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Moves the user to an in-app location
pub trait Navigator: Send + Sync {
    fn navigate(&self, href: &str);
}

/// Only records the navigation in the log
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, href: &str) {
        log::info!("Navigate to {}", href);
    }
}

/// Opens `<app_url><href>` in the default browser
pub struct BrowserNavigator {
    app_url: String,
}

impl BrowserNavigator {
    pub fn new(app_url: &str) -> Self {
        Self {
            app_url: app_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn target(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        format!("{}/{}", self.app_url, href.trim_start_matches('/'))
    }
}

impl Navigator for BrowserNavigator {
    fn navigate(&self, href: &str) {
        let target = self.target(href);
        if let Err(e) = open::that(&target) {
            log::warn!("Failed to open {}: {}", target, e);
        }
    }
}
