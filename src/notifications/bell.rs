//! Bell view: unread badge, dropdown preview and the grouped full-list dialog.

use crate::types::{Notification, NotificationKind};

/// The dropdown shows at most this many notifications
pub const PREVIEW_LIMIT: usize = 8;

/// Which bell surfaces are open. Both can be open at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BellState {
    pub dropdown_open: bool,
    pub dialog_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Urgent,
    Quota,
    Important,
    Info,
}

impl Bucket {
    pub fn for_kind(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Urgent | NotificationKind::UrgentWarning => Bucket::Urgent,
            NotificationKind::QuotaOk
            | NotificationKind::QuotaUnder
            | NotificationKind::QuotaOver => Bucket::Quota,
            NotificationKind::Important => Bucket::Important,
            NotificationKind::Info => Bucket::Info,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Bucket::Urgent => "Urgentes",
            Bucket::Quota => "Cupo",
            Bucket::Important => "Importantes y pruebas pendientes",
            Bucket::Info => "Información",
        }
    }
}

/// The dialog's four fixed groups, each keeping list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouped {
    pub urgent: Vec<Notification>,
    pub quota: Vec<Notification>,
    pub important: Vec<Notification>,
    pub info: Vec<Notification>,
}

impl Grouped {
    pub fn buckets(&self) -> [(Bucket, &[Notification]); 4] {
        [
            (Bucket::Urgent, self.urgent.as_slice()),
            (Bucket::Quota, self.quota.as_slice()),
            (Bucket::Important, self.important.as_slice()),
            (Bucket::Info, self.info.as_slice()),
        ]
    }
}

pub fn group(notifications: &[Notification]) -> Grouped {
    let mut grouped = Grouped::default();
    for n in notifications {
        let target = match Bucket::for_kind(n.kind) {
            Bucket::Urgent => &mut grouped.urgent,
            Bucket::Quota => &mut grouped.quota,
            Bucket::Important => &mut grouped.important,
            Bucket::Info => &mut grouped.info,
        };
        target.push(n.clone());
    }
    grouped
}

pub fn preview(notifications: &[Notification]) -> &[Notification] {
    &notifications[..notifications.len().min(PREVIEW_LIMIT)]
}

pub fn render_badge(count: usize) -> String {
    match count {
        0 => "Notificaciones".to_string(),
        1..=99 => format!("Notificaciones ({})", count),
        _ => "Notificaciones (99+)".to_string(),
    }
}

fn render_line(n: &Notification) -> String {
    format!("  [{}] {}\n      {}\n      -> {}\n", n.badge, n.title, n.description, n.href)
}

pub fn render_dropdown(notifications: &[Notification], error: Option<&str>) -> String {
    let mut out = format!("{}\n", render_badge(notifications.len()));
    if let Some(error) = error {
        out.push_str(&format!("  ! {}\n", error));
    }
    if notifications.is_empty() {
        out.push_str("  Sin notificaciones pendientes.\n");
        return out;
    }
    for n in preview(notifications) {
        out.push_str(&render_line(n));
    }
    if notifications.len() > PREVIEW_LIMIT {
        out.push_str(&format!(
            "  ... y {} más. Abre la lista completa para verlas.\n",
            notifications.len() - PREVIEW_LIMIT
        ));
    }
    out
}

pub fn render_dialog(notifications: &[Notification], error: Option<&str>) -> String {
    let mut out = format!("{}\n", render_badge(notifications.len()));
    if let Some(error) = error {
        out.push_str(&format!("! {}\n", error));
    }
    let grouped = group(notifications);
    for (bucket, items) in grouped.buckets() {
        out.push_str(&format!("\n{} ({})\n", bucket.label(), items.len()));
        if items.is_empty() {
            out.push_str("  -\n");
        }
        for n in items {
            out.push_str(&render_line(n));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: &str, kind: NotificationKind) -> Notification {
        Notification::new(
            id.to_string(),
            kind,
            "B",
            format!("Título {}", id),
            "Detalle".to_string(),
            "/seguimiento",
        )
    }

    #[test]
    fn test_group_into_four_buckets() {
        let list = vec![
            n("u1", NotificationKind::Urgent),
            n("u2", NotificationKind::UrgentWarning),
            n("q", NotificationKind::QuotaOver),
            n("p", NotificationKind::Important),
            n("i", NotificationKind::Info),
        ];
        let grouped = group(&list);
        assert_eq!(grouped.urgent.len(), 2);
        assert_eq!(grouped.quota.len(), 1);
        assert_eq!(grouped.important.len(), 1);
        assert_eq!(grouped.info.len(), 1);
    }

    #[test]
    fn test_preview_limit() {
        let list: Vec<Notification> = (0..12)
            .map(|i| n(&format!("i{}", i), NotificationKind::Info))
            .collect();
        assert_eq!(preview(&list).len(), PREVIEW_LIMIT);
        assert_eq!(preview(&list[..3]).len(), 3);

        let text = render_dropdown(&list, None);
        assert!(text.contains("y 4 más"));
        assert!(text.starts_with("Notificaciones (12)"));
    }

    #[test]
    fn test_render_dialog_shows_error_and_empty_groups() {
        let text = render_dialog(&[], Some("No se pudieron cargar las notificaciones."));
        assert!(text.contains("! No se pudieron"));
        assert!(text.contains("Urgentes (0)"));
        assert!(text.contains("Información (0)"));
    }

    #[test]
    fn test_badge_caps() {
        assert_eq!(render_badge(0), "Notificaciones");
        assert_eq!(render_badge(150), "Notificaciones (99+)");
    }
}
