//! Pure derivation of notifications from backend records.
//!
//! Same records and same date always produce the same id -> content
//! mapping; the signature diff and the dedup maps depend on that.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};

use crate::siga::{SourceSnapshot, TrackingRecord};
use crate::types::{Notification, NotificationKind};
use crate::util::{compare_titles, days_until, month_key, remaining_days};

/// Lectiva-end alerts look this many days ahead
const REPLACEMENT_HORIZON_DAYS: i64 = 62;
/// At or below this many days a missing replacement is red instead of amber
const REPLACEMENT_RED_DAYS: i64 = 30;
const CONTRACT_ENDING_DAYS: i64 = 7;
/// The month digest is only built in the first half of the month
const DIGEST_LAST_DAY: u32 = 15;
const DIGEST_MAX_NAMES: usize = 5;

/// A notification plus its urgency rank (remaining days) when it has one.
struct Ranked {
    notification: Notification,
    remaining: Option<i64>,
}

/// Sort key for remaining days: `-1` (overdue/undated) first, `None` last.
pub fn urgency_rank(remaining: Option<i64>) -> i64 {
    match remaining {
        Some(-1) => i64::MIN,
        Some(days) => days,
        None => i64::MAX,
    }
}

/// Order remaining-day values from most to least urgent.
pub fn sort_by_urgency<T>(items: &mut [T], remaining: impl Fn(&T) -> Option<i64>) {
    items.sort_by_key(|item| urgency_rank(remaining(item)));
}

/// Build the full, sorted notification list for one load cycle.
///
/// `quota_fallback` is used when the statistics endpoint does not report a quota.
pub fn derive_notifications(
    snapshot: &SourceSnapshot,
    today: NaiveDate,
    quota_fallback: Option<i64>,
) -> Vec<Notification> {
    let tracking: Vec<&TrackingRecord> = snapshot
        .tracking
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter(|r| r.is_active())
        .collect();

    let stats = snapshot.stats.unwrap_or_default();
    let quota = stats.quota.or(quota_fallback);
    let active = stats
        .active
        .or_else(|| snapshot.tracking.as_ref().map(|_| tracking.len() as i64));
    let quota_met = matches!((active, quota), (Some(a), Some(q)) if a >= q);

    let mut ranked = urgent_notifications(&tracking, today, quota_met);

    if let (Some(active), Some(quota)) = (active, quota) {
        ranked.push(plain(quota_notification(active, quota, today)));
    }

    if let Some(digest) = contract_end_digest(&tracking, today) {
        ranked.push(plain(digest));
    }

    for record in snapshot.selection_tests.as_deref().unwrap_or(&[]) {
        let pending = record.pending_tests();
        if pending.is_empty() {
            continue;
        }
        ranked.push(plain(Notification::new(
            format!("pending_tests:{}", record.id),
            NotificationKind::Important,
            "Pruebas",
            format!("Pruebas pendientes: {}", record.display_name()),
            format!("Pendiente: {}.", join_labels(&pending)),
            &format!("/seleccion/{}", record.id),
        )));
    }

    for record in snapshot.incomplete.as_deref().unwrap_or(&[]) {
        if !record.is_flagged() {
            continue;
        }
        let description = if record.missing_fields.is_empty() {
            "Faltan datos obligatorios.".to_string()
        } else {
            format!("Faltan: {}.", record.missing_fields.join(", "))
        };
        ranked.push(plain(Notification::new(
            format!("incomplete:{}", record.id),
            NotificationKind::Info,
            "Info",
            format!("Registro incompleto: {}", record.display_name()),
            description,
            &format!("/seguimiento/{}/editar", record.id),
        )));
    }

    ranked.sort_by(compare_ranked);

    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .map(|r| r.notification)
        .filter(|n| seen.insert(n.id.clone()))
        .collect()
}

/// Final order: priority, then urgency within the urgent band, then title.
fn compare_ranked(a: &Ranked, b: &Ranked) -> Ordering {
    a.notification
        .priority
        .cmp(&b.notification.priority)
        .then_with(|| {
            if a.notification.priority == 1 && b.notification.priority == 1 {
                urgency_rank(a.remaining).cmp(&urgency_rank(b.remaining))
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| compare_titles(&a.notification.title, &b.notification.title))
}

fn plain(notification: Notification) -> Ranked {
    Ranked {
        notification,
        remaining: None,
    }
}

fn urgent_notifications(
    tracking: &[&TrackingRecord],
    today: NaiveDate,
    quota_met: bool,
) -> Vec<Ranked> {
    let mut urgent = Vec::new();

    if !quota_met {
        for record in tracking.iter().filter(|r| !r.has_replacement) {
            let days = remaining_days(record.productive_start, today);
            if days != -1 && !(0..=REPLACEMENT_HORIZON_DAYS).contains(&days) {
                continue;
            }
            let red = days == -1 || days <= REPLACEMENT_RED_DAYS;
            let (kind, badge) = if red {
                (NotificationKind::Urgent, "Urgente")
            } else {
                (NotificationKind::UrgentWarning, "Próximo")
            };
            let description = match (days, record.productive_start) {
                (-1, Some(date)) => format!(
                    "Terminó la etapa lectiva el {} y no tiene reemplazo.",
                    date.format("%Y-%m-%d")
                ),
                (-1, None) => {
                    "No tiene fecha de paso a etapa productiva ni reemplazo asignado.".to_string()
                }
                (0, _) => "Pasa hoy a etapa productiva y no tiene reemplazo.".to_string(),
                (days, _) => format!(
                    "Pasa a etapa productiva en {} días y no tiene reemplazo.",
                    days
                ),
            };
            urgent.push(Ranked {
                notification: Notification::new(
                    format!("urgent_replacement:{}", record.id),
                    kind,
                    badge,
                    format!("Sin reemplazo: {}", record.display_name()),
                    description,
                    &format!("/seguimiento/{}", record.id),
                ),
                remaining: Some(days),
            });
        }
    }

    for record in tracking {
        let Some(end) = record.contract_end else {
            continue;
        };
        let days = days_until(end, today);
        if !(0..=CONTRACT_ENDING_DAYS).contains(&days) {
            continue;
        }
        let description = if days == 0 {
            "El contrato termina hoy.".to_string()
        } else {
            format!(
                "El contrato termina en {} días ({}).",
                days,
                end.format("%Y-%m-%d")
            )
        };
        urgent.push(Ranked {
            notification: Notification::new(
                format!("contract_ending:{}", record.id),
                NotificationKind::Urgent,
                "Urgente",
                format!("Contrato por terminar: {}", record.display_name()),
                description,
                &format!("/seguimiento/{}", record.id),
            ),
            remaining: Some(days),
        });
    }

    sort_by_urgency(&mut urgent, |r| r.remaining);
    urgent
}

/// The single quota notification for the month of `today`.
pub fn quota_notification(active: i64, quota: i64, today: NaiveDate) -> Notification {
    let id = format!("quota:{}", month_key(today));
    let description = format!("Aprendices activos: {} de {}.", active, quota);

    match active.cmp(&quota) {
        Ordering::Equal => Notification::new(
            id,
            NotificationKind::QuotaOk,
            "Cupo",
            "Cupo de aprendices completo".to_string(),
            description,
            "/seguimiento",
        ),
        Ordering::Less => Notification::new(
            id,
            NotificationKind::QuotaUnder,
            "Cupo",
            format!("Faltan {} aprendices para completar el cupo", quota - active),
            description,
            "/seguimiento",
        ),
        Ordering::Greater => Notification::new(
            id,
            NotificationKind::QuotaOver,
            "Cupo",
            format!("Cupo excedido en {} aprendices", active - quota),
            description,
            "/seguimiento",
        ),
    }
}

/// Digest of contracts ending this calendar month, days 1-15 only.
pub fn contract_end_digest(tracking: &[&TrackingRecord], today: NaiveDate) -> Option<Notification> {
    if today.day() > DIGEST_LAST_DAY {
        return None;
    }

    let mut ending: Vec<(NaiveDate, String)> = tracking
        .iter()
        .filter_map(|r| {
            r.contract_end
                .filter(|end| end.year() == today.year() && end.month() == today.month())
                .map(|end| (end, r.display_name()))
        })
        .collect();
    if ending.is_empty() {
        return None;
    }
    ending.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| compare_titles(&a.1, &b.1)));

    let total = ending.len();
    let listed: Vec<String> = ending
        .iter()
        .take(DIGEST_MAX_NAMES)
        .map(|(end, name)| {
            let days = days_until(*end, today);
            match days {
                d if d < 0 => format!("{} (finalizado)", name),
                0 => format!("{} (hoy)", name),
                1 => format!("{} (1 día)", name),
                d => format!("{} ({} días)", name, d),
            }
        })
        .collect();

    let mut description = listed.join(", ");
    if total > DIGEST_MAX_NAMES {
        description.push_str(&format!(" y {} más", total - DIGEST_MAX_NAMES));
    }
    description.push('.');

    let title = if total == 1 {
        "1 contrato termina este mes".to_string()
    } else {
        format!("{} contratos terminan este mes", total)
    };

    Some(Notification::new(
        format!("contract_end_month:{}", month_key(today)),
        NotificationKind::Important,
        "Importante",
        title,
        description,
        "/seguimiento?filtro=fin-contrato",
    ))
}

/// "a", "a y b", "a, b y c"
fn join_labels(labels: &[&str]) -> String {
    match labels {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} y {}", init.join(", "), last),
    }
}
