use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use shopledger_core::{AggregateId, OrganizationId, UserId};
use shopledger_events::EventEnvelope;
use shopledger_expenses::{ApproverAction, ExpenseEvent, PlannedStep};
use shopledger_inventory::InventoryEvent;
use shopledger_organization::MemberRole;

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_scope, expenses, stock};
use crate::streams;

/// Who a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    User { user_id: UserId },
    Role { role: MemberRole },
}

impl Recipient {
    fn matches(&self, user: UserId, roles: &[MemberRole]) -> bool {
        match self {
            Recipient::User { user_id } => *user_id == user,
            Recipient::Role { role } => roles.contains(role),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequested,
    ExpenseApproved,
    ExpenseRejected,
    LowStock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// The id of the event that raised it.
    pub notification_id: Uuid,
    pub kind: NotificationKind,
    pub recipients: Vec<Recipient>,
    pub message: String,
    /// Aggregate the notification is about (expense or stock item).
    pub subject_id: AggregateId,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_for(&self, user: UserId, roles: &[MemberRole]) -> bool {
        self.recipients.iter().any(|r| r.matches(user, roles))
    }
}

/// Notification as seen by one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: Notification,
    pub read: bool,
}

/// Queryable notifications, raised by expense approval and stock events.
///
/// Keyed by the triggering event id, so redelivery never duplicates one.
///
/// Read marks are user state, not derived from events. They live beside the
/// rebuildable notifications and `reset` leaves them alone; event ids are
/// stable, so a replayed notification finds its marks again.
#[derive(Debug, Default)]
pub struct NotificationsProjection {
    inner: RwLock<HashMap<OrganizationId, Vec<Notification>>>,
    read_marks: RwLock<HashMap<(OrganizationId, Uuid), BTreeSet<UserId>>>,
    cursors: StreamCursors,
}

impl NotificationsProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications addressed to `user` or any of `roles`, newest first.
    pub fn list_for(
        &self,
        organization_id: OrganizationId,
        user: UserId,
        roles: &[MemberRole],
        unread_only: bool,
    ) -> Vec<NotificationView> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };
        let Ok(marks) = self.read_marks.read() else {
            return vec![];
        };
        let mut views: Vec<_> = map
            .get(&organization_id)
            .into_iter()
            .flatten()
            .filter(|n| n.is_for(user, roles))
            .map(|n| NotificationView {
                read: marks
                    .get(&(organization_id, n.notification_id))
                    .is_some_and(|readers| readers.contains(&user)),
                notification: n.clone(),
            })
            .filter(|v| !unread_only || !v.read)
            .collect();
        views.sort_by(|a, b| b.notification.created_at.cmp(&a.notification.created_at));
        views
    }

    /// Mark a notification read for one user.
    ///
    /// Returns `false` when it does not exist or is not addressed to the user.
    /// The mark survives `reset` and `rebuild`.
    pub fn mark_read(
        &self,
        organization_id: OrganizationId,
        notification_id: Uuid,
        user: UserId,
        roles: &[MemberRole],
    ) -> bool {
        let addressed = match self.inner.read() {
            Ok(map) => map
                .get(&organization_id)
                .and_then(|list| list.iter().find(|n| n.notification_id == notification_id))
                .is_some_and(|n| n.is_for(user, roles)),
            Err(_) => false,
        };
        if !addressed {
            return false;
        }
        let Ok(mut marks) = self.read_marks.write() else {
            return false;
        };
        marks.entry((organization_id, notification_id)).or_default().insert(user);
        true
    }

    fn push(&self, organization_id: OrganizationId, notification: Notification) -> Result<(), ProjectionError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| ProjectionError::Unavailable("notifications lock poisoned".to_string()))?;
        let list = map.entry(organization_id).or_default();
        if !list.iter().any(|n| n.notification_id == notification.notification_id) {
            list.push(notification);
        }
        Ok(())
    }

    fn from_expense(envelope: &EventEnvelope<JsonValue>, event: ExpenseEvent) -> Option<Notification> {
        let notification = |kind: NotificationKind,
                            recipients: Vec<Recipient>,
                            message: String,
                            created_at: DateTime<Utc>| Notification {
            notification_id: envelope.event_id(),
            kind,
            recipients,
            message,
            subject_id: envelope.aggregate_id(),
            created_at,
        };

        match event {
            ExpenseEvent::ExpenseSubmitted(e) => {
                let step = e.first_step()?;
                Some(notification(
                    NotificationKind::ApprovalRequested,
                    approvers_of(step),
                    format!("Expense '{}' ({}) awaits approval at step '{}'", e.title, e.amount, step.name),
                    e.occurred_at,
                ))
            }
            ExpenseEvent::StepAdvanced(e) => Some(notification(
                NotificationKind::ApprovalRequested,
                approvers_of(&e.next_step),
                format!("Expense '{}' awaits approval at step '{}'", e.title, e.next_step.name),
                e.occurred_at,
            )),
            ExpenseEvent::ExpenseApproved(e) => Some(notification(
                NotificationKind::ExpenseApproved,
                vec![Recipient::User { user_id: e.created_by }],
                format!("Expense '{}' was approved", e.title),
                e.occurred_at,
            )),
            ExpenseEvent::ExpenseRejected(e) => Some(notification(
                NotificationKind::ExpenseRejected,
                vec![Recipient::User { user_id: e.created_by }],
                format!("Expense '{}' was rejected: {}", e.title, e.reason),
                e.occurred_at,
            )),
            _ => None,
        }
    }

    fn from_stock(envelope: &EventEnvelope<JsonValue>, event: InventoryEvent) -> Option<Notification> {
        let InventoryEvent::StockConsumed(e) = event else {
            return None;
        };
        if !e.is_low_stock() {
            return None;
        }
        Some(Notification {
            notification_id: envelope.event_id(),
            kind: NotificationKind::LowStock,
            recipients: vec![Recipient::Role { role: MemberRole::Manager }],
            message: format!(
                "Stock of product {} at location {} is low: {} on hand, reorder level {}",
                e.product_id, e.location_id, e.on_hand, e.reorder_level
            ),
            subject_id: e.stock_item_id.0,
            created_at: e.occurred_at,
        })
    }
}

fn approvers_of(step: &PlannedStep) -> Vec<Recipient> {
    step.actions
        .iter()
        .map(|a| match a {
            ApproverAction::RequireRole { role } => Recipient::Role { role: *role },
            ApproverAction::RequireUser { user_id } => Recipient::User { user_id: *user_id },
        })
        .collect()
}

impl Projection for NotificationsProjection {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == streams::EXPENSE || aggregate_type == streams::STOCK_ITEM
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if !self.handles(envelope.aggregate_type()) {
            return Ok(());
        }

        self.cursors.apply_once(envelope, || {
            let notification = if envelope.aggregate_type() == streams::EXPENSE {
                let event: ExpenseEvent = decode(envelope)?;
                ensure_scope(envelope, expenses::organization_of(&event), expenses::expense_of(&event).0)?;
                Self::from_expense(envelope, event)
            } else {
                let event: InventoryEvent = decode(envelope)?;
                ensure_scope(envelope, stock::organization_of(&event), stock::stock_item_of(&event).0)?;
                Self::from_stock(envelope, event)
            };

            match notification {
                Some(n) => self.push(envelope.organization_id(), n),
                None => Ok(()),
            }
        })?;

        Ok(())
    }

    fn reset(&self, organization_id: OrganizationId) {
        self.cursors.reset_organization(organization_id);
        if let Ok(mut map) = self.inner.write() {
            map.remove(&organization_id);
        }
    }
}
