//! Processor event envelope and purchase classification.
//!
//! Raw deliveries are parsed into [`ProcessorEvent`], then [`classify`] turns
//! them into a [`PaymentEvent`] the rest of the pipeline matches on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::types::Category;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_ASYNC_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";
pub const INVOICE_PAID: &str = "invoice.paid";
pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

const BILLING_REASON_CYCLE: &str = "subscription_cycle";

/// The envelope every processor delivery arrives in.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// `paid`, `unpaid` or `no_payment_required`. Absent on older payloads.
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payment_link: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub billing_reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

/// A delivery after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    /// First payment of a subscription.
    SubscriptionCheckout(SubscriptionCheckout),
    /// A renewal invoice for an existing subscription.
    SubscriptionInvoice(SubscriptionInvoice),
    /// Status change of an existing subscription, no money involved.
    SubscriptionChanged(SubscriptionChange),
    /// A one-off payment.
    Purchase(Purchase),
    /// Acknowledged without processing.
    Ignored(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionCheckout {
    pub session_id: String,
    pub processor_subscription_id: String,
    pub user_id: Uuid,
    pub plan: Option<String>,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInvoice {
    pub invoice_id: String,
    pub processor_subscription_id: String,
    /// Fallback when the subscription is not on record.
    pub user_id: Option<Uuid>,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChange {
    pub processor_subscription_id: String,
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub session_id: String,
    /// Attribution key for the affiliate flow.
    pub buyer_id: Option<Uuid>,
    pub total_amount: i64,
    pub kind: PurchaseKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseKind {
    PaymentLink {
        link_ref: String,
    },
    Service {
        package_id: Uuid,
        client_id: Uuid,
        freelancer_id: Uuid,
    },
    Course {
        course_id: Uuid,
        student_id: Uuid,
        creator_id: Uuid,
    },
    LiveSession {
        stream_id: Uuid,
        viewer_id: Uuid,
        streamer_id: Uuid,
    },
    Store {
        seller_ids: Vec<Uuid>,
    },
    Generic {
        beneficiary_id: Uuid,
    },
}

impl PurchaseKind {
    pub fn category(&self) -> Category {
        match self {
            PurchaseKind::PaymentLink { .. } => Category::PaymentLink,
            PurchaseKind::Service { .. } => Category::Service,
            PurchaseKind::Course { .. } => Category::Course,
            PurchaseKind::LiveSession { .. } => Category::LiveSession,
            PurchaseKind::Store { .. } => Category::Store,
            PurchaseKind::Generic { .. } => Category::Generic,
        }
    }
}

pub fn parse_event(payload: &[u8]) -> Result<ProcessorEvent, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Routes a processor event. Fails only when a recognized event carries an
/// object of the wrong shape.
pub fn classify(event: &ProcessorEvent) -> Result<PaymentEvent, serde_json::Error> {
    let object = event.data.object.clone();
    let classified = match event.event_type.as_str() {
        CHECKOUT_COMPLETED | CHECKOUT_ASYNC_SUCCEEDED => {
            classify_checkout(&serde_json::from_value(object)?)
        }
        INVOICE_PAID | INVOICE_PAYMENT_SUCCEEDED => classify_invoice(&serde_json::from_value(object)?),
        SUBSCRIPTION_UPDATED | SUBSCRIPTION_DELETED => {
            classify_subscription_change(&serde_json::from_value(object)?)
        }
        other => PaymentEvent::Ignored(format!("unhandled event type {other}")),
    };
    Ok(classified)
}

fn meta_uuid(metadata: &HashMap<String, String>, key: &str) -> Option<Uuid> {
    metadata.get(key).and_then(|v| Uuid::parse_str(v.trim()).ok())
}

fn meta_str<'a>(metadata: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn seller_list(metadata: &HashMap<String, String>) -> Vec<Uuid> {
    let mut sellers: Vec<Uuid> = Vec::new();
    let raw = meta_str(metadata, "seller_ids").unwrap_or_default();
    for id in raw.split(',').filter_map(|s| Uuid::parse_str(s.trim()).ok()) {
        if !sellers.contains(&id) {
            sellers.push(id);
        }
    }
    sellers
}

pub fn classify_checkout(session: &CheckoutSession) -> PaymentEvent {
    let meta = &session.metadata;
    let buyer_id = meta_uuid(meta, "user_id").or_else(|| {
        session
            .client_reference_id
            .as_deref()
            .and_then(|v| Uuid::parse_str(v).ok())
    });
    let amount = session.amount_total.unwrap_or(0);
    if amount < 0 {
        return PaymentEvent::Ignored(format!("negative amount {amount}"));
    }
    // Delayed payment methods complete the session before funds arrive; the
    // async_payment_succeeded event carries the paid session later.
    if let Some(status) = session.payment_status.as_deref() {
        if !matches!(status, "paid" | "no_payment_required") {
            return PaymentEvent::Ignored("payment not yet received".into());
        }
    }

    match session.mode.as_deref() {
        Some("subscription") => {
            let Some(processor_subscription_id) = session.subscription.clone() else {
                return PaymentEvent::Ignored("subscription checkout without subscription".into());
            };
            let Some(user_id) = buyer_id else {
                return PaymentEvent::Ignored("subscription checkout without user".into());
            };
            return PaymentEvent::SubscriptionCheckout(SubscriptionCheckout {
                session_id: session.id.clone(),
                processor_subscription_id,
                user_id,
                plan: meta_str(meta, "plan").map(str::to_owned),
                amount,
            });
        }
        Some("payment") | None => {}
        Some(other) => return PaymentEvent::Ignored(format!("checkout mode {other}")),
    }

    let purchase_type = meta_str(meta, "type");
    let purchase = |kind: PurchaseKind| {
        PaymentEvent::Purchase(Purchase {
            session_id: session.id.clone(),
            buyer_id,
            total_amount: amount,
            kind,
        })
    };

    let link_ref = session
        .payment_link
        .as_deref()
        .or_else(|| meta_str(meta, "payment_link_id"));
    if let Some(link_ref) = link_ref {
        return purchase(PurchaseKind::PaymentLink {
            link_ref: link_ref.to_owned(),
        });
    }

    if purchase_type == Some("freelancer_order") {
        if let (Some(package_id), Some(client_id), Some(freelancer_id)) = (
            meta_uuid(meta, "package_id"),
            buyer_id,
            meta_uuid(meta, "freelancer_id"),
        ) {
            return purchase(PurchaseKind::Service {
                package_id,
                client_id,
                freelancer_id,
            });
        }
    }

    if purchase_type == Some("course_enrollment") {
        if let (Some(course_id), Some(student_id), Some(creator_id)) = (
            meta_uuid(meta, "course_id"),
            buyer_id,
            meta_uuid(meta, "creator_id"),
        ) {
            return purchase(PurchaseKind::Course {
                course_id,
                student_id,
                creator_id,
            });
        }
    }

    if purchase_type == Some("stream_access") {
        if let (Some(stream_id), Some(viewer_id), Some(streamer_id)) = (
            meta_uuid(meta, "stream_id"),
            buyer_id,
            meta_uuid(meta, "streamer_id"),
        ) {
            return purchase(PurchaseKind::LiveSession {
                stream_id,
                viewer_id,
                streamer_id,
            });
        }
    }

    let seller_ids = seller_list(meta);
    let store_typed = purchase_type == Some("product_order");
    if (store_typed || purchase_type.is_none()) && !seller_ids.is_empty() {
        return purchase(PurchaseKind::Store { seller_ids });
    }

    let beneficiary = meta_uuid(meta, "seller_id").or_else(|| meta_uuid(meta, "recipient_id"));
    if let Some(beneficiary_id) = beneficiary {
        return purchase(PurchaseKind::Generic { beneficiary_id });
    }

    PaymentEvent::Ignored(format!(
        "checkout {} has no routable purchase metadata",
        session.id
    ))
}

pub fn classify_invoice(invoice: &Invoice) -> PaymentEvent {
    if invoice.billing_reason.as_deref() != Some(BILLING_REASON_CYCLE) {
        return PaymentEvent::Ignored(format!(
            "invoice billing reason {}",
            invoice.billing_reason.as_deref().unwrap_or("none")
        ));
    }
    let Some(processor_subscription_id) = invoice.subscription.clone() else {
        return PaymentEvent::Ignored("cycle invoice without subscription".into());
    };
    if invoice.amount_paid < 0 {
        return PaymentEvent::Ignored(format!("negative amount {}", invoice.amount_paid));
    }
    PaymentEvent::SubscriptionInvoice(SubscriptionInvoice {
        invoice_id: invoice.id.clone(),
        processor_subscription_id,
        user_id: meta_uuid(&invoice.metadata, "user_id"),
        amount: invoice.amount_paid,
    })
}

pub fn classify_subscription_change(subscription: &SubscriptionObject) -> PaymentEvent {
    PaymentEvent::SubscriptionChanged(SubscriptionChange {
        processor_subscription_id: subscription.id.clone(),
        status: subscription.status.clone(),
        current_period_end: subscription
            .current_period_end
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
    })
}
