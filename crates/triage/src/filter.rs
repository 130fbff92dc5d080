use payscan_core::models::{DeliveryStatus, WebhookDeliveryRecord};

/// Client-side narrowing of the delivery list. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryFilter {
    pub status: Option<DeliveryStatus>,
    pub event_contains: String,
}

impl DeliveryFilter {
    pub fn new(status: Option<DeliveryStatus>, event_contains: impl Into<String>) -> Self {
        Self {
            status,
            event_contains: event_contains.into(),
        }
    }

    pub fn matches(&self, delivery: &WebhookDeliveryRecord) -> bool {
        let status_ok = self.status.map_or(true, |s| s == delivery.status);
        let event_ok = self.event_contains.is_empty()
            || delivery
                .event_type
                .to_lowercase()
                .contains(&self.event_contains.to_lowercase());
        status_ok && event_ok
    }

    pub fn apply<'a>(
        &'a self,
        deliveries: &'a [WebhookDeliveryRecord],
    ) -> impl Iterator<Item = &'a WebhookDeliveryRecord> + 'a {
        deliveries.iter().filter(move |d| self.matches(d))
    }
}
