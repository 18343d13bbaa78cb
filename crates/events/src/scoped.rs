use shopledger_core::OrganizationId;

use crate::EventEnvelope;

/// Messages that belong to exactly one organization.
///
/// Consumers use this to drop messages for organizations they are not pinned to.
pub trait OrganizationScoped {
    fn organization_id(&self) -> OrganizationId;
}

impl<E> OrganizationScoped for EventEnvelope<E> {
    fn organization_id(&self) -> OrganizationId {
        EventEnvelope::organization_id(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopledger_core::AggregateId;
    use uuid::Uuid;

    #[test]
    fn envelope_reports_its_organization() {
        let organization_id = OrganizationId::new();
        let env = EventEnvelope::new(Uuid::now_v7(), organization_id, AggregateId::new(), "t", 1, ());
        assert_eq!(OrganizationScoped::organization_id(&env), organization_id);
    }
}
