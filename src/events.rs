// kyc-realtime-kit/src/events.rs

//! The event types the portal server pushes.

use std::fmt;

/// Every server-pushed KYC event this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KycEvent {
    /// A client uploaded a document. Admin set.
    DocumentUploaded,
    /// A submission changed in a way reviewers care about. Admin set.
    SubmissionUpdated,
    /// A reviewer approved a document. Client set.
    DocumentApproved,
    /// A reviewer rejected a document. Client set.
    DocumentRejected,
    /// The overall KYC status of the client changed. Client set.
    StatusUpdated,
}

impl KycEvent {
    pub const ALL: [KycEvent; 5] = [
        KycEvent::DocumentUploaded,
        KycEvent::SubmissionUpdated,
        KycEvent::DocumentApproved,
        KycEvent::DocumentRejected,
        KycEvent::StatusUpdated,
    ];

    /// Handlers registered by admin dashboards.
    pub const ADMIN_SET: &'static [KycEvent] =
        &[KycEvent::DocumentUploaded, KycEvent::SubmissionUpdated];

    /// Handlers registered by client and triparty dashboards.
    pub const CLIENT_SET: &'static [KycEvent] = &[
        KycEvent::DocumentApproved,
        KycEvent::DocumentRejected,
        KycEvent::StatusUpdated,
    ];

    /// The wire name of the event.
    pub const fn name(self) -> &'static str {
        match self {
            KycEvent::DocumentUploaded => "kyc:document-uploaded",
            KycEvent::SubmissionUpdated => "kyc:submission-updated",
            KycEvent::DocumentApproved => "kyc:document-approved",
            KycEvent::DocumentRejected => "kyc:document-rejected",
            KycEvent::StatusUpdated => "kyc:status-updated",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.name() == name)
    }
}

impl fmt::Display for KycEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_and_sets_are_disjoint() {
        for event in KycEvent::ALL {
            assert_eq!(KycEvent::from_name(event.name()), Some(event));
        }
        assert_eq!(KycEvent::from_name("chat:message"), None);

        for event in KycEvent::ADMIN_SET {
            assert!(!KycEvent::CLIENT_SET.contains(event));
        }
        assert_eq!(
            KycEvent::ADMIN_SET.len() + KycEvent::CLIENT_SET.len(),
            KycEvent::ALL.len()
        );
    }
}
