//! Parcels
//!
//! A parcel is an opaque, authenticated payload routed between endpoints.
//! Gateways never look inside the service payload; they validate the
//! envelope (signature, validity window, recipient form, sender chain) and
//! move the bytes along.

use serde::{Deserialize, Serialize};

use crate::constants::CLOCK_DRIFT_TOLERANCE_MINUTES;
use crate::security::certificate::{sign_detached, verify_detached, Certificate};
use crate::security::keys::KeyPair;

use super::MessageError;

/// The kind of address a parcel may be bound for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientType {
    /// A public-internet URL (`https://…`)
    Internet,
    /// A private node identifier (hex private address)
    Private,
}

/// An authenticated, end-to-end encrypted payload routed between endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parcel {
    /// Certificate of the sending endpoint
    pub sender_certificate: Certificate,
    /// Intermediate certificates linking the sender to a trust anchor
    pub sender_certificate_chain: Vec<Certificate>,
    /// Recipient address: `https://…` or a private address
    pub recipient_address: String,
    /// Sender-chosen parcel id, unique per (sender, recipient)
    pub parcel_id: String,
    /// Creation time (unix seconds)
    pub creation_time: i64,
    /// Lifetime in seconds from creation
    pub ttl_secs: i64,
    /// Opaque service payload (end-to-end encrypted by the endpoints)
    pub payload: Vec<u8>,
    /// Detached signature by the sender over the fields above
    pub signature: Vec<u8>,
}

impl Parcel {
    /// Build and sign a parcel.
    pub fn new(
        sender: &KeyPair,
        sender_certificate: Certificate,
        sender_certificate_chain: Vec<Certificate>,
        recipient_address: impl Into<String>,
        parcel_id: impl Into<String>,
        creation_time: i64,
        ttl_secs: i64,
        payload: Vec<u8>,
    ) -> Parcel {
        let mut parcel = Parcel {
            sender_certificate,
            sender_certificate_chain,
            recipient_address: recipient_address.into(),
            parcel_id: parcel_id.into(),
            creation_time,
            ttl_secs,
            payload,
            signature: Vec::new(),
        };
        parcel.signature = sign_detached(&sender.private_key, &parcel.signed_data());
        parcel
    }

    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Parcel, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }

    /// Expiry time (unix seconds).
    pub fn expiry(&self) -> i64 {
        self.creation_time.saturating_add(self.ttl_secs)
    }

    /// Validate the parcel for a given recipient kind against trusted
    /// certificates.
    ///
    /// Checks, in order: recipient address form, validity window (with
    /// clock-drift tolerance on the creation time), sender signature, and
    /// that the sender certificate chains to one of `trusted` (directly or
    /// through the embedded chain).
    pub fn validate(
        &self,
        recipient_type: RecipientType,
        trusted: &[Certificate],
        now: i64,
    ) -> Result<(), MessageError> {
        let is_internet = self.recipient_address.starts_with("https://");
        match recipient_type {
            RecipientType::Internet if !is_internet => {
                return Err(MessageError::InvalidRecipient(
                    self.recipient_address.clone(),
                ));
            }
            RecipientType::Private if is_internet => {
                return Err(MessageError::InvalidRecipient(
                    self.recipient_address.clone(),
                ));
            }
            _ => {}
        }

        let drift = CLOCK_DRIFT_TOLERANCE_MINUTES * 60;
        if self.creation_time > now + drift || now > self.expiry() {
            return Err(MessageError::OutsideValidityWindow);
        }

        if !verify_detached(
            &self.sender_certificate.subject_public_key,
            &self.signed_data(),
            &self.signature,
        ) {
            return Err(MessageError::InvalidSignature);
        }

        verify_sender_chain(
            &self.sender_certificate,
            &self.sender_certificate_chain,
            trusted,
            now,
        )
    }

    /// The to-be-signed bytes: everything but the signature.
    fn signed_data(&self) -> Vec<u8> {
        postcard::to_allocvec(&(
            &self.sender_certificate,
            &self.sender_certificate_chain,
            &self.recipient_address,
            &self.parcel_id,
            self.creation_time,
            self.ttl_secs,
            &self.payload,
        ))
        .expect("serialization should not fail")
    }
}

/// Check that `certificate` chains to one of `trusted`, possibly through
/// `intermediates`. Every link must carry a valid signature and be within
/// its validity window at `now`.
pub(crate) fn verify_sender_chain(
    certificate: &Certificate,
    intermediates: &[Certificate],
    trusted: &[Certificate],
    now: i64,
) -> Result<(), MessageError> {
    // Direct issuance by an anchor
    if certificate.verify_chain(trusted, now).is_ok() {
        return Ok(());
    }

    // One level of intermediates: sender ← intermediate ← anchor
    for intermediate in intermediates {
        if certificate
            .verify_chain(std::slice::from_ref(intermediate), now)
            .is_ok()
            && intermediate.verify_chain(trusted, now).is_ok()
        {
            return Ok(());
        }
    }

    Err(MessageError::UntrustedSender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::keys::generate_key_pair;

    fn gateway_with_cert() -> (KeyPair, Certificate) {
        let gateway = generate_key_pair();
        let cert = Certificate::issue(gateway.public_key, &gateway, 0, i64::MAX);
        (gateway, cert)
    }

    fn endpoint_parcel(
        gateway: &KeyPair,
        recipient: &str,
        now: i64,
    ) -> (Parcel, Certificate) {
        let endpoint = generate_key_pair();
        let endpoint_cert = Certificate::issue(endpoint.public_key, gateway, 0, i64::MAX);
        let parcel = Parcel::new(
            &endpoint,
            endpoint_cert.clone(),
            vec![],
            recipient,
            "parcel-1",
            now,
            3600,
            b"opaque payload".to_vec(),
        );
        (parcel, endpoint_cert)
    }

    #[test]
    fn test_roundtrip() {
        let (gateway, _) = gateway_with_cert();
        let (parcel, _) = endpoint_parcel(&gateway, "abc123", 1000);

        let bytes = parcel.serialize();
        let decoded = Parcel::deserialize(&bytes).unwrap();
        assert_eq!(decoded, parcel);
    }

    #[test]
    fn test_deserialize_garbage() {
        assert!(matches!(
            Parcel::deserialize(b"not a parcel"),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_private_recipient() {
        let (gateway, gateway_cert) = gateway_with_cert();
        let (parcel, _) = endpoint_parcel(&gateway, "abc123", 1000);

        assert!(parcel
            .validate(RecipientType::Private, std::slice::from_ref(&gateway_cert), 1000)
            .is_ok());

        // The same parcel is not acceptable as internet-bound
        assert!(matches!(
            parcel.validate(RecipientType::Internet, std::slice::from_ref(&gateway_cert), 1000),
            Err(MessageError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn test_validate_internet_recipient() {
        let (gateway, gateway_cert) = gateway_with_cert();
        let (parcel, _) = endpoint_parcel(&gateway, "https://ping.example.com", 1000);

        assert!(parcel
            .validate(RecipientType::Internet, std::slice::from_ref(&gateway_cert), 1000)
            .is_ok());
        assert!(matches!(
            parcel.validate(RecipientType::Private, std::slice::from_ref(&gateway_cert), 1000),
            Err(MessageError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn test_validate_rejects_expired() {
        let (gateway, gateway_cert) = gateway_with_cert();
        let (parcel, _) = endpoint_parcel(&gateway, "abc123", 1000);

        let after_expiry = parcel.expiry() + 1;
        assert_eq!(
            parcel.validate(
                RecipientType::Private,
                std::slice::from_ref(&gateway_cert),
                after_expiry
            ),
            Err(MessageError::OutsideValidityWindow)
        );
    }

    #[test]
    fn test_validate_tolerates_clock_drift() {
        let (gateway, gateway_cert) = gateway_with_cert();
        let now = 100_000;
        // Created 30 minutes in our future: within the 90 minute tolerance
        let (parcel, _) = endpoint_parcel(&gateway, "abc123", now + 30 * 60);

        assert!(parcel
            .validate(RecipientType::Private, std::slice::from_ref(&gateway_cert), now)
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_far_future_creation() {
        let (gateway, gateway_cert) = gateway_with_cert();
        let now = 100_000;
        let (parcel, _) = endpoint_parcel(&gateway, "abc123", now + 91 * 60);

        assert_eq!(
            parcel.validate(RecipientType::Private, std::slice::from_ref(&gateway_cert), now),
            Err(MessageError::OutsideValidityWindow)
        );
    }

    #[test]
    fn test_validate_rejects_tampered_payload() {
        let (gateway, gateway_cert) = gateway_with_cert();
        let (mut parcel, _) = endpoint_parcel(&gateway, "abc123", 1000);

        parcel.payload = b"swapped payload".to_vec();
        assert_eq!(
            parcel.validate(RecipientType::Private, std::slice::from_ref(&gateway_cert), 1000),
            Err(MessageError::InvalidSignature)
        );
    }

    #[test]
    fn test_validate_rejects_untrusted_sender() {
        let (gateway, gateway_cert) = gateway_with_cert();
        let (stranger_gateway, _) = gateway_with_cert();
        let (parcel, _) = endpoint_parcel(&stranger_gateway, "abc123", 1000);

        let _ = gateway;
        assert_eq!(
            parcel.validate(RecipientType::Private, std::slice::from_ref(&gateway_cert), 1000),
            Err(MessageError::UntrustedSender)
        );
    }

    #[test]
    fn test_validate_accepts_chain_through_intermediate() {
        let (gateway, gateway_cert) = gateway_with_cert();

        // gateway ← intermediate endpoint ← delegated key
        let intermediate = generate_key_pair();
        let intermediate_cert = Certificate::issue(intermediate.public_key, &gateway, 0, i64::MAX);
        let delegated = generate_key_pair();
        let delegated_cert =
            Certificate::issue(delegated.public_key, &intermediate, 0, i64::MAX);

        let parcel = Parcel::new(
            &delegated,
            delegated_cert,
            vec![intermediate_cert],
            "abc123",
            "parcel-2",
            1000,
            3600,
            b"payload".to_vec(),
        );

        assert!(parcel
            .validate(RecipientType::Private, std::slice::from_ref(&gateway_cert), 1000)
            .is_ok());
    }
}
