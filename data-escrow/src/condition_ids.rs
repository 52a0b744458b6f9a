//! Condition-ID hash chain of an escrow agreement.
//!
//! The keeper contracts recompute every identifier here with
//! `keccak256(abi.encodePacked(...))` and reject an agreement whose ids do not
//! match, so the byte layout and the concatenation order are both part of the
//! protocol.
//!
//! Each condition id is
//! `keccak(agreementId ∥ conditionAddress ∥ keccak(encoded parameter values))`.
//! The escrow-reward id additionally commits to the lock-reward and release
//! ids, in that order.

use tracing::debug;

use crate::{
    conditions::{Condition, ConditionError},
    constants::{
        conditions::{ESCROW_REWARD, LOCK_REWARD},
        parameters::{
            AMOUNT, DOCUMENT_ID, GRANTEE, LOCK_CONDITION, RECEIVER, RELEASE_CONDITION,
            REWARD_ADDRESS, SENDER,
        },
    },
    crypto::{CryptoError, Credentials, RecoverableSignature},
    encoding::{keccak256, PackedEncoder},
    service::AgreementService,
    types::{Address, AgreementId, ConditionId},
};

/// Version of the derivation in use. Only one scheme is implemented; the
/// enum exists so a future contract revision is an explicit choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerivationScheme {
    /// Lock reward, then the release condition, then an escrow reward that
    /// commits to both.
    #[default]
    EscrowLockAccessV1,
}

/// Deployed addresses of the three condition contracts of one agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionAddresses {
    pub lock_reward: Address,
    /// Access-secret-store or compute-execution condition.
    pub release_condition: Address,
    pub escrow_reward: Address,
}

/// The three derived condition ids of one agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionIds {
    pub lock_reward: ConditionId,
    pub release: ConditionId,
    pub escrow_reward: ConditionId,
}

impl ConditionIds {
    /// Ids in the order `createAgreement` and the agreement hash expect:
    /// release, lock reward, escrow reward.
    pub fn ordered(&self) -> [ConditionId; 3] {
        [self.release, self.lock_reward, self.escrow_reward]
    }
}

/// Derives condition ids and the agreement hash for one agreement service.
#[derive(Debug, Clone, Copy)]
pub struct ConditionIdDeriver<'a> {
    service: AgreementService<'a>,
    scheme: DerivationScheme,
}

impl<'a> ConditionIdDeriver<'a> {
    pub fn new(service: AgreementService<'a>) -> Self {
        Self {
            service,
            scheme: DerivationScheme::default(),
        }
    }

    pub fn scheme(&self) -> DerivationScheme {
        self.scheme
    }

    fn condition(&self, name: &str) -> Result<&'a Condition, ConditionError> {
        self.service.template().condition(name)
    }

    fn release_condition(&self) -> Result<&'a Condition, ConditionError> {
        self.condition(self.service.kind.release_condition())
    }

    pub fn lock_reward_id(
        &self,
        agreement_id: &AgreementId,
        addresses: &ConditionAddresses,
    ) -> Result<ConditionId, ConditionError> {
        let condition = self.condition(LOCK_REWARD)?;
        let reward_address = condition.parameter(REWARD_ADDRESS)?;
        let amount = condition.parameter(AMOUNT)?;

        let mut values = reward_address.encode_value(&addresses.escrow_reward.to_string())?;
        values.extend(amount.encode_value(&amount.value)?);

        Ok(condition_id(
            agreement_id,
            &addresses.lock_reward,
            keccak256(values),
        ))
    }

    /// Id of the access-secret-store or compute-execution condition.
    pub fn release_id(
        &self,
        agreement_id: &AgreementId,
        consumer: &Address,
        addresses: &ConditionAddresses,
    ) -> Result<ConditionId, ConditionError> {
        let condition = self.release_condition()?;
        let document_id = condition.parameter(DOCUMENT_ID)?;
        let grantee = condition.parameter(GRANTEE)?;

        let mut values = document_id.encode_value(&document_id.value)?;
        values.extend(grantee.encode_value(&consumer.to_string())?);

        Ok(condition_id(
            agreement_id,
            &addresses.release_condition,
            keccak256(values),
        ))
    }

    /// Id of the escrow reward. `lock_id` and `release_id` are committed in
    /// that order.
    pub fn escrow_reward_id(
        &self,
        agreement_id: &AgreementId,
        consumer: &Address,
        publisher: &Address,
        addresses: &ConditionAddresses,
        lock_id: &ConditionId,
        release_id: &ConditionId,
    ) -> Result<ConditionId, ConditionError> {
        let condition = self.condition(ESCROW_REWARD)?;
        let amount = condition.parameter(AMOUNT)?;
        let receiver = condition.parameter(RECEIVER)?;
        let sender = condition.parameter(SENDER)?;
        let lock_condition = condition.parameter(LOCK_CONDITION)?;
        let release_condition = condition.parameter(RELEASE_CONDITION)?;

        let mut values = amount.encode_value(&amount.value)?;
        values.extend(receiver.encode_value(&publisher.to_string())?);
        values.extend(sender.encode_value(&consumer.to_string())?);
        values.extend(lock_condition.encode_value(&lock_id.to_hex())?);
        values.extend(release_condition.encode_value(&release_id.to_hex())?);

        Ok(condition_id(
            agreement_id,
            &addresses.escrow_reward,
            keccak256(values),
        ))
    }

    /// Derive all three ids.
    pub fn derive(
        &self,
        agreement_id: &AgreementId,
        consumer: &Address,
        publisher: &Address,
        addresses: &ConditionAddresses,
    ) -> Result<ConditionIds, ConditionError> {
        let lock_reward = self.lock_reward_id(agreement_id, addresses)?;
        let release = self.release_id(agreement_id, consumer, addresses)?;
        let escrow_reward = self.escrow_reward_id(
            agreement_id,
            consumer,
            publisher,
            addresses,
            &lock_reward,
            &release,
        )?;
        debug!(%agreement_id, %lock_reward, %release, %escrow_reward, "Derived condition ids");

        Ok(ConditionIds {
            lock_reward,
            release,
            escrow_reward,
        })
    }

    fn ordered_conditions(&self) -> Result<[&'a Condition; 3], ConditionError> {
        Ok([
            self.release_condition()?,
            self.condition(LOCK_REWARD)?,
            self.condition(ESCROW_REWARD)?,
        ])
    }

    /// Condition timelocks, aligned with [`ConditionIds::ordered`].
    pub fn timelocks(&self) -> Result<[u64; 3], ConditionError> {
        Ok(self.ordered_conditions()?.map(|condition| condition.timelock))
    }

    /// Condition timeouts, aligned with [`ConditionIds::ordered`].
    pub fn timeouts(&self) -> Result<[u64; 3], ConditionError> {
        Ok(self.ordered_conditions()?.map(|condition| condition.timeout))
    }

    /// The hash the consumer signs to authorize the agreement.
    pub fn agreement_hash(
        &self,
        agreement_id: &AgreementId,
        ids: &ConditionIds,
    ) -> Result<[u8; 32], ConditionError> {
        let mut encoder = PackedEncoder::new().address(self.service.template_id);
        for id in ids.ordered() {
            encoder = encoder.bytes32(id.as_bytes());
        }
        for timelock in self.timelocks()? {
            encoder = encoder.uint256(timelock);
        }
        for timeout in self.timeouts()? {
            encoder = encoder.uint256(timeout);
        }
        Ok(encoder.bytes32(agreement_id.as_bytes()).keccak())
    }
}

fn condition_id(
    agreement_id: &AgreementId,
    condition_address: &Address,
    values_hash: [u8; 32],
) -> ConditionId {
    PackedEncoder::new()
        .bytes32(agreement_id.as_bytes())
        .address(condition_address)
        .bytes32(&values_hash)
        .keccak()
        .into()
}

/// Sign an agreement hash with the consumer's key.
pub fn sign_agreement(
    credentials: &Credentials,
    agreement_hash: &[u8; 32],
) -> Result<RecoverableSignature, CryptoError> {
    credentials.sign_hash(agreement_hash)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        conditions::{AgreementKind, TemplateParameters},
        did::Did,
        service::{AgreementAttributes, AgreementMain, Service, ServiceKind},
    };
    use rand::rngs::OsRng;
    use std::str::FromStr;

    const TEMPLATE_ID: [u8; 20] = [9; 20];

    fn addresses() -> ConditionAddresses {
        ConditionAddresses {
            lock_reward: Address::from([1; 20]),
            release_condition: Address::from([2; 20]),
            escrow_reward: Address::from([3; 20]),
        }
    }

    fn service(kind: AgreementKind) -> anyhow::Result<Service> {
        let addresses = addresses();
        let conditions = kind.initialize_conditions(&TemplateParameters {
            did: Did::from_hash([0xab; 32]),
            price: "10".to_string(),
            escrow_reward: addresses.escrow_reward,
            lock_reward: addresses.lock_reward,
            release_condition: addresses.release_condition,
        })?;
        let attributes = AgreementAttributes {
            main: AgreementMain {
                name: "agreement".to_string(),
                creator: Address::from([5; 20]),
                price: "10".to_string(),
                timeout: 3600,
            },
            service_agreement_template: kind.service_agreement_template(conditions),
            provider: None,
        };
        let template_id = Address::from(TEMPLATE_ID);
        let kind = match kind {
            AgreementKind::Access => ServiceKind::Access {
                template_id,
                attributes,
            },
            AgreementKind::Compute => ServiceKind::Computing {
                template_id,
                attributes,
            },
        };
        Ok(Service {
            index: 1,
            service_endpoint: "http://provider".to_string(),
            kind,
        })
    }

    fn agreement_id() -> anyhow::Result<AgreementId> {
        Ok(AgreementId::from_str(&"aa11".repeat(16))?)
    }

    fn deriver(service: &Service) -> anyhow::Result<ConditionIdDeriver<'_>> {
        let agreement = service
            .agreement()
            .ok_or_else(|| anyhow::anyhow!("not an agreement service"))?;
        Ok(ConditionIdDeriver::new(agreement))
    }

    #[test]
    fn lock_reward_id_follows_packed_layout() -> anyhow::Result<()> {
        let service = service(AgreementKind::Access)?;
        let deriver = deriver(&service)?;
        let agreement_id = agreement_id()?;
        let addresses = addresses();

        let mut values = addresses.escrow_reward.as_bytes().to_vec();
        let mut amount = [0u8; 32];
        amount[31] = 10;
        values.extend_from_slice(&amount);
        let values_hash = keccak256(values);

        let mut preimage = agreement_id.as_bytes().to_vec();
        preimage.extend_from_slice(addresses.lock_reward.as_bytes());
        preimage.extend_from_slice(&values_hash);

        assert_eq!(
            deriver.lock_reward_id(&agreement_id, &addresses)?,
            ConditionId::from(keccak256(preimage))
        );
        Ok(())
    }

    #[test]
    fn derivation_is_deterministic() -> anyhow::Result<()> {
        let service = service(AgreementKind::Access)?;
        let deriver = deriver(&service)?;
        let consumer = Address::from([7; 20]);
        let publisher = Address::from([8; 20]);

        let first = deriver.derive(&agreement_id()?, &consumer, &publisher, &addresses())?;
        let second = deriver.derive(&agreement_id()?, &consumer, &publisher, &addresses())?;
        assert_eq!(first, second);
        assert_eq!(
            deriver.agreement_hash(&agreement_id()?, &first)?,
            deriver.agreement_hash(&agreement_id()?, &second)?
        );
        Ok(())
    }

    #[test]
    fn escrow_id_is_order_sensitive() -> anyhow::Result<()> {
        let service = service(AgreementKind::Access)?;
        let deriver = deriver(&service)?;
        let agreement_id = agreement_id()?;
        let consumer = Address::from([7; 20]);
        let publisher = Address::from([8; 20]);
        let addresses = addresses();

        let ids = deriver.derive(&agreement_id, &consumer, &publisher, &addresses)?;
        let swapped = deriver.escrow_reward_id(
            &agreement_id,
            &consumer,
            &publisher,
            &addresses,
            &ids.release,
            &ids.lock_reward,
        )?;
        assert_ne!(ids.escrow_reward, swapped);
        Ok(())
    }

    #[test]
    fn agreement_hash_is_order_sensitive() -> anyhow::Result<()> {
        let service = service(AgreementKind::Access)?;
        let deriver = deriver(&service)?;
        let agreement_id = agreement_id()?;
        let ids = deriver.derive(
            &agreement_id,
            &Address::from([7; 20]),
            &Address::from([8; 20]),
            &addresses(),
        )?;
        let swapped = ConditionIds {
            lock_reward: ids.release,
            release: ids.lock_reward,
            escrow_reward: ids.escrow_reward,
        };
        assert_ne!(
            deriver.agreement_hash(&agreement_id, &ids)?,
            deriver.agreement_hash(&agreement_id, &swapped)?
        );
        Ok(())
    }

    #[test]
    fn ids_depend_on_consumer() -> anyhow::Result<()> {
        let service = service(AgreementKind::Access)?;
        let deriver = deriver(&service)?;
        let publisher = Address::from([8; 20]);
        let first = deriver.derive(&agreement_id()?, &Address::from([7; 20]), &publisher, &addresses())?;
        let second = deriver.derive(&agreement_id()?, &Address::from([6; 20]), &publisher, &addresses())?;
        assert_eq!(first.lock_reward, second.lock_reward);
        assert_ne!(first.release, second.release);
        assert_ne!(first.escrow_reward, second.escrow_reward);
        Ok(())
    }

    #[test]
    fn compute_agreements_use_exec_compute() -> anyhow::Result<()> {
        let service = service(AgreementKind::Compute)?;
        let deriver = deriver(&service)?;
        assert_eq!(deriver.timeouts()?, [86400, 0, 0]);
        assert!(deriver
            .derive(&agreement_id()?, &Address::from([7; 20]), &Address::from([8; 20]), &addresses())
            .is_ok());
        Ok(())
    }

    #[test]
    fn missing_condition_is_reported() -> anyhow::Result<()> {
        let mut service = service(AgreementKind::Access)?;
        if let Some(attributes) = service.agreement_attributes_mut() {
            attributes
                .service_agreement_template
                .conditions
                .retain(|condition| condition.name != LOCK_REWARD);
        }
        let deriver = deriver(&service)?;
        assert!(matches!(
            deriver.lock_reward_id(&agreement_id()?, &addresses()),
            Err(ConditionError::ConditionNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn consumer_signature_recovers() -> anyhow::Result<()> {
        let service = service(AgreementKind::Access)?;
        let deriver = deriver(&service)?;
        let credentials = Credentials::generate(&mut OsRng);
        let ids = deriver.derive(
            &agreement_id()?,
            &credentials.address(),
            &Address::from([8; 20]),
            &addresses(),
        )?;
        let hash = deriver.agreement_hash(&agreement_id()?, &ids)?;
        let signature = sign_agreement(&credentials, &hash)?;
        assert_eq!(signature.recover_signer(&hash)?, credentials.address());
        Ok(())
    }
}
