//! Fixed names and identifiers of the escrow protocol.

/// Prefix of every asset identifier.
pub const DID_PREFIX: &str = "did:op:";

/// JSON-LD context written into every document.
pub const DID_CONTEXT: &str = "https://w3id.org/did/v1";

/// Proof type of a sealed document.
pub const INTEGRITY_PROOF_TYPE: &str = "DDOIntegritySignature";

/// Key type of the publisher key listed in a document.
pub const ETHEREUM_KEY_TYPE: &str = "EthereumECDSAKey";

/// Authentication type attached to a sealed document.
pub const AUTHENTICATION_TYPE: &str = "RsaSignatureAuthentication2018";

pub mod conditions {
    pub const LOCK_REWARD: &str = "lockReward";
    pub const ACCESS_SECRET_STORE: &str = "accessSecretStore";
    pub const EXEC_COMPUTE: &str = "execCompute";
    pub const ESCROW_REWARD: &str = "escrowReward";
}

pub mod parameters {
    pub const REWARD_ADDRESS: &str = "_rewardAddress";
    pub const AMOUNT: &str = "_amount";
    pub const DOCUMENT_ID: &str = "_documentId";
    pub const GRANTEE: &str = "_grantee";
    pub const RECEIVER: &str = "_receiver";
    pub const SENDER: &str = "_sender";
    pub const LOCK_CONDITION: &str = "_lockCondition";
    pub const RELEASE_CONDITION: &str = "_releaseCondition";
}

/// Default service indexes used when an asset is registered.
pub mod service_index {
    pub const METADATA: u32 = 0;
    pub const ACCESS: u32 = 1;
    pub const AUTHORIZATION: u32 = 2;
    pub const COMPUTING: u32 = 3;
    pub const PROVENANCE: u32 = 4;
}
