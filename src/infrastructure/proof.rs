use crate::config::ProofConfig;
use crate::domain::ids::UserId;
use crate::domain::ports::ProofVerifier;
use crate::domain::proof::{ProofContentType, ProofReference};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Receives proof-of-payment uploads and vouches for the references it issues.
///
/// An upload is accepted only if it is within the size ceiling, declares an
/// allowed image type, and its leading bytes carry that type's signature.
/// The file body itself is handed to external storage; only the reference
/// and its owner are kept here.
#[derive(Clone)]
pub struct UploadRegistry {
    config: ProofConfig,
    issued: Arc<RwLock<HashMap<ProofReference, UserId>>>,
}

impl UploadRegistry {
    pub fn new(config: ProofConfig) -> Self {
        Self {
            config,
            issued: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn accept(&self, owner_id: UserId, declared_type: &str, bytes: &[u8]) -> Result<ProofReference> {
        if bytes.is_empty() {
            return Err(LedgerError::InvalidProof("empty file".to_string()));
        }
        if bytes.len() > self.config.max_bytes {
            return Err(LedgerError::InvalidProof(format!(
                "file of {} bytes exceeds {} byte limit",
                bytes.len(),
                self.config.max_bytes
            )));
        }
        let declared = ProofContentType::from_mime(declared_type).ok_or_else(|| {
            LedgerError::InvalidProof(format!("content type {declared_type} not allowed"))
        })?;
        if ProofContentType::sniff(bytes) != Some(declared) {
            warn!(%owner_id, declared_type, "upload content does not match declared type");
            return Err(LedgerError::InvalidProof(
                "file content does not match declared type".to_string(),
            ));
        }

        let reference =
            ProofReference::new(format!("{owner_id}/{}.{}", Uuid::now_v7(), declared.extension()))?;
        self.issued
            .write()
            .await
            .insert(reference.clone(), owner_id);
        debug!(%owner_id, proof = %reference, "proof upload accepted");
        Ok(reference)
    }
}

#[async_trait]
impl ProofVerifier for UploadRegistry {
    async fn verify(&self, owner_id: UserId, proof: &ProofReference) -> Result<()> {
        match self.issued.read().await.get(proof) {
            Some(owner) if *owner == owner_id => Ok(()),
            Some(_) => Err(LedgerError::InvalidProof(
                "proof belongs to another user".to_string(),
            )),
            None => Err(LedgerError::InvalidProof(format!("unknown proof {proof}"))),
        }
    }
}

/// Verifier for references already validated by an external upload service.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrevalidatedProofs;

#[async_trait]
impl ProofVerifier for PrevalidatedProofs {
    async fn verify(&self, _owner_id: UserId, proof: &ProofReference) -> Result<()> {
        if proof.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidProof("empty proof reference".to_string()));
        }
        Ok(())
    }
}
