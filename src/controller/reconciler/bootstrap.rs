//! # Bootstrap Coordinator
//!
//! Makes sure exactly one root ACL token exists. The bootstrap Secret is both the cache and
//! the lock: whoever creates it first wins, everyone else reads the stored value back.

use crate::constants::SECRET_TOKEN_KEY;
use crate::controller::reconciler::status::ReconcilePhase;
use crate::controller::reconciler::types::{Credential, ReconcilerError};
use crate::provider::kubernetes::{Orchestrator, SecretWrite};
use crate::provider::{BootstrapOutcome, ControlPlane};
use tracing::{info, info_span, warn, Instrument};
use zeroize::Zeroizing;

const STEP: ReconcilePhase = ReconcilePhase::AcquiringCredential;

/// Name of the Secret holding the root token
pub fn bootstrap_secret_name(resource_prefix: &str) -> String {
    format!("{resource_prefix}-bootstrap-acl-token")
}

/// Return the root credential, minting and storing it if no run has done so yet
pub async fn acquire_root_credential(
    orchestrator: &dyn Orchestrator,
    control_plane: &dyn ControlPlane,
    resource_prefix: &str,
) -> Result<Credential, ReconcilerError> {
    let secret_name = bootstrap_secret_name(resource_prefix);
    let span = info_span!("reconcile.bootstrap", secret.name = %secret_name);

    async move {
        if let Some(token) = read_stored_token(orchestrator, &secret_name).await? {
            info!("Using bootstrap token from Secret {}", secret_name);
            return Ok(Credential {
                token,
                minted: false,
            });
        }

        let outcome = control_plane.bootstrap().await.map_err(|e| {
            ReconcilerError::api(STEP, "ACL bootstrap", None, e)
        })?;

        match outcome {
            BootstrapOutcome::Minted(token) => {
                let minted = Zeroizing::new(token.secret_id.clone());
                let write = orchestrator
                    .create_secret(&secret_name, SECRET_TOKEN_KEY, &minted)
                    .await
                    .map_err(|e| ReconcilerError::kubernetes(STEP, &secret_name, e))?;

                match write {
                    SecretWrite::Created => {
                        info!("Stored bootstrap token in Secret {}", secret_name);
                        Ok(Credential {
                            token: minted,
                            minted: true,
                        })
                    }
                    SecretWrite::AlreadyExists => {
                        warn!(
                            "Secret {} appeared while bootstrapping; using the stored token",
                            secret_name
                        );
                        let token = read_stored_token(orchestrator, &secret_name)
                            .await?
                            .ok_or_else(|| ReconcilerError::CredentialConflict {
                                secret: secret_name.clone(),
                            })?;
                        Ok(Credential {
                            token,
                            minted: false,
                        })
                    }
                }
            }
            BootstrapOutcome::AlreadyBootstrapped => {
                // Another run may have stored the token between our read and the bootstrap call
                match read_stored_token(orchestrator, &secret_name).await? {
                    Some(token) => Ok(Credential {
                        token,
                        minted: false,
                    }),
                    None => Err(ReconcilerError::CredentialConflict {
                        secret: secret_name.clone(),
                    }),
                }
            }
        }
    }
    .instrument(span)
    .await
}

/// Read the bootstrap Secret; a Secret holding an empty or non-UTF-8 value is rejected
async fn read_stored_token(
    orchestrator: &dyn Orchestrator,
    secret_name: &str,
) -> Result<Option<Zeroizing<String>>, ReconcilerError> {
    let value = orchestrator
        .get_secret(secret_name, SECRET_TOKEN_KEY)
        .await
        .map_err(|e| ReconcilerError::kubernetes(STEP, secret_name, e))?;

    let Some(bytes) = value else {
        return Ok(None);
    };
    let bytes = Zeroizing::new(bytes);
    if bytes.is_empty() {
        return Err(ReconcilerError::invariant(
            STEP,
            format!("Secret {secret_name} exists but its '{SECRET_TOKEN_KEY}' key is empty"),
        ));
    }
    let token = std::str::from_utf8(&bytes).map_err(|_| {
        ReconcilerError::invariant(
            STEP,
            format!("Secret {secret_name} holds a token that is not valid UTF-8"),
        )
    })?;
    Ok(Some(Zeroizing::new(token.to_string())))
}
