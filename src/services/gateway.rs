//! Payment gateway signature verification.
//!
//! Online donations are finalized on a verified-payment callback from the
//! checkout flow. The callback carries the gateway's order id, payment id
//! and an HMAC-SHA256 signature over `order_id|payment_id`, computed with
//! the merchant key secret.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;

use crate::config::GatewayConfig;

#[derive(Clone)]
pub struct GatewayVerifier {
    config: GatewayConfig,
}

/// Payment verification parameters from the callback.
#[derive(Debug)]
pub struct PaymentVerification {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

impl GatewayVerifier {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Check if gateway credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    /// Verify the callback signature:
    /// `HMAC-SHA256(order_id + "|" + payment_id, key_secret)`.
    pub fn verify_payment_signature(&self, verification: &PaymentVerification) -> Result<bool> {
        let payload = format!("{}|{}", verification.order_id, verification.payment_id);
        let expected = self.compute_signature(&payload)?;

        let is_valid = expected == verification.signature;

        if is_valid {
            tracing::info!(
                order_id = %verification.order_id,
                payment_id = %verification.payment_id,
                "Payment signature verified successfully"
            );
        } else {
            tracing::warn!(
                order_id = %verification.order_id,
                payment_id = %verification.payment_id,
                "Payment signature verification failed"
            );
        }

        Ok(is_valid)
    }

    fn compute_signature(&self, payload: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.config.key_secret.expose_secret().as_bytes())
            .map_err(|_| anyhow!("Invalid key length"))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
