//! Descriptor and proof codecs for the HTTP-402 flow.
//!
//! Two schemes are in the wild and both are supported:
//!
//! - **v1**: the server advertises requirements in an `X-Payment-Required`
//!   header (Base64 JSON) and the client proves payment in `X-Payment`.
//! - **v2**: requirements arrive as JSON body fields and the proof goes in
//!   `Payment-Signature`.

use base64::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentpay::PaymentError;

/// Header advertising payment requirements (v1 scheme).
pub const HEADER_PAYMENT_REQUIRED: &str = "X-Payment-Required";
/// Header carrying the v1 payment proof.
pub const HEADER_X_PAYMENT: &str = "X-Payment";
/// Header carrying the v2 payment proof.
pub const HEADER_PAYMENT_SIGNATURE: &str = "Payment-Signature";
/// Header on the final response acknowledging settlement.
pub const HEADER_PAYMENT_RESPONSE: &str = "Payment-Response";

/// Errors from descriptor/proof encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum X402Error {
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Base64 decoding failed.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The 402 response carried no usable payment descriptor.
    #[error("no payment descriptor in 402 response: {0}")]
    MissingDescriptor(String),
}

impl From<X402Error> for PaymentError {
    fn from(err: X402Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Payment requirements parsed from a 402 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDescriptor {
    /// Scheme identifier (e.g. `"exact"`).
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Network the seller wants to be paid on.
    #[serde(default)]
    pub network: String,
    /// Amount, either stablecoin subunits (integer) or a decimal string.
    #[serde(default)]
    pub amount: String,
    /// Seller's receiving address.
    #[serde(default)]
    pub pay_to: String,
    /// Asset identifier, when the seller names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    /// Resource being paid for.
    #[serde(default)]
    pub resource: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Protocol scheme version (1 or 2) the descriptor arrived in.
    #[serde(default = "default_version")]
    pub version: u8,
}

fn default_scheme() -> String {
    "exact".to_owned()
}

const fn default_version() -> u8 {
    2
}

/// Subunit scale of the settled stablecoin.
const SUBUNIT_SCALE: u32 = 6;

impl PaymentDescriptor {
    /// Extracts a descriptor from raw JSON with the field fallbacks both
    /// scheme generations use: `payTo`/`paymentAddress`/`recipient` for the
    /// address, `maxAmountRequired`/`amount` for the amount.
    fn from_json(data: &Value, resource: &str, version: u8) -> Option<Self> {
        let data = data.get("requirements").unwrap_or(data);
        let pay_to = data
            .get("payTo")
            .or_else(|| data.get("paymentAddress"))
            .or_else(|| data.get("recipient"))
            .and_then(Value::as_str)?
            .to_owned();
        let amount = data
            .get("maxAmountRequired")
            .or_else(|| data.get("amount"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })?;
        Some(Self {
            scheme: data
                .get("scheme")
                .and_then(Value::as_str)
                .unwrap_or("exact")
                .to_owned(),
            network: data
                .get("network")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            amount,
            pay_to,
            asset: data.get("asset").and_then(Value::as_str).map(ToOwned::to_owned),
            resource: data
                .get("resource")
                .and_then(Value::as_str)
                .unwrap_or(resource)
                .to_owned(),
            description: data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            version,
        })
    }

    /// Parses a descriptor from a 402 response body (v2 scheme).
    #[must_use]
    pub fn from_body(body: &Value, resource: &str) -> Option<Self> {
        Self::from_json(body, resource, 2)
    }

    /// Parses a descriptor from an `X-Payment-Required` header value
    /// (Base64 JSON, v1 scheme).
    ///
    /// # Errors
    ///
    /// Returns [`X402Error`] on Base64/JSON decode failure or when the
    /// decoded JSON lacks the required fields.
    pub fn from_header(header_value: &str, resource: &str) -> Result<Self, X402Error> {
        let bytes = BASE64_STANDARD.decode(header_value.trim())?;
        let data: Value = serde_json::from_slice(&bytes)?;
        Self::from_json(&data, resource, 1)
            .ok_or_else(|| X402Error::MissingDescriptor("header missing payTo/amount".into()))
    }

    /// The required amount in whole tokens. Integers are treated as
    /// 6-decimal stablecoin subunits; decimal strings as whole tokens.
    #[must_use]
    pub fn amount_tokens(&self) -> Decimal {
        if let Ok(subunits) = self.amount.parse::<i64>() {
            return Decimal::new(subunits, SUBUNIT_SCALE);
        }
        self.amount.parse().unwrap_or(Decimal::ZERO)
    }
}

/// Decodes an `X-Payment-Required` header into a descriptor.
///
/// # Errors
///
/// Returns [`X402Error`] on decode failure.
pub fn decode_descriptor_header(
    header_value: &str,
    resource: &str,
) -> Result<PaymentDescriptor, X402Error> {
    PaymentDescriptor::from_header(header_value, resource)
}

/// Payment proof sent with the retried request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    /// Protocol scheme version the proof targets.
    pub x402_version: u8,
    /// Scheme identifier, echoed from the descriptor.
    pub scheme: String,
    /// Settlement network, echoed from the descriptor.
    pub network: String,
    /// Resource the payment unlocks.
    pub resource: String,
    /// Settlement evidence (transaction hash, addresses, amount).
    pub payload: Value,
}

impl PaymentProof {
    /// The header this proof travels in, per its scheme version.
    #[must_use]
    pub const fn header_name(&self) -> &'static str {
        if self.x402_version == 1 {
            HEADER_X_PAYMENT
        } else {
            HEADER_PAYMENT_SIGNATURE
        }
    }
}

/// Encodes a proof as a Base64 header value.
///
/// # Errors
///
/// Returns [`X402Error::Serialize`] if JSON serialization fails.
pub fn encode_proof(proof: &PaymentProof) -> Result<String, X402Error> {
    let json = serde_json::to_vec(proof)?;
    Ok(BASE64_STANDARD.encode(&json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_from_body_v2_fields() {
        let body = json!({
            "scheme": "exact",
            "network": "base-sepolia",
            "payTo": "0xseller",
            "amount": "1500000",
            "asset": "USDC",
            "description": "API access"
        });
        let descriptor = PaymentDescriptor::from_body(&body, "https://api.example.com").unwrap();
        assert_eq!(descriptor.pay_to, "0xseller");
        assert_eq!(descriptor.network, "base-sepolia");
        assert_eq!(descriptor.amount_tokens(), Decimal::new(15, 1));
        assert_eq!(descriptor.version, 2);
    }

    #[test]
    fn test_descriptor_field_fallbacks() {
        let body = json!({
            "requirements": {
                "paymentAddress": "0xseller",
                "maxAmountRequired": "250000"
            }
        });
        let descriptor = PaymentDescriptor::from_body(&body, "r").unwrap();
        assert_eq!(descriptor.pay_to, "0xseller");
        assert_eq!(descriptor.amount_tokens(), Decimal::new(25, 2));
        assert_eq!(descriptor.scheme, "exact");
    }

    #[test]
    fn test_descriptor_decimal_string_amount() {
        let body = json!({ "payTo": "0xseller", "amount": "1.25" });
        let descriptor = PaymentDescriptor::from_body(&body, "r").unwrap();
        assert_eq!(descriptor.amount_tokens(), Decimal::new(125, 2));
    }

    #[test]
    fn test_descriptor_from_header_roundtrip() {
        let raw = json!({
            "scheme": "exact",
            "network": "base",
            "payTo": "0xseller",
            "maxAmountRequired": "100000"
        });
        let encoded = BASE64_STANDARD.encode(serde_json::to_vec(&raw).unwrap());
        let descriptor =
            PaymentDescriptor::from_header(&encoded, "https://api.example.com").unwrap();
        assert_eq!(descriptor.version, 1);
        assert_eq!(descriptor.pay_to, "0xseller");
        assert_eq!(descriptor.resource, "https://api.example.com");
    }

    #[test]
    fn test_descriptor_header_rejects_garbage() {
        assert!(PaymentDescriptor::from_header("not-base64!!!", "r").is_err());
        let no_fields = BASE64_STANDARD.encode(b"{}");
        assert!(matches!(
            PaymentDescriptor::from_header(&no_fields, "r"),
            Err(X402Error::MissingDescriptor(_))
        ));
    }

    #[test]
    fn test_proof_header_selection() {
        let mut proof = PaymentProof {
            x402_version: 2,
            scheme: "exact".into(),
            network: "base".into(),
            resource: "r".into(),
            payload: json!({}),
        };
        assert_eq!(proof.header_name(), HEADER_PAYMENT_SIGNATURE);
        proof.x402_version = 1;
        assert_eq!(proof.header_name(), HEADER_X_PAYMENT);
    }

    #[test]
    fn test_proof_encodes_to_base64_json() {
        let proof = PaymentProof {
            x402_version: 2,
            scheme: "exact".into(),
            network: "base".into(),
            resource: "https://api.example.com".into(),
            payload: json!({ "transactionHash": "0xabc" }),
        };
        let encoded = encode_proof(&proof).unwrap();
        let decoded: Value =
            serde_json::from_slice(&BASE64_STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded["x402Version"], 2);
        assert_eq!(decoded["payload"]["transactionHash"], "0xabc");
    }
}
