//! LND REST payment backend.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;

use crate::backend::{Invoice, InvoiceBackend, InvoiceStatus, Settlement};
use crate::error::BackendError;
use crate::types::{PaymentHash, Preimage};

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

/// Connection parameters for an LND node's REST interface.
#[derive(Clone)]
pub struct LndConfig {
    /// Base URL, e.g. `https://localhost:8080`.
    pub rest_url: String,
    /// Hex-encoded invoice macaroon.
    pub macaroon_hex: Option<String>,
    /// PEM certificate of the node, for self-signed TLS.
    pub tls_cert_pem: Option<Vec<u8>>,
    /// Bound on invoice creation and lookup requests.
    pub request_timeout: Duration,
    /// Lifetime of created invoices; matches the challenge TTL.
    pub invoice_expiry: Duration,
}

impl std::fmt::Debug for LndConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LndConfig")
            .field("rest_url", &self.rest_url)
            .field("macaroon_hex", &self.macaroon_hex.as_ref().map(|_| "[REDACTED]"))
            .field("tls_cert_pem", &self.tls_cert_pem.as_ref().map(|c| c.len()))
            .field("request_timeout", &self.request_timeout)
            .field("invoice_expiry", &self.invoice_expiry)
            .finish()
    }
}

pub struct LndRestBackend {
    client: reqwest::Client,
    base_url: String,
    macaroon_hex: Option<String>,
    request_timeout: Duration,
    invoice_expiry: Duration,
}

#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    r_hash: String,
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct LndInvoice {
    #[serde(default)]
    r_hash: String,
    #[serde(default)]
    r_preimage: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionLine {
    result: Option<LndInvoice>,
    error: Option<serde_json::Value>,
}

impl LndRestBackend {
    pub fn new(config: LndConfig) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(pem) = &config.tls_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| BackendError::Request(format!("invalid LND TLS certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            macaroon_hex: config.macaroon_hex,
            request_timeout: config.request_timeout,
            invoice_expiry: config.invoice_expiry,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(mac) = &self.macaroon_hex {
            req = req.header(MACAROON_HEADER, mac.as_str());
        }
        req
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

/// `POST /v1/invoices` body. LND's own default expiry is 24h, so the
/// challenge TTL is always sent.
fn add_invoice_body(amount: u64, memo: &str, expiry: Duration) -> serde_json::Value {
    serde_json::json!({
        "value": amount.to_string(),
        "memo": memo,
        "expiry": expiry.as_secs().max(1).to_string(),
    })
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, BackendError> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| BackendError::InvalidResponse(format!("{field}: {e}")))
}

fn invoice_status(invoice: &LndInvoice) -> Result<InvoiceStatus, BackendError> {
    match invoice.state.as_str() {
        "SETTLED" => {
            let raw = decode_b64("r_preimage", &invoice.r_preimage)?;
            let preimage = Preimage::from_slice(&raw)
                .map_err(|e| BackendError::InvalidResponse(format!("r_preimage: {e}")))?;
            Ok(InvoiceStatus::Settled(preimage))
        }
        "CANCELED" => Ok(InvoiceStatus::Canceled),
        // ACCEPTED is a held HTLC, not yet a settlement.
        "OPEN" | "ACCEPTED" | "" => Ok(InvoiceStatus::Open),
        other => Err(BackendError::InvalidResponse(format!("unknown invoice state {other}"))),
    }
}

/// Parse one newline-delimited message of the invoice subscription.
///
/// Returns `Ok(None)` for blank lines and invoices that are not settled.
fn parse_subscription_line(line: &[u8]) -> Result<Option<Settlement>, BackendError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }
    let msg: SubscriptionLine = serde_json::from_slice(line)
        .map_err(|e| BackendError::InvalidResponse(format!("subscription message: {e}")))?;
    if let Some(err) = msg.error {
        return Err(BackendError::InvalidResponse(format!("subscription error: {err}")));
    }
    let Some(invoice) = msg.result else {
        return Ok(None);
    };
    match invoice_status(&invoice)? {
        InvoiceStatus::Settled(preimage) => {
            let raw = decode_b64("r_hash", &invoice.r_hash)?;
            let payment_hash = PaymentHash::from_slice(&raw)
                .map_err(|e| BackendError::InvalidResponse(format!("r_hash: {e}")))?;
            Ok(Some(Settlement {
                payment_hash,
                preimage,
            }))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl InvoiceBackend for LndRestBackend {
    async fn create_invoice(&self, amount: u64, memo: &str) -> Result<Invoice, BackendError> {
        let body = add_invoice_body(amount, memo, self.invoice_expiry);
        let response = self
            .request(reqwest::Method::POST, "/v1/invoices")
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;
        let added: AddInvoiceResponse = check_status(response).await?.json().await?;

        let raw = decode_b64("r_hash", &added.r_hash)?;
        let payment_hash = PaymentHash::from_slice(&raw)
            .map_err(|e| BackendError::InvalidResponse(format!("r_hash: {e}")))?;

        Ok(Invoice {
            payment_hash,
            payment_request: added.payment_request,
            amount,
        })
    }

    async fn lookup_invoice(&self, hash: &PaymentHash) -> Result<Option<InvoiceStatus>, BackendError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v1/invoice/{}", hash.to_hex()))
            .timeout(self.request_timeout)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let invoice: LndInvoice = check_status(response).await?.json().await?;
        invoice_status(&invoice).map(Some)
    }

    async fn subscribe_settlements(
        &self,
    ) -> Result<BoxStream<'static, Result<Settlement, BackendError>>, BackendError> {
        let response = self
            .request(reqwest::Method::GET, "/v1/invoices/subscribe")
            .send()
            .await?;
        let body = check_status(response).await?.bytes_stream();

        let settlements = stream::unfold((body, Vec::new()), |(mut body, mut buf)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    match parse_subscription_line(&line) {
                        Ok(Some(settlement)) => return Some((Ok(settlement), (body, buf))),
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (body, buf))),
                    }
                }
                match body.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(BackendError::from(e)), (body, buf))),
                    None => return None,
                }
            }
        });
        Ok(settlements.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn parses_settled_subscription_line() {
        let preimage = Preimage::random();
        let hash = preimage.payment_hash();
        let line = format!(
            r#"{{"result":{{"r_hash":"{}","r_preimage":"{}","state":"SETTLED","value":"100"}}}}"#,
            b64(hash.as_bytes()),
            b64(preimage.as_bytes())
        );
        let settlement = parse_subscription_line(line.as_bytes()).unwrap().unwrap();
        assert_eq!(settlement.payment_hash, hash);
        assert_eq!(settlement.preimage, preimage);
    }

    #[test]
    fn open_invoices_and_blank_lines_are_skipped() {
        assert!(parse_subscription_line(b"  \n").unwrap().is_none());
        let line = br#"{"result":{"r_hash":"","state":"OPEN"}}"#;
        assert!(parse_subscription_line(line).unwrap().is_none());
    }

    #[test]
    fn subscription_errors_surface() {
        let line = br#"{"error":{"code":2,"message":"boom"}}"#;
        assert!(parse_subscription_line(line).is_err());
        assert!(parse_subscription_line(b"not json").is_err());
    }

    #[test]
    fn invoice_states() {
        let open = LndInvoice {
            r_hash: String::new(),
            r_preimage: String::new(),
            state: "ACCEPTED".into(),
        };
        assert_eq!(invoice_status(&open).unwrap(), InvoiceStatus::Open);

        let canceled = LndInvoice {
            state: "CANCELED".into(),
            ..open
        };
        assert_eq!(invoice_status(&canceled).unwrap(), InvoiceStatus::Canceled);
    }

    #[test]
    fn debug_redacts_macaroon() {
        let config = LndConfig {
            rest_url: "https://localhost:8080".into(),
            macaroon_hex: Some("0201036c6e64".into()),
            tls_cert_pem: None,
            request_timeout: Duration::from_secs(5),
            invoice_expiry: Duration::from_secs(3600),
        };
        let out = format!("{config:?}");
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("0201036c6e64"));
    }

    #[test]
    fn invoice_expiry_is_sent() {
        let body = add_invoice_body(100, "L402", Duration::from_secs(600));
        assert_eq!(body["value"], "100");
        assert_eq!(body["memo"], "L402");
        assert_eq!(body["expiry"], "600");
    }
}
