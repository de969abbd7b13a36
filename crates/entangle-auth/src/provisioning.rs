//! Enrollment descriptor and its QR renderings
//!
//! The `otpauth://` URI must be reproduced exactly:
//! `otpauth://totp/<issuer>:<label>?secret=<base32>&period=<n>&digits=<n>&algorithm=<name>&issuer=<issuer>`
//! with the issuer escaped the way a URI (not a URI component) is escaped.

use crate::secret::derive_secret;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use entangle_core::{Algorithm, Error, RendezvousAddress, Result, SessionConfig};
use image::{ImageFormat, Luma};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Characters escaped when placing text into a whole URI. Reserved and
/// unreserved characters (`;,/?:@&=+$#-_.!~*'()`) pass through.
const URI_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Escape text for inclusion in a URI
pub fn encode_uri(s: &str) -> String {
    utf8_percent_encode(s, URI_ESCAPE).to_string()
}

/// Build an `otpauth://totp/` provisioning URI
pub fn otpauth_uri(
    issuer: &str,
    label: &str,
    secret: &str,
    period: u64,
    digits: u32,
    algorithm: Algorithm,
) -> String {
    let issuer = encode_uri(issuer);
    format!(
        "otpauth://totp/{}:{}?secret={}&period={}&digits={}&algorithm={}&issuer={}",
        issuer,
        label,
        secret,
        period,
        digits,
        algorithm.as_str(),
        issuer
    )
}

/// Everything an authenticator app (and the issuer) needs to know about a ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningInfo {
    /// Rendezvous address the issuer listens on
    pub address: RendezvousAddress,
    /// Display name
    pub issuer: String,
    /// Label shown under the issuer in authenticator apps
    pub user_label: String,
    /// Base32 TOTP secret
    pub secret: String,
    /// Full `otpauth://` URI
    pub uri: String,
    /// Static PIN the requester prepends to the token
    pub pin: String,
    pub period: u64,
    pub digits: u32,
    pub algorithm: Algorithm,
}

impl ProvisioningInfo {
    /// Derive provisioning info from a validated configuration
    pub fn build(address: RendezvousAddress, config: &SessionConfig) -> Self {
        let user_label = derive_secret(config.user.as_deref());
        let secret = derive_secret(config.secret_passphrase.as_deref());
        let uri = otpauth_uri(
            &config.issuer,
            &user_label,
            &secret,
            config.period,
            config.digits,
            config.algorithm,
        );

        Self {
            address,
            issuer: config.issuer.clone(),
            user_label,
            secret,
            uri,
            pin: config.pin.clone(),
            period: config.period,
            digits: config.digits,
            algorithm: config.algorithm,
        }
    }

    fn qr_code(&self) -> Result<QrCode> {
        QrCode::new(self.uri.as_bytes()).map_err(|e| Error::Render(e.to_string()))
    }

    /// Render the URI as a PNG image
    pub fn render_image(&self) -> Result<Vec<u8>> {
        let image = self.qr_code()?.render::<Luma<u8>>().build();

        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| Error::Render(e.to_string()))?;

        Ok(buffer.into_inner())
    }

    /// Render the URI as a `data:image/png;base64,...` URL
    pub fn render_data_url(&self) -> Result<String> {
        let png = self.render_image()?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
    }

    /// Render the URI as text for a terminal
    pub fn render_terminal(&self) -> Result<String> {
        // Two columns per module keeps the code roughly square in a terminal
        let text = self
            .qr_code()?
            .render::<char>()
            .quiet_zone(true)
            .module_dimensions(2, 1)
            .build();
        Ok(text)
    }
}
