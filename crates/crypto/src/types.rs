//! Gemeinsame Typen: Sitzungsschluessel und Verschluesselungsmodus

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// Laenge des Sitzungsschluessels in Bytes
pub const SCHLUESSEL_LAENGE: usize = 32;

/// Laenge des AEAD-Auth-Tags
pub const TAG_LAENGE: usize = 16;

/// Laenge des Nonce-Zaehlers am Paketende
pub const NONCE_SUFFIX_LAENGE: usize = 4;

// ---------------------------------------------------------------------------
// VerschluesselungsModus
// ---------------------------------------------------------------------------

/// Vom Voice-Server ausgehandelter Transport-Modus
///
/// Alle Modi verschluesseln nur den Payload. Bei den rtpsize-Modi gehen
/// RTP-Header (inkl. Kopf der Header-Erweiterung) als AAD in die
/// Authentifizierung ein; die aelteren secretbox-Modi authentifizieren den
/// Header nicht.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerschluesselungsModus {
    /// AES-256-GCM, 12-Byte-Nonce
    #[serde(rename = "aead_aes256_gcm_rtpsize")]
    Aes256GcmRtpSize,
    /// XChaCha20-Poly1305, 24-Byte-Nonce
    #[serde(rename = "aead_xchacha20_poly1305_rtpsize")]
    XChaCha20Poly1305RtpSize,
    /// XSalsa20-Poly1305, 4-Byte-Zaehler am Paketende
    #[serde(rename = "xsalsa20_poly1305_lite")]
    XSalsa20Poly1305Lite,
    /// XSalsa20-Poly1305, volle 24-Byte-Nonce am Paketende
    #[serde(rename = "xsalsa20_poly1305_suffix")]
    XSalsa20Poly1305Suffix,
    /// XSalsa20-Poly1305, Nonce aus dem RTP-Kopf
    #[serde(rename = "xsalsa20_poly1305")]
    XSalsa20Poly1305,
}

impl VerschluesselungsModus {
    /// Alle unterstuetzten Modi in Praeferenz-Reihenfolge
    pub const ALLE: [Self; 5] = [
        Self::Aes256GcmRtpSize,
        Self::XChaCha20Poly1305RtpSize,
        Self::XSalsa20Poly1305Lite,
        Self::XSalsa20Poly1305Suffix,
        Self::XSalsa20Poly1305,
    ];

    /// Name des Modus im Control-Protokoll
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes256GcmRtpSize => "aead_aes256_gcm_rtpsize",
            Self::XChaCha20Poly1305RtpSize => "aead_xchacha20_poly1305_rtpsize",
            Self::XSalsa20Poly1305Lite => "xsalsa20_poly1305_lite",
            Self::XSalsa20Poly1305Suffix => "xsalsa20_poly1305_suffix",
            Self::XSalsa20Poly1305 => "xsalsa20_poly1305",
        }
    }

    /// Nonce-Laenge der Chiffre
    pub fn nonce_laenge(&self) -> usize {
        match self {
            Self::Aes256GcmRtpSize => 12,
            _ => 24,
        }
    }

    /// AEAD-Modus mit Header als AAD
    pub fn ist_rtpsize(&self) -> bool {
        matches!(self, Self::Aes256GcmRtpSize | Self::XChaCha20Poly1305RtpSize)
    }
}

impl fmt::Display for VerschluesselungsModus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VerschluesselungsModus {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALLE
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| CryptoError::UnbekannterModus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// SessionSchluessel
// ---------------------------------------------------------------------------

/// Symmetrischer Sitzungsschluessel aus der Session-Description
///
/// Wird beim Drop genullt; `Debug` gibt den Inhalt nie aus.
#[derive(Clone)]
pub struct SessionSchluessel([u8; SCHLUESSEL_LAENGE]);

impl Drop for SessionSchluessel {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for SessionSchluessel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionSchluessel([REDACTED] {} bytes)", SCHLUESSEL_LAENGE)
    }
}

impl SessionSchluessel {
    pub fn neu(bytes: [u8; SCHLUESSEL_LAENGE]) -> Self {
        Self(bytes)
    }

    /// Uebernimmt einen Schluessel aus einem Slice (z.B. `secret_key` als Byte-Liste)
    pub fn aus_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; SCHLUESSEL_LAENGE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
                    erwartet: SCHLUESSEL_LAENGE,
                    erhalten: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Dekodiert einen Base64-kodierten Schluessel
    pub fn aus_base64(text: &str) -> CryptoResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(text.trim())?;
        Self::aus_slice(&bytes)
    }

    /// Erzeugt einen zufaelligen Schluessel (Tests, lokale Gegenstellen)
    pub fn zufaellig() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; SCHLUESSEL_LAENGE];
        bytes.copy_from_slice(key.as_slice());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SCHLUESSEL_LAENGE] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
