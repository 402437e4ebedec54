//! Fehlertypen fuer die Transport-Entschluesselung

use lauscher_protocol::PacketError;
use thiserror::Error;

/// Fehler beim Oeffnen oder Versiegeln eines Voice-Pakets
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Unbekannter Verschluesselungsmodus: {0}")]
    UnbekannterModus(String),

    #[error("Ungueltiges Paket: {0}")]
    Paket(#[from] PacketError),

    #[error("Base64-Dekodierung fehlgeschlagen: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl CryptoError {
    /// `true` wenn das Framing kaputt war (nicht die Authentifizierung)
    pub fn ist_paketfehler(&self) -> bool {
        matches!(self, Self::Paket(_))
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;
