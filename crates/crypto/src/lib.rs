//! # lauscher-crypto
//!
//! Transport-Entschluesselung fuer empfangene Voice-Pakete.
//!
//! ## Module
//! - `rtpsize` - AEAD-Modi im "rtpsize"-Layout (AES-256-GCM, XChaCha20-Poly1305)
//! - `secretbox` - XSalsa20-Poly1305-Modi (Grund, Suffix, Lite)
//! - `types` - Sitzungsschluessel und Verschluesselungsmodus
//! - `error` - Fehlertypen

pub mod error;
pub mod rtpsize;
mod secretbox;
pub mod types;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult};
pub use rtpsize::{EmpfangenesPaket, PaketEntschluesseler, RtpFrame};
pub use types::{SessionSchluessel, VerschluesselungsModus, SCHLUESSEL_LAENGE};
