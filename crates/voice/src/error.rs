//! Fehlertypen der Voice-Empfangs-Engine

use lauscher_crypto::CryptoError;
use lauscher_protocol::PacketError;
use thiserror::Error;

use crate::event::EventArt;
use crate::sink::SinkId;

/// Fehler der Empfangs-Engine und ihrer Steuer-API
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Ungueltiges Paket: {0}")]
    UngueltigesPaket(#[from] PacketError),

    #[error("Krypto-Fehler: {0}")]
    Krypto(#[from] CryptoError),

    #[error("Socket-Fehler: {0}")]
    Socket(#[from] std::io::Error),

    #[error("Sink hat den Empfang abgebrochen: {0}")]
    SinkAbbruch(SinkError),

    #[error("Asynchroner Listener fuer {art:?} als Sink-Listener registriert")]
    UngueltigerListener { art: EventArt },

    #[error("Synchroner Listener fuer {art:?} als Session-Listener registriert")]
    SynchronerSessionListener { art: EventArt },

    #[error("Keine Tokio-Laufzeit fuer asynchrone Listener verfuegbar")]
    KeineLaufzeit,

    #[error("Empfang laeuft bereits")]
    BereitsAktiv,

    #[error("Kein aktiver Empfang")]
    NichtAktiv,

    #[error("Unbekannter Sink: {0:?}")]
    UnbekannterSink(SinkId),

    #[error("Der Wurzel-Sink kann nicht abgehaengt werden")]
    WurzelNichtEntfernbar,

    #[error("Ungueltige Gateway-Nachricht: {0}")]
    Gateway(#[from] serde_json::Error),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Thread konnte nicht gestartet werden: {0}")]
    Thread(String),
}

pub type VoiceResult<T> = Result<T, VoiceError>;

/// Fehler, den ein Sink aus `write` meldet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Einheit konnte nicht verarbeitet werden – wird geloggt und uebersprungen
    #[error("Schreiben fehlgeschlagen: {0}")]
    Schreiben(String),

    /// Nicht behebbar – beendet den Empfang, landet im Finalisierer
    #[error("Nicht behebbarer Sink-Fehler: {0}")]
    Abbruch(String),

    /// Sink verlangt ein regulaeres Ende des Empfangs
    #[error("Sink beendet den Empfang")]
    Beenden,
}

/// Fehler beim Dekodieren eines Opus-Payloads
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Opus-Dekodierung fehlgeschlagen: {0}")]
    Opus(String),

    #[error("Decoder konnte nicht erstellt werden: {0}")]
    Erstellung(String),
}
