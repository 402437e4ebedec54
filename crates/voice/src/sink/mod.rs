//! Sink-Baum – komponierbare Verarbeitungsknoten fuer empfangenes Audio
//!
//! ## Architektur
//!
//! ```text
//!   Empfangs-Thread
//!        │ write(member, &VoiceData)
//!        v
//!   Wurzel-Sink ──Ausgang──> Kind A ──Ausgang──> Enkel
//!                    └─────> Kind B
//! ```
//!
//! Knoten liegen in einer Arena ([`SinkTree`]); Eltern besitzen ihre Kinder
//! ueber [`SinkId`]s, Kinder kennen ihre Eltern nur als ID. Ein Sink sieht
//! seine Kinder ausschliesslich ueber seinen [`Ausgang`].

mod basis;
mod filter;
mod tree;

use std::sync::Arc;

use lauscher_crypto::RtpFrame;
use lauscher_protocol::{RtcpPaket, RtpHeader};

use crate::dispatcher::Listener;
use crate::error::SinkError;
use crate::event::EventArt;
use crate::types::MemberId;

pub use basis::CallbackSink;
pub use filter::{ConditionalFilter, MemberFilter, TimedFilter};
pub use tree::{Ausgang, SinkErgebnis, SinkHandle, SinkTree};

// ---------------------------------------------------------------------------
// SinkId
// ---------------------------------------------------------------------------

/// Knoten-ID im Sink-Baum; nach `detach` wird eine ID nie wieder gueltig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId {
    index: u32,
    generation: u32,
}

impl SinkId {
    pub(crate) fn neu(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn test_id(index: u32) -> Self {
        Self::neu(index, 0)
    }
}

// ---------------------------------------------------------------------------
// VoiceData
// ---------------------------------------------------------------------------

/// Ein vollstaendig verarbeitetes Paket fuer die Sinks
///
/// Unveraenderlich; Klonen teilt das Paket ueber `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceData {
    /// Aufgeloestes Mitglied, `None` solange die SSRC unbekannt ist
    pub member: Option<MemberId>,
    /// Entschluesseltes Paket samt Header und Rohbytes
    pub paket: Arc<RtpFrame>,
    /// Dekodiertes PCM (interleaved i16), nur wenn ein Sink es verlangt
    /// und die Dekodierung gelang
    pub pcm: Option<Vec<i16>>,
}

impl VoiceData {
    pub fn neu(member: Option<MemberId>, paket: Arc<RtpFrame>, pcm: Option<Vec<i16>>) -> Self {
        Self { member, paket, pcm }
    }

    /// Opus-Payload
    pub fn opus(&self) -> &[u8] {
        &self.paket.payload
    }

    pub fn header(&self) -> &RtpHeader {
        &self.paket.header
    }

    pub fn ssrc(&self) -> u32 {
        self.paket.header.ssrc
    }

    pub fn sequenz(&self) -> u16 {
        self.paket.header.sequenz
    }

    pub fn zeitstempel(&self) -> u32 {
        self.paket.header.zeitstempel
    }

    /// Unveraendertes Datagramm
    pub fn roh(&self) -> &[u8] {
        &self.paket.roh
    }

    pub fn ist_stille(&self) -> bool {
        self.paket.ist_stille()
    }

    /// Kopie mit anderem PCM, z.B. fuer transformierende Sinks
    pub fn mit_pcm(&self, pcm: Option<Vec<i16>>) -> Self {
        Self {
            member: self.member,
            paket: Arc::clone(&self.paket),
            pcm,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioSink
// ---------------------------------------------------------------------------

/// Vertrag eines Sink-Knotens
///
/// `write` laeuft synchron im Empfangs-Thread und muss billig sein. Teure
/// Arbeit gehoert in einen eigenen Thread des Sinks.
pub trait AudioSink: Send {
    /// Verlangt dieser Knoten dekodiertes PCM? Wird beim Anhaengen gelesen.
    fn wants_decoded(&self) -> bool {
        false
    }

    /// Verarbeitet eine Einheit.
    ///
    /// `Schreiben` ueberspringt nur diese Einheit; `Abbruch` beendet den
    /// Empfang mit Fehler; `Beenden` beendet ihn regulaer.
    fn write(
        &mut self,
        member: Option<MemberId>,
        data: &VoiceData,
        ausgang: &mut Ausgang<'_>,
    ) -> Result<(), SinkError>;

    /// Empfangenes RTCP; standardmaessig an alle Kinder weitergereicht
    fn write_rtcp(&mut self, paket: &RtcpPaket, ausgang: &mut Ausgang<'_>) -> Result<(), SinkError> {
        ausgang.rtcp_weiterleiten(paket);
        Ok(())
    }

    /// Wird genau einmal aufgerufen, wenn der Knoten abgehaengt wird oder
    /// der Empfang endet
    fn cleanup(&mut self) {}

    /// Listener-Tabelle des Knotens; nur synchrone Listener sind erlaubt
    fn listeners(&self) -> Vec<(EventArt, Listener)> {
        Vec::new()
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
