//! CallbackSink – Closure pro Einheit

use lauscher_protocol::RtcpPaket;

use super::{Ausgang, AudioSink, VoiceData};
use crate::dispatcher::Listener;
use crate::error::SinkError;
use crate::event::EventArt;
use crate::types::MemberId;

type AudioCallback = Box<dyn FnMut(Option<MemberId>, &VoiceData) + Send>;
type RtcpCallback = Box<dyn FnMut(&RtcpPaket) + Send>;

/// Ruft fuer jede Einheit eine Closure auf und leitet danach an die
/// Kinder weiter
pub struct CallbackSink {
    audio: AudioCallback,
    rtcp: Option<RtcpCallback>,
    dekodiert: bool,
    listeners: Vec<(EventArt, Listener)>,
}

impl CallbackSink {
    pub fn neu<F>(audio: F) -> Self
    where
        F: FnMut(Option<MemberId>, &VoiceData) + Send + 'static,
    {
        Self {
            audio: Box::new(audio),
            rtcp: None,
            dekodiert: false,
            listeners: Vec::new(),
        }
    }

    pub fn mit_rtcp<F>(mut self, rtcp: F) -> Self
    where
        F: FnMut(&RtcpPaket) + Send + 'static,
    {
        self.rtcp = Some(Box::new(rtcp));
        self
    }

    /// Verlangt dekodiertes PCM
    pub fn dekodiert(mut self) -> Self {
        self.dekodiert = true;
        self
    }

    pub fn mit_listener(mut self, art: EventArt, listener: Listener) -> Self {
        self.listeners.push((art, listener));
        self
    }
}

impl AudioSink for CallbackSink {
    fn wants_decoded(&self) -> bool {
        self.dekodiert
    }

    fn write(
        &mut self,
        member: Option<MemberId>,
        data: &VoiceData,
        ausgang: &mut Ausgang<'_>,
    ) -> Result<(), SinkError> {
        (self.audio)(member, data);
        ausgang.weiterleiten(member, data);
        Ok(())
    }

    fn write_rtcp(&mut self, paket: &RtcpPaket, ausgang: &mut Ausgang<'_>) -> Result<(), SinkError> {
        if let Some(rtcp) = self.rtcp.as_mut() {
            rtcp(paket);
        }
        ausgang.rtcp_weiterleiten(paket);
        Ok(())
    }

    fn listeners(&self) -> Vec<(EventArt, Listener)> {
        self.listeners.clone()
    }

    fn name(&self) -> &str {
        "CallbackSink"
    }
}
