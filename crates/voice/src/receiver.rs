//! Empfangs-Schleife – besitzt den Socket fuer die Dauer eines `listen`
//!
//! ## Architektur
//!
//! ```text
//! UdpSocket::recv_from (Lese-Timeout = Poll-Intervall)
//!     |
//!     v
//! PaketEntschluesseler::empfangen()      <- Klassifizieren + Authentifizieren
//!     |
//!     +-- RTCP --> VoiceEvent::RtcpPacket + SinkTree::write_rtcp
//!     |
//!     v
//! SsrcRegistry::observe_packet()         <- Identitaet, Sprechzustand, Luecken
//!     |
//!     v
//! Decoder (nur wenn ein Sink PCM will, ohne Baum-Sperre)
//!     |
//!     v
//! SinkTree::write()                      <- synchron, gleicher Thread
//! ```
//!
//! Paketfehler verlassen diese Schleife nie; nur Socket-Fehler und ein
//! `Abbruch` eines Sinks beenden sie mit Fehler.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use lauscher_crypto::{EmpfangenesPaket, PaketEntschluesseler, RtpFrame};
use lauscher_protocol::RtcpPaket;
use parking_lot::RwLock;
use tracing::{debug, error, trace, warn};

use crate::config::EmpfangsConfig;
use crate::decoder::DecoderFabrik;
use crate::dispatcher::EventSender;
use crate::error::{VoiceError, VoiceResult};
use crate::event::VoiceEvent;
use crate::registry::SsrcRegistry;
use crate::sink::{SinkErgebnis, SinkHandle, VoiceData};
use crate::speaking::SprechUebergang;
use crate::telemetry::EmpfangsStatistik;

/// Zustand des Empfangs-Threads fuer einen `listen`-Lauf
pub(crate) struct Empfaenger {
    pub(crate) socket: UdpSocket,
    pub(crate) entschluesseler: Arc<RwLock<PaketEntschluesseler>>,
    pub(crate) registry: SsrcRegistry,
    pub(crate) sinks: SinkHandle,
    pub(crate) events: EventSender,
    pub(crate) statistik: Arc<EmpfangsStatistik>,
    pub(crate) fabrik: DecoderFabrik,
    pub(crate) stopp: Arc<AtomicBool>,
    pub(crate) config: EmpfangsConfig,
}

impl Empfaenger {
    /// Blockierende Empfangsschleife bis Stopp, Sink-Ende oder Fehler
    pub(crate) fn laufen(&self) -> VoiceResult<()> {
        let poll = self.config.poll_intervall();
        self.socket.set_read_timeout(Some(poll))?;

        let mut puffer = vec![0u8; self.config.empfangspuffer_bytes];
        let mut letzte_pruefung = Instant::now();

        debug!(
            lokal = ?self.socket.local_addr().ok(),
            "Empfangsschleife gestartet"
        );

        loop {
            if self.stopp.load(Ordering::Acquire) {
                return Ok(());
            }

            match self.socket.recv_from(&mut puffer) {
                Ok((laenge, _)) => {
                    if self.stopp.load(Ordering::Acquire) {
                        return Ok(());
                    }
                    match self.datagramm(&puffer[..laenge]) {
                        SinkErgebnis::Weiter => {}
                        SinkErgebnis::Beenden => return Ok(()),
                        SinkErgebnis::Abbruch(fehler) => {
                            return Err(VoiceError::SinkAbbruch(fehler))
                        }
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    error!(fehler = %e, "UDP-Empfangsfehler");
                    return Err(VoiceError::Socket(e));
                }
            }

            let jetzt = Instant::now();
            if jetzt.saturating_duration_since(letzte_pruefung) >= poll {
                letzte_pruefung = jetzt;
                self.stille_pruefen(jetzt);
            }
        }
    }

    fn datagramm(&self, daten: &[u8]) -> SinkErgebnis {
        self.statistik.datagramm();
        if daten.is_empty() {
            return SinkErgebnis::Weiter;
        }

        let ergebnis = self.entschluesseler.read().empfangen(daten);
        match ergebnis {
            Ok(EmpfangenesPaket::Rtp(frame)) => self.rtp(frame),
            Ok(EmpfangenesPaket::Rtcp(pakete)) => self.rtcp(pakete),
            Err(e) if e.ist_paketfehler() => {
                self.statistik.ungueltig();
                debug!(fehler = %e, laenge = daten.len(), "Ungueltiges Paket verworfen");
                SinkErgebnis::Weiter
            }
            Err(e) => {
                let anzahl = self.statistik.entschluesselung_fehler();
                let intervall = self.config.fehler_log_intervall.max(1);
                if anzahl == 1 || anzahl % intervall == 0 {
                    warn!(fehler = %e, anzahl, "Entschluesselung fehlgeschlagen, Paket verworfen");
                } else {
                    debug!(fehler = %e, anzahl, "Entschluesselung fehlgeschlagen");
                }
                SinkErgebnis::Weiter
            }
        }
    }

    fn rtcp(&self, pakete: Vec<RtcpPaket>) -> SinkErgebnis {
        self.statistik.rtcp();
        let mut baum = self.sinks.lock();
        let fehler_vorher = baum.fehler_anzahl();

        let mut ergebnis = SinkErgebnis::Weiter;
        for paket in pakete {
            trace!(typ = paket.typ(), ssrc = ?paket.ssrc(), "RTCP empfangen");
            match baum.write_rtcp(&paket) {
                SinkErgebnis::Weiter => {}
                anderes => {
                    if ergebnis == SinkErgebnis::Weiter {
                        ergebnis = anderes;
                    }
                }
            }
            self.events.senden(VoiceEvent::RtcpPacket { paket });
        }

        self.statistik
            .sink_fehler(baum.fehler_anzahl().saturating_sub(fehler_vorher));
        ergebnis
    }

    fn rtp(&self, frame: RtpFrame) -> SinkErgebnis {
        let ssrc = frame.header.ssrc;
        let Some(beobachtung) = self.registry.observe_packet(&frame.header, Instant::now()) else {
            self.statistik.verworfen_entfernt();
            debug!(ssrc, "Paket einer entfernten SSRC verworfen");
            return SinkErgebnis::Weiter;
        };
        self.statistik.rtp();
        let member = beobachtung.member;
        self.statistik.verloren(beobachtung.verloren);

        match beobachtung.uebergang {
            SprechUebergang::Keiner => {}
            SprechUebergang::Gestartet => {
                self.events.senden(VoiceEvent::SpeakingStarted { member, ssrc });
            }
            SprechUebergang::GestopptUndGestartet => {
                self.events.senden(VoiceEvent::SpeakingStopped { member, ssrc });
                self.events.senden(VoiceEvent::SpeakingStarted { member, ssrc });
            }
        }

        if member.is_none() {
            self.statistik.unzugeordnet();
            trace!(ssrc, "Sender noch nicht aufgeloest");
        }

        // Baum-Sperre nur fuer die Abfrage; dekodiert wird ohne Sperre
        let will_pcm = self.sinks.lock().wants_decoded();
        let pcm = if will_pcm {
            match self
                .registry
                .dekodieren(ssrc, &frame.payload, beobachtung.verloren, &self.fabrik)
            {
                Ok(pcm) => Some(pcm),
                Err(e) => {
                    self.statistik.dekodier_fehler();
                    debug!(ssrc, fehler = %e, "Dekodierung fehlgeschlagen, Einheit ohne PCM");
                    None
                }
            }
        } else {
            self.registry.decoder_freigeben(ssrc);
            None
        };

        let data = VoiceData::neu(member, Arc::new(frame), pcm);
        let mut baum = self.sinks.lock();
        let fehler_vorher = baum.fehler_anzahl();
        let ergebnis = baum.write(member, &data);
        self.statistik
            .sink_fehler(baum.fehler_anzahl().saturating_sub(fehler_vorher));
        ergebnis
    }

    fn stille_pruefen(&self, jetzt: Instant) {
        for (ssrc, member) in self.registry.sweep(jetzt) {
            trace!(ssrc, "Sprecher verstummt");
            self.events.senden(VoiceEvent::SpeakingStopped { member, ssrc });
        }
    }
}
