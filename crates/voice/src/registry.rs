//! SSRC-Registry – Zuordnung Transport-Sender zu Member-Identitaet
//!
//! Verwaltet pro SSRC:
//! - aufgeloeste Member-Identitaet (kann spaeter als die ersten Pakete kommen)
//! - Sprechzustand und letzte Sequenznummer
//! - Paketzaehler
//! - Decoder-Kontext (nur solange dekodiertes Audio verlangt wird)
//!
//! Thread-safe durch DashMap. Der Empfangs-Thread aktualisiert Zeitstempel,
//! der Control-Kanal aendert Identitaeten. Keine `Ref` auf einen Eintrag
//! wird ueber einen weiteren Map-Zugriff hinweg gehalten.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lauscher_protocol::{sequenz_luecke, sequenz_neuer, RtpHeader};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::EmpfangsConfig;
use crate::decoder::{DecoderFabrik, PayloadDecoder};
use crate::error::DecodeError;
use crate::speaking::{SprechUebergang, SprechZustand};
use crate::types::MemberId;

/// Hoechstens so viele verlorene Frames werden verschleiert
const MAX_VERSCHLEIERTE_FRAMES: u16 = 5;

type DecoderSlot = Arc<Mutex<Option<Box<dyn PayloadDecoder>>>>;

// ---------------------------------------------------------------------------
// Eintraege
// ---------------------------------------------------------------------------

struct SsrcEintrag {
    member: Option<MemberId>,
    sprechen: SprechZustand,
    letzte_sequenz: Option<u16>,
    letzter_zeitstempel: Option<u32>,
    pakete: u64,
    dekoder: DecoderSlot,
}

impl SsrcEintrag {
    fn neu(member: Option<MemberId>) -> Self {
        Self {
            member,
            sprechen: SprechZustand::default(),
            letzte_sequenz: None,
            letzter_zeitstempel: None,
            pakete: 0,
            dekoder: Arc::new(Mutex::new(None)),
        }
    }

    fn verbuchen(&mut self, header: &RtpHeader, jetzt: Instant, timeout: Duration) -> Beobachtung {
        let uebergang = self.sprechen.paket(jetzt, timeout);
        let verloren = match self.letzte_sequenz {
            Some(alt) => sequenz_luecke(alt, header.sequenz),
            None => 0,
        };
        // Verspaetete Pakete verschieben die letzte Sequenz nicht zurueck
        if self
            .letzte_sequenz
            .map_or(true, |alt| sequenz_neuer(alt, header.sequenz))
        {
            self.letzte_sequenz = Some(header.sequenz);
            self.letzter_zeitstempel = Some(header.zeitstempel);
        }
        self.pakete += 1;

        trace!(
            ssrc = header.ssrc,
            sequence = header.sequenz,
            verloren,
            "Paket verbucht"
        );

        Beobachtung {
            member: self.member,
            uebergang,
            verloren,
        }
    }

    fn info(&self, ssrc: u32, jetzt: Instant, timeout: Duration) -> SsrcInfo {
        SsrcInfo {
            ssrc,
            member: self.member,
            spricht: self.sprechen.spricht(jetzt, timeout),
            sprechphase_offen: self.sprechen.offen(),
            letztes_paket: self.sprechen.letztes_paket(),
            letzte_sequenz: self.letzte_sequenz,
            letzter_zeitstempel: self.letzter_zeitstempel,
            pakete: self.pakete,
            hat_decoder: self.dekoder.lock().is_some(),
        }
    }
}

/// Momentaufnahme eines Registry-Eintrags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrcInfo {
    pub ssrc: u32,
    pub member: Option<MemberId>,
    pub spricht: bool,
    /// Start wurde gemeldet, Stopp noch nicht
    pub sprechphase_offen: bool,
    pub letztes_paket: Option<Instant>,
    pub letzte_sequenz: Option<u16>,
    pub letzter_zeitstempel: Option<u32>,
    pub pakete: u64,
    pub hat_decoder: bool,
}

/// Ergebnis von [`SsrcRegistry::observe_packet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beobachtung {
    pub member: Option<MemberId>,
    pub uebergang: SprechUebergang,
    /// Fehlende Sequenznummern seit dem letzten Paket
    pub verloren: u16,
}

/// Ergebnis von [`SsrcRegistry::update_identity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitaetsUpdate {
    /// Identitaet wurde erstmals gesetzt
    Neu,
    /// Gleiche Identitaet war bereits gesetzt
    Unveraendert,
    /// Andere Identitaet bereits gesetzt – nur per Reconnect aenderbar
    Abgelehnt { bestehend: MemberId },
}

// ---------------------------------------------------------------------------
// SsrcRegistry
// ---------------------------------------------------------------------------

/// Zuordnung SSRC -> Member mit Sprech- und Decoder-Zustand
#[derive(Clone)]
pub struct SsrcRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    eintraege: DashMap<u32, SsrcEintrag>,
    /// Member -> zuletzt bekannte SSRC
    member_index: DashMap<MemberId, u32>,
    /// Zuletzt entfernte SSRCs, deren Nachzuegler verworfen werden
    entfernt: Mutex<VecDeque<u32>>,
    entfernt_kapazitaet: usize,
    timeout: Duration,
}

impl SsrcRegistry {
    pub fn neu(config: &EmpfangsConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                eintraege: DashMap::new(),
                member_index: DashMap::new(),
                entfernt: Mutex::new(VecDeque::with_capacity(config.entfernte_ssrcs_merken)),
                entfernt_kapazitaet: config.entfernte_ssrcs_merken,
                timeout: config.speaking_timeout(),
            }),
        }
    }

    pub fn speaking_timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Member-Identitaet einer SSRC, falls bereits bekannt
    pub fn resolve(&self, ssrc: u32) -> Option<MemberId> {
        self.inner.eintraege.get(&ssrc).and_then(|e| e.member)
    }

    /// Verbucht ein empfangenes Audio-Paket.
    ///
    /// Legt den Eintrag beim ersten Paket an (Member unbekannt) und liefert
    /// den Sprech-Uebergang sowie die Anzahl fehlender Sequenznummern.
    /// `None` fuer eine kuerzlich entfernte SSRC: das Paket wird verworfen
    /// und kein Eintrag angelegt.
    pub fn observe_packet(&self, header: &RtpHeader, jetzt: Instant) -> Option<Beobachtung> {
        let timeout = self.inner.timeout;
        if let Some(mut eintrag) = self.inner.eintraege.get_mut(&header.ssrc) {
            return Some(eintrag.verbuchen(header, jetzt, timeout));
        }

        // Sperrliste bleibt gehalten, bis der Eintrag steht; `remove` nimmt
        // dieselbe Sperre vor dem Entfernen
        let entfernt = self.inner.entfernt.lock();
        if entfernt.contains(&header.ssrc) {
            return None;
        }
        let beobachtung = self
            .inner
            .eintraege
            .entry(header.ssrc)
            .or_insert_with(|| SsrcEintrag::neu(None))
            .verbuchen(header, jetzt, timeout);
        drop(entfernt);
        Some(beobachtung)
    }

    /// Ordnet einer SSRC eine Identitaet zu (monoton).
    ///
    /// Eine einmal gesetzte Identitaet wird nicht ueberschrieben; dafuer
    /// gibt es [`Self::reassign_identity`].
    pub fn update_identity(&self, ssrc: u32, member: MemberId) -> IdentitaetsUpdate {
        self.entfernt_vergessen(ssrc);

        let ergebnis = {
            let mut eintrag = self
                .inner
                .eintraege
                .entry(ssrc)
                .or_insert_with(|| SsrcEintrag::neu(None));
            match eintrag.member {
                None => {
                    eintrag.member = Some(member);
                    IdentitaetsUpdate::Neu
                }
                Some(bestehend) if bestehend == member => IdentitaetsUpdate::Unveraendert,
                Some(bestehend) => IdentitaetsUpdate::Abgelehnt { bestehend },
            }
        };

        match ergebnis {
            IdentitaetsUpdate::Neu => {
                self.inner.member_index.insert(member, ssrc);
                debug!(ssrc, member = %member, "SSRC aufgeloest");
            }
            IdentitaetsUpdate::Abgelehnt { bestehend } => {
                warn!(
                    ssrc,
                    member = %member,
                    bestehend = %bestehend,
                    "Identitaetswechsel ohne Reconnect abgelehnt"
                );
            }
            IdentitaetsUpdate::Unveraendert => {}
        }
        ergebnis
    }

    /// Setzt die Identitaet einer SSRC ausdruecklich neu (Reconnect)
    pub fn reassign_identity(&self, ssrc: u32, member: MemberId) -> Option<MemberId> {
        self.entfernt_vergessen(ssrc);

        let vorher = {
            let mut eintrag = self
                .inner
                .eintraege
                .entry(ssrc)
                .or_insert_with(|| SsrcEintrag::neu(None));
            eintrag.member.replace(member)
        };

        if let Some(alt) = vorher.filter(|alt| *alt != member) {
            self.inner.member_index.remove_if(&alt, |_, s| *s == ssrc);
        }
        self.inner.member_index.insert(member, ssrc);
        debug!(ssrc, member = %member, "SSRC neu zugeordnet");
        vorher
    }

    /// Entfernt einen Eintrag samt Decoder.
    ///
    /// Ist in der gelieferten Info `sprechphase_offen` gesetzt, muss der
    /// Aufrufer das ausstehende Stopp-Ereignis melden.
    pub fn remove(&self, ssrc: u32) -> Option<SsrcInfo> {
        let eintrag = {
            let mut entfernt = self.inner.entfernt.lock();
            let (_, eintrag) = self.inner.eintraege.remove(&ssrc)?;
            self.entfernt_merken(&mut entfernt, ssrc);
            eintrag
        };
        if let Some(member) = eintrag.member {
            self.inner.member_index.remove_if(&member, |_, s| *s == ssrc);
        }
        debug!(ssrc, "SSRC entfernt");
        Some(eintrag.info(ssrc, Instant::now(), self.inner.timeout))
    }

    /// Entfernt den Eintrag eines Members (Disconnect)
    pub fn remove_member(&self, member: MemberId) -> Option<SsrcInfo> {
        let (_, ssrc) = self.inner.member_index.remove(&member)?;
        self.remove(ssrc)
    }

    pub fn ssrc_von_member(&self, member: MemberId) -> Option<u32> {
        self.inner.member_index.get(&member).map(|s| *s)
    }

    /// SSRC wurde kuerzlich entfernt und noch nicht wieder angekuendigt
    pub fn kuerzlich_entfernt(&self, ssrc: u32) -> bool {
        self.inner.entfernt.lock().contains(&ssrc)
    }

    pub fn is_speaking(&self, ssrc: u32) -> bool {
        self.inner
            .eintraege
            .get(&ssrc)
            .is_some_and(|e| e.sprechen.spricht(Instant::now(), self.inner.timeout))
    }

    /// Alle SSRCs, die gerade sprechen
    pub fn sprechende(&self) -> Vec<u32> {
        let jetzt = Instant::now();
        let mut ssrcs: Vec<u32> = self
            .inner
            .eintraege
            .iter()
            .filter(|e| e.sprechen.spricht(jetzt, self.inner.timeout))
            .map(|e| *e.key())
            .collect();
        ssrcs.sort_unstable();
        ssrcs
    }

    /// Periodische Stille-Pruefung; liefert alle SSRCs, die verstummt sind
    pub fn sweep(&self, jetzt: Instant) -> Vec<(u32, Option<MemberId>)> {
        let timeout = self.inner.timeout;
        let mut verstummt = Vec::new();
        for mut eintrag in self.inner.eintraege.iter_mut() {
            if eintrag.sprechen.pruefen(jetzt, timeout) {
                verstummt.push((*eintrag.key(), eintrag.member));
            }
        }
        verstummt
    }

    pub fn info(&self, ssrc: u32) -> Option<SsrcInfo> {
        self.inner
            .eintraege
            .get(&ssrc)
            .map(|e| e.info(ssrc, Instant::now(), self.inner.timeout))
    }

    // -----------------------------------------------------------------------
    // Decoder
    // -----------------------------------------------------------------------

    /// Dekodiert einen Payload mit dem Decoder der SSRC.
    ///
    /// Der Decoder wird bei Bedarf ueber die Fabrik erzeugt. Fehlende
    /// Frames davor werden verschleiert, um den Decoder-Zustand
    /// auszurichten; das Ergebnis davon wird verworfen.
    pub fn dekodieren(
        &self,
        ssrc: u32,
        opus: &[u8],
        verloren: u16,
        fabrik: &DecoderFabrik,
    ) -> Result<Vec<i16>, DecodeError> {
        let kontext = self
            .inner
            .eintraege
            .get(&ssrc)
            .map(|e| Arc::clone(&e.dekoder))
            .ok_or_else(|| DecodeError::Erstellung(format!("SSRC {ssrc} nicht registriert")))?;

        let mut slot = kontext.lock();
        if slot.is_none() {
            *slot = Some(fabrik()?);
            debug!(ssrc, "Decoder erstellt");
        }
        let Some(dekoder) = slot.as_mut() else {
            return Err(DecodeError::Erstellung(format!("SSRC {ssrc}: kein Decoder")));
        };

        if verloren == 1 {
            if let Err(e) = dekoder.decode_verloren(Some(opus)) {
                debug!(ssrc, fehler = %e, "FEC fehlgeschlagen");
            }
        } else {
            for _ in 0..verloren.min(MAX_VERSCHLEIERTE_FRAMES) {
                if let Err(e) = dekoder.decode_verloren(None) {
                    debug!(ssrc, fehler = %e, "Verlust-Verschleierung fehlgeschlagen");
                    break;
                }
            }
        }

        dekoder.decode(opus)
    }

    /// Gibt den Decoder einer SSRC frei, wenn keiner mehr dekodiert
    pub fn decoder_freigeben(&self, ssrc: u32) {
        let slot = self
            .inner
            .eintraege
            .get(&ssrc)
            .map(|e| Arc::clone(&e.dekoder));
        if let Some(slot) = slot {
            if slot.lock().take().is_some() {
                debug!(ssrc, "Decoder freigegeben");
            }
        }
    }

    pub fn hat_decoder(&self, ssrc: u32) -> bool {
        self.info(ssrc).is_some_and(|i| i.hat_decoder)
    }

    /// Verwirft alle Decoder-Kontexte (Kanalwechsel)
    pub fn destroy_all_decoders(&self) {
        let slots: Vec<DecoderSlot> = self
            .inner
            .eintraege
            .iter()
            .map(|e| Arc::clone(&e.dekoder))
            .collect();
        for slot in slots {
            slot.lock().take();
        }
        debug!("Alle Decoder verworfen");
    }

    // -----------------------------------------------------------------------
    // Verwaltung
    // -----------------------------------------------------------------------

    pub fn enthaelt(&self, ssrc: u32) -> bool {
        self.inner.eintraege.contains_key(&ssrc)
    }

    pub fn len(&self) -> usize {
        self.inner.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.eintraege.is_empty()
    }

    /// Verwirft alle Eintraege (Sitzungsende); liefert die SSRCs, deren
    /// Sprechphase noch offen war
    pub fn clear(&self) -> Vec<(u32, Option<MemberId>)> {
        let mut offen: Vec<(u32, Option<MemberId>)> = self
            .inner
            .eintraege
            .iter()
            .filter(|e| e.sprechen.offen())
            .map(|e| (*e.key(), e.member))
            .collect();
        offen.sort_unstable_by_key(|(ssrc, _)| *ssrc);

        self.inner.eintraege.clear();
        self.inner.member_index.clear();
        self.inner.entfernt.lock().clear();
        offen
    }

    fn entfernt_merken(&self, entfernt: &mut VecDeque<u32>, ssrc: u32) {
        if self.inner.entfernt_kapazitaet == 0 {
            return;
        }
        entfernt.retain(|s| *s != ssrc);
        if entfernt.len() >= self.inner.entfernt_kapazitaet {
            entfernt.pop_front();
        }
        entfernt.push_back(ssrc);
    }

    fn entfernt_vergessen(&self, ssrc: u32) {
        self.inner.entfernt.lock().retain(|s| *s != ssrc);
    }
}
