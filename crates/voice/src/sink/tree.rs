//! Arena des Sink-Baums
//!
//! Jeder Knoten liegt in einem Slot mit Generationszaehler. Waehrend ein
//! Knoten schreibt, sind sein Sink und seine Kinderliste aus dem Slot
//! entnommen; der [`Ausgang`] erreicht nur diese Kinder. Fehler und Panics
//! eines Knotens bleiben auf ihn beschraenkt, Geschwister erhalten die
//! Einheit trotzdem.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use lauscher_protocol::RtcpPaket;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{AudioSink, SinkId, VoiceData};
use crate::dispatcher::{Listener, ListenerTabelle};
use crate::error::{SinkError, VoiceError, VoiceResult};
use crate::types::MemberId;

/// Geteilter Sink-Baum; der Empfangs-Thread haelt die Sperre, waehrend er
/// ein Paket in den Baum schreibt
pub type SinkHandle = Arc<Mutex<SinkTree>>;

/// Ergebnis eines Schreibvorgangs am Baum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkErgebnis {
    /// Normal weiter empfangen
    Weiter,
    /// Ein Sink hat das regulaere Ende verlangt
    Beenden,
    /// Ein Sink meldet einen nicht behebbaren Fehler
    Abbruch(SinkError),
}

struct Knoten {
    /// `None` solange der Knoten gerade schreibt
    sink: Option<Box<dyn AudioSink>>,
    eltern: Option<SinkId>,
    kinder: Vec<SinkId>,
    will_dekodiert: bool,
    name: String,
}

struct Slot {
    generation: u32,
    knoten: Option<Knoten>,
}

/// Baum aus Sink-Knoten mit genau einer Wurzel
pub struct SinkTree {
    slots: Vec<Slot>,
    frei: Vec<u32>,
    wurzel: SinkId,
    dekodier_anzahl: usize,
    listener: Arc<ListenerTabelle>,
    abbruch: Option<SinkError>,
    beenden: bool,
    fehler_anzahl: u64,
    aufgeraeumt: bool,
}

impl SinkTree {
    /// Erstellt einen Baum mit `wurzel` als einzigem Knoten
    pub fn neu<S: AudioSink + 'static>(wurzel: S) -> VoiceResult<Self> {
        let mut baum = Self {
            slots: Vec::new(),
            frei: Vec::new(),
            wurzel: SinkId::neu(0, 0),
            dekodier_anzahl: 0,
            listener: Arc::new(ListenerTabelle::neu()),
            abbruch: None,
            beenden: false,
            fehler_anzahl: 0,
            aufgeraeumt: false,
        };
        baum.wurzel = baum.einfuegen(None, Box::new(wurzel))?;
        Ok(baum)
    }

    pub fn root(&self) -> SinkId {
        self.wurzel
    }

    /// Haengt `sink` als letztes Kind unter `eltern` an.
    ///
    /// Die Listener-Tabelle des Sinks wird hier geprueft; ein asynchroner
    /// Listener ist ein Registrierungsfehler.
    pub fn attach<S: AudioSink + 'static>(&mut self, eltern: SinkId, sink: S) -> VoiceResult<SinkId> {
        if self.knoten(eltern).is_none() {
            return Err(VoiceError::UnbekannterSink(eltern));
        }
        let id = self.einfuegen(Some(eltern), Box::new(sink))?;
        if let Some(knoten) = self.knoten_mut(eltern) {
            knoten.kinder.push(id);
        }
        Ok(id)
    }

    /// Haengt einen Knoten samt Teilbaum ab; Aufraeumen von unten nach oben
    pub fn detach(&mut self, id: SinkId) -> VoiceResult<()> {
        if id == self.wurzel {
            return Err(VoiceError::WurzelNichtEntfernbar);
        }
        let eltern = self
            .knoten(id)
            .ok_or(VoiceError::UnbekannterSink(id))?
            .eltern;

        if let Some(eltern) = eltern {
            if let Some(knoten) = self.knoten_mut(eltern) {
                knoten.kinder.retain(|k| *k != id);
            }
        }

        let mut reihenfolge = Vec::new();
        self.postorder(id, &mut reihenfolge);
        for knoten_id in reihenfolge {
            self.entfernen(knoten_id);
        }
        Ok(())
    }

    /// Ersetzt die Wurzel durch `sink`.
    ///
    /// Der bisherige Baum wird komplett von unten nach oben aufgeraeumt;
    /// seine IDs werden ungueltig. Wird der neue Sink abgelehnt, bleibt der
    /// alte Baum unveraendert.
    pub fn wurzel_ersetzen<S: AudioSink + 'static>(&mut self, sink: S) -> VoiceResult<SinkId> {
        if self.aufgeraeumt {
            return Err(VoiceError::NichtAktiv);
        }
        let neu = self.einfuegen(None, Box::new(sink))?;

        let mut reihenfolge = Vec::new();
        self.postorder(self.wurzel, &mut reihenfolge);
        for id in reihenfolge {
            self.entfernen(id);
        }
        self.wurzel = neu;
        info!(sink = self.name(neu).unwrap_or_default(), "Wurzel-Sink ersetzt");
        Ok(neu)
    }

    pub fn parent(&self, id: SinkId) -> Option<SinkId> {
        self.knoten(id).and_then(|k| k.eltern)
    }

    pub fn children(&self, id: SinkId) -> &[SinkId] {
        self.knoten(id).map(|k| k.kinder.as_slice()).unwrap_or(&[])
    }

    pub fn name(&self, id: SinkId) -> Option<&str> {
        self.knoten(id).map(|k| k.name.as_str())
    }

    pub fn enthaelt(&self, id: SinkId) -> bool {
        self.knoten(id).is_some()
    }

    /// Alle Knoten in Tiefensuche, Eltern vor Kindern
    pub fn walk(&self) -> Vec<SinkId> {
        let mut ids = Vec::new();
        let mut stapel = vec![self.wurzel];
        while let Some(id) = stapel.pop() {
            let Some(knoten) = self.knoten(id) else {
                continue;
            };
            ids.push(id);
            stapel.extend(knoten.kinder.iter().rev());
        }
        ids
    }

    /// Mindestens ein angehaengter Knoten verlangt PCM
    pub fn wants_decoded(&self) -> bool {
        self.dekodier_anzahl > 0
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.knoten.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn listener_tabelle(&self) -> Arc<ListenerTabelle> {
        Arc::clone(&self.listener)
    }

    /// Anzahl isolierter Schreibfehler und Panics seit Erstellung
    pub fn fehler_anzahl(&self) -> u64 {
        self.fehler_anzahl
    }

    pub fn ist_aufgeraeumt(&self) -> bool {
        self.aufgeraeumt
    }

    // -----------------------------------------------------------------------
    // Schreiben
    // -----------------------------------------------------------------------

    /// Schreibt eine Einheit in die Wurzel
    pub fn write(&mut self, member: Option<MemberId>, data: &VoiceData) -> SinkErgebnis {
        if self.aufgeraeumt {
            return SinkErgebnis::Beenden;
        }
        self.abbruch = None;
        self.beenden = false;
        let wurzel = self.wurzel;
        self.knoten_ausfuehren(wurzel, |sink, ausgang| sink.write(member, data, ausgang));
        self.ergebnis()
    }

    /// Reicht ein RTCP-Paket in die Wurzel
    pub fn write_rtcp(&mut self, paket: &RtcpPaket) -> SinkErgebnis {
        if self.aufgeraeumt {
            return SinkErgebnis::Beenden;
        }
        self.abbruch = None;
        self.beenden = false;
        let wurzel = self.wurzel;
        self.knoten_ausfuehren(wurzel, |sink, ausgang| sink.write_rtcp(paket, ausgang));
        self.ergebnis()
    }

    /// Ruft `cleanup` fuer jeden Knoten genau einmal auf (Kinder zuerst)
    /// und leert den Baum
    pub fn cleanup_all(&mut self) {
        if self.aufgeraeumt {
            return;
        }
        self.aufgeraeumt = true;

        let mut reihenfolge = Vec::new();
        self.postorder(self.wurzel, &mut reihenfolge);
        for id in reihenfolge {
            self.entfernen(id);
        }
        self.listener.leeren();
        info!("Sink-Baum aufgeraeumt");
    }

    fn ergebnis(&mut self) -> SinkErgebnis {
        if let Some(fehler) = self.abbruch.take() {
            SinkErgebnis::Abbruch(fehler)
        } else if self.beenden {
            SinkErgebnis::Beenden
        } else {
            SinkErgebnis::Weiter
        }
    }

    fn knoten_ausfuehren<F>(&mut self, id: SinkId, f: F)
    where
        F: FnOnce(&mut dyn AudioSink, &mut Ausgang<'_>) -> Result<(), SinkError>,
    {
        let Some(knoten) = self.knoten_mut(id) else {
            return;
        };
        // Ein Knoten ohne Sink schreibt gerade bereits
        let Some(mut sink) = knoten.sink.take() else {
            return;
        };
        let kinder = std::mem::take(&mut knoten.kinder);

        let ergebnis = {
            let mut ausgang = Ausgang {
                baum: self,
                kinder: &kinder,
            };
            catch_unwind(AssertUnwindSafe(|| f(sink.as_mut(), &mut ausgang)))
        };

        if let Some(knoten) = self.knoten_mut(id) {
            knoten.sink = Some(sink);
            knoten.kinder = kinder;
        }
        self.fehler_behandeln(id, ergebnis);
    }

    fn fehler_behandeln(
        &mut self,
        id: SinkId,
        ergebnis: Result<Result<(), SinkError>, Box<dyn Any + Send>>,
    ) {
        let name = self.name(id).unwrap_or("?").to_string();
        match ergebnis {
            Ok(Ok(())) => {}
            Ok(Err(SinkError::Schreiben(grund))) => {
                self.fehler_anzahl += 1;
                warn!(sink = %name, grund = %grund, "Sink-Schreibfehler, Einheit uebersprungen");
            }
            Ok(Err(SinkError::Abbruch(grund))) => {
                self.fehler_anzahl += 1;
                warn!(sink = %name, grund = %grund, "Sink bricht den Empfang ab");
                if self.abbruch.is_none() {
                    self.abbruch = Some(SinkError::Abbruch(grund));
                }
            }
            Ok(Err(SinkError::Beenden)) => {
                debug!(sink = %name, "Sink verlangt Ende des Empfangs");
                self.beenden = true;
            }
            Err(panik) => {
                self.fehler_anzahl += 1;
                warn!(sink = %name, panik = %panik_text(panik.as_ref()), "Sink ist abgestuerzt");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Arena
    // -----------------------------------------------------------------------

    fn einfuegen(&mut self, eltern: Option<SinkId>, sink: Box<dyn AudioSink>) -> VoiceResult<SinkId> {
        let listeners = sink.listeners();
        if let Some((art, _)) = listeners.iter().find(|(_, l)| l.ist_async()) {
            return Err(VoiceError::UngueltigerListener { art: *art });
        }

        let knoten = Knoten {
            will_dekodiert: sink.wants_decoded(),
            name: sink.name().to_string(),
            sink: Some(sink),
            eltern,
            kinder: Vec::new(),
        };

        let id = match self.frei.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.knoten = Some(knoten);
                SinkId::neu(index, slot.generation)
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| VoiceError::Konfiguration("Zu viele Sinks".into()))?;
                self.slots.push(Slot {
                    generation: 0,
                    knoten: Some(knoten),
                });
                SinkId::neu(index, 0)
            }
        };

        for (art, listener) in listeners {
            if let Listener::Sync(l) = listener {
                self.listener.registrieren(id, art, l);
            }
        }

        if let Some((will_dekodiert, name)) = self
            .knoten(id)
            .map(|knoten| (knoten.will_dekodiert, knoten.name.clone()))
        {
            if will_dekodiert {
                self.dekodier_anzahl += 1;
            }
            debug!(sink = %name, dekodiert = will_dekodiert, "Sink angehaengt");
        }
        Ok(id)
    }

    fn entfernen(&mut self, id: SinkId) {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return;
        };
        if slot.generation != id.generation() {
            return;
        }
        let Some(mut knoten) = slot.knoten.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.frei.push(id.index() as u32);

        if knoten.will_dekodiert {
            self.dekodier_anzahl -= 1;
        }
        self.listener.entfernen(id);

        if let Some(mut sink) = knoten.sink.take() {
            if let Err(panik) = catch_unwind(AssertUnwindSafe(|| sink.cleanup())) {
                warn!(sink = %knoten.name, panik = %panik_text(panik.as_ref()), "Sink-Cleanup ist abgestuerzt");
            }
        }
        debug!(sink = %knoten.name, "Sink abgehaengt");
    }

    fn postorder(&self, id: SinkId, reihenfolge: &mut Vec<SinkId>) {
        let Some(knoten) = self.knoten(id) else {
            return;
        };
        for kind in &knoten.kinder {
            self.postorder(*kind, reihenfolge);
        }
        reihenfolge.push(id);
    }

    fn knoten(&self, id: SinkId) -> Option<&Knoten> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.knoten.as_ref())
    }

    fn knoten_mut(&mut self, id: SinkId) -> Option<&mut Knoten> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.knoten.as_mut())
    }
}

impl Drop for SinkTree {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}

fn panik_text(panik: &(dyn Any + Send)) -> String {
    if let Some(s) = panik.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panik.downcast_ref::<String>() {
        s.clone()
    } else {
        "unbekannt".to_string()
    }
}

// ---------------------------------------------------------------------------
// Ausgang
// ---------------------------------------------------------------------------

/// Weiterleitung eines Knotens an seine Kinder
///
/// Jeder Kind-Aufruf ist isoliert: Fehler eines Kindes werden behandelt
/// und die Geschwister erhalten die Einheit trotzdem.
pub struct Ausgang<'a> {
    baum: &'a mut SinkTree,
    kinder: &'a [SinkId],
}

impl Ausgang<'_> {
    /// Kinder in Einfuegereihenfolge
    pub fn kinder(&self) -> &[SinkId] {
        self.kinder
    }

    /// An alle Kinder in Einfuegereihenfolge
    pub fn weiterleiten(&mut self, member: Option<MemberId>, data: &VoiceData) {
        let kinder = self.kinder;
        for &kind in kinder {
            self.baum
                .knoten_ausfuehren(kind, |sink, ausgang| sink.write(member, data, ausgang));
        }
    }

    /// An das Kind an Position `index`; `false` wenn es keins gibt
    pub fn weiterleiten_an(&mut self, index: usize, member: Option<MemberId>, data: &VoiceData) -> bool {
        let Some(&kind) = self.kinder.get(index) else {
            return false;
        };
        self.baum
            .knoten_ausfuehren(kind, |sink, ausgang| sink.write(member, data, ausgang));
        true
    }

    pub fn rtcp_weiterleiten(&mut self, paket: &RtcpPaket) {
        let kinder = self.kinder;
        for &kind in kinder {
            self.baum
                .knoten_ausfuehren(kind, |sink, ausgang| sink.write_rtcp(paket, ausgang));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventArt, VoiceEvent};
    use lauscher_crypto::RtpFrame;
    use lauscher_protocol::RtpHeader;

    type Protokoll = Arc<Mutex<Vec<String>>>;

    /// Schreibt seinen Namen ins Protokoll und leitet weiter
    struct Knotenpunkt {
        name: &'static str,
        protokoll: Protokoll,
        dekodiert: bool,
        verhalten: Verhalten,
    }

    #[derive(Clone, Copy)]
    enum Verhalten {
        Normal,
        Fehler,
        Panik,
        Abbruch,
        Beenden,
    }

    impl Knotenpunkt {
        fn neu(name: &'static str, protokoll: &Protokoll) -> Self {
            Self {
                name,
                protokoll: Arc::clone(protokoll),
                dekodiert: false,
                verhalten: Verhalten::Normal,
            }
        }

        fn mit(mut self, verhalten: Verhalten) -> Self {
            self.verhalten = verhalten;
            self
        }

        fn dekodiert(mut self) -> Self {
            self.dekodiert = true;
            self
        }
    }

    impl AudioSink for Knotenpunkt {
        fn wants_decoded(&self) -> bool {
            self.dekodiert
        }

        fn write(
            &mut self,
            member: Option<MemberId>,
            data: &VoiceData,
            ausgang: &mut Ausgang<'_>,
        ) -> Result<(), SinkError> {
            self.protokoll
                .lock()
                .push(format!("{}:{}", self.name, data.sequenz()));
            match self.verhalten {
                Verhalten::Normal => {
                    ausgang.weiterleiten(member, data);
                    Ok(())
                }
                Verhalten::Fehler => Err(SinkError::Schreiben("kaputt".into())),
                Verhalten::Panik => panic!("Sink-Panik"),
                Verhalten::Abbruch => Err(SinkError::Abbruch("Platte voll".into())),
                Verhalten::Beenden => Err(SinkError::Beenden),
            }
        }

        fn cleanup(&mut self) {
            self.protokoll.lock().push(format!("cleanup:{}", self.name));
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    struct MitListener(Listener);

    impl AudioSink for MitListener {
        fn write(&mut self, _: Option<MemberId>, _: &VoiceData, _: &mut Ausgang<'_>) -> Result<(), SinkError> {
            Ok(())
        }

        fn listeners(&self) -> Vec<(EventArt, Listener)> {
            vec![(EventArt::SpeakingStarted, self.0.clone())]
        }
    }

    fn einheit(sequenz: u16) -> VoiceData {
        let frame = RtpFrame {
            header: RtpHeader::neu(120, sequenz, 0, 1001),
            erweiterung: None,
            payload: vec![0xAA; 20],
            nonce: 0,
            roh: Vec::new(),
        };
        VoiceData::neu(None, Arc::new(frame), None)
    }

    fn protokoll() -> Protokoll {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn weiterleitung_in_einfuegereihenfolge() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        let a = baum.attach(baum.root(), Knotenpunkt::neu("a", &p)).unwrap();
        baum.attach(baum.root(), Knotenpunkt::neu("b", &p)).unwrap();
        baum.attach(a, Knotenpunkt::neu("a1", &p)).unwrap();

        assert_eq!(baum.write(None, &einheit(1)), SinkErgebnis::Weiter);
        assert_eq!(*p.lock(), vec!["wurzel:1", "a:1", "a1:1", "b:1"]);
        assert_eq!(baum.parent(a), Some(baum.root()));
        assert_eq!(baum.children(baum.root()).len(), 2);
        assert_eq!(baum.walk().len(), 4);
    }

    #[test]
    fn fehlerhafter_teilbaum_ist_isoliert() {
        for verhalten in [Verhalten::Fehler, Verhalten::Panik] {
            let p = protokoll();
            let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
            let kaputt = baum
                .attach(baum.root(), Knotenpunkt::neu("kaputt", &p).mit(verhalten))
                .unwrap();
            baum.attach(kaputt, Knotenpunkt::neu("unter_kaputt", &p)).unwrap();
            baum.attach(baum.root(), Knotenpunkt::neu("gesund", &p)).unwrap();

            for seq in 1..=3 {
                assert_eq!(baum.write(None, &einheit(seq)), SinkErgebnis::Weiter);
            }

            let eintraege = p.lock().clone();
            for seq in 1..=3 {
                assert!(eintraege.contains(&format!("gesund:{seq}")));
                assert!(eintraege.contains(&format!("kaputt:{seq}")));
            }
            assert!(!eintraege.iter().any(|e| e.starts_with("unter_kaputt")));
            assert_eq!(baum.fehler_anzahl(), 3);
        }
    }

    #[test]
    fn abbruch_und_beenden_werden_gemeldet() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        let ab = baum
            .attach(baum.root(), Knotenpunkt::neu("ab", &p).mit(Verhalten::Abbruch))
            .unwrap();
        baum.attach(baum.root(), Knotenpunkt::neu("danach", &p)).unwrap();

        assert_eq!(
            baum.write(None, &einheit(1)),
            SinkErgebnis::Abbruch(SinkError::Abbruch("Platte voll".into()))
        );
        // Geschwister hat die Einheit trotzdem bekommen
        assert!(p.lock().contains(&"danach:1".to_string()));

        baum.detach(ab).unwrap();
        baum.attach(baum.root(), Knotenpunkt::neu("ende", &p).mit(Verhalten::Beenden))
            .unwrap();
        assert_eq!(baum.write(None, &einheit(2)), SinkErgebnis::Beenden);
    }

    #[test]
    fn detach_raeumt_teilbaum_kinder_zuerst_auf() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        let a = baum.attach(baum.root(), Knotenpunkt::neu("a", &p)).unwrap();
        let a1 = baum.attach(a, Knotenpunkt::neu("a1", &p)).unwrap();
        baum.attach(a1, Knotenpunkt::neu("a11", &p)).unwrap();

        baum.detach(a).unwrap();
        assert_eq!(*p.lock(), vec!["cleanup:a11", "cleanup:a1", "cleanup:a"]);
        assert_eq!(baum.len(), 1);
        assert!(!baum.enthaelt(a1));
        assert!(matches!(baum.detach(a), Err(VoiceError::UnbekannterSink(_))));
        assert!(matches!(
            baum.detach(baum.root()),
            Err(VoiceError::WurzelNichtEntfernbar)
        ));
    }

    #[test]
    fn alte_id_bleibt_nach_slot_wiederverwendung_ungueltig() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        let alt = baum.attach(baum.root(), Knotenpunkt::neu("alt", &p)).unwrap();
        baum.detach(alt).unwrap();
        let neu = baum.attach(baum.root(), Knotenpunkt::neu("neu", &p)).unwrap();

        assert_ne!(alt, neu);
        assert!(!baum.enthaelt(alt));
        assert_eq!(baum.name(neu), Some("neu"));
    }

    #[test]
    fn cleanup_all_genau_einmal() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        baum.attach(baum.root(), Knotenpunkt::neu("kind", &p)).unwrap();

        baum.cleanup_all();
        baum.cleanup_all();
        drop(baum);

        assert_eq!(*p.lock(), vec!["cleanup:kind", "cleanup:wurzel"]);
    }

    #[test]
    fn drop_raeumt_auf() {
        let p = protokoll();
        {
            let _baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        }
        assert_eq!(*p.lock(), vec!["cleanup:wurzel"]);
    }

    #[test]
    fn dekodier_wunsch_folgt_angehaengten_knoten() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        assert!(!baum.wants_decoded());

        let pcm = baum.attach(baum.root(), Knotenpunkt::neu("pcm", &p).dekodiert()).unwrap();
        assert!(baum.wants_decoded());

        baum.detach(pcm).unwrap();
        assert!(!baum.wants_decoded());
    }

    #[test]
    fn async_listener_im_sink_wird_abgelehnt() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        let ergebnis = baum.attach(
            baum.root(),
            MitListener(Listener::asynchron(|_| async {})),
        );
        assert!(matches!(
            ergebnis,
            Err(VoiceError::UngueltigerListener {
                art: EventArt::SpeakingStarted
            })
        ));
        assert_eq!(baum.len(), 1);

        assert!(matches!(
            SinkTree::neu(MitListener(Listener::asynchron(|_| async {}))),
            Err(VoiceError::UngueltigerListener { .. })
        ));
    }

    #[test]
    fn sync_listener_werden_registriert_und_entfernt() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        let id = baum
            .attach(baum.root(), MitListener(Listener::sync(|_: &VoiceEvent| {})))
            .unwrap();
        assert_eq!(baum.listener_tabelle().anzahl(), 1);

        baum.detach(id).unwrap();
        assert_eq!(baum.listener_tabelle().anzahl(), 0);
    }

    #[test]
    fn wurzel_ersetzen_raeumt_alten_baum_auf() {
        let p = protokoll();
        let mut baum = SinkTree::neu(MitListener(Listener::sync(|_: &VoiceEvent| {}))).unwrap();
        let alte_wurzel = baum.root();
        let a = baum.attach(alte_wurzel, Knotenpunkt::neu("a", &p).dekodiert()).unwrap();
        baum.attach(a, Knotenpunkt::neu("a1", &p)).unwrap();
        assert!(baum.wants_decoded());
        assert_eq!(baum.listener_tabelle().anzahl(), 1);

        let neu = baum.wurzel_ersetzen(Knotenpunkt::neu("neu", &p)).unwrap();
        assert_eq!(*p.lock(), vec!["cleanup:a1", "cleanup:a"]);
        assert_eq!(baum.root(), neu);
        assert_eq!(baum.len(), 1);
        assert!(!baum.enthaelt(alte_wurzel));
        assert!(!baum.enthaelt(a));
        assert!(!baum.wants_decoded());
        assert_eq!(baum.listener_tabelle().anzahl(), 0);

        assert_eq!(baum.write(None, &einheit(5)), SinkErgebnis::Weiter);
        assert!(p.lock().contains(&"neu:5".to_string()));

        // Neue Wurzel meldet ihre Listener an
        baum.wurzel_ersetzen(MitListener(Listener::sync(|_: &VoiceEvent| {})))
            .unwrap();
        assert_eq!(baum.listener_tabelle().anzahl(), 1);
        assert_eq!(p.lock().last().map(String::as_str), Some("cleanup:neu"));

        baum.cleanup_all();
        assert_eq!(p.lock().iter().filter(|e| *e == "cleanup:neu").count(), 1);
    }

    #[test]
    fn abgelehnte_wurzel_laesst_baum_unveraendert() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        let kind = baum.attach(baum.root(), Knotenpunkt::neu("kind", &p)).unwrap();

        let ergebnis = baum.wurzel_ersetzen(MitListener(Listener::asynchron(|_| async {})));
        assert!(matches!(ergebnis, Err(VoiceError::UngueltigerListener { .. })));
        assert!(baum.enthaelt(kind));
        assert_eq!(baum.name(baum.root()), Some("wurzel"));
        assert!(p.lock().is_empty());

        baum.cleanup_all();
        assert!(matches!(
            baum.wurzel_ersetzen(Knotenpunkt::neu("spaet", &p)),
            Err(VoiceError::NichtAktiv)
        ));
    }

    #[test]
    fn geschriebener_baum_nach_cleanup_beendet() {
        let p = protokoll();
        let mut baum = SinkTree::neu(Knotenpunkt::neu("wurzel", &p)).unwrap();
        baum.cleanup_all();
        assert_eq!(baum.write(None, &einheit(1)), SinkErgebnis::Beenden);
        assert!(baum.is_empty());
    }
}
