//! Voice-Session – Lebenszyklus des Empfangs
//!
//! Eine Session entsteht nach dem (externen) Handshake mit einem
//! verbundenen UDP-Socket und dem Sitzungsschluessel. Pro Session laeuft
//! hoechstens ein `listen` gleichzeitig; der Finalisierer eines Laufs wird
//! genau einmal aufgerufen.
//!
//! ## Threads
//! - `lauscher-empfang` – Empfangsschleife, ein Thread pro `listen`
//! - `lauscher-events` – Event-Dispatcher, lebt so lange wie die Session
//!
//! Der Control-Kanal spricht ueber [`ControlHandle`] mit der Session.

use std::net::UdpSocket;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use lauscher_crypto::{PaketEntschluesseler, SessionSchluessel, VerschluesselungsModus};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::EmpfangsConfig;
use crate::decoder::{opus_fabrik, DecoderFabrik};
use crate::dispatcher::{EventDispatcher, EventSender, Listener};
use crate::error::{VoiceError, VoiceResult};
use crate::event::{EventArt, VoiceEvent};
use crate::receiver::Empfaenger;
use crate::registry::{IdentitaetsUpdate, SsrcRegistry};
use crate::sink::{AudioSink, SinkHandle, SinkId, SinkTree};
use crate::telemetry::{EmpfangsStatistik, StatistikSnapshot};
use crate::types::{MemberId, SprechFlags, VoiceFlags, VoicePlatform};

/// Wird genau einmal pro `listen` aufgerufen: `None` bei regulaerem Ende,
/// sonst der beendende Fehler
pub type Finalisierer = Box<dyn FnOnce(Option<VoiceError>) + Send>;

struct Lauf {
    stopp: Arc<AtomicBool>,
    sinks: SinkHandle,
    thread: JoinHandle<()>,
}

struct SessionInner {
    socket: UdpSocket,
    config: EmpfangsConfig,
    entschluesseler: Arc<RwLock<PaketEntschluesseler>>,
    registry: SsrcRegistry,
    dispatcher: EventDispatcher,
    statistik: Arc<EmpfangsStatistik>,
    fabrik: RwLock<DecoderFabrik>,
    lauf: Mutex<Option<Lauf>>,
    aktiv: Arc<AtomicBool>,
}

/// Empfangsseite einer Voice-Verbindung
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

impl VoiceSession {
    /// Erstellt eine Session auf einem bereits ausgehandelten Socket
    pub fn neu(
        socket: UdpSocket,
        modus: VerschluesselungsModus,
        schluessel: &SessionSchluessel,
        config: EmpfangsConfig,
    ) -> VoiceResult<Self> {
        config.validieren()?;
        let dispatcher = EventDispatcher::starten()?;

        info!(
            modus = %modus,
            lokal = ?socket.local_addr().ok(),
            "Voice-Session erstellt"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                socket,
                entschluesseler: Arc::new(RwLock::new(PaketEntschluesseler::neu(modus, schluessel))),
                registry: SsrcRegistry::neu(&config),
                dispatcher,
                statistik: Arc::new(EmpfangsStatistik::neu()),
                fabrik: RwLock::new(opus_fabrik(&config.dekoder)),
                lauf: Mutex::new(None),
                aktiv: Arc::new(AtomicBool::new(false)),
                config,
            }),
        })
    }

    /// Ersetzt die Decoder-Fabrik (wirkt ab dem naechsten `listen`)
    pub fn mit_decoder_fabrik(self, fabrik: DecoderFabrik) -> Self {
        *self.inner.fabrik.write() = fabrik;
        self
    }

    /// Scheduler fuer asynchrone Session-Listener
    pub fn mit_async_handle(self, handle: tokio::runtime::Handle) -> Self {
        self.inner.dispatcher.laufzeit_setzen(handle);
        self
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Startet den Empfang in den Sink-Baum `baum`
    ///
    /// # Fehler
    /// - `BereitsAktiv` wenn bereits ein Empfang laeuft
    /// - `Socket` wenn der Socket nicht geklont werden kann
    pub fn listen(&self, baum: SinkTree, finalisierer: Finalisierer) -> VoiceResult<SinkHandle> {
        let mut lauf = self.inner.lauf.lock();
        if self.inner.aktiv.load(Ordering::Acquire) {
            return Err(VoiceError::BereitsAktiv);
        }
        if let Some(alt) = lauf.take() {
            thread_abwarten(alt.thread);
        }

        let socket = self.inner.socket.try_clone()?;
        self.inner
            .dispatcher
            .sink_tabelle_setzen(Some(baum.listener_tabelle()));
        let sinks: SinkHandle = Arc::new(Mutex::new(baum));
        let stopp = Arc::new(AtomicBool::new(false));

        let empfaenger = Empfaenger {
            socket,
            entschluesseler: Arc::clone(&self.inner.entschluesseler),
            registry: self.inner.registry.clone(),
            sinks: Arc::clone(&sinks),
            events: self.inner.dispatcher.sender(),
            statistik: Arc::clone(&self.inner.statistik),
            fabrik: Arc::clone(&self.inner.fabrik.read()),
            stopp: Arc::clone(&stopp),
            config: self.inner.config.clone(),
        };

        let aktiv = Arc::clone(&self.inner.aktiv);
        aktiv.store(true, Ordering::Release);

        let thread = std::thread::Builder::new()
            .name("lauscher-empfang".to_string())
            .spawn(move || empfangs_thread(empfaenger, aktiv, finalisierer))
            .map_err(|e| {
                self.inner.aktiv.store(false, Ordering::Release);
                VoiceError::Thread(e.to_string())
            })?;

        info!("Empfang gestartet");
        *lauf = Some(Lauf {
            stopp,
            sinks: Arc::clone(&sinks),
            thread,
        });
        Ok(sinks)
    }

    /// Fordert das Ende des Empfangs an; aus jedem Thread aufrufbar.
    ///
    /// Wirkt spaetestens nach einem Poll-Intervall. Blockiert nicht.
    pub fn stop_listening(&self) {
        if let Some(lauf) = self.inner.lauf.lock().as_ref() {
            if !lauf.stopp.swap(true, Ordering::AcqRel) {
                info!("Stopp des Empfangs angefordert");
            }
        }
    }

    /// Wartet bis der Empfangs-Thread beendet ist (Finalisierer gelaufen)
    pub fn warten(&self) {
        let lauf = self.inner.lauf.lock().take();
        if let Some(lauf) = lauf {
            thread_abwarten(lauf.thread);
        }
    }

    pub fn is_listening(&self) -> bool {
        self.inner.aktiv.load(Ordering::Acquire)
    }

    /// Sink-Baum des aktuellen Laufs zum An- und Abhaengen zur Laufzeit
    pub fn sinks(&self) -> Option<SinkHandle> {
        self.inner
            .lauf
            .lock()
            .as_ref()
            .filter(|_| self.is_listening())
            .map(|l| Arc::clone(&l.sinks))
    }

    /// Ersetzt die Wurzel des laufenden Sink-Baums.
    ///
    /// Der alte Baum wird von den Blaettern aufwaerts aufgeraeumt, seine
    /// Listener werden abgemeldet.
    ///
    /// # Fehler
    /// - `NichtAktiv` wenn kein Empfang laeuft
    /// - `UngueltigerListener` wenn der neue Sink asynchrone Listener traegt
    pub fn sink_ersetzen<S: AudioSink + 'static>(&self, sink: S) -> VoiceResult<SinkId> {
        let sinks = self.sinks().ok_or(VoiceError::NichtAktiv)?;
        let mut baum = sinks.lock();
        baum.wurzel_ersetzen(sink)
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> SsrcRegistry {
        self.inner.registry.clone()
    }

    pub fn statistik(&self) -> StatistikSnapshot {
        self.inner.statistik.snapshot()
    }

    pub fn is_speaking(&self, ssrc: u32) -> bool {
        self.inner.registry.is_speaking(ssrc)
    }

    pub fn config(&self) -> &EmpfangsConfig {
        &self.inner.config
    }

    pub fn modus(&self) -> VerschluesselungsModus {
        self.inner.entschluesseler.read().modus()
    }

    // -----------------------------------------------------------------------
    // Listener
    // -----------------------------------------------------------------------

    /// Registriert einen asynchronen Listener auf dem Scheduler der Anwendung
    pub fn add_listener(&self, art: EventArt, listener: Listener) -> VoiceResult<()> {
        self.inner.dispatcher.add_listener(art, listener)
    }

    pub fn remove_listeners(&self, art: EventArt) -> usize {
        self.inner.dispatcher.remove_listeners(art)
    }

    /// Einstiegspunkt fuer den Control-Kanal
    pub fn control(&self) -> ControlHandle {
        ControlHandle {
            registry: self.inner.registry.clone(),
            events: self.inner.dispatcher.sender(),
            entschluesseler: Arc::clone(&self.inner.entschluesseler),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(lauf) = self.lauf.get_mut().take() {
            lauf.stopp.store(true, Ordering::Release);
            thread_abwarten(lauf.thread);
        }
        for (ssrc, member) in self.registry.clear() {
            self.dispatcher
                .dispatch(VoiceEvent::SpeakingStopped { member, ssrc });
        }
        debug!("Voice-Session beendet");
    }
}

fn thread_abwarten(thread: JoinHandle<()>) {
    // Aus dem Finalisierer heraus darf der Thread nicht auf sich selbst warten
    if thread.thread().id() == std::thread::current().id() {
        return;
    }
    if thread.join().is_err() {
        error!("Empfangs-Thread ist abgestuerzt");
    }
}

fn empfangs_thread(empfaenger: Empfaenger, aktiv: Arc<AtomicBool>, finalisierer: Finalisierer) {
    let fehler = match empfaenger.laufen() {
        Ok(()) => {
            info!("Empfang beendet");
            None
        }
        Err(e) => {
            error!(fehler = %e, "Empfang mit Fehler beendet");
            Some(e)
        }
    };

    empfaenger.sinks.lock().cleanup_all();
    drop(empfaenger);
    aktiv.store(false, Ordering::Release);

    if catch_unwind(AssertUnwindSafe(|| finalisierer(fehler))).is_err() {
        warn!("Finalisierer ist abgestuerzt");
    }
}

// ---------------------------------------------------------------------------
// ControlHandle
// ---------------------------------------------------------------------------

/// Meldungen des Control-Kanals an die Session
#[derive(Clone)]
pub struct ControlHandle {
    registry: SsrcRegistry,
    events: EventSender,
    entschluesseler: Arc<RwLock<PaketEntschluesseler>>,
}

impl ControlHandle {
    /// Plattform meldet Sprechmodus und SSRC eines Mitglieds
    pub fn speaking_update(
        &self,
        member: MemberId,
        ssrc: u32,
        flags: SprechFlags,
    ) -> IdentitaetsUpdate {
        let ergebnis = self.registry.update_identity(ssrc, member);
        self.events.senden(VoiceEvent::SpeakingStateChanged {
            member,
            ssrc,
            flags,
        });
        ergebnis
    }

    /// Mitglied hat den Kanal betreten
    pub fn client_connect(&self, member: MemberId, ssrc: u32) {
        self.registry.reassign_identity(ssrc, member);
        info!(member = %member, ssrc, "Mitglied verbunden");
        self.events.senden(VoiceEvent::MemberConnect { member, ssrc });
    }

    /// Mitglied hat den Kanal verlassen; liefert die letzte bekannte SSRC.
    ///
    /// Eine offene Sprechphase wird vor `MemberDisconnect` mit
    /// `SpeakingStopped` abgeschlossen.
    pub fn client_disconnect(&self, member: MemberId) -> Option<u32> {
        let info = self.registry.remove_member(member);
        let ssrc = info.as_ref().map(|i| i.ssrc);
        if let Some(info) = info.filter(|i| i.sprechphase_offen) {
            self.events.senden(VoiceEvent::SpeakingStopped {
                member: Some(member),
                ssrc: info.ssrc,
            });
        }
        info!(member = %member, ssrc = ?ssrc, "Mitglied getrennt");
        self.events.senden(VoiceEvent::MemberDisconnect { member, ssrc });
        ssrc
    }

    pub fn voice_flags(&self, member: MemberId, flags: VoiceFlags) {
        self.events.senden(VoiceEvent::VoiceFlags { member, flags });
    }

    pub fn voice_platform(&self, member: MemberId, plattform: VoicePlatform) {
        self.events
            .senden(VoiceEvent::VoicePlatform { member, plattform });
    }

    /// Neuer Modus und Schluessel; gilt ab dem naechsten Datagramm
    pub fn session_description(
        &self,
        modus: VerschluesselungsModus,
        schluessel: &SessionSchluessel,
    ) {
        *self.entschluesseler.write() = PaketEntschluesseler::neu(modus, schluessel);
        info!(modus = %modus, "Sitzungsschluessel ersetzt");
    }

    /// Kanalwechsel: alle Decoder-Kontexte verwerfen
    pub fn channel_changed(&self) {
        self.registry.destroy_all_decoders();
    }
}
