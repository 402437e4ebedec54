//! Event-Dispatcher – zweiter Thread fuer hoeherwertige Ereignisse
//!
//! ## Architektur
//!
//! ```text
//!  Empfangs-Thread ──┐
//!                    ├─> crossbeam (FIFO) ─> "lauscher-events"
//!  Control-Kanal ────┘                          │
//!                                               ├─> Sink-Listener (synchron, im Thread)
//!                                               └─> Session-Listener (async, tokio Handle::spawn)
//! ```
//!
//! Langsame Listener blockieren nie den Audio-Empfang. Asynchrone Listener
//! werden nie im Dispatcher-Thread ausgefuehrt, sondern an den Scheduler
//! der Anwendung uebergeben.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::error::{VoiceError, VoiceResult};
use crate::event::{EventArt, VoiceEvent};
use crate::sink::SinkId;

/// Synchroner Listener (laeuft im Dispatcher-Thread)
pub type SyncListener = Arc<dyn Fn(&VoiceEvent) + Send + Sync>;

/// Asynchroner Listener (laeuft auf dem Scheduler der Anwendung)
pub type AsyncListener = Arc<dyn Fn(VoiceEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Ein registrierbarer Listener
#[derive(Clone)]
pub enum Listener {
    Sync(SyncListener),
    Async(AsyncListener),
}

impl Listener {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&VoiceEvent) + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn asynchron<F, Fut>(f: F) -> Self
    where
        F: Fn(VoiceEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Async(Arc::new(move |event| f(event).boxed()))
    }

    pub fn ist_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Listener::Sync"),
            Self::Async(_) => f.write_str("Listener::Async"),
        }
    }
}

// ---------------------------------------------------------------------------
// ListenerTabelle (Sink-Listener)
// ---------------------------------------------------------------------------

/// Tabelle EventArt -> synchrone Listener der angehaengten Sinks
#[derive(Default)]
pub struct ListenerTabelle {
    eintraege: RwLock<HashMap<EventArt, Vec<(SinkId, SyncListener)>>>,
}

impl ListenerTabelle {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn registrieren(&self, sink: SinkId, art: EventArt, listener: SyncListener) {
        self.eintraege
            .write()
            .entry(art)
            .or_default()
            .push((sink, listener));
    }

    /// Entfernt alle Listener eines Sinks
    pub fn entfernen(&self, sink: SinkId) {
        let mut eintraege = self.eintraege.write();
        for liste in eintraege.values_mut() {
            liste.retain(|(id, _)| *id != sink);
        }
        eintraege.retain(|_, liste| !liste.is_empty());
    }

    /// Listener einer Art in Registrierungsreihenfolge
    pub fn fuer(&self, art: EventArt) -> Vec<SyncListener> {
        self.eintraege
            .read()
            .get(&art)
            .map(|liste| liste.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub fn anzahl(&self) -> usize {
        self.eintraege.read().values().map(Vec::len).sum()
    }

    pub fn leeren(&self) {
        self.eintraege.write().clear();
    }
}

// ---------------------------------------------------------------------------
// EventDispatcher
// ---------------------------------------------------------------------------

enum Auftrag {
    Event(VoiceEvent),
    Stopp,
}

#[derive(Default)]
struct DispatcherZustand {
    sink_listener: RwLock<Option<Arc<ListenerTabelle>>>,
    async_listener: RwLock<HashMap<EventArt, Vec<AsyncListener>>>,
    laufzeit: RwLock<Option<tokio::runtime::Handle>>,
}

/// Sendeseite der Event-Queue; blockiert nie
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Auftrag>,
}

impl EventSender {
    pub fn senden(&self, event: VoiceEvent) {
        trace!(art = ?event.art(), "Event eingereiht");
        if self.tx.send(Auftrag::Event(event)).is_err() {
            debug!("Event-Dispatcher beendet, Event verworfen");
        }
    }
}

/// Besitzt den Dispatcher-Thread und die Listener-Tabellen
pub struct EventDispatcher {
    tx: Sender<Auftrag>,
    zustand: Arc<DispatcherZustand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Startet den Thread `lauscher-events`
    pub fn starten() -> VoiceResult<Self> {
        let (tx, rx) = unbounded();
        let zustand = Arc::new(DispatcherZustand::default());
        let zustand_thread = Arc::clone(&zustand);

        let thread = std::thread::Builder::new()
            .name("lauscher-events".to_string())
            .spawn(move || dispatcher_thread(rx, zustand_thread))
            .map_err(|e| VoiceError::Thread(e.to_string()))?;

        debug!("Event-Dispatcher gestartet");
        Ok(Self {
            tx,
            zustand,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    pub fn dispatch(&self, event: VoiceEvent) {
        self.sender().senden(event);
    }

    /// Setzt die Listener-Tabelle des aktiven Sink-Baums
    pub fn sink_tabelle_setzen(&self, tabelle: Option<Arc<ListenerTabelle>>) {
        *self.zustand.sink_listener.write() = tabelle;
    }

    /// Scheduler fuer asynchrone Listener
    pub fn laufzeit_setzen(&self, handle: tokio::runtime::Handle) {
        *self.zustand.laufzeit.write() = Some(handle);
    }

    pub fn hat_laufzeit(&self) -> bool {
        self.zustand.laufzeit.read().is_some()
    }

    /// Registriert einen Session-Listener; nur asynchrone sind erlaubt
    pub fn add_listener(&self, art: EventArt, listener: Listener) -> VoiceResult<()> {
        let Listener::Async(listener) = listener else {
            return Err(VoiceError::SynchronerSessionListener { art });
        };
        if !self.hat_laufzeit() {
            return Err(VoiceError::KeineLaufzeit);
        }
        self.zustand
            .async_listener
            .write()
            .entry(art)
            .or_default()
            .push(listener);
        debug!(art = ?art, "Session-Listener registriert");
        Ok(())
    }

    /// Entfernt alle Session-Listener einer Art; liefert die Anzahl
    pub fn remove_listeners(&self, art: EventArt) -> usize {
        self.zustand
            .async_listener
            .write()
            .remove(&art)
            .map_or(0, |l| l.len())
    }

    /// Arbeitet die Queue ab und beendet den Thread
    pub fn stoppen(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.tx.send(Auftrag::Stopp);
        if thread.thread().id() == std::thread::current().id() {
            // Aufruf aus einem Listener heraus: der Thread endet nach diesem Event
            return;
        }
        if thread.join().is_err() {
            warn!("Event-Dispatcher-Thread ist abgestuerzt");
        }
        debug!("Event-Dispatcher gestoppt");
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stoppen();
    }
}

fn dispatcher_thread(rx: Receiver<Auftrag>, zustand: Arc<DispatcherZustand>) {
    info!("Event-Dispatcher-Thread laeuft");

    while let Ok(auftrag) = rx.recv() {
        match auftrag {
            Auftrag::Event(event) => zustellen(&zustand, event),
            Auftrag::Stopp => break,
        }
    }

    info!("Event-Dispatcher-Thread beendet");
}

fn zustellen(zustand: &DispatcherZustand, event: VoiceEvent) {
    let art = event.art();

    let asynchron: Vec<AsyncListener> = zustand
        .async_listener
        .read()
        .get(&art)
        .cloned()
        .unwrap_or_default();
    if !asynchron.is_empty() {
        match zustand.laufzeit.read().as_ref() {
            Some(handle) => {
                for listener in &asynchron {
                    handle.spawn(listener(event.clone()));
                }
            }
            None => debug!(art = ?art, "Keine Laufzeit, asynchrone Listener uebersprungen"),
        }
    }

    let tabelle = zustand.sink_listener.read().clone();
    let Some(tabelle) = tabelle else {
        return;
    };
    for listener in tabelle.fuer(art) {
        if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
            warn!(art = ?art, "Sink-Listener ist abgestuerzt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemberId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sink_id(index: u32) -> SinkId {
        SinkId::test_id(index)
    }

    fn abstuerzen(_: &VoiceEvent) {
        panic!("Listener-Fehler");
    }

    fn start(ssrc: u32) -> VoiceEvent {
        VoiceEvent::SpeakingStarted { member: None, ssrc }
    }

    #[test]
    fn sync_listener_erhalten_events_in_reihenfolge() {
        let dispatcher = EventDispatcher::starten().unwrap();
        let tabelle = Arc::new(ListenerTabelle::neu());
        let empfangen = Arc::new(Mutex::new(Vec::new()));

        let e = Arc::clone(&empfangen);
        tabelle.registrieren(
            sink_id(0),
            EventArt::SpeakingStarted,
            Arc::new(move |ev: &VoiceEvent| e.lock().push(ev.ssrc())),
        );
        dispatcher.sink_tabelle_setzen(Some(tabelle));

        for ssrc in 0..50 {
            dispatcher.dispatch(start(ssrc));
        }
        // Anderes Event ohne Listener
        dispatcher.dispatch(VoiceEvent::MemberDisconnect {
            member: MemberId(1),
            ssrc: None,
        });
        dispatcher.stoppen();

        let erwartet: Vec<Option<u32>> = (0..50).map(Some).collect();
        assert_eq!(*empfangen.lock(), erwartet);
    }

    #[test]
    fn panik_im_listener_stoppt_den_dispatcher_nicht() {
        let dispatcher = EventDispatcher::starten().unwrap();
        let tabelle = Arc::new(ListenerTabelle::neu());
        let zaehler = Arc::new(AtomicUsize::new(0));

        tabelle.registrieren(
            sink_id(0),
            EventArt::SpeakingStarted,
            Arc::new(abstuerzen),
        );
        let z = Arc::clone(&zaehler);
        tabelle.registrieren(
            sink_id(1),
            EventArt::SpeakingStarted,
            Arc::new(move |_: &VoiceEvent| {
                z.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher.sink_tabelle_setzen(Some(tabelle));

        dispatcher.dispatch(start(1));
        dispatcher.dispatch(start(2));
        dispatcher.stoppen();

        assert_eq!(zaehler.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tabelle_entfernt_listener_eines_sinks() {
        let tabelle = ListenerTabelle::neu();
        let l: SyncListener = Arc::new(|_: &VoiceEvent| {});
        tabelle.registrieren(sink_id(0), EventArt::SpeakingStarted, Arc::clone(&l));
        tabelle.registrieren(sink_id(1), EventArt::SpeakingStarted, Arc::clone(&l));
        tabelle.registrieren(sink_id(1), EventArt::RtcpPacket, l);
        assert_eq!(tabelle.anzahl(), 3);

        tabelle.entfernen(sink_id(1));
        assert_eq!(tabelle.anzahl(), 1);
        assert!(tabelle.fuer(EventArt::RtcpPacket).is_empty());
    }

    #[test]
    fn synchroner_session_listener_wird_abgelehnt() {
        let dispatcher = EventDispatcher::starten().unwrap();
        let ergebnis = dispatcher.add_listener(EventArt::MemberConnect, Listener::sync(|_| {}));
        assert!(matches!(
            ergebnis,
            Err(VoiceError::SynchronerSessionListener {
                art: EventArt::MemberConnect
            })
        ));
    }

    #[test]
    fn async_listener_ohne_laufzeit_wird_abgelehnt() {
        let dispatcher = EventDispatcher::starten().unwrap();
        let ergebnis =
            dispatcher.add_listener(EventArt::MemberConnect, Listener::asynchron(|_| async {}));
        assert!(matches!(ergebnis, Err(VoiceError::KeineLaufzeit)));
    }

    #[test]
    fn async_listener_laeuft_auf_der_laufzeit() {
        let laufzeit = tokio::runtime::Runtime::new().unwrap();
        let dispatcher = EventDispatcher::starten().unwrap();
        dispatcher.laufzeit_setzen(laufzeit.handle().clone());

        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher
            .add_listener(
                EventArt::MemberConnect,
                Listener::asynchron(move |event| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(event);
                    }
                }),
            )
            .unwrap();

        let event = VoiceEvent::MemberConnect {
            member: MemberId(5),
            ssrc: 77,
        };
        dispatcher.dispatch(event.clone());
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), event);

        assert_eq!(dispatcher.remove_listeners(EventArt::MemberConnect), 1);
        assert_eq!(dispatcher.remove_listeners(EventArt::MemberConnect), 0);
    }

    #[test]
    fn stoppen_ist_idempotent() {
        let dispatcher = EventDispatcher::starten().unwrap();
        dispatcher.stoppen();
        dispatcher.stoppen();
        // Nach dem Stopp werden Events still verworfen
        dispatcher.dispatch(start(1));
    }
}
