//! Empfangs-Telemetrie – Zaehler des Empfangs-Threads
//!
//! Alle Zaehler sind atomar und werden ohne Sperre aus dem Empfangs-Thread
//! erhoeht. [`EmpfangsStatistik::snapshot`] liefert eine serialisierbare
//! Momentaufnahme fuer Logs oder Observability-Systeme.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Momentaufnahme der Empfangszaehler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatistikSnapshot {
    /// Empfangene Datagramme insgesamt
    pub datagramme: u64,
    /// Authentifizierte RTP-Pakete
    pub rtp: u64,
    /// Authentifizierte RTCP-Pakete
    pub rtcp: u64,
    /// Verworfen wegen kaputtem Framing
    pub ungueltig: u64,
    /// Verworfen wegen fehlgeschlagener Entschluesselung
    pub entschluesselung_fehler: u64,
    /// Einheiten ohne PCM trotz Dekodier-Wunsch
    pub dekodier_fehler: u64,
    /// Isolierte Sink-Fehler
    pub sink_fehler: u64,
    /// Nachzuegler kuerzlich entfernter SSRCs
    pub verworfen_entfernt: u64,
    /// Einheiten ohne aufgeloestes Mitglied
    pub unzugeordnet: u64,
    /// Fehlende Sequenznummern (Summe ueber alle SSRCs)
    pub verloren: u64,
}

impl StatistikSnapshot {
    /// Gibt eine lesbare Zusammenfassung zurueck
    pub fn zusammenfassung(&self) -> String {
        format!(
            "Datagramme={} RTP={} RTCP={} Ungueltig={} Entschluesselung={} Dekodierung={} Sinks={} Entfernt={} Unzugeordnet={} Verloren={}",
            self.datagramme,
            self.rtp,
            self.rtcp,
            self.ungueltig,
            self.entschluesselung_fehler,
            self.dekodier_fehler,
            self.sink_fehler,
            self.verworfen_entfernt,
            self.unzugeordnet,
            self.verloren,
        )
    }
}

// ---------------------------------------------------------------------------
// EmpfangsStatistik
// ---------------------------------------------------------------------------

/// Atomare Empfangszaehler einer Session
#[derive(Debug, Default)]
pub struct EmpfangsStatistik {
    datagramme: AtomicU64,
    rtp: AtomicU64,
    rtcp: AtomicU64,
    ungueltig: AtomicU64,
    entschluesselung_fehler: AtomicU64,
    dekodier_fehler: AtomicU64,
    sink_fehler: AtomicU64,
    verworfen_entfernt: AtomicU64,
    unzugeordnet: AtomicU64,
    verloren: AtomicU64,
}

fn erhoehen(zaehler: &AtomicU64) -> u64 {
    zaehler.fetch_add(1, Ordering::Relaxed) + 1
}

impl EmpfangsStatistik {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn datagramm(&self) {
        erhoehen(&self.datagramme);
    }

    pub fn rtp(&self) {
        erhoehen(&self.rtp);
    }

    pub fn rtcp(&self) {
        erhoehen(&self.rtcp);
    }

    pub fn ungueltig(&self) {
        erhoehen(&self.ungueltig);
    }

    /// Zaehlt einen Entschluesselungsfehler; liefert den neuen Stand
    pub fn entschluesselung_fehler(&self) -> u64 {
        erhoehen(&self.entschluesselung_fehler)
    }

    pub fn dekodier_fehler(&self) {
        erhoehen(&self.dekodier_fehler);
    }

    pub fn sink_fehler(&self, anzahl: u64) {
        self.sink_fehler.fetch_add(anzahl, Ordering::Relaxed);
    }

    pub fn verworfen_entfernt(&self) {
        erhoehen(&self.verworfen_entfernt);
    }

    pub fn unzugeordnet(&self) {
        erhoehen(&self.unzugeordnet);
    }

    pub fn verloren(&self, anzahl: u16) {
        self.verloren.fetch_add(u64::from(anzahl), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatistikSnapshot {
        StatistikSnapshot {
            datagramme: self.datagramme.load(Ordering::Relaxed),
            rtp: self.rtp.load(Ordering::Relaxed),
            rtcp: self.rtcp.load(Ordering::Relaxed),
            ungueltig: self.ungueltig.load(Ordering::Relaxed),
            entschluesselung_fehler: self.entschluesselung_fehler.load(Ordering::Relaxed),
            dekodier_fehler: self.dekodier_fehler.load(Ordering::Relaxed),
            sink_fehler: self.sink_fehler.load(Ordering::Relaxed),
            verworfen_entfernt: self.verworfen_entfernt.load(Ordering::Relaxed),
            unzugeordnet: self.unzugeordnet.load(Ordering::Relaxed),
            verloren: self.verloren.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zaehler_werden_erhoeht() {
        let stat = EmpfangsStatistik::neu();
        stat.datagramm();
        stat.datagramm();
        stat.rtp();
        assert_eq!(stat.entschluesselung_fehler(), 1);
        assert_eq!(stat.entschluesselung_fehler(), 2);
        stat.sink_fehler(3);
        stat.verloren(4);

        let snap = stat.snapshot();
        assert_eq!(snap.datagramme, 2);
        assert_eq!(snap.rtp, 1);
        assert_eq!(snap.entschluesselung_fehler, 2);
        assert_eq!(snap.sink_fehler, 3);
        assert_eq!(snap.verloren, 4);
        assert_eq!(snap.rtcp, 0);
    }

    #[test]
    fn snapshot_ist_serialisierbar() {
        let stat = EmpfangsStatistik::neu();
        stat.unzugeordnet();
        let json = serde_json::to_value(stat.snapshot()).unwrap();
        assert_eq!(json["unzugeordnet"], 1);
        assert!(stat.snapshot().zusammenfassung().contains("Unzugeordnet=1"));
    }
}
