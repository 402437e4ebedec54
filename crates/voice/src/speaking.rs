//! Sprecherkennung aus Paket-Ankunftszeiten
//!
//! Zustandsautomat pro SSRC, unabhaengig von Plattform-Indikatoren:
//!
//! ```text
//!            erstes Paket / Paket nach Stille
//!   still ---------------------------------------> spricht
//!     ^                                               |
//!     +------- kein Paket laenger als Timeout --------+
//! ```
//!
//! Der Automat bekommt die aktuelle Zeit explizit uebergeben, damit er
//! deterministisch testbar bleibt. O(1), keine Allokation.

use std::time::{Duration, Instant};

/// Uebergang, den ein neues Paket ausloest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SprechUebergang {
    /// Zustand unveraendert
    Keiner,
    /// still -> spricht
    Gestartet,
    /// Luecke > Timeout, die noch nicht per Pruefung beendet wurde:
    /// erst gestoppt, dann wieder gestartet
    GestopptUndGestartet,
}

/// Sprechzustand einer SSRC
#[derive(Debug, Clone, Copy, Default)]
pub struct SprechZustand {
    spricht: bool,
    letztes_paket: Option<Instant>,
}

impl SprechZustand {
    /// Verarbeitet ein Audio-Paket
    pub fn paket(&mut self, jetzt: Instant, timeout: Duration) -> SprechUebergang {
        let luecke = self
            .letztes_paket
            .is_some_and(|t| jetzt.saturating_duration_since(t) > timeout);
        self.letztes_paket = Some(jetzt);

        if !self.spricht {
            self.spricht = true;
            SprechUebergang::Gestartet
        } else if luecke {
            SprechUebergang::GestopptUndGestartet
        } else {
            SprechUebergang::Keiner
        }
    }

    /// Periodische Pruefung; `true` wenn der Sprecher gerade verstummt ist
    pub fn pruefen(&mut self, jetzt: Instant, timeout: Duration) -> bool {
        if self.spricht && self.still_seit(jetzt, timeout) {
            self.spricht = false;
            return true;
        }
        false
    }

    /// Spricht gerade, beruecksichtigt auch eine noch nicht gepruefte Luecke
    pub fn spricht(&self, jetzt: Instant, timeout: Duration) -> bool {
        self.spricht && !self.still_seit(jetzt, timeout)
    }

    /// Start wurde gemeldet, das zugehoerige Stopp-Ereignis steht noch aus
    pub fn offen(&self) -> bool {
        self.spricht
    }

    pub fn letztes_paket(&self) -> Option<Instant> {
        self.letztes_paket
    }

    fn still_seit(&self, jetzt: Instant, timeout: Duration) -> bool {
        self.letztes_paket
            .is_some_and(|t| jetzt.saturating_duration_since(t) > timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(300);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn erstes_paket_startet() {
        let t0 = Instant::now();
        let mut z = SprechZustand::default();
        assert_eq!(z.paket(t0, TIMEOUT), SprechUebergang::Gestartet);
        assert_eq!(z.paket(t0 + ms(20), TIMEOUT), SprechUebergang::Keiner);
        assert!(z.spricht(t0 + ms(40), TIMEOUT));
    }

    #[test]
    fn pruefung_stoppt_nach_timeout_genau_einmal() {
        let t0 = Instant::now();
        let mut z = SprechZustand::default();
        z.paket(t0, TIMEOUT);

        assert!(!z.pruefen(t0 + ms(200), TIMEOUT));
        assert!(z.pruefen(t0 + ms(301), TIMEOUT));
        assert!(!z.pruefen(t0 + ms(400), TIMEOUT), "Kein zweites Stopp-Ereignis");
        assert!(!z.spricht(t0 + ms(400), TIMEOUT));

        // Neues Paket nach gepruefter Stille -> nur Start
        assert_eq!(z.paket(t0 + ms(600), TIMEOUT), SprechUebergang::Gestartet);
    }

    #[test]
    fn luecke_ohne_pruefung_ergibt_stopp_und_start() {
        let t0 = Instant::now();
        let mut z = SprechZustand::default();
        z.paket(t0, TIMEOUT);
        assert_eq!(
            z.paket(t0 + ms(600), TIMEOUT),
            SprechUebergang::GestopptUndGestartet
        );
        assert_eq!(z.paket(t0 + ms(620), TIMEOUT), SprechUebergang::Keiner);
    }

    #[test]
    fn spricht_meldet_ungepruefte_stille() {
        let t0 = Instant::now();
        let mut z = SprechZustand::default();
        z.paket(t0, TIMEOUT);
        assert!(!z.spricht(t0 + ms(500), TIMEOUT));
        // Ohne Pruefung bleibt die Sprechphase offen
        assert!(z.offen());
        assert!(z.pruefen(t0 + ms(500), TIMEOUT));
        assert!(!z.offen());
    }

    #[test]
    fn uebergaenge_wechseln_sich_strikt_ab() {
        // Unregelmaessige Ankunftszeiten mit eingestreuten Pruefungen
        let t0 = Instant::now();
        let mut z = SprechZustand::default();
        let mut ereignisse = Vec::new();

        let ankuenfte = [0u64, 20, 40, 500, 520, 540, 1200, 1210, 2000];
        let mut pruef_zeit = 0u64;
        for &ankunft in &ankuenfte {
            while pruef_zeit < ankunft {
                if z.pruefen(t0 + ms(pruef_zeit), TIMEOUT) {
                    ereignisse.push("stopp");
                }
                pruef_zeit += 20;
            }
            match z.paket(t0 + ms(ankunft), TIMEOUT) {
                SprechUebergang::Gestartet => ereignisse.push("start"),
                SprechUebergang::GestopptUndGestartet => {
                    ereignisse.push("stopp");
                    ereignisse.push("start");
                }
                SprechUebergang::Keiner => {}
            }
        }

        assert_eq!(ereignisse.first(), Some(&"start"));
        for paar in ereignisse.windows(2) {
            assert_ne!(paar[0], paar[1], "Ereignisse muessen sich abwechseln: {ereignisse:?}");
        }
        assert_eq!(ereignisse.iter().filter(|e| **e == "start").count(), 4);
    }
}
