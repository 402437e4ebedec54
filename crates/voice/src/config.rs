//! Empfangs-Konfiguration
//!
//! Kann aus einer TOML-Datei geladen werden. Alle Felder haben
//! Standardwerte, sodass eine leere Datei eine gueltige Konfiguration ist.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VoiceError, VoiceResult};

/// Vollstaendige Konfiguration einer Voice-Session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmpfangsConfig {
    /// Stille-Schwelle fuer die Sprecherkennung in ms
    pub speaking_timeout_ms: u64,
    /// Lese-Timeout des Sockets in ms (Stopp-Flag und Stille-Pruefung)
    pub poll_intervall_ms: u64,
    /// Groesse des wiederverwendeten Empfangspuffers
    pub empfangspuffer_bytes: usize,
    /// Wie viele zuletzt entfernte SSRCs ignoriert werden
    pub entfernte_ssrcs_merken: usize,
    /// Entschluesselungsfehler: Warnung beim ersten und jedem n-ten
    pub fehler_log_intervall: u64,
    /// Opus-Decoder
    pub dekoder: DekoderConfig,
}

impl Default for EmpfangsConfig {
    fn default() -> Self {
        Self {
            speaking_timeout_ms: 300,
            poll_intervall_ms: 20,
            empfangspuffer_bytes: 4096,
            entfernte_ssrcs_merken: 16,
            fehler_log_intervall: 50,
            dekoder: DekoderConfig::default(),
        }
    }
}

/// Opus-Decoder-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DekoderConfig {
    /// Abtastrate in Hz (8000, 12000, 16000, 24000, 48000)
    pub sample_rate: u32,
    /// 1 = Mono, 2 = Stereo
    pub kanaele: u8,
    /// Frame-Dauer fuer Verlust-Verschleierung in ms
    pub frame_ms: u32,
}

impl Default for DekoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            kanaele: 2,
            frame_ms: 20,
        }
    }
}

impl DekoderConfig {
    /// Samples pro Kanal in einem Frame
    pub fn samples_pro_frame(&self) -> usize {
        (self.sample_rate / 1000 * self.frame_ms) as usize
    }
}

impl EmpfangsConfig {
    /// Parst eine Konfiguration aus einem TOML-String und validiert sie
    pub fn aus_toml(inhalt: &str) -> VoiceResult<Self> {
        let config: Self = toml::from_str(inhalt)
            .map_err(|e| VoiceError::Konfiguration(e.to_string()))?;
        config.validieren()?;
        Ok(config)
    }

    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    pub fn validieren(&self) -> VoiceResult<()> {
        if self.speaking_timeout_ms == 0 {
            return Err(VoiceError::Konfiguration(
                "speaking_timeout_ms muss > 0 sein".into(),
            ));
        }
        if self.poll_intervall_ms == 0 {
            return Err(VoiceError::Konfiguration(
                "poll_intervall_ms muss > 0 sein".into(),
            ));
        }
        if self.empfangspuffer_bytes < 64 {
            return Err(VoiceError::Konfiguration(format!(
                "empfangspuffer_bytes zu klein: {}",
                self.empfangspuffer_bytes
            )));
        }
        if !matches!(self.dekoder.sample_rate, 8000 | 12000 | 16000 | 24000 | 48000) {
            return Err(VoiceError::Konfiguration(format!(
                "Nicht unterstuetzte Abtastrate: {}",
                self.dekoder.sample_rate
            )));
        }
        if !matches!(self.dekoder.kanaele, 1 | 2) {
            return Err(VoiceError::Konfiguration(format!(
                "Nicht unterstuetzte Kanalanzahl: {}",
                self.dekoder.kanaele
            )));
        }
        if !matches!(self.dekoder.frame_ms, 10 | 20 | 40 | 60) {
            return Err(VoiceError::Konfiguration(format!(
                "Nicht unterstuetzte Frame-Dauer: {} ms",
                self.dekoder.frame_ms
            )));
        }
        Ok(())
    }

    pub fn speaking_timeout(&self) -> Duration {
        Duration::from_millis(self.speaking_timeout_ms)
    }

    pub fn poll_intervall(&self) -> Duration {
        Duration::from_millis(self.poll_intervall_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = EmpfangsConfig::default();
        assert!(cfg.validieren().is_ok());
        assert_eq!(cfg.speaking_timeout(), Duration::from_millis(300));
        assert_eq!(cfg.entfernte_ssrcs_merken, 16);
        assert_eq!(cfg.dekoder.samples_pro_frame(), 960);
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            speaking_timeout_ms = 500

            [dekoder]
            kanaele = 1
        "#;
        let cfg = EmpfangsConfig::aus_toml(toml).unwrap();
        assert_eq!(cfg.speaking_timeout_ms, 500);
        assert_eq!(cfg.dekoder.kanaele, 1);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.poll_intervall_ms, 20);
        assert_eq!(cfg.dekoder.sample_rate, 48_000);
    }

    #[test]
    fn leere_datei_ergibt_standardwerte() {
        assert_eq!(EmpfangsConfig::aus_toml("").unwrap(), EmpfangsConfig::default());
    }

    #[test]
    fn ungueltige_werte_werden_abgelehnt() {
        assert!(EmpfangsConfig::aus_toml("speaking_timeout_ms = 0").is_err());
        assert!(EmpfangsConfig::aus_toml("[dekoder]\nsample_rate = 44100").is_err());
        assert!(EmpfangsConfig::aus_toml("[dekoder]\nkanaele = 6").is_err());
        assert!(EmpfangsConfig::aus_toml("poll_intervall_ms = \"schnell\"").is_err());
    }

    #[test]
    fn fehlende_datei_ergibt_standardwerte() {
        let cfg = EmpfangsConfig::laden("/pfad/existiert/nicht/lauscher.toml").unwrap();
        assert_eq!(cfg, EmpfangsConfig::default());
    }
}
