//! Logging fuer Lauscher-Anwendungen und Tests via tracing-subscriber
//!
//! Ein einfacher Level wie `debug` gilt nur fuer die Lauscher-Crates;
//! fremde Crates bleiben auf `warn`. Ein vollstaendiger Filter-Ausdruck
//! (`lauscher_voice=trace,tokio=info`) wird unveraendert uebernommen.
//!
//! Umgebungsvariablen haben Vorrang vor den Parametern:
//! - `LAUSCHER_LOG_LEVEL`: Level oder Filter-Ausdruck
//! - `LAUSCHER_LOG_FORMAT`: `text` oder `json`
//!
//! Threadnamen (`lauscher-empfang`, `lauscher-events`) stehen in jeder Zeile.

use std::fmt as stdfmt;
use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "LAUSCHER_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LAUSCHER_LOG_FORMAT";

/// Targets, auf die ein einfacher Level wirkt
pub const LAUSCHER_TARGETS: [&str; 4] = [
    "lauscher_protocol",
    "lauscher_crypto",
    "lauscher_voice",
    "lauscher_observability",
];

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            anderes => Err(format!("Unbekanntes Log-Format: {anderes}")),
        }
    }
}

impl stdfmt::Display for LogFormat {
    fn fmt(&self, f: &mut stdfmt::Formatter<'_>) -> stdfmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// `true` fuer einen einfachen Level (kein Filter-Ausdruck)
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error" | "off")
}

/// Filter-Ausdruck fuer `level`; einfache Level werden auf die
/// Lauscher-Targets begrenzt
pub fn filter_ausdruck(level: &str) -> String {
    let level = level.trim();
    if !log_level_gueltig(level) {
        return level.to_string();
    }
    LAUSCHER_TARGETS
        .iter()
        .fold(String::from("warn"), |mut ausdruck, target| {
            ausdruck.push_str(&format!(",{target}={level}"));
            ausdruck
        })
}

/// Initialisiert das Logging-System.
///
/// Ungueltige Angaben fallen auf `info` bzw. Text zurueck. Ist bereits ein
/// globaler Subscriber gesetzt (z.B. in Tests), bleibt dieser aktiv und es
/// wird `false` geliefert.
pub fn logging_initialisieren(level: &str, format: &str) -> bool {
    let level = std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(filter_ausdruck(&level))
        .unwrap_or_else(|_| EnvFilter::new(filter_ausdruck("info")));

    let format = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .and_then(|f| f.parse::<LogFormat>().ok())
        .or_else(|| format.parse().ok())
        .unwrap_or_default();

    let ergebnis = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };
    ergebnis.is_ok()
}
