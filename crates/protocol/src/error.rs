//! Fehlertypen fuer das Paket-Framing

use thiserror::Error;

/// Fehler beim Zerlegen eines RTP- oder RTCP-Pakets
///
/// Alle Varianten bedeuten "Paket verwerfen" – sie werden nie ueber die
/// Empfangsschleife hinaus propagiert.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("Paket zu kurz: {laenge} Bytes (erwartet mindestens {erwartet})")]
    ZuKurz { laenge: usize, erwartet: usize },

    #[error("Ungueltige RTP-Version: {0} (erwartet 2)")]
    UngueltigeVersion(u8),

    #[error("Unbekannter RTCP-Pakettyp: {0}")]
    UnbekannterRtcpTyp(u8),

    #[error("Ungueltige Header-Erweiterung: {0}")]
    UngueltigeErweiterung(String),

    #[error("Ungueltiges RTCP-Paket: {0}")]
    UngueltigesRtcp(String),
}

pub type PacketResult<T> = Result<T, PacketError>;

/// Prueft eine Mindestlaenge und liefert sonst `PacketError::ZuKurz`
pub(crate) fn mindestens(data: &[u8], erwartet: usize) -> PacketResult<()> {
    if data.len() < erwartet {
        return Err(PacketError::ZuKurz {
            laenge: data.len(),
            erwartet,
        });
    }
    Ok(())
}
