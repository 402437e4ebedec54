//! RTP-Framing (RFC 3550 / RFC 8285)
//!
//! Klassifiziert rohe UDP-Datagramme und zerlegt den festen RTP-Header,
//! die CSRC-Liste sowie Header-Erweiterungen im One-Byte- (`0xBEDE`) und
//! Two-Byte-Format (`0x100x`).
//!
//! ## Paketformat
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   V(2) P(1) X(1) CC(4)
//!  1       1   M(1) PT(7)   – bei RTCP: Pakettyp 200..=204
//!  2       2   Sequenznummer (big-endian)
//!  4       4   Zeitstempel (big-endian, 48 kHz-Ticks)
//!  8       4   SSRC (big-endian)
//! 12     4*CC  CSRC-Liste
//!  ..      4   Erweiterungs-Kopf (Profil + Laenge in 32-Bit-Worten), falls X
//! ```
//!
//! Kein serde – der Header wird direkt aus den Bytes gelesen (Hot Path).

use crate::error::{mindestens, PacketError, PacketResult};

/// RTP-Version im Header (obere zwei Bits)
pub const RTP_VERSION: u8 = 2;

/// Laenge des festen RTP-Headers ohne CSRCs
pub const RTP_HEADER_LAENGE: usize = 12;

/// Laenge des Erweiterungs-Kopfs (Profil + Laenge)
pub const ERWEITERUNGS_KOPF_LAENGE: usize = 4;

/// Profil-Kennung fuer One-Byte-Header-Erweiterungen
pub const PROFIL_EIN_BYTE: u16 = 0xBEDE;

/// Opus-Frame, den Sender in Sprechpausen schicken
pub const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Bekannte Element-IDs in der One-Byte-Erweiterung
pub struct ExtensionId;

impl ExtensionId {
    /// Audio-Pegel des Senders
    pub const AUDIO_POWER: u8 = 1;
    /// Vom Sender gemeldeter Sprechzustand
    pub const SPEAKING_STATE: u8 = 9;
}

// ---------------------------------------------------------------------------
// Klassifizierung
// ---------------------------------------------------------------------------

/// Art eines empfangenen Datagramms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaketKlasse {
    /// Audio-Paket
    Rtp,
    /// Kontroll-Paket
    Rtcp,
}

/// Prueft ob das zweite Byte einen RTCP-Pakettyp (200..=204) traegt
pub fn ist_rtcp(data: &[u8]) -> bool {
    data.len() >= 2 && (200..=204).contains(&data[1])
}

/// Klassifiziert ein rohes Datagramm als RTP oder RTCP
///
/// # Fehler
/// - `ZuKurz` wenn weniger als 4 Bytes vorliegen
/// - `UngueltigeVersion` wenn die Versions-Bits nicht 2 sind
pub fn paket_klassifizieren(data: &[u8]) -> PacketResult<PaketKlasse> {
    mindestens(data, 4)?;
    let version = data[0] >> 6;
    if version != RTP_VERSION {
        return Err(PacketError::UngueltigeVersion(version));
    }
    Ok(if ist_rtcp(data) {
        PaketKlasse::Rtcp
    } else {
        PaketKlasse::Rtp
    })
}

/// Anzahl der zwischen `alt` und `neu` fehlenden Sequenznummern
///
/// Rueckwaerts laufende oder doppelte Pakete (Reordering) ergeben 0.
pub fn sequenz_luecke(alt: u16, neu: u16) -> u16 {
    let abstand = neu.wrapping_sub(alt);
    if abstand > 1 && abstand < 0x8000 {
        abstand - 1
    } else {
        0
    }
}

/// Prueft ob `neu` in Sequenz-Arithmetik nach `alt` liegt
pub fn sequenz_neuer(alt: u16, neu: u16) -> bool {
    let abstand = neu.wrapping_sub(alt);
    abstand != 0 && abstand < 0x8000
}

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// Fester RTP-Header inklusive CSRC-Liste
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Padding-Bit
    pub padding: bool,
    /// Header-Erweiterung vorhanden
    pub erweitert: bool,
    /// Marker-Bit
    pub marker: bool,
    /// Payload-Typ (7 Bit)
    pub payload_typ: u8,
    /// Sequenznummer
    pub sequenz: u16,
    /// RTP-Zeitstempel
    pub zeitstempel: u32,
    /// Synchronisation Source – Senderkennung
    pub ssrc: u32,
    /// Contributing Sources
    pub csrcs: Vec<u32>,
}

impl RtpHeader {
    /// Erstellt einen Header ohne CSRCs und ohne Erweiterung
    pub fn neu(payload_typ: u8, sequenz: u16, zeitstempel: u32, ssrc: u32) -> Self {
        Self {
            padding: false,
            erweitert: false,
            marker: false,
            payload_typ: payload_typ & 0x7F,
            sequenz,
            zeitstempel,
            ssrc,
            csrcs: Vec::new(),
        }
    }

    /// Laenge des Headers in Bytes (12 + 4 pro CSRC)
    pub fn laenge(&self) -> usize {
        RTP_HEADER_LAENGE + 4 * self.csrcs.len()
    }

    /// Liest einen Header vom Anfang eines Datagramms
    ///
    /// # Fehler
    /// - `ZuKurz` wenn Header oder CSRC-Liste abgeschnitten sind
    /// - `UngueltigeVersion` bei Version != 2
    pub fn parse(data: &[u8]) -> PacketResult<Self> {
        mindestens(data, RTP_HEADER_LAENGE)?;

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::UngueltigeVersion(version));
        }

        let cc = (data[0] & 0x0F) as usize;
        mindestens(data, RTP_HEADER_LAENGE + 4 * cc)?;

        let csrcs = (0..cc)
            .map(|i| lese_u32(data, RTP_HEADER_LAENGE + 4 * i))
            .collect();

        Ok(Self {
            padding: data[0] & 0b0010_0000 != 0,
            erweitert: data[0] & 0b0001_0000 != 0,
            marker: data[1] & 0b1000_0000 != 0,
            payload_typ: data[1] & 0b0111_1111,
            sequenz: u16::from_be_bytes([data[2], data[3]]),
            zeitstempel: lese_u32(data, 4),
            ssrc: lese_u32(data, 8),
            csrcs,
        })
    }

    /// Serialisiert den Header (big-endian)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.laenge());
        let cc = self.csrcs.len().min(15) as u8;
        buf.push(
            (RTP_VERSION << 6)
                | (u8::from(self.padding) << 5)
                | (u8::from(self.erweitert) << 4)
                | cc,
        );
        buf.push((u8::from(self.marker) << 7) | (self.payload_typ & 0x7F));
        buf.extend_from_slice(&self.sequenz.to_be_bytes());
        buf.extend_from_slice(&self.zeitstempel.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        for csrc in self.csrcs.iter().take(cc as usize) {
            buf.extend_from_slice(&csrc.to_be_bytes());
        }
        buf
    }
}

// ---------------------------------------------------------------------------
// Header-Erweiterungen
// ---------------------------------------------------------------------------

/// Kopf einer Header-Erweiterung (4 Bytes direkt nach dem RTP-Header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErweiterungsKopf {
    /// Profil-Kennung (`0xBEDE`, `0x100x` oder anwendungsspezifisch)
    pub profil: u16,
    /// Laenge des Erweiterungs-Rumpfs in 32-Bit-Worten
    pub laenge_worte: u16,
}

impl ErweiterungsKopf {
    /// Liest den Kopf aus den ersten 4 Bytes
    pub fn parse(data: &[u8]) -> PacketResult<Self> {
        mindestens(data, ERWEITERUNGS_KOPF_LAENGE)?;
        Ok(Self {
            profil: u16::from_be_bytes([data[0], data[1]]),
            laenge_worte: u16::from_be_bytes([data[2], data[3]]),
        })
    }

    /// Laenge des Rumpfs in Bytes
    pub fn rumpf_laenge(&self) -> usize {
        self.laenge_worte as usize * 4
    }

    pub fn encode(&self) -> [u8; ERWEITERUNGS_KOPF_LAENGE] {
        let mut buf = [0u8; ERWEITERUNGS_KOPF_LAENGE];
        buf[0..2].copy_from_slice(&self.profil.to_be_bytes());
        buf[2..4].copy_from_slice(&self.laenge_worte.to_be_bytes());
        buf
    }
}

/// Zerlegte Header-Erweiterung eines RTP-Pakets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderErweiterung {
    /// Profil-Kennung aus dem Erweiterungs-Kopf
    pub profil: u16,
    /// Elemente (ID, Daten) in Wire-Reihenfolge; leer bei unbekanntem Profil
    pub elemente: Vec<(u8, Vec<u8>)>,
    /// Unveraenderter Rumpf
    pub roh: Vec<u8>,
}

impl HeaderErweiterung {
    /// Zerlegt den Rumpf einer Erweiterung anhand des Profils
    ///
    /// # Fehler
    /// `UngueltigeErweiterung` wenn ein Element ueber das Rumpf-Ende hinausreicht.
    pub fn parse(profil: u16, rumpf: &[u8]) -> PacketResult<Self> {
        let elemente = if profil == PROFIL_EIN_BYTE {
            ein_byte_elemente(rumpf)?
        } else if profil & 0xFFF0 == 0x1000 {
            zwei_byte_elemente(rumpf)?
        } else {
            Vec::new()
        };

        Ok(Self {
            profil,
            elemente,
            roh: rumpf.to_vec(),
        })
    }

    /// Liefert die Daten des ersten Elements mit der gegebenen ID
    pub fn element(&self, id: u8) -> Option<&[u8]> {
        self.elemente
            .iter()
            .find(|(eid, _)| *eid == id)
            .map(|(_, daten)| daten.as_slice())
    }

    /// Baut einen One-Byte-Rumpf (auf 32 Bit aufgefuellt)
    ///
    /// IDs muessen in 1..=14 liegen, Elementlaengen in 1..=16.
    pub fn ein_byte_rumpf(elemente: &[(u8, &[u8])]) -> PacketResult<Vec<u8>> {
        let mut rumpf = Vec::new();
        for (id, daten) in elemente {
            if !(1..=14).contains(id) {
                return Err(PacketError::UngueltigeErweiterung(format!(
                    "Element-ID {id} ausserhalb 1..=14"
                )));
            }
            if daten.is_empty() || daten.len() > 16 {
                return Err(PacketError::UngueltigeErweiterung(format!(
                    "Element {id}: Laenge {} ausserhalb 1..=16",
                    daten.len()
                )));
            }
            rumpf.push((id << 4) | (daten.len() as u8 - 1));
            rumpf.extend_from_slice(daten);
        }
        while rumpf.len() % 4 != 0 {
            rumpf.push(0);
        }
        Ok(rumpf)
    }
}

/// RFC 8285 §4.2 – ID im oberen Nibble, Laenge-1 im unteren, 0x00 ist Padding
fn ein_byte_elemente(rumpf: &[u8]) -> PacketResult<Vec<(u8, Vec<u8>)>> {
    let mut elemente = Vec::new();
    let mut pos = 0;

    while pos < rumpf.len() {
        let kopf = rumpf[pos];
        if kopf == 0 {
            pos += 1;
            continue;
        }

        let id = kopf >> 4;
        // ID 15 beendet die Verarbeitung
        if id == 15 {
            break;
        }

        let laenge = (kopf & 0x0F) as usize + 1;
        let start = pos + 1;
        let ende = start + laenge;
        if ende > rumpf.len() {
            return Err(PacketError::UngueltigeErweiterung(format!(
                "Element {id} reicht ueber das Rumpf-Ende ({ende} > {})",
                rumpf.len()
            )));
        }

        elemente.push((id, rumpf[start..ende].to_vec()));
        pos = ende;
    }

    Ok(elemente)
}

/// RFC 8285 §4.3 – ID-Byte, Laengen-Byte, Daten; ID 0 ist Padding
fn zwei_byte_elemente(rumpf: &[u8]) -> PacketResult<Vec<(u8, Vec<u8>)>> {
    let mut elemente = Vec::new();
    let mut pos = 0;

    while pos < rumpf.len() {
        let id = rumpf[pos];
        if id == 0 {
            pos += 1;
            continue;
        }
        if pos + 1 >= rumpf.len() {
            return Err(PacketError::UngueltigeErweiterung(format!(
                "Element {id} ohne Laengen-Byte"
            )));
        }

        let laenge = rumpf[pos + 1] as usize;
        let start = pos + 2;
        let ende = start + laenge;
        if ende > rumpf.len() {
            return Err(PacketError::UngueltigeErweiterung(format!(
                "Element {id} reicht ueber das Rumpf-Ende ({ende} > {})",
                rumpf.len()
            )));
        }

        elemente.push((id, rumpf[start..ende].to_vec()));
        pos = ende;
    }

    Ok(elemente)
}

pub(crate) fn lese_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn beispiel_header() -> RtpHeader {
        RtpHeader::neu(120, 4242, 960_000, 1001)
    }

    #[test]
    fn rtp_und_rtcp_werden_unterschieden() {
        let rtp = beispiel_header().encode();
        assert_eq!(paket_klassifizieren(&rtp).unwrap(), PaketKlasse::Rtp);

        let rtcp = [0x81, 201, 0x00, 0x07, 0, 0, 0, 1];
        assert_eq!(paket_klassifizieren(&rtcp).unwrap(), PaketKlasse::Rtcp);
        assert!(ist_rtcp(&rtcp));
    }

    #[test]
    fn falsche_version_wird_abgelehnt() {
        let mut daten = beispiel_header().encode();
        daten[0] = (1 << 6) | (daten[0] & 0x3F);
        assert_eq!(
            paket_klassifizieren(&daten),
            Err(PacketError::UngueltigeVersion(1))
        );
        assert!(RtpHeader::parse(&daten).is_err());
    }

    #[test]
    fn zu_kurzes_datagramm_ist_fehler() {
        assert!(matches!(
            paket_klassifizieren(&[0x80, 0x78]),
            Err(PacketError::ZuKurz { laenge: 2, erwartet: 4 })
        ));
        assert!(matches!(
            RtpHeader::parse(&[0x80, 0x78, 0, 1, 0, 0, 0, 0]),
            Err(PacketError::ZuKurz { .. })
        ));
    }

    #[test]
    fn header_felder_werden_gelesen() {
        let header = beispiel_header();
        let geparst = RtpHeader::parse(&header.encode()).unwrap();
        assert_eq!(geparst.sequenz, 4242);
        assert_eq!(geparst.zeitstempel, 960_000);
        assert_eq!(geparst.ssrc, 1001);
        assert_eq!(geparst.payload_typ, 120);
        assert!(!geparst.erweitert);
        assert_eq!(geparst.laenge(), 12);
    }

    #[test]
    fn csrc_liste_verlaengert_header() {
        let mut header = beispiel_header();
        header.csrcs = vec![7, 8];
        let bytes = header.encode();
        assert_eq!(bytes.len(), 20);

        let geparst = RtpHeader::parse(&bytes).unwrap();
        assert_eq!(geparst.csrcs, vec![7, 8]);
        assert_eq!(geparst.laenge(), 20);

        // Abgeschnittene CSRC-Liste
        assert!(RtpHeader::parse(&bytes[..16]).is_err());
    }

    #[test]
    fn ein_byte_erweiterung_mit_padding() {
        // ID 1 (1 Byte), Padding, ID 9 (2 Bytes), Padding
        let rumpf = [0x10, 0x7F, 0x00, 0x91, 0x01, 0x02, 0x00, 0x00];
        let ext = HeaderErweiterung::parse(PROFIL_EIN_BYTE, &rumpf).unwrap();
        assert_eq!(ext.elemente.len(), 2);
        assert_eq!(ext.element(ExtensionId::AUDIO_POWER), Some(&[0x7F][..]));
        assert_eq!(ext.element(ExtensionId::SPEAKING_STATE), Some(&[0x01, 0x02][..]));
        assert_eq!(ext.element(3), None);
    }

    #[test]
    fn ein_byte_element_ueber_rumpf_ende_ist_fehler() {
        let rumpf = [0x13, 0x01, 0x02, 0x03];
        assert!(matches!(
            HeaderErweiterung::parse(PROFIL_EIN_BYTE, &rumpf),
            Err(PacketError::UngueltigeErweiterung(_))
        ));
    }

    #[test]
    fn id_15_beendet_ein_byte_verarbeitung() {
        let rumpf = [0x10, 0xAA, 0xF0, 0x20];
        let ext = HeaderErweiterung::parse(PROFIL_EIN_BYTE, &rumpf).unwrap();
        assert_eq!(ext.elemente, vec![(1, vec![0xAA])]);
    }

    #[test]
    fn zwei_byte_erweiterung() {
        let rumpf = [0x00, 0x05, 0x02, 0xAB, 0xCD, 0x07, 0x00, 0x00];
        let ext = HeaderErweiterung::parse(0x1000, &rumpf).unwrap();
        assert_eq!(ext.element(5), Some(&[0xAB, 0xCD][..]));
        // Element 7 mit Laenge 0
        assert_eq!(ext.element(7), Some(&[][..]));
    }

    #[test]
    fn unbekanntes_profil_behaelt_rohdaten() {
        let rumpf = [1, 2, 3, 4];
        let ext = HeaderErweiterung::parse(0x1234, &rumpf).unwrap();
        assert!(ext.elemente.is_empty());
        assert_eq!(ext.roh, rumpf.to_vec());
    }

    #[test]
    fn ein_byte_rumpf_wird_aufgefuellt() {
        let rumpf = HeaderErweiterung::ein_byte_rumpf(&[(1, &[0x55])]).unwrap();
        assert_eq!(rumpf, vec![0x10, 0x55, 0x00, 0x00]);

        assert!(HeaderErweiterung::ein_byte_rumpf(&[(15, &[0x01])]).is_err());
        assert!(HeaderErweiterung::ein_byte_rumpf(&[(2, &[0u8; 17])]).is_err());
    }

    #[test]
    fn sequenz_luecke_mit_wraparound() {
        assert_eq!(sequenz_luecke(10, 11), 0);
        assert_eq!(sequenz_luecke(10, 13), 2);
        assert_eq!(sequenz_luecke(65535, 0), 0);
        assert_eq!(sequenz_luecke(65534, 1), 2);
        // Verspaetetes Paket
        assert_eq!(sequenz_luecke(20, 18), 0);
        assert!(sequenz_neuer(65535, 0));
        assert!(!sequenz_neuer(5, 5));
        assert!(!sequenz_neuer(20, 18));
    }
}
