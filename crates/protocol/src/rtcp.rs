//! RTCP-Pakete (RFC 3550 §6)
//!
//! Unterstuetzt Sender Report (200), Receiver Report (201), Source
//! Description (202), Goodbye (203) und Application-Defined (204).
//! Compound-Pakete werden anhand des Laengenfelds zerlegt; unbekannte
//! Pakettypen innerhalb eines Compound-Pakets werden uebersprungen.
//!
//! ## Gemeinsamer Kopf
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   V(2) P(1) Anzahl(5)
//!  1       1   Pakettyp
//!  2       2   Laenge in 32-Bit-Worten minus 1
//! ```

use crate::error::{mindestens, PacketError, PacketResult};
use crate::rtp::{lese_u32, RTP_VERSION};

pub const RTCP_SENDER_REPORT: u8 = 200;
pub const RTCP_RECEIVER_REPORT: u8 = 201;
pub const RTCP_SOURCE_DESCRIPTION: u8 = 202;
pub const RTCP_GOODBYE: u8 = 203;
pub const RTCP_APP: u8 = 204;

/// Laenge eines Report-Blocks in Bytes
const REPORT_BLOCK_LAENGE: usize = 24;
/// Laenge der Sender-Info im Sender Report
const SENDER_INFO_LAENGE: usize = 20;

// ---------------------------------------------------------------------------
// Bausteine
// ---------------------------------------------------------------------------

/// Empfangsstatistik fuer eine Quelle (Report-Block)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    pub ssrc: u32,
    /// Anteil verlorener Pakete seit dem letzten Report (Festkomma /256)
    pub anteil_verloren: u8,
    /// Kumulativ verlorene Pakete (24 Bit)
    pub gesamt_verloren: u32,
    /// Hoechste empfangene erweiterte Sequenznummer
    pub hoechste_sequenz: u32,
    /// Interarrival-Jitter in Zeitstempel-Einheiten
    pub jitter: u32,
    /// Mittlere 32 Bit des NTP-Zeitstempels des letzten SR
    pub lsr: u32,
    /// Verzoegerung seit dem letzten SR (1/65536 s)
    pub dlsr: u32,
}

impl ReportBlock {
    fn parse(data: &[u8]) -> Self {
        Self {
            ssrc: lese_u32(data, 0),
            anteil_verloren: data[4],
            gesamt_verloren: lese_u32(data, 4) & 0x00FF_FFFF,
            hoechste_sequenz: lese_u32(data, 8),
            jitter: lese_u32(data, 12),
            lsr: lese_u32(data, 16),
            dlsr: lese_u32(data, 20),
        }
    }
}

/// Sender-Info eines Sender Reports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SenderInfo {
    /// NTP-Zeitstempel in Sekunden (ganzzahliger Teil + Bruchteil)
    pub ntp_sekunden: f64,
    pub rtp_zeitstempel: u32,
    pub paket_anzahl: u32,
    pub oktett_anzahl: u32,
}

/// Einzelnes SDES-Item (CNAME, NAME, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub typ: u8,
    pub text: String,
}

/// SDES-Chunk: alle Items einer Quelle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

// ---------------------------------------------------------------------------
// RtcpPaket
// ---------------------------------------------------------------------------

/// Ein einzelnes RTCP-Paket
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpPaket {
    SenderReport {
        ssrc: u32,
        info: SenderInfo,
        reports: Vec<ReportBlock>,
        /// Profilspezifische Erweiterung hinter den Report-Bloecken
        erweiterung: Option<Vec<u8>>,
    },
    ReceiverReport {
        ssrc: u32,
        reports: Vec<ReportBlock>,
        erweiterung: Option<Vec<u8>>,
    },
    SourceDescription {
        chunks: Vec<SdesChunk>,
    },
    Goodbye {
        ssrcs: Vec<u32>,
        grund: Option<String>,
    },
    App {
        subtyp: u8,
        ssrc: u32,
        name: String,
        daten: Vec<u8>,
    },
}

impl RtcpPaket {
    /// Zerlegt genau ein RTCP-Paket (das gesamte Slice gehoert dazu)
    ///
    /// # Fehler
    /// - `ZuKurz` bei abgeschnittenen Bloecken
    /// - `UngueltigeVersion` bei Version != 2
    /// - `UnbekannterRtcpTyp` ausserhalb von 200..=204
    pub fn parse(data: &[u8]) -> PacketResult<Self> {
        mindestens(data, 4)?;

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::UngueltigeVersion(version));
        }
        let anzahl = (data[0] & 0x1F) as usize;

        match data[1] {
            RTCP_SENDER_REPORT => sender_report(data, anzahl),
            RTCP_RECEIVER_REPORT => receiver_report(data, anzahl),
            RTCP_SOURCE_DESCRIPTION => source_description(data, anzahl),
            RTCP_GOODBYE => goodbye(data, anzahl),
            RTCP_APP => app(data, anzahl as u8),
            andere => Err(PacketError::UnbekannterRtcpTyp(andere)),
        }
    }

    /// Zerlegt ein Compound-Paket in seine Einzelpakete
    ///
    /// Ein Laengenfeld, das ueber das Datagramm hinauszeigt, wird auf das
    /// Datagramm-Ende gekuerzt.
    pub fn parse_compound(data: &[u8]) -> PacketResult<Vec<Self>> {
        let mut pakete = Vec::new();
        let mut offset = 0;

        while offset + 4 <= data.len() {
            let worte = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let ende = (offset + (worte + 1) * 4).min(data.len());
            let teil = &data[offset..ende];

            match Self::parse(teil) {
                Ok(paket) => pakete.push(paket),
                Err(PacketError::UnbekannterRtcpTyp(typ)) => {
                    tracing::trace!(typ, "Unbekanntes RTCP-Paket im Compound uebersprungen");
                }
                Err(e) => return Err(e),
            }
            offset = ende;
        }

        if pakete.is_empty() {
            return Err(PacketError::UngueltigesRtcp(
                "Compound-Paket enthaelt kein bekanntes RTCP-Paket".to_string(),
            ));
        }
        Ok(pakete)
    }

    /// Pakettyp-Byte (200..=204)
    pub fn typ(&self) -> u8 {
        match self {
            Self::SenderReport { .. } => RTCP_SENDER_REPORT,
            Self::ReceiverReport { .. } => RTCP_RECEIVER_REPORT,
            Self::SourceDescription { .. } => RTCP_SOURCE_DESCRIPTION,
            Self::Goodbye { .. } => RTCP_GOODBYE,
            Self::App { .. } => RTCP_APP,
        }
    }

    /// SSRC des Absenders, sofern der Pakettyp eine traegt
    pub fn ssrc(&self) -> Option<u32> {
        match self {
            Self::SenderReport { ssrc, .. }
            | Self::ReceiverReport { ssrc, .. }
            | Self::App { ssrc, .. } => Some(*ssrc),
            Self::SourceDescription { chunks } => chunks.first().map(|c| c.ssrc),
            Self::Goodbye { ssrcs, .. } => ssrcs.first().copied(),
        }
    }
}

fn report_bloecke(data: &[u8], start: usize, anzahl: usize) -> Vec<ReportBlock> {
    (0..anzahl)
        .map(|i| {
            let offset = start + REPORT_BLOCK_LAENGE * i;
            ReportBlock::parse(&data[offset..offset + REPORT_BLOCK_LAENGE])
        })
        .collect()
}

fn rest_als_erweiterung(data: &[u8], ende: usize) -> Option<Vec<u8>> {
    (data.len() > ende).then(|| data[ende..].to_vec())
}

fn sender_report(data: &[u8], anzahl: usize) -> PacketResult<RtcpPaket> {
    let reports_start = 8 + SENDER_INFO_LAENGE;
    let ende = reports_start + REPORT_BLOCK_LAENGE * anzahl;
    mindestens(data, ende)?;

    let ntp_hoch = lese_u32(data, 8);
    let ntp_tief = lese_u32(data, 12);
    let info = SenderInfo {
        ntp_sekunden: ntp_hoch as f64 + ntp_tief as f64 / 2f64.powi(32),
        rtp_zeitstempel: lese_u32(data, 16),
        paket_anzahl: lese_u32(data, 20),
        oktett_anzahl: lese_u32(data, 24),
    };

    Ok(RtcpPaket::SenderReport {
        ssrc: lese_u32(data, 4),
        info,
        reports: report_bloecke(data, reports_start, anzahl),
        erweiterung: rest_als_erweiterung(data, ende),
    })
}

fn receiver_report(data: &[u8], anzahl: usize) -> PacketResult<RtcpPaket> {
    let ende = 8 + REPORT_BLOCK_LAENGE * anzahl;
    mindestens(data, ende)?;

    Ok(RtcpPaket::ReceiverReport {
        ssrc: lese_u32(data, 4),
        reports: report_bloecke(data, 8, anzahl),
        erweiterung: rest_als_erweiterung(data, ende),
    })
}

fn source_description(data: &[u8], anzahl: usize) -> PacketResult<RtcpPaket> {
    let mut chunks = Vec::with_capacity(anzahl);
    let mut pos = 4;

    for _ in 0..anzahl {
        mindestens(data, pos + 4)?;
        let ssrc = lese_u32(data, pos);
        pos += 4;

        let mut items = Vec::new();
        loop {
            mindestens(data, pos + 1)?;
            let typ = data[pos];
            // END-Item, danach auf 32 Bit auffuellen
            if typ == 0 {
                pos += 1;
                pos = pos.div_ceil(4) * 4;
                break;
            }

            mindestens(data, pos + 2)?;
            let laenge = data[pos + 1] as usize;
            mindestens(data, pos + 2 + laenge)?;
            let text = String::from_utf8_lossy(&data[pos + 2..pos + 2 + laenge]).into_owned();
            items.push(SdesItem { typ, text });
            pos += 2 + laenge;
        }

        chunks.push(SdesChunk { ssrc, items });
    }

    Ok(RtcpPaket::SourceDescription { chunks })
}

fn goodbye(data: &[u8], anzahl: usize) -> PacketResult<RtcpPaket> {
    let rumpf_ende = 4 + 4 * anzahl;
    mindestens(data, rumpf_ende)?;

    let ssrcs = (0..anzahl).map(|i| lese_u32(data, 4 + 4 * i)).collect();

    let grund = if data.len() > rumpf_ende {
        let laenge = data[rumpf_ende] as usize;
        mindestens(data, rumpf_ende + 1 + laenge)?;
        Some(String::from_utf8_lossy(&data[rumpf_ende + 1..rumpf_ende + 1 + laenge]).into_owned())
    } else {
        None
    };

    Ok(RtcpPaket::Goodbye { ssrcs, grund })
}

fn app(data: &[u8], subtyp: u8) -> PacketResult<RtcpPaket> {
    mindestens(data, 12)?;
    Ok(RtcpPaket::App {
        subtyp,
        ssrc: lese_u32(data, 4),
        name: String::from_utf8_lossy(&data[8..12]).into_owned(),
        daten: data[12..].to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn kopf(anzahl: u8, typ: u8, gesamt_bytes: usize) -> Vec<u8> {
        let worte = (gesamt_bytes / 4 - 1) as u16;
        let mut buf = vec![(2 << 6) | anzahl, typ];
        buf.extend_from_slice(&worte.to_be_bytes());
        buf
    }

    fn report_block(ssrc: u32, verloren: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ssrc.to_be_bytes());
        buf.extend_from_slice(&((0x40u32 << 24) | (verloren & 0xFF_FFFF)).to_be_bytes());
        buf.extend_from_slice(&5000u32.to_be_bytes());
        buf.extend_from_slice(&12u32.to_be_bytes());
        buf.extend_from_slice(&0xAABBCCDDu32.to_be_bytes());
        buf.extend_from_slice(&65536u32.to_be_bytes());
        buf
    }

    fn receiver_report_bytes() -> Vec<u8> {
        let mut buf = kopf(1, RTCP_RECEIVER_REPORT, 32);
        buf.extend_from_slice(&77u32.to_be_bytes());
        buf.extend_from_slice(&report_block(1001, 300));
        buf
    }

    #[test]
    fn receiver_report_wird_zerlegt() {
        let paket = RtcpPaket::parse(&receiver_report_bytes()).unwrap();
        match paket {
            RtcpPaket::ReceiverReport { ssrc, reports, erweiterung } => {
                assert_eq!(ssrc, 77);
                assert_eq!(reports.len(), 1);
                assert_eq!(reports[0].ssrc, 1001);
                assert_eq!(reports[0].anteil_verloren, 0x40);
                assert_eq!(reports[0].gesamt_verloren, 300);
                assert_eq!(reports[0].hoechste_sequenz, 5000);
                assert_eq!(reports[0].jitter, 12);
                assert!(erweiterung.is_none());
            }
            anderes => panic!("Receiver Report erwartet, erhalten: {anderes:?}"),
        }
    }

    #[test]
    fn sender_report_mit_ntp_zeit() {
        let mut buf = kopf(0, RTCP_SENDER_REPORT, 28);
        buf.extend_from_slice(&9u32.to_be_bytes());
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(&0x8000_0000u32.to_be_bytes());
        buf.extend_from_slice(&48_000u32.to_be_bytes());
        buf.extend_from_slice(&50u32.to_be_bytes());
        buf.extend_from_slice(&4_000u32.to_be_bytes());

        let paket = RtcpPaket::parse(&buf).unwrap();
        assert_eq!(paket.typ(), RTCP_SENDER_REPORT);
        assert_eq!(paket.ssrc(), Some(9));
        if let RtcpPaket::SenderReport { info, reports, .. } = paket {
            assert!((info.ntp_sekunden - 100.5).abs() < 1e-9);
            assert_eq!(info.rtp_zeitstempel, 48_000);
            assert_eq!(info.paket_anzahl, 50);
            assert!(reports.is_empty());
        }
    }

    #[test]
    fn abgeschnittener_report_ist_fehler() {
        let bytes = receiver_report_bytes();
        assert!(matches!(
            RtcpPaket::parse(&bytes[..20]),
            Err(PacketError::ZuKurz { .. })
        ));
    }

    #[test]
    fn sdes_chunks_mit_padding() {
        // CNAME "ab" -> 4 (ssrc) + 2 + 2 + END = 9 -> aufgefuellt auf 12
        let mut buf = kopf(2, RTCP_SOURCE_DESCRIPTION, 24);
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(&[1, 2, b'a', b'b', 0, 0, 0, 0]);
        // Chunk ohne Items
        buf.extend_from_slice(&6u32.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 0]);

        let paket = RtcpPaket::parse(&buf).unwrap();
        let RtcpPaket::SourceDescription { chunks } = paket else {
            panic!("SDES erwartet");
        };
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].items, vec![SdesItem { typ: 1, text: "ab".into() }]);
        assert_eq!(chunks[1].ssrc, 6);
        assert!(chunks[1].items.is_empty());
    }

    #[test]
    fn goodbye_mit_grund() {
        let mut buf = kopf(1, RTCP_GOODBYE, 12);
        buf.extend_from_slice(&42u32.to_be_bytes());
        buf.extend_from_slice(&[3, b'w', b'e', b'g']);

        let paket = RtcpPaket::parse(&buf).unwrap();
        assert_eq!(
            paket,
            RtcpPaket::Goodbye {
                ssrcs: vec![42],
                grund: Some("weg".into())
            }
        );
    }

    #[test]
    fn app_paket() {
        let mut buf = kopf(3, RTCP_APP, 16);
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(b"LSCH");
        buf.extend_from_slice(&[9, 8, 7, 6]);

        let paket = RtcpPaket::parse(&buf).unwrap();
        assert_eq!(
            paket,
            RtcpPaket::App {
                subtyp: 3,
                ssrc: 1,
                name: "LSCH".into(),
                daten: vec![9, 8, 7, 6]
            }
        );
    }

    #[test]
    fn compound_paket_ueberspringt_unbekannte_typen() {
        let mut buf = receiver_report_bytes();
        // Transport-Feedback (205) – unbekannt
        let mut feedback = kopf(15, 205, 12);
        feedback.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&feedback);
        let mut bye = kopf(1, RTCP_GOODBYE, 8);
        bye.extend_from_slice(&77u32.to_be_bytes());
        buf.extend_from_slice(&bye);

        let pakete = RtcpPaket::parse_compound(&buf).unwrap();
        assert_eq!(pakete.len(), 2);
        assert_eq!(pakete[0].typ(), RTCP_RECEIVER_REPORT);
        assert_eq!(pakete[1].typ(), RTCP_GOODBYE);
    }

    #[test]
    fn compound_ohne_bekannte_pakete_ist_fehler() {
        let mut feedback = kopf(1, 206, 12);
        feedback.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            RtcpPaket::parse_compound(&feedback),
            Err(PacketError::UngueltigesRtcp(_))
        ));
    }

    #[test]
    fn unbekannter_typ_einzeln_ist_fehler() {
        let buf = kopf(0, 207, 4);
        assert_eq!(
            RtcpPaket::parse(&buf),
            Err(PacketError::UnbekannterRtcpTyp(207))
        );
    }
}
