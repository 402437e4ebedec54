//! lauscher-protocol – RTP/RTCP-Framing
//!
//! Zerlegt die Wire-Formate, die der Voice-Transport der Plattform liefert.
//! Entschluesselung und Sitzungslogik liegen in `lauscher-crypto` bzw.
//! `lauscher-voice`.
//!
//! ## Module
//! - [`rtp`] – Klassifizierung, fester Header, Header-Erweiterungen
//! - [`rtcp`] – SR/RR/SDES/BYE/APP und Compound-Pakete
//! - [`error`] – Fehlertypen

pub mod error;
pub mod rtcp;
pub mod rtp;

pub use error::{PacketError, PacketResult};
pub use rtcp::{ReportBlock, RtcpPaket, SdesChunk, SdesItem, SenderInfo};
pub use rtp::{
    ist_rtcp, paket_klassifizieren, sequenz_luecke, sequenz_neuer, ErweiterungsKopf,
    ExtensionId, HeaderErweiterung, PaketKlasse, RtpHeader, OPUS_SILENCE,
};
