//! Benachrichtigungen fuer Listener
//!
//! Jede Variante ist ein festes Tupel aus Member-Identitaet bzw. SSRC plus
//! art-spezifischer Nutzlast. [`EventArt`] ist der Schluessel der
//! Listener-Tabellen.

use lauscher_protocol::RtcpPaket;

use crate::types::{MemberId, SprechFlags, VoiceFlags, VoicePlatform};

/// Ein Ereignis, das ueber den Event-Dispatcher zugestellt wird
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Mitglied hat den Kanal betreten (Control-Kanal)
    MemberConnect { member: MemberId, ssrc: u32 },
    /// Mitglied hat den Kanal verlassen; letzte bekannte SSRC
    MemberDisconnect { member: MemberId, ssrc: Option<u32> },
    /// Von der Plattform gemeldeter Sprechmodus
    SpeakingStateChanged {
        member: MemberId,
        ssrc: u32,
        flags: SprechFlags,
    },
    /// Empfangenes RTCP-Paket
    RtcpPacket { paket: RtcpPaket },
    /// Lokal erkannter Sprechbeginn
    SpeakingStarted { member: Option<MemberId>, ssrc: u32 },
    /// Lokal erkanntes Sprechende
    SpeakingStopped { member: Option<MemberId>, ssrc: u32 },
    /// Client-Flags eines Mitglieds
    VoiceFlags { member: MemberId, flags: VoiceFlags },
    /// Plattform eines Mitglieds
    VoicePlatform {
        member: MemberId,
        plattform: VoicePlatform,
    },
}

/// Art eines Ereignisses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventArt {
    MemberConnect,
    MemberDisconnect,
    SpeakingStateChanged,
    RtcpPacket,
    SpeakingStarted,
    SpeakingStopped,
    VoiceFlags,
    VoicePlatform,
}

impl VoiceEvent {
    pub fn art(&self) -> EventArt {
        match self {
            Self::MemberConnect { .. } => EventArt::MemberConnect,
            Self::MemberDisconnect { .. } => EventArt::MemberDisconnect,
            Self::SpeakingStateChanged { .. } => EventArt::SpeakingStateChanged,
            Self::RtcpPacket { .. } => EventArt::RtcpPacket,
            Self::SpeakingStarted { .. } => EventArt::SpeakingStarted,
            Self::SpeakingStopped { .. } => EventArt::SpeakingStopped,
            Self::VoiceFlags { .. } => EventArt::VoiceFlags,
            Self::VoicePlatform { .. } => EventArt::VoicePlatform,
        }
    }

    /// SSRC, sofern das Ereignis eine traegt
    pub fn ssrc(&self) -> Option<u32> {
        match self {
            Self::MemberConnect { ssrc, .. }
            | Self::SpeakingStateChanged { ssrc, .. }
            | Self::SpeakingStarted { ssrc, .. }
            | Self::SpeakingStopped { ssrc, .. } => Some(*ssrc),
            Self::MemberDisconnect { ssrc, .. } => *ssrc,
            Self::RtcpPacket { paket } => paket.ssrc(),
            Self::VoiceFlags { .. } | Self::VoicePlatform { .. } => None,
        }
    }
}
