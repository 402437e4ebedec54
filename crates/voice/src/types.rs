//! Gemeinsame Typen: Member-IDs, Sprech-Flags, Plattform

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stabile Identitaet eines Kanal-Mitglieds (Snowflake der Plattform)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// SprechFlags (Control-Kanal, Opcode SPEAKING)
// ---------------------------------------------------------------------------

/// Von der Plattform gemeldeter Sprechmodus (Bitmaske)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SprechFlags(pub u8);

impl SprechFlags {
    /// Normale Sprachuebertragung
    pub const MIKROFON: u8 = 1 << 0;
    /// Audio aus Bildschirmfreigabe
    pub const SOUNDSHARE: u8 = 1 << 1;
    /// Priority Speaker
    pub const PRIORITAET: u8 = 1 << 2;

    pub fn enthaelt(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

// ---------------------------------------------------------------------------
// VoiceFlags / VoicePlatform (Control-Kanal-Metadaten)
// ---------------------------------------------------------------------------

/// Client-Flags eines Mitglieds (Bitmaske)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoiceFlags(pub u32);

impl VoiceFlags {
    pub const CLIPS_AKTIVIERT: u32 = 1 << 0;
    pub const AUFNAHME_ERLAUBT: u32 = 1 << 1;
    pub const CLIPS_FUER_ALLE_ZUSCHAUER: u32 = 1 << 2;

    pub fn enthaelt(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }
}

/// Plattform, von der ein Mitglied verbunden ist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoicePlatform {
    Desktop,
    Mobile,
    Xbox,
    Playstation,
    Unbekannt(u8),
}

impl VoicePlatform {
    pub fn from_u8(wert: u8) -> Self {
        match wert {
            0 => Self::Desktop,
            1 => Self::Mobile,
            2 => Self::Xbox,
            3 => Self::Playstation,
            andere => Self::Unbekannt(andere),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plattform_aus_wert() {
        assert_eq!(VoicePlatform::from_u8(0), VoicePlatform::Desktop);
        assert_eq!(VoicePlatform::from_u8(3), VoicePlatform::Playstation);
        assert_eq!(VoicePlatform::from_u8(9), VoicePlatform::Unbekannt(9));
    }

    #[test]
    fn flags_pruefen() {
        let flags = VoiceFlags(VoiceFlags::CLIPS_AKTIVIERT | VoiceFlags::CLIPS_FUER_ALLE_ZUSCHAUER);
        assert!(flags.enthaelt(VoiceFlags::CLIPS_AKTIVIERT));
        assert!(!flags.enthaelt(VoiceFlags::AUFNAHME_ERLAUBT));

        let sprechen = SprechFlags(SprechFlags::MIKROFON);
        assert!(sprechen.enthaelt(SprechFlags::MIKROFON));
        assert!(!sprechen.enthaelt(SprechFlags::PRIORITAET));
    }
}
