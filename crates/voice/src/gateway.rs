//! Gateway-Nachrichten des Control-Kanals
//!
//! Wertet die fuer den Empfang relevanten Opcodes der Voice-Gateway-JSON-
//! Nachrichten aus und leitet sie an den [`ControlHandle`] weiter. Alle
//! anderen Opcodes (Heartbeat, Hello, Resume, ...) werden ignoriert.
//!
//! | Op | Name                | Wirkung                           |
//! |----|---------------------|-----------------------------------|
//! | 4  | SESSION_DESCRIPTION | Modus und Schluessel ersetzen      |
//! | 5  | SPEAKING            | SSRC aufloesen, Sprechmodus-Event  |
//! | 12 | CLIENT_CONNECT      | SSRC neu zuordnen, Connect-Event   |
//! | 13 | CLIENT_DISCONNECT   | SSRC entfernen, Disconnect-Event   |
//! | 18 | CLIENT_FLAGS        | Flags-Event                        |
//! | 20 | CLIENT_PLATFORM     | Plattform-Event                    |

use std::str::FromStr;

use lauscher_crypto::{SessionSchluessel, VerschluesselungsModus};
use serde::{Deserialize, Deserializer};
use tracing::trace;

use crate::error::VoiceResult;
use crate::session::ControlHandle;
use crate::types::{MemberId, SprechFlags, VoiceFlags, VoicePlatform};

pub const OP_SESSION_DESCRIPTION: u8 = 4;
pub const OP_SPEAKING: u8 = 5;
pub const OP_CLIENT_CONNECT: u8 = 12;
pub const OP_CLIENT_DISCONNECT: u8 = 13;
pub const OP_CLIENT_FLAGS: u8 = 18;
pub const OP_CLIENT_PLATFORM: u8 = 20;

// ---------------------------------------------------------------------------
// Nachrichten-Typen
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct GatewayNachricht {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
}

#[derive(Deserialize)]
struct SessionDescription {
    mode: String,
    secret_key: Vec<u8>,
}

#[derive(Deserialize)]
struct Speaking {
    #[serde(deserialize_with = "snowflake")]
    user_id: MemberId,
    ssrc: u32,
    #[serde(default, deserialize_with = "sprech_flags")]
    speaking: SprechFlags,
}

#[derive(Deserialize)]
struct ClientConnect {
    #[serde(deserialize_with = "snowflake")]
    user_id: MemberId,
    audio_ssrc: u32,
}

#[derive(Deserialize)]
struct ClientDisconnect {
    #[serde(deserialize_with = "snowflake")]
    user_id: MemberId,
}

#[derive(Deserialize)]
struct ClientFlags {
    #[serde(deserialize_with = "snowflake")]
    user_id: MemberId,
    #[serde(default)]
    flags: Option<u32>,
}

#[derive(Deserialize)]
struct ClientPlatform {
    #[serde(deserialize_with = "snowflake")]
    user_id: MemberId,
    #[serde(default)]
    platform: Option<u8>,
}

/// Snowflakes kommen als String, gelegentlich als Zahl
fn snowflake<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MemberId, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wert {
        Text(String),
        Zahl(u64),
    }

    match Wert::deserialize(deserializer)? {
        Wert::Zahl(id) => Ok(MemberId(id)),
        Wert::Text(text) => text
            .parse()
            .map(MemberId)
            .map_err(|_| serde::de::Error::custom(format!("Ungueltiger Snowflake: {text}"))),
    }
}

/// Aeltere Gateways senden `speaking` als bool
fn sprech_flags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SprechFlags, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wert {
        Zahl(u8),
        Bool(bool),
    }

    Ok(match Wert::deserialize(deserializer)? {
        Wert::Zahl(bits) => SprechFlags(bits),
        Wert::Bool(true) => SprechFlags(SprechFlags::MIKROFON),
        Wert::Bool(false) => SprechFlags(0),
    })
}

// ---------------------------------------------------------------------------
// Auswertung
// ---------------------------------------------------------------------------

impl ControlHandle {
    /// Verarbeitet eine Gateway-Nachricht im Rohtext
    pub fn gateway_text(&self, text: &str) -> VoiceResult<()> {
        let nachricht: serde_json::Value = serde_json::from_str(text)?;
        self.gateway_nachricht(&nachricht)
    }

    /// Verarbeitet eine bereits geparste Gateway-Nachricht
    ///
    /// # Fehler
    /// - `Gateway` bei fehlenden oder falsch typisierten Feldern
    /// - `Krypto` bei unbekanntem Modus oder falscher Schluessellaenge
    pub fn gateway_nachricht(&self, nachricht: &serde_json::Value) -> VoiceResult<()> {
        let GatewayNachricht { op, d } = GatewayNachricht::deserialize(nachricht)?;

        match op {
            OP_SESSION_DESCRIPTION => {
                let sd = SessionDescription::deserialize(&d)?;
                let modus = VerschluesselungsModus::from_str(&sd.mode)?;
                let schluessel = SessionSchluessel::aus_slice(&sd.secret_key)?;
                self.session_description(modus, &schluessel);
            }
            OP_SPEAKING => {
                let s = Speaking::deserialize(&d)?;
                self.speaking_update(s.user_id, s.ssrc, s.speaking);
            }
            OP_CLIENT_CONNECT => {
                let c = ClientConnect::deserialize(&d)?;
                self.client_connect(c.user_id, c.audio_ssrc);
            }
            OP_CLIENT_DISCONNECT => {
                let c = ClientDisconnect::deserialize(&d)?;
                self.client_disconnect(c.user_id);
            }
            OP_CLIENT_FLAGS => {
                let c = ClientFlags::deserialize(&d)?;
                self.voice_flags(c.user_id, VoiceFlags(c.flags.unwrap_or(0)));
            }
            OP_CLIENT_PLATFORM => {
                let c = ClientPlatform::deserialize(&d)?;
                let plattform = VoicePlatform::from_u8(c.platform.unwrap_or(0));
                self.voice_platform(c.user_id, plattform);
            }
            andere => trace!(op = andere, "Gateway-Opcode ignoriert"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmpfangsConfig;
    use crate::error::VoiceError;
    use crate::session::VoiceSession;
    use serde_json::json;
    use std::net::UdpSocket;

    fn session() -> VoiceSession {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        VoiceSession::neu(
            socket,
            VerschluesselungsModus::Aes256GcmRtpSize,
            &SessionSchluessel::neu([1; 32]),
            EmpfangsConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn speaking_loest_ssrc_auf() {
        let s = session();
        s.control()
            .gateway_nachricht(&json!({
                "op": 5,
                "d": { "user_id": "80351110224678912", "ssrc": 1001, "speaking": 1 }
            }))
            .unwrap();
        assert_eq!(s.registry().resolve(1001), Some(MemberId(80351110224678912)));
    }

    #[test]
    fn connect_und_disconnect() {
        let s = session();
        let control = s.control();
        control
            .gateway_text(r#"{"op":12,"d":{"user_id":"42","audio_ssrc":2002,"video_ssrc":0}}"#)
            .unwrap();
        assert_eq!(s.registry().ssrc_von_member(MemberId(42)), Some(2002));

        control
            .gateway_text(r#"{"op":13,"d":{"user_id":"42"}}"#)
            .unwrap();
        assert_eq!(s.registry().resolve(2002), None);
        assert!(s.registry().kuerzlich_entfernt(2002));
    }

    #[test]
    fn session_description_tauscht_modus() {
        let s = session();
        let key: Vec<u8> = (0..32).collect();
        s.control()
            .gateway_nachricht(&json!({
                "op": 4,
                "d": { "mode": "aead_xchacha20_poly1305_rtpsize", "secret_key": key }
            }))
            .unwrap();
        assert_eq!(s.modus(), VerschluesselungsModus::XChaCha20Poly1305RtpSize);
    }

    #[test]
    fn falsche_schluessellaenge_wird_gemeldet() {
        let s = session();
        let ergebnis = s.control().gateway_nachricht(&json!({
            "op": 4,
            "d": { "mode": "aead_aes256_gcm_rtpsize", "secret_key": [1, 2, 3] }
        }));
        assert!(matches!(ergebnis, Err(VoiceError::Krypto(_))));
        assert_eq!(s.modus(), VerschluesselungsModus::Aes256GcmRtpSize);
    }

    #[test]
    fn unbekannte_opcodes_werden_ignoriert() {
        let s = session();
        s.control()
            .gateway_nachricht(&json!({ "op": 6, "d": 1_700_000_000u64 }))
            .unwrap();
        s.control().gateway_nachricht(&json!({ "op": 8 })).unwrap();
    }

    #[test]
    fn fehlende_felder_sind_ein_fehler() {
        let s = session();
        let ergebnis = s
            .control()
            .gateway_nachricht(&json!({ "op": 12, "d": { "user_id": "1" } }));
        assert!(matches!(ergebnis, Err(VoiceError::Gateway(_))));

        let ergebnis = s
            .control()
            .gateway_nachricht(&json!({ "op": 5, "d": { "user_id": "abc", "ssrc": 1 } }));
        assert!(matches!(ergebnis, Err(VoiceError::Gateway(_))));
    }

    #[test]
    fn snowflake_als_zahl_und_bool_speaking() {
        let s = session();
        s.control()
            .gateway_nachricht(&json!({
                "op": 5,
                "d": { "user_id": 7, "ssrc": 3, "speaking": true }
            }))
            .unwrap();
        assert_eq!(s.registry().resolve(3), Some(MemberId(7)));
    }
}
