//! lauscher-voice – Voice-Empfangs-Engine
//!
//! Empfaengt verschluesselte RTP/RTCP-Datagramme einer Voice-Verbindung,
//! ordnet sie Mitgliedern zu, erkennt Sprechphasen und verteilt Audio an
//! einen Baum von Sinks sowie Ereignisse an Listener.
//!
//! ## Module
//! - [`session`] – Lebenszyklus (`listen`, `stop_listening`) und Control-Kanal
//! - [`registry`] – SSRC-Registry mit Identitaeten, Sprechzustand und Decodern
//! - [`speaking`] – Zustandsautomat der Sprecherkennung
//! - [`sink`] – Sink-Baum, Filter und Callback-Sinks
//! - [`dispatcher`] – Event-Dispatcher und Listener-Tabellen
//! - [`event`] – Ereignistypen
//! - [`decoder`] – Opus-Dekodierung mit Verlustverschleierung
//! - [`gateway`] – Auswertung der Gateway-Opcodes
//! - [`telemetry`] – Empfangszaehler
//! - [`config`] – Konfiguration (TOML)

pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod gateway;
mod receiver;
pub mod registry;
pub mod session;
pub mod sink;
pub mod speaking;
pub mod telemetry;
pub mod types;

pub use config::{DekoderConfig, EmpfangsConfig};
pub use decoder::{opus_fabrik, DecoderFabrik, OpusDecoder, PayloadDecoder};
pub use dispatcher::{Listener, ListenerTabelle};
pub use error::{DecodeError, SinkError, VoiceError, VoiceResult};
pub use event::{EventArt, VoiceEvent};
pub use registry::{IdentitaetsUpdate, SsrcInfo, SsrcRegistry};
pub use session::{ControlHandle, Finalisierer, VoiceSession};
pub use sink::{
    Ausgang, AudioSink, CallbackSink, ConditionalFilter, MemberFilter, SinkErgebnis, SinkHandle,
    SinkId, SinkTree, TimedFilter, VoiceData,
};
pub use telemetry::StatistikSnapshot;
pub use types::{MemberId, SprechFlags, VoiceFlags, VoicePlatform};
