//! Payload-Decoder – Opus zu PCM pro SSRC
//!
//! Ein Decoder haelt Zustand ueber aufeinanderfolgende Frames einer SSRC.
//! Er wird erst erzeugt, wenn mindestens ein Sink im Baum dekodiertes Audio
//! verlangt, und lebt so lange wie der Registry-Eintrag der SSRC.
//!
//! Die Erzeugung laeuft ueber eine [`DecoderFabrik`], damit Tests einen
//! zaehlenden Stub einsetzen koennen.

use std::sync::Arc;

use audiopus::{coder::Decoder, Channels, SampleRate};
use tracing::debug;

use crate::config::DekoderConfig;
use crate::error::DecodeError;

/// Maximale Opus-Frame-Dauer (120 ms) bei 48 kHz in Samples pro Kanal
const MAX_FRAME_SAMPLES: usize = 5760;

/// Zustandsbehafteter Decoder fuer den Payload einer SSRC
pub trait PayloadDecoder: Send {
    /// Dekodiert einen Opus-Frame zu interleaved i16-PCM
    fn decode(&mut self, opus: &[u8]) -> Result<Vec<i16>, DecodeError>;

    /// Verschleiert einen verlorenen Frame.
    ///
    /// Ist `naechstes` gesetzt, wird die In-Band-FEC dieses Pakets genutzt.
    fn decode_verloren(&mut self, naechstes: Option<&[u8]>) -> Result<Vec<i16>, DecodeError>;
}

/// Erzeugt Decoder bei Bedarf
pub type DecoderFabrik =
    Arc<dyn Fn() -> Result<Box<dyn PayloadDecoder>, DecodeError> + Send + Sync>;

/// Standard-Fabrik: Opus mit den Werten aus der Konfiguration
pub fn opus_fabrik(config: &DekoderConfig) -> DecoderFabrik {
    let config = config.clone();
    Arc::new(move || {
        OpusDecoder::neu(&config).map(|d| Box::new(d) as Box<dyn PayloadDecoder>)
    })
}

// ---------------------------------------------------------------------------
// OpusDecoder
// ---------------------------------------------------------------------------

/// Opus-Decoder auf Basis von audiopus
pub struct OpusDecoder {
    decoder: Decoder,
    kanaele: usize,
    frame_samples: usize,
}

impl OpusDecoder {
    pub fn neu(config: &DekoderConfig) -> Result<Self, DecodeError> {
        let rate = abtastrate(config.sample_rate)?;
        let kanaele = match config.kanaele {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => {
                return Err(DecodeError::Erstellung(format!(
                    "Nicht unterstuetzte Kanalanzahl: {n}"
                )))
            }
        };

        let decoder =
            Decoder::new(rate, kanaele).map_err(|e| DecodeError::Erstellung(e.to_string()))?;

        debug!(
            sample_rate = config.sample_rate,
            kanaele = config.kanaele,
            "OpusDecoder erstellt"
        );

        Ok(Self {
            decoder,
            kanaele: config.kanaele as usize,
            frame_samples: config.samples_pro_frame(),
        })
    }

    pub fn kanaele(&self) -> usize {
        self.kanaele
    }
}

impl PayloadDecoder for OpusDecoder {
    fn decode(&mut self, opus: &[u8]) -> Result<Vec<i16>, DecodeError> {
        let mut ausgabe = vec![0i16; MAX_FRAME_SAMPLES * self.kanaele];
        let dekodiert = self
            .decoder
            .decode(Some(opus), &mut ausgabe, false)
            .map_err(|e| DecodeError::Opus(e.to_string()))?;

        ausgabe.truncate(dekodiert * self.kanaele);
        Ok(ausgabe)
    }

    fn decode_verloren(&mut self, naechstes: Option<&[u8]>) -> Result<Vec<i16>, DecodeError> {
        // Bei PLC/FEC bestimmt die Puffergroesse die Dauer des Ersatz-Frames
        let mut ausgabe = vec![0i16; self.frame_samples * self.kanaele];
        let dekodiert = match naechstes {
            Some(paket) => self.decoder.decode(Some(paket), &mut ausgabe, true),
            None => self.decoder.decode(None::<&[u8]>, &mut ausgabe, false),
        }
        .map_err(|e| DecodeError::Opus(e.to_string()))?;

        ausgabe.truncate(dekodiert * self.kanaele);
        Ok(ausgabe)
    }
}

fn abtastrate(hz: u32) -> Result<SampleRate, DecodeError> {
    match hz {
        8000 => Ok(SampleRate::Hz8000),
        12000 => Ok(SampleRate::Hz12000),
        16000 => Ok(SampleRate::Hz16000),
        24000 => Ok(SampleRate::Hz24000),
        48000 => Ok(SampleRate::Hz48000),
        andere => Err(DecodeError::Erstellung(format!(
            "Nicht unterstuetzte Abtastrate: {andere}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiopus::{coder::Encoder, Application};

    fn stereo_frame_kodieren() -> Vec<u8> {
        let encoder =
            Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Voip).unwrap();
        let pcm: Vec<i16> = (0..960 * 2)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();
        let mut ausgabe = vec![0u8; 1500];
        let laenge = encoder.encode(&pcm, &mut ausgabe).unwrap();
        ausgabe.truncate(laenge);
        ausgabe
    }

    #[test]
    fn decoder_aus_standard_config() {
        let dec = OpusDecoder::neu(&DekoderConfig::default()).unwrap();
        assert_eq!(dec.kanaele(), 2);
    }

    #[test]
    fn ungueltige_abtastrate_wird_abgelehnt() {
        let config = DekoderConfig {
            sample_rate: 44_100,
            ..DekoderConfig::default()
        };
        assert!(matches!(
            OpusDecoder::neu(&config),
            Err(DecodeError::Erstellung(_))
        ));
    }

    #[test]
    fn frame_wird_zu_interleaved_pcm() {
        let mut dec = OpusDecoder::neu(&DekoderConfig::default()).unwrap();
        let pcm = dec.decode(&stereo_frame_kodieren()).unwrap();
        // 20 ms bei 48 kHz, zwei Kanaele
        assert_eq!(pcm.len(), 960 * 2);
    }

    #[test]
    fn stille_frame_dekodiert() {
        let mut dec = OpusDecoder::neu(&DekoderConfig::default()).unwrap();
        let pcm = dec.decode(&lauscher_protocol::OPUS_SILENCE).unwrap();
        assert!(!pcm.is_empty());
    }

    #[test]
    fn verlust_verschleierung_liefert_einen_frame() {
        let mut dec = OpusDecoder::neu(&DekoderConfig::default()).unwrap();
        let frame = stereo_frame_kodieren();
        dec.decode(&frame).unwrap();

        let plc = dec.decode_verloren(None).unwrap();
        assert_eq!(plc.len(), 960 * 2);

        let fec = dec.decode_verloren(Some(&frame)).unwrap();
        assert_eq!(fec.len(), 960 * 2);
    }

    #[test]
    fn fabrik_erzeugt_unabhaengige_decoder() {
        let fabrik = opus_fabrik(&DekoderConfig::default());
        let mut a = fabrik().unwrap();
        let mut b = fabrik().unwrap();
        let frame = stereo_frame_kodieren();
        assert_eq!(a.decode(&frame).unwrap().len(), b.decode(&frame).unwrap().len());
    }
}
