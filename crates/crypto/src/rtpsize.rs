//! AEAD "rtpsize"-Modi – Oeffnen und Versiegeln von RTP/RTCP-Paketen
//!
//! ## RTP-Layout
//!
//! ```text
//! [RTP-Header + CSRCs][Erweiterungs-Kopf (4), falls X]   <- AAD
//! [Erweiterungs-Rumpf + Opus-Payload + Tag (16)]         <- Ciphertext
//! [Nonce-Zaehler (4)]
//! ```
//!
//! ## RTCP-Layout
//!
//! ```text
//! [RTCP-Kopf + Sender-SSRC (8)]                          <- AAD
//! [Rest des Pakets + Tag (16)]                           <- Ciphertext
//! [Nonce-Zaehler (4)]
//! ```
//!
//! Der 4-Byte-Zaehler steht am Anfang der Nonce, der Rest ist mit Nullen
//! aufgefuellt (12 Bytes fuer AES-GCM, 24 fuer XChaCha20).
//!
//! Kein entschluesselter Inhalt verlaesst dieses Modul, bevor der
//! Auth-Tag verifiziert wurde. Die secretbox-Modi reicht
//! [`PaketEntschluesseler`] an `secretbox` weiter.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce as AesNonce};
use chacha20poly1305::{Key as ChaChaKey, XChaCha20Poly1305, XNonce};
use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::XSalsa20Poly1305;

use lauscher_protocol::rtp::ERWEITERUNGS_KOPF_LAENGE;
use lauscher_protocol::{
    paket_klassifizieren, ErweiterungsKopf, HeaderErweiterung, PacketError, PaketKlasse,
    RtcpPaket, RtpHeader, OPUS_SILENCE,
};

use crate::error::{CryptoError, CryptoResult};
use crate::secretbox;
use crate::types::{SessionSchluessel, VerschluesselungsModus, NONCE_SUFFIX_LAENGE, TAG_LAENGE};

/// Laenge des unverschluesselten RTCP-Kopfs (Kopf + Sender-SSRC)
const RTCP_AAD_LAENGE: usize = 8;

// ---------------------------------------------------------------------------
// Ergebnis-Typen
// ---------------------------------------------------------------------------

/// Entschluesseltes und zerlegtes RTP-Paket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFrame {
    pub header: RtpHeader,
    /// Header-Erweiterung (aus dem entschluesselten Rumpf)
    pub erweiterung: Option<HeaderErweiterung>,
    /// Opus-Payload ohne Erweiterungs-Rumpf
    pub payload: Vec<u8>,
    /// Nonce-Zaehler des Senders (0 in Modi ohne Zaehler)
    pub nonce: u32,
    /// Unveraendertes Datagramm
    pub roh: Vec<u8>,
}

impl RtpFrame {
    /// `true` wenn der Payload der Opus-Stille-Frame ist
    pub fn ist_stille(&self) -> bool {
        self.payload == OPUS_SILENCE
    }

    /// Daten eines Erweiterungs-Elements
    pub fn erweiterungs_element(&self, id: u8) -> Option<&[u8]> {
        self.erweiterung.as_ref().and_then(|e| e.element(id))
    }
}

/// Ergebnis von [`PaketEntschluesseler::empfangen`]
#[derive(Debug, Clone, PartialEq)]
pub enum EmpfangenesPaket {
    Rtp(RtpFrame),
    Rtcp(Vec<RtcpPaket>),
}

// ---------------------------------------------------------------------------
// PaketEntschluesseler
// ---------------------------------------------------------------------------

enum Chiffre {
    Aead(AeadChiffre),
    SecretBox(Box<XSalsa20Poly1305>),
}

enum AeadChiffre {
    Aes(Box<Aes256Gcm>),
    XChaCha(Box<XChaCha20Poly1305>),
}

/// Oeffnet und versiegelt Voice-Pakete mit dem Sitzungsschluessel
pub struct PaketEntschluesseler {
    modus: VerschluesselungsModus,
    chiffre: Chiffre,
}

impl std::fmt::Debug for PaketEntschluesseler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaketEntschluesseler")
            .field("modus", &self.modus)
            .finish_non_exhaustive()
    }
}

impl PaketEntschluesseler {
    /// Erstellt einen Entschluesseler fuer Modus und Schluessel
    pub fn neu(modus: VerschluesselungsModus, schluessel: &SessionSchluessel) -> Self {
        let chiffre = match modus {
            VerschluesselungsModus::Aes256GcmRtpSize => Chiffre::Aead(AeadChiffre::Aes(
                Box::new(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(schluessel.as_bytes()))),
            )),
            VerschluesselungsModus::XChaCha20Poly1305RtpSize => {
                Chiffre::Aead(AeadChiffre::XChaCha(Box::new(XChaCha20Poly1305::new(
                    ChaChaKey::from_slice(schluessel.as_bytes()),
                ))))
            }
            VerschluesselungsModus::XSalsa20Poly1305
            | VerschluesselungsModus::XSalsa20Poly1305Suffix
            | VerschluesselungsModus::XSalsa20Poly1305Lite => Chiffre::SecretBox(Box::new(
                XSalsa20Poly1305::new(GenericArray::from_slice(schluessel.as_bytes())),
            )),
        };
        Self { modus, chiffre }
    }

    pub fn modus(&self) -> VerschluesselungsModus {
        self.modus
    }

    /// Klassifiziert, entschluesselt und zerlegt ein Datagramm
    ///
    /// # Fehler
    /// - `Paket` bei kaputtem Framing
    /// - `Entschluesselung` wenn der Auth-Tag nicht passt
    pub fn empfangen(&self, data: &[u8]) -> CryptoResult<EmpfangenesPaket> {
        match paket_klassifizieren(data)? {
            PaketKlasse::Rtp => Ok(EmpfangenesPaket::Rtp(self.rtp_oeffnen(data)?)),
            PaketKlasse::Rtcp => {
                let klartext = self.rtcp_oeffnen(data)?;
                Ok(EmpfangenesPaket::Rtcp(RtcpPaket::parse_compound(&klartext)?))
            }
        }
    }

    /// Entschluesselt ein RTP-Paket
    pub fn rtp_oeffnen(&self, data: &[u8]) -> CryptoResult<RtpFrame> {
        let aead = match &self.chiffre {
            Chiffre::Aead(c) => c,
            Chiffre::SecretBox(c) => return secretbox::rtp_oeffnen(c, self.modus, data),
        };
        let header = RtpHeader::parse(data)?;
        let mut aad_ende = header.laenge();

        let kopf = if header.erweitert {
            let kopf = ErweiterungsKopf::parse(&data[aad_ende..])?;
            aad_ende += ERWEITERUNGS_KOPF_LAENGE;
            Some(kopf)
        } else {
            None
        };

        let minimum = aad_ende + TAG_LAENGE + NONCE_SUFFIX_LAENGE;
        if data.len() < minimum {
            return Err(PacketError::ZuKurz {
                laenge: data.len(),
                erwartet: minimum,
            }
            .into());
        }

        let nonce_start = data.len() - NONCE_SUFFIX_LAENGE;
        let suffix = &data[nonce_start..];
        let klartext = aead.oeffnen(suffix, &data[..aad_ende], &data[aad_ende..nonce_start])?;

        let (erweiterung, payload) = match kopf {
            Some(kopf) => {
                let rumpf_laenge = kopf.rumpf_laenge();
                if klartext.len() < rumpf_laenge {
                    return Err(PacketError::ZuKurz {
                        laenge: klartext.len(),
                        erwartet: rumpf_laenge,
                    }
                    .into());
                }
                let erweiterung = HeaderErweiterung::parse(kopf.profil, &klartext[..rumpf_laenge])?;
                (Some(erweiterung), klartext[rumpf_laenge..].to_vec())
            }
            None => (None, klartext),
        };

        Ok(RtpFrame {
            header,
            erweiterung,
            payload,
            nonce: u32::from_be_bytes([suffix[0], suffix[1], suffix[2], suffix[3]]),
            roh: data.to_vec(),
        })
    }

    /// Entschluesselt ein RTCP-Paket und liefert Kopf + Klartext
    pub fn rtcp_oeffnen(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let aead = match &self.chiffre {
            Chiffre::Aead(c) => c,
            Chiffre::SecretBox(c) => return secretbox::rtcp_oeffnen(c, self.modus, data),
        };
        let minimum = RTCP_AAD_LAENGE + TAG_LAENGE + NONCE_SUFFIX_LAENGE;
        if data.len() < minimum {
            return Err(PacketError::ZuKurz {
                laenge: data.len(),
                erwartet: minimum,
            }
            .into());
        }

        let nonce_start = data.len() - NONCE_SUFFIX_LAENGE;
        let aad = &data[..RTCP_AAD_LAENGE];
        let klartext = aead.oeffnen(
            &data[nonce_start..],
            aad,
            &data[RTCP_AAD_LAENGE..nonce_start],
        )?;

        let mut paket = Vec::with_capacity(RTCP_AAD_LAENGE + klartext.len());
        paket.extend_from_slice(aad);
        paket.extend_from_slice(&klartext);
        Ok(paket)
    }

    /// Versiegelt ein RTP-Paket im selben Layout, das `rtp_oeffnen` erwartet
    ///
    /// `erweiterung` ist (Profil, Rumpf); der Rumpf muss 32-Bit-ausgerichtet sein.
    /// `nonce` ist der Zaehler; im Suffix-Modus fuellt er die ersten vier
    /// Bytes der Nonce, im Grundmodus wird er ignoriert.
    pub fn rtp_versiegeln(
        &self,
        header: &RtpHeader,
        erweiterung: Option<(u16, &[u8])>,
        payload: &[u8],
        nonce: u32,
    ) -> CryptoResult<Vec<u8>> {
        let aead = match &self.chiffre {
            Chiffre::Aead(c) => c,
            Chiffre::SecretBox(c) => {
                return secretbox::rtp_versiegeln(c, self.modus, header, erweiterung, payload, nonce)
            }
        };
        let mut header = header.clone();
        header.erweitert = erweiterung.is_some();
        let mut aad = header.encode();
        let mut klartext = Vec::with_capacity(payload.len() + 16);

        if let Some((profil, rumpf)) = erweiterung {
            aad.extend_from_slice(&erweiterungs_kopf(profil, rumpf)?.encode());
            klartext.extend_from_slice(rumpf);
        }
        klartext.extend_from_slice(payload);

        let suffix = nonce.to_be_bytes();
        let ciphertext = aead.versiegeln(&suffix, &aad, &klartext)?;

        let mut paket = aad;
        paket.extend_from_slice(&ciphertext);
        paket.extend_from_slice(&suffix);
        Ok(paket)
    }

    /// Versiegelt ein vollstaendiges RTCP-Klartextpaket
    pub fn rtcp_versiegeln(&self, klartext: &[u8], nonce: u32) -> CryptoResult<Vec<u8>> {
        let aead = match &self.chiffre {
            Chiffre::Aead(c) => c,
            Chiffre::SecretBox(c) => return secretbox::rtcp_versiegeln(c, self.modus, klartext, nonce),
        };
        if klartext.len() < RTCP_AAD_LAENGE {
            return Err(PacketError::ZuKurz {
                laenge: klartext.len(),
                erwartet: RTCP_AAD_LAENGE,
            }
            .into());
        }

        let suffix = nonce.to_be_bytes();
        let aad = &klartext[..RTCP_AAD_LAENGE];
        let ciphertext = aead.versiegeln(&suffix, aad, &klartext[RTCP_AAD_LAENGE..])?;

        let mut paket = aad.to_vec();
        paket.extend_from_slice(&ciphertext);
        paket.extend_from_slice(&suffix);
        Ok(paket)
    }
}

impl AeadChiffre {
    fn oeffnen(&self, suffix: &[u8], aad: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        let nonce = nonce_aus_suffix(suffix);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let ergebnis = match self {
            Self::Aes(c) => c.decrypt(AesNonce::from_slice(&nonce[..12]), payload),
            Self::XChaCha(c) => c.decrypt(XNonce::from_slice(&nonce), payload),
        };
        ergebnis.map_err(|e| CryptoError::Entschluesselung(e.to_string()))
    }

    fn versiegeln(&self, suffix: &[u8], aad: &[u8], klartext: &[u8]) -> CryptoResult<Vec<u8>> {
        let nonce = nonce_aus_suffix(suffix);
        let payload = Payload {
            msg: klartext,
            aad,
        };
        let ergebnis = match self {
            Self::Aes(c) => c.encrypt(AesNonce::from_slice(&nonce[..12]), payload),
            Self::XChaCha(c) => c.encrypt(XNonce::from_slice(&nonce), payload),
        };
        ergebnis.map_err(|e| CryptoError::Verschluesselung(e.to_string()))
    }
}

/// Kopf der Header-Erweiterung zu einem 32-Bit-ausgerichteten Rumpf
pub(crate) fn erweiterungs_kopf(profil: u16, rumpf: &[u8]) -> CryptoResult<ErweiterungsKopf> {
    if rumpf.len() % 4 != 0 {
        return Err(CryptoError::Verschluesselung(format!(
            "Erweiterungs-Rumpf nicht 32-Bit-ausgerichtet ({} Bytes)",
            rumpf.len()
        )));
    }
    Ok(ErweiterungsKopf {
        profil,
        laenge_worte: (rumpf.len() / 4) as u16,
    })
}

/// Legt den 4-Byte-Zaehler an den Anfang einer genullten 24-Byte-Nonce
fn nonce_aus_suffix(suffix: &[u8]) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[..NONCE_SUFFIX_LAENGE].copy_from_slice(&suffix[..NONCE_SUFFIX_LAENGE]);
    nonce
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
