//! secretbox-Modi (XSalsa20-Poly1305) ohne AAD
//!
//! Der RTP-Header bleibt lesbar, wird aber nicht authentifiziert. Anders
//! als bei rtpsize liegt der Kopf der Header-Erweiterung im Ciphertext.
//!
//! ```text
//! [RTP-Header + CSRCs][Tag (16) + Ciphertext][Anhang]
//! [RTCP-Kopf (8)]     [Tag (16) + Ciphertext][Anhang]
//! ```
//!
//! | Modus                      | Nonce                                    | Anhang |
//! |----------------------------|------------------------------------------|--------|
//! | `xsalsa20_poly1305`        | erste 12 (RTCP: 8) Bytes, Rest Nullen    | -      |
//! | `xsalsa20_poly1305_suffix` | 24 Bytes am Paketende                    | 24     |
//! | `xsalsa20_poly1305_lite`   | 4-Byte-Zaehler am Paketende, Rest Nullen | 4      |

use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::Aead;
use crypto_secretbox::XSalsa20Poly1305;

use lauscher_protocol::rtp::ERWEITERUNGS_KOPF_LAENGE;
use lauscher_protocol::{ErweiterungsKopf, HeaderErweiterung, PacketError, RtpHeader};

use crate::error::{CryptoError, CryptoResult};
use crate::rtpsize::{erweiterungs_kopf, RtpFrame};
use crate::types::{VerschluesselungsModus, NONCE_SUFFIX_LAENGE, TAG_LAENGE};

/// Laenge der XSalsa20-Nonce
const NONCE_LAENGE: usize = 24;

/// RTP-Bytes, aus denen der Grundmodus die Nonce bildet
const RTP_NONCE_KOPF: usize = 12;

/// Unverschluesselter RTCP-Kopf (Kopf + Sender-SSRC)
const RTCP_KOPF_LAENGE: usize = 8;

fn anhang_laenge(modus: VerschluesselungsModus) -> usize {
    match modus {
        VerschluesselungsModus::XSalsa20Poly1305Suffix => NONCE_LAENGE,
        VerschluesselungsModus::XSalsa20Poly1305Lite => NONCE_SUFFIX_LAENGE,
        _ => 0,
    }
}

/// Nonce und Zaehler eines empfangenen Pakets; die Laenge ist geprueft
fn nonce_lesen(
    modus: VerschluesselungsModus,
    data: &[u8],
    kopf_laenge: usize,
) -> ([u8; NONCE_LAENGE], u32) {
    let mut nonce = [0u8; NONCE_LAENGE];
    let ende = data.len();
    match modus {
        VerschluesselungsModus::XSalsa20Poly1305Suffix => {
            nonce.copy_from_slice(&data[ende - NONCE_LAENGE..]);
            (nonce, 0)
        }
        VerschluesselungsModus::XSalsa20Poly1305Lite => {
            let z = &data[ende - NONCE_SUFFIX_LAENGE..];
            nonce[..NONCE_SUFFIX_LAENGE].copy_from_slice(z);
            (nonce, u32::from_be_bytes([z[0], z[1], z[2], z[3]]))
        }
        _ => {
            nonce[..kopf_laenge].copy_from_slice(&data[..kopf_laenge]);
            (nonce, 0)
        }
    }
}

/// Nonce und Anhang fuer ein ausgehendes Paket
fn nonce_bilden(
    modus: VerschluesselungsModus,
    kopf: &[u8],
    zaehler: u32,
) -> ([u8; NONCE_LAENGE], Vec<u8>) {
    let mut nonce = [0u8; NONCE_LAENGE];
    match modus {
        VerschluesselungsModus::XSalsa20Poly1305Suffix => {
            nonce[..NONCE_SUFFIX_LAENGE].copy_from_slice(&zaehler.to_be_bytes());
            (nonce, nonce.to_vec())
        }
        VerschluesselungsModus::XSalsa20Poly1305Lite => {
            nonce[..NONCE_SUFFIX_LAENGE].copy_from_slice(&zaehler.to_be_bytes());
            (nonce, zaehler.to_be_bytes().to_vec())
        }
        _ => {
            nonce[..kopf.len()].copy_from_slice(kopf);
            (nonce, Vec::new())
        }
    }
}

fn mindestens(data: &[u8], erwartet: usize) -> CryptoResult<()> {
    if data.len() < erwartet {
        return Err(PacketError::ZuKurz {
            laenge: data.len(),
            erwartet,
        }
        .into());
    }
    Ok(())
}

fn entschluesseln(
    chiffre: &XSalsa20Poly1305,
    nonce: &[u8; NONCE_LAENGE],
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    chiffre
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|e| CryptoError::Entschluesselung(e.to_string()))
}

fn verschluesseln(
    chiffre: &XSalsa20Poly1305,
    nonce: &[u8; NONCE_LAENGE],
    klartext: &[u8],
) -> CryptoResult<Vec<u8>> {
    chiffre
        .encrypt(GenericArray::from_slice(nonce), klartext)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))
}

/// Trennt Kopf und Rumpf der Header-Erweiterung vom Opus-Payload
fn erweiterung_abtrennen(klartext: &[u8]) -> CryptoResult<(HeaderErweiterung, Vec<u8>)> {
    let kopf = ErweiterungsKopf::parse(klartext)?;
    let rumpf_ende = ERWEITERUNGS_KOPF_LAENGE + kopf.rumpf_laenge();
    mindestens(klartext, rumpf_ende)?;
    let erweiterung =
        HeaderErweiterung::parse(kopf.profil, &klartext[ERWEITERUNGS_KOPF_LAENGE..rumpf_ende])?;
    Ok((erweiterung, klartext[rumpf_ende..].to_vec()))
}

pub(crate) fn rtp_oeffnen(
    chiffre: &XSalsa20Poly1305,
    modus: VerschluesselungsModus,
    data: &[u8],
) -> CryptoResult<RtpFrame> {
    let header = RtpHeader::parse(data)?;
    let klar_ende = header.laenge();
    let anhang = anhang_laenge(modus);
    mindestens(data, klar_ende + TAG_LAENGE + anhang)?;

    let (nonce, zaehler) = nonce_lesen(modus, data, RTP_NONCE_KOPF);
    let klartext = entschluesseln(chiffre, &nonce, &data[klar_ende..data.len() - anhang])?;

    let (erweiterung, payload) = if header.erweitert {
        let (erweiterung, payload) = erweiterung_abtrennen(&klartext)?;
        (Some(erweiterung), payload)
    } else {
        (None, klartext)
    };

    Ok(RtpFrame {
        header,
        erweiterung,
        payload,
        nonce: zaehler,
        roh: data.to_vec(),
    })
}

pub(crate) fn rtcp_oeffnen(
    chiffre: &XSalsa20Poly1305,
    modus: VerschluesselungsModus,
    data: &[u8],
) -> CryptoResult<Vec<u8>> {
    let anhang = anhang_laenge(modus);
    mindestens(data, RTCP_KOPF_LAENGE + TAG_LAENGE + anhang)?;

    let (nonce, _) = nonce_lesen(modus, data, RTCP_KOPF_LAENGE);
    let klartext = entschluesseln(
        chiffre,
        &nonce,
        &data[RTCP_KOPF_LAENGE..data.len() - anhang],
    )?;

    let mut paket = Vec::with_capacity(RTCP_KOPF_LAENGE + klartext.len());
    paket.extend_from_slice(&data[..RTCP_KOPF_LAENGE]);
    paket.extend_from_slice(&klartext);
    Ok(paket)
}

pub(crate) fn rtp_versiegeln(
    chiffre: &XSalsa20Poly1305,
    modus: VerschluesselungsModus,
    header: &RtpHeader,
    erweiterung: Option<(u16, &[u8])>,
    payload: &[u8],
    zaehler: u32,
) -> CryptoResult<Vec<u8>> {
    let mut header = header.clone();
    header.erweitert = erweiterung.is_some();
    let mut paket = header.encode();

    let mut klartext = Vec::with_capacity(payload.len() + 16);
    if let Some((profil, rumpf)) = erweiterung {
        klartext.extend_from_slice(&erweiterungs_kopf(profil, rumpf)?.encode());
        klartext.extend_from_slice(rumpf);
    }
    klartext.extend_from_slice(payload);

    let (nonce, anhang) = nonce_bilden(modus, &paket[..RTP_NONCE_KOPF], zaehler);
    let ciphertext = verschluesseln(chiffre, &nonce, &klartext)?;
    paket.extend_from_slice(&ciphertext);
    paket.extend_from_slice(&anhang);
    Ok(paket)
}

pub(crate) fn rtcp_versiegeln(
    chiffre: &XSalsa20Poly1305,
    modus: VerschluesselungsModus,
    klartext: &[u8],
    zaehler: u32,
) -> CryptoResult<Vec<u8>> {
    mindestens(klartext, RTCP_KOPF_LAENGE)?;
    let kopf = &klartext[..RTCP_KOPF_LAENGE];
    let (nonce, anhang) = nonce_bilden(modus, kopf, zaehler);
    let ciphertext = verschluesseln(chiffre, &nonce, &klartext[RTCP_KOPF_LAENGE..])?;

    let mut paket = kopf.to_vec();
    paket.extend_from_slice(&ciphertext);
    paket.extend_from_slice(&anhang);
    Ok(paket)
}
