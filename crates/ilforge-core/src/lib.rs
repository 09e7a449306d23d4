//! ilforge-core : primitives partagées de la génération de code à l'exécution
//!
//! Fournit :
//! - le vocabulaire d'instructions par défaut (`Op`, `ValueType`, `Label`)
//! - `InstructionStream` : flux append-only + codec binaire (CRC32)
//! - un assembleur texte minimal (`asm`) et un désassembleur (`disasm`)
//! - le vérificateur de pile exécuté à la finalisation (`verify`)
//! - Constantes ILIMG (`MAGIC_ILIMG`, `ILIMG_VERSION`) + `SectionTag` (fourcc)
//! - IO mémoire (little-endian) : `ByteWriter`, `ByteReader`
//! - Erreurs `CoreError` + alias `CoreResult<T>`
//!
//! Features :
//! - `serde` (par défaut) : derive (dé)sérialisation sur le vocabulaire

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use std::borrow::Cow;

use thiserror::Error;

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Vocabulaire d'instructions, flux, assembleur, désassembleur, vérificateur.
pub mod bytecode;

pub use bytecode::asm;
pub use bytecode::disasm;
pub use bytecode::verify;
pub use bytecode::{InstructionStream, Label, Op, ValueType};

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun au core.
pub type CoreResult<T> = Result<T, CoreError>;

/* ─────────────────────────── ILIMG : Constantes & Tags ─────────────────────────── */

/// Magic d’une image ILIMG : `b"ILIMG\0"`.
pub const MAGIC_ILIMG: &[u8; 6] = b"ILIMG\0";

/// Version actuelle du conteneur ILIMG.
pub const ILIMG_VERSION: u16 = 1;

/// Tags de section (fourcc), exactement 4 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionTag {
    /// NAME : nom d'assembly + noms de modules
    NAME = u32::from_be_bytes(*b"NAME"),
    /// TYPE : table des types (module, nom qualifié, attributs, nb méthodes)
    TYPE = u32::from_be_bytes(*b"TYPE"),
    /// METH : table des méthodes (nom, attributs, signature, offset code)
    METH = u32::from_be_bytes(*b"METH"),
    /// CODE : flux d'instructions encodés (optionnellement compressés)
    CODE = u32::from_be_bytes(*b"CODE"),
    /// CRCC : CRC32 trailer (u32 LE)
    CRCC = u32::from_be_bytes(*b"CRCC"),
}

impl SectionTag {
    /// Renvoie le fourcc sous forme de 4 octets big-endian.
    pub const fn to_be_bytes(self) -> [u8; 4] { (self as u32).to_be_bytes() }
    /// Lit un tag depuis 4 octets big-endian.
    pub const fn from_be_bytes(b: [u8; 4]) -> Option<Self> {
        match u32::from_be_bytes(b) {
            x if x == Self::NAME as u32 => Some(Self::NAME),
            x if x == Self::TYPE as u32 => Some(Self::TYPE),
            x if x == Self::METH as u32 => Some(Self::METH),
            x if x == Self::CODE as u32 => Some(Self::CODE),
            x if x == Self::CRCC as u32 => Some(Self::CRCC),
            _ => None,
        }
    }
}

/* ─────────────────────────── CRC32 IEEE ─────────────────────────── */

/// CRC32 (IEEE 802.3) via `crc32fast`.
pub fn crc32_ieee(data: &[u8]) -> u32 { crc32fast::hash(data) }

/* ─────────────────────────── Byte Writer (LE) ─────────────────────────── */

/// Buffer d’écriture (croît automatiquement).
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Crée un writer vide.
    pub const fn new() -> Self { Self { buf: Vec::new() } }
    /// Accès en lecture au contenu.
    pub fn as_slice(&self) -> &[u8] { &self.buf }
    /// Taille courante.
    pub fn len(&self) -> usize { self.buf.len() }
    /// Vrai si rien n'a été écrit.
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }
    /// Récupère le buffer (consomme).
    pub fn into_vec(self) -> Vec<u8> { self.buf }
    /// Ajoute des octets bruts.
    pub fn write_bytes(&mut self, bytes: &[u8]) { self.buf.extend_from_slice(bytes); }
    /// Écrit un tag (fourcc big-endian).
    pub fn write_tag(&mut self, tag: SectionTag) { self.write_bytes(&tag.to_be_bytes()); }
    /// Écrit un octet.
    pub fn write_u8(&mut self, v: u8) { self.buf.push(v); }
    /// Écrit un u16 little-endian.
    pub fn write_u16_le(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un u32 little-endian.
    pub fn write_u32_le(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un i32 little-endian.
    pub fn write_i32_le(&mut self, v: i32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un i64 little-endian.
    pub fn write_i64_le(&mut self, v: i64) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un f64 little-endian.
    pub fn write_f64_le(&mut self, v: f64) { self.buf.extend_from_slice(&v.to_le_bytes()); }

    /// Écrit une chaîne `[len:u32][utf8]`.
    ///
    /// Les longueurs sont bornées à `u32::MAX` par construction du format.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_str(&mut self, s: &str) {
        self.write_u32_le(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }

    /// Écrit une section complète : tag + longueur + payload.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_section(&mut self, tag: SectionTag, payload: &[u8]) {
        self.write_tag(tag);
        self.write_u32_le(payload.len() as u32);
        self.write_bytes(payload);
    }
}

/* ─────────────────────────── Byte Reader (LE) ─────────────────────────── */

/// Lecteur séquentiel sur un slice d’octets (helpers LE).
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> ByteReader<'a> {
    /// Construit un lecteur.
    pub const fn new(data: &'a [u8]) -> Self { Self { data, off: 0 } }
    /// Offset courant.
    pub const fn offset(&self) -> usize { self.off }
    /// Taille restante.
    pub const fn remaining(&self) -> usize { self.data.len().saturating_sub(self.off) }

    /// Lit `n` octets (ou erreur si EOF).
    pub fn read_bytes(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CoreError::UnexpectedEof { needed: n as u64, at: self.off as u64 });
        }
        let start = self.off;
        self.off += n;
        Ok(&self.data[start..self.off])
    }

    fn read_array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let b = self.read_bytes(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(b);
        Ok(arr)
    }

    /// Lit un tag (fourcc big-endian). Les tags inconnus sont signalés via `Err`.
    pub fn read_tag(&mut self) -> CoreResult<SectionTag> {
        let arr = self.read_array::<4>()?;
        SectionTag::from_be_bytes(arr).ok_or(CoreError::InvalidSectionTag { raw: u32::from_be_bytes(arr) })
    }

    /// Lit un tag brut (fourcc big-endian).
    pub fn read_raw_tag(&mut self) -> CoreResult<[u8; 4]> { self.read_array::<4>() }

    /// Lit un octet.
    pub fn read_u8(&mut self) -> CoreResult<u8> { Ok(self.read_array::<1>()?[0]) }
    /// Lit un u16 LE.
    pub fn read_u16_le(&mut self) -> CoreResult<u16> { Ok(u16::from_le_bytes(self.read_array()?)) }
    /// Lit un u32 LE.
    pub fn read_u32_le(&mut self) -> CoreResult<u32> { Ok(u32::from_le_bytes(self.read_array()?)) }
    /// Lit un i32 LE.
    pub fn read_i32_le(&mut self) -> CoreResult<i32> { Ok(i32::from_le_bytes(self.read_array()?)) }
    /// Lit un i64 LE.
    pub fn read_i64_le(&mut self) -> CoreResult<i64> { Ok(i64::from_le_bytes(self.read_array()?)) }
    /// Lit un f64 LE.
    pub fn read_f64_le(&mut self) -> CoreResult<f64> { Ok(f64::from_bits(u64::from_le_bytes(self.read_array()?))) }

    /// Lit une chaîne `[len:u32][utf8]`.
    pub fn read_str(&mut self) -> CoreResult<String> {
        let len = self.read_u32_le()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map(str::to_owned).map_err(|_| CoreError::InvalidUtf8)
    }
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs de bas niveau communes (codec, lecture de conteneurs).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Magic invalide.
    #[error("invalid magic")]
    InvalidMagic,
    /// Tag de section inconnu.
    #[error("invalid section tag: 0x{raw:08X}")]
    InvalidSectionTag {
        /// Valeur brute du tag.
        raw: u32,
    },
    /// Fin de buffer inattendue.
    #[error("unexpected EOF: need {needed} bytes at {at}")]
    UnexpectedEof {
        /// Nombre d’octets manquants.
        needed: u64,
        /// Offset où l’erreur s’est produite.
        at: u64,
    },
    /// Octet d'opcode inconnu.
    #[error("unknown opcode 0x{byte:02X} at offset {at}")]
    UnknownOpcode {
        /// Octet lu.
        byte: u8,
        /// Offset de l'octet.
        at: u64,
    },
    /// CRC32 recalculé différent de celui stocké.
    #[error("crc32 mismatch: expected=0x{expected:08X}, found=0x{found:08X}")]
    CrcMismatch {
        /// CRC32 recalculé depuis le payload.
        expected: u32,
        /// CRC32 lu dans le payload.
        found: u32,
    },
    /// UTF-8 invalide.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// Données corrompues (format).
    #[error("corrupted: {0}")]
    Corrupted(Cow<'static, str>),
}

impl CoreError {
    /// Construit une erreur « corrompu ».
    pub fn corrupted(msg: impl Into<Cow<'static, str>>) -> Self { Self::Corrupted(msg.into()) }
}

/* ─────────────────────────── Prélude (reexports utiles) ─────────────────────────── */

/// Prélude pratique pour importer les types/funcs clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{
        crc32_ieee, ByteReader, ByteWriter, CoreError, CoreResult, InstructionStream, Label, Op,
        SectionTag, ValueType, ILIMG_VERSION, MAGIC_ILIMG,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */
