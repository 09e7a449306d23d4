//! ilforge-image : format & IO du conteneur binaire ILIMG
//!
//! Format :
//! ```text
//! Header: "ILIMG\0" (6 bytes) + version u16 LE + flags u16 LE
//! [Section*]
//!   section = TAG[4] + len u32 LE + payload
//! Dernière section: "CRCC" + u32 (CRC32 sur tout après le magic)
//! ```
//!
//! Sections :
//! - "NAME" : nom d'assembly puis noms de modules (len u32 + bytes)
//! - "TYPE" : module u32, nom qualifié, attributs u32, 1re méthode u32, nb u32
//! - "METH" : nom, attributs u32, retour u8, params (u8*), max_stack u16, offset/len CODE
//! - "CODE" : flux d'instructions encodés, concaténés (zstd si `CODE_ZSTD`)
//!
//! Les sections inconnues sont ignorées. Ce crate ne connaît pas les
//! descripteurs : `ilforge-emit` convertit une assembly finalisée en [`Image`].

#![deny(missing_docs)]

use std::{fs, path::Path, path::PathBuf};

use bitflags::bitflags;
use thiserror::Error;
use tracing::debug;

use ilforge_core::{crc32_ieee, ByteReader, ByteWriter, CoreError, SectionTag, ILIMG_VERSION, MAGIC_ILIMG};

/// Résultat du crate.
pub type ImageResult<T> = Result<T, ImageError>;

/// Erreurs de lecture/écriture d'image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Format binaire invalide.
    #[error("format: {0}")]
    Core(#[from] CoreError),

    /// I/O sur la destination.
    #[error("io on {}: {source}", path.display())]
    Io {
        /// Fichier concerné.
        path: PathBuf,
        /// Erreur d'origine.
        #[source]
        source: std::io::Error,
    },

    /// Version d'image hors de `1..=max`.
    #[error("unsupported image version {found} (supported 1..={max})")]
    Version {
        /// Version lue.
        found: u16,
        /// Version maximale connue.
        max: u16,
    },

    /// Compression demandée/présente mais indisponible ou en échec.
    #[error("compression: {0}")]
    Compression(String),
}

bitflags! {
    /// Drapeaux d'en-tête.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImageFlags: u16 {
        /// La section CODE est compressée (zstd).
        const CODE_ZSTD = 1;
    }
}

/// Entrée de la table des types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRecord {
    /// Index du module propriétaire (dans `Image::modules`).
    pub module: u32,
    /// Nom qualifié (`Namespace.Simple`).
    pub name: String,
    /// Bits d'attributs (interprétés par `ilforge-emit`).
    pub attributes: u32,
    /// Index de la première méthode dans `Image::methods`.
    pub first_method: u32,
    /// Nombre de méthodes consécutives.
    pub method_count: u32,
}

/// Entrée de la table des méthodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRecord {
    /// Nom simple.
    pub name: String,
    /// Bits d'attributs.
    pub attributes: u32,
    /// Code du type de retour (`ValueType::code`).
    pub ret: u8,
    /// Codes des types de paramètres, dans l'ordre.
    pub params: Vec<u8>,
    /// Profondeur de pile vérifiée.
    pub max_stack: u16,
    /// Offset du corps dans CODE (décompressé).
    pub code_offset: u32,
    /// Longueur du corps.
    pub code_len: u32,
}

/// Représentation d’une image ILIMG en mémoire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    /// Version du format.
    pub version: u16,
    /// Drapeaux lus (ou calculés à l'écriture).
    pub flags: ImageFlags,
    /// Nom de l'assembly.
    pub assembly: String,
    /// Noms des modules, dans l'ordre de déclaration.
    pub modules: Vec<String>,
    /// Table des types.
    pub types: Vec<TypeRecord>,
    /// Table des méthodes (groupées par type).
    pub methods: Vec<MethodRecord>,
    /// Corps concaténés.
    pub code: Vec<u8>,
    /// CRC32 vérifié à la lecture.
    pub crc32: u32,
}

impl Image {
    /// Image vide à la version courante.
    pub fn new(assembly: impl Into<String>) -> Self {
        Self { version: ILIMG_VERSION, assembly: assembly.into(), ..Self::default() }
    }

    /// Ajoute un corps dans CODE et renvoie `(offset, len)`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push_code(&mut self, body: &[u8]) -> (u32, u32) {
        let offset = self.code.len() as u32;
        self.code.extend_from_slice(body);
        (offset, body.len() as u32)
    }

    /// Corps d'une méthode (bornes vérifiées).
    pub fn method_code(&self, m: &MethodRecord) -> ImageResult<&[u8]> {
        let start = m.code_offset as usize;
        let end = start.checked_add(m.code_len as usize).filter(|end| *end <= self.code.len());
        end.map(|end| &self.code[start..end])
            .ok_or_else(|| CoreError::corrupted(format!("method `{}` body out of CODE bounds", m.name)).into())
    }

    /// Méthodes d'un type (bornes vérifiées).
    pub fn methods_of(&self, t: &TypeRecord) -> ImageResult<&[MethodRecord]> {
        let start = t.first_method as usize;
        let end = start.checked_add(t.method_count as usize).filter(|end| *end <= self.methods.len());
        end.map(|end| &self.methods[start..end])
            .ok_or_else(|| CoreError::corrupted(format!("type `{}` method range out of bounds", t.name)).into())
    }

    /// Sérialise en binaire ILIMG (avec CRC32).
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self, compress_code: bool) -> ImageResult<Vec<u8>> {
        let (code, flags) = encode_code(&self.code, compress_code)?;

        let mut w = ByteWriter::new();
        w.write_bytes(MAGIC_ILIMG);
        w.write_u16_le(self.version);
        w.write_u16_le(flags.bits());

        // NAME
        let mut buf = ByteWriter::new();
        buf.write_str(&self.assembly);
        buf.write_u32_le(self.modules.len() as u32);
        for m in &self.modules {
            buf.write_str(m);
        }
        w.write_section(SectionTag::NAME, buf.as_slice());

        // TYPE
        let mut buf = ByteWriter::new();
        buf.write_u32_le(self.types.len() as u32);
        for t in &self.types {
            buf.write_u32_le(t.module);
            buf.write_str(&t.name);
            buf.write_u32_le(t.attributes);
            buf.write_u32_le(t.first_method);
            buf.write_u32_le(t.method_count);
        }
        w.write_section(SectionTag::TYPE, buf.as_slice());

        // METH
        let mut buf = ByteWriter::new();
        buf.write_u32_le(self.methods.len() as u32);
        for m in &self.methods {
            buf.write_str(&m.name);
            buf.write_u32_le(m.attributes);
            buf.write_u8(m.ret);
            buf.write_u16_le(m.params.len() as u16);
            buf.write_bytes(&m.params);
            buf.write_u16_le(m.max_stack);
            buf.write_u32_le(m.code_offset);
            buf.write_u32_le(m.code_len);
        }
        w.write_section(SectionTag::METH, buf.as_slice());

        // CODE
        if !code.is_empty() {
            w.write_section(SectionTag::CODE, &code);
        }

        // CRC32 sur tout sauf magic
        let mut out = w.into_vec();
        let crc = crc32_ieee(&out[MAGIC_ILIMG.len()..]);
        out.extend_from_slice(&SectionTag::CRCC.to_be_bytes());
        out.extend_from_slice(&crc.to_le_bytes());

        debug!(assembly = %self.assembly, bytes = out.len(), ?flags, "image encoded");
        Ok(out)
    }

    /// Reconstruit une image à partir d’octets.
    pub fn from_bytes(data: &[u8]) -> ImageResult<Self> {
        let mut r = ByteReader::new(data);
        if r.read_bytes(MAGIC_ILIMG.len())? != MAGIC_ILIMG {
            return Err(CoreError::InvalidMagic.into());
        }
        let version = r.read_u16_le()?;
        if version == 0 || version > ILIMG_VERSION {
            return Err(ImageError::Version { found: version, max: ILIMG_VERSION });
        }
        let flags = ImageFlags::from_bits_truncate(r.read_u16_le()?);

        let mut img = Self { version, flags, ..Self::default() };
        let mut raw_code: &[u8] = &[];
        let mut sealed = false;

        while r.remaining() > 0 {
            let tag = r.read_raw_tag()?;
            if SectionTag::from_be_bytes(tag) == Some(SectionTag::CRCC) {
                let found = r.read_u32_le()?;
                // 6 = magic ; 8 = CRCC + u32
                let expected = crc32_ieee(&data[MAGIC_ILIMG.len()..data.len() - 8]);
                if expected != found {
                    return Err(CoreError::CrcMismatch { expected, found }.into());
                }
                img.crc32 = found;
                sealed = true;
                break;
            }
            let len = r.read_u32_le()? as usize;
            let payload = r.read_bytes(len)?;
            match SectionTag::from_be_bytes(tag) {
                Some(SectionTag::NAME) => {
                    let mut rr = ByteReader::new(payload);
                    img.assembly = rr.read_str()?;
                    let n = rr.read_u32_le()?;
                    for _ in 0..n {
                        img.modules.push(rr.read_str()?);
                    }
                }
                Some(SectionTag::TYPE) => {
                    let mut rr = ByteReader::new(payload);
                    let n = rr.read_u32_le()?;
                    for _ in 0..n {
                        img.types.push(TypeRecord {
                            module: rr.read_u32_le()?,
                            name: rr.read_str()?,
                            attributes: rr.read_u32_le()?,
                            first_method: rr.read_u32_le()?,
                            method_count: rr.read_u32_le()?,
                        });
                    }
                }
                Some(SectionTag::METH) => {
                    let mut rr = ByteReader::new(payload);
                    let n = rr.read_u32_le()?;
                    for _ in 0..n {
                        let name = rr.read_str()?;
                        let attributes = rr.read_u32_le()?;
                        let ret = rr.read_u8()?;
                        let arity = usize::from(rr.read_u16_le()?);
                        let params = rr.read_bytes(arity)?.to_vec();
                        img.methods.push(MethodRecord {
                            name,
                            attributes,
                            ret,
                            params,
                            max_stack: rr.read_u16_le()?,
                            code_offset: rr.read_u32_le()?,
                            code_len: rr.read_u32_le()?,
                        });
                    }
                }
                Some(SectionTag::CODE) => raw_code = payload,
                // ignore inconnu
                _ => debug!(tag = ?String::from_utf8_lossy(&tag), len, "skipping unknown section"),
            }
        }

        if !sealed {
            return Err(CoreError::corrupted("missing CRCC trailer").into());
        }
        img.code = decode_code(raw_code, flags)?;
        Ok(img)
    }

    /// Écrit dans un fichier.
    pub fn write_file<P: AsRef<Path>>(&self, path: P, compress_code: bool) -> ImageResult<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes(compress_code)?;
        fs::write(path, bytes).map_err(|source| ImageError::Io { path: path.to_path_buf(), source })
    }

    /// Lit une image depuis un fichier.
    pub fn read_file<P: AsRef<Path>>(path: P) -> ImageResult<Self> {
        let path = path.as_ref();
        let buf = fs::read(path).map_err(|source| ImageError::Io { path: path.to_path_buf(), source })?;
        Self::from_bytes(&buf)
    }
}

#[cfg(feature = "zstd")]
fn encode_code(code: &[u8], compress: bool) -> ImageResult<(Vec<u8>, ImageFlags)> {
    if compress && !code.is_empty() {
        let packed = zstd::bulk::compress(code, 3).map_err(|e| ImageError::Compression(e.to_string()))?;
        let mut out = ByteWriter::new();
        #[allow(clippy::cast_possible_truncation)]
        out.write_u32_le(code.len() as u32);
        out.write_bytes(&packed);
        return Ok((out.into_vec(), ImageFlags::CODE_ZSTD));
    }
    Ok((code.to_vec(), ImageFlags::empty()))
}

#[cfg(not(feature = "zstd"))]
fn encode_code(code: &[u8], compress: bool) -> ImageResult<(Vec<u8>, ImageFlags)> {
    if compress {
        debug!("zstd feature disabled, CODE written uncompressed");
    }
    Ok((code.to_vec(), ImageFlags::empty()))
}

#[cfg(feature = "zstd")]
fn decode_code(raw: &[u8], flags: ImageFlags) -> ImageResult<Vec<u8>> {
    if flags.contains(ImageFlags::CODE_ZSTD) {
        let mut r = ByteReader::new(raw);
        let len = r.read_u32_le()? as usize;
        let packed = r.read_bytes(r.remaining())?;
        return zstd::bulk::decompress(packed, len).map_err(|e| ImageError::Compression(e.to_string()));
    }
    Ok(raw.to_vec())
}

#[cfg(not(feature = "zstd"))]
fn decode_code(raw: &[u8], flags: ImageFlags) -> ImageResult<Vec<u8>> {
    if flags.contains(ImageFlags::CODE_ZSTD) {
        return Err(ImageError::Compression("image CODE is zstd-compressed; enable the `zstd` feature".into()));
    }
    Ok(raw.to_vec())
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Image {
        let mut img = Image::new("TestAssembly");
        img.modules.push("TestAssembly".into());
        let (code_offset, code_len) = img.push_code(&[0x72, 0x2A, 0x01]);
        img.methods.push(MethodRecord {
            name: "TestMethod".into(),
            attributes: 0b101,
            ret: 5,
            params: vec![2],
            max_stack: 1,
            code_offset,
            code_len,
        });
        img.types.push(TypeRecord {
            module: 0,
            name: "TestNamespace.TestType".into(),
            attributes: 0b111,
            first_method: 0,
            method_count: 1,
        });
        img
    }

    #[test]
    fn roundtrip_basic() {
        let img = sample();
        let bytes = img.to_bytes(false).unwrap();
        let back = Image::from_bytes(&bytes).unwrap();
        assert_eq!(back.assembly, "TestAssembly");
        assert_eq!(back.types, img.types);
        assert_eq!(back.methods, img.methods);
        assert_eq!(back.method_code(&back.methods[0]).unwrap(), &[0x72, 0x2A, 0x01]);
        assert_eq!(back.methods_of(&back.types[0]).unwrap().len(), 1);
    }

    #[test]
    fn crc_detects_tampering() {
        let mut bytes = sample().to_bytes(false).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x55;
        assert!(Image::from_bytes(&bytes).is_err());
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let bytes = sample().to_bytes(false).unwrap();
        // insère une section "XTRA" juste après l'en-tête et recalcule le CRC
        let mut w = ByteWriter::new();
        w.write_bytes(&bytes[..10]);
        w.write_bytes(b"XTRA");
        w.write_u32_le(3);
        w.write_bytes(&[1, 2, 3]);
        w.write_bytes(&bytes[10..bytes.len() - 8]);
        let mut out = w.into_vec();
        let crc = crc32_ieee(&out[6..]);
        out.extend_from_slice(b"CRCC");
        out.extend_from_slice(&crc.to_le_bytes());

        let back = Image::from_bytes(&out).unwrap();
        assert_eq!(back.types, sample().types);
    }

    #[test]
    fn newer_versions_are_refused() {
        let mut img = sample();
        img.version = ILIMG_VERSION + 1;
        let bytes = img.to_bytes(false).unwrap();
        assert!(matches!(Image::from_bytes(&bytes), Err(ImageError::Version { .. })));
    }

    #[test]
    fn version_zero_is_refused() {
        let mut img = sample();
        img.version = 0;
        let bytes = img.to_bytes(false).unwrap();
        assert!(matches!(Image::from_bytes(&bytes), Err(ImageError::Version { found: 0, .. })));
    }

    #[test]
    fn out_of_bounds_bodies_are_reported() {
        let mut img = sample();
        img.methods[0].code_len = 99;
        assert!(img.method_code(&img.methods[0]).is_err());
    }

    #[test]
    fn file_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TestAssembly.ilimg");
        sample().write_file(&path, true).unwrap();
        let back = Image::read_file(&path).unwrap();
        assert_eq!(back.code, sample().code);

        let err = Image::read_file(dir.path().join("missing.ilimg")).unwrap_err();
        assert!(matches!(err, ImageError::Io { .. }));
    }
}
