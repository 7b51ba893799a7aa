//! Pre-parse upload gate: size, then extension, then sniffed content type.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::warn;

use crate::error::ValidationError;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const XLS_MIME: &str = "application/vnd.ms-excel";

pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;

const ZIP_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const OLE2_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, PartialEq)]
pub struct UploadLimits {
    pub max_upload_size: u64,
    /// Lower-case, with the leading dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            allowed_extensions: vec![".xlsx".to_string(), ".xls".to_string()],
        }
    }
}

impl UploadLimits {
    /// Reads `MAX_UPLOAD_SIZE` and `ALLOWED_EXTENSIONS`; unset or unparsable
    /// values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_upload_size = lookup("MAX_UPLOAD_SIZE")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.max_upload_size);

        let allowed_extensions: Vec<String> = lookup("ALLOWED_EXTENSIONS")
            .map(|raw| {
                raw.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .map(|e| if e.starts_with('.') { e } else { format!(".{}", e) })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            max_upload_size,
            allowed_extensions: if allowed_extensions.is_empty() {
                defaults.allowed_extensions
            } else {
                allowed_extensions
            },
        }
    }
}

/// Lower-cased extension with its dot, or an empty string.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Checks an upload against the limits. The first failing check wins. The
/// stream is rewound to where it was, so it can be handed to the parser.
pub fn validate<R: Read + Seek>(
    stream: &mut R,
    filename: &str,
    size: u64,
    limits: &UploadLimits,
) -> Result<(), ValidationError> {
    let result = check(stream, filename, size, limits);
    if let Err(e) = &result {
        warn!(filename, size, reason = %e, "upload rejected");
    }
    result
}

fn check<R: Read + Seek>(
    stream: &mut R,
    filename: &str,
    size: u64,
    limits: &UploadLimits,
) -> Result<(), ValidationError> {
    if size > limits.max_upload_size {
        return Err(ValidationError::TooLarge {
            size_mb: megabytes(size),
            max_mb: megabytes(limits.max_upload_size),
        });
    }

    let extension = extension_of(filename);
    if !limits.allowed_extensions.contains(&extension) {
        return Err(ValidationError::DisallowedExtension {
            extension,
            allowed: limits.allowed_extensions.join(", "),
        });
    }

    let start = stream.stream_position()?;
    let sniffed = sniff_mime(stream);
    stream.seek(SeekFrom::Start(start))?;

    match sniffed? {
        Some(_) => Ok(()),
        None => Err(ValidationError::MimeMismatch {
            detected: "unknown".to_string(),
        }),
    }
}

/// Content-based type detection. Returns the spreadsheet MIME type, or
/// `None` when the bytes are neither an OOXML workbook nor an OLE2 workbook.
pub fn sniff_mime<R: Read + Seek>(stream: &mut R) -> Result<Option<&'static str>, ValidationError> {
    let start = stream.stream_position()?;
    let mut header = [0u8; 8];
    let read = read_up_to(stream, &mut header)?;
    stream.seek(SeekFrom::Start(start))?;

    if read >= 4 && header[..4] == ZIP_SIGNATURE {
        let is_workbook = zip::ZipArchive::new(&mut *stream)
            .map(|mut archive| {
                let found = archive.by_name("xl/workbook.xml").is_ok();
                found
            })
            .unwrap_or(false);
        return Ok(is_workbook.then_some(XLSX_MIME));
    }

    if read == 8 && header == OLE2_SIGNATURE {
        let mut content = Vec::new();
        stream.read_to_end(&mut content)?;
        let is_workbook = contains_stream_name(&content, "Workbook") || contains_stream_name(&content, "Book");
        return Ok(is_workbook.then_some(XLS_MIME));
    }

    Ok(None)
}

fn read_up_to<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Looks for a compound-file directory entry name (UTF-16LE, NUL-terminated).
fn contains_stream_name(content: &[u8], name: &str) -> bool {
    let needle: Vec<u8> = name
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    content.windows(needle.len()).any(|window| window == needle.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use std::io::Cursor;

    fn xlsx_bytes() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.write_string(0, 0, "Dependencia").unwrap();
        worksheet.write_string(1, 0, "Salud").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    const LEGACY_XLS: &[u8] = include_bytes!("../tests/fixtures/indicadores.xls");

    #[test]
    fn test_accepts_real_xls() {
        let mut cursor = Cursor::new(LEGACY_XLS);
        assert_eq!(sniff_mime(&mut cursor).unwrap(), Some(XLS_MIME));

        let mut cursor = Cursor::new(LEGACY_XLS);
        validate(&mut cursor, "indicadores.xls", LEGACY_XLS.len() as u64, &UploadLimits::default()).unwrap();
        assert_eq!(cursor.position(), 0);
    }

    fn ole2_bytes(stream_name: &str) -> Vec<u8> {
        let mut bytes = OLE2_SIGNATURE.to_vec();
        bytes.resize(512, 0);
        for unit in stream_name.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(&[0, 0]);
        bytes.resize(1024, 0);
        bytes
    }

    // -------------------------------------------------------------------------
    // CHECK ORDER
    // -------------------------------------------------------------------------

    #[test]
    fn test_accepts_real_xlsx() {
        let bytes = xlsx_bytes();
        let mut cursor = Cursor::new(bytes.clone());
        validate(&mut cursor, "datos.xlsx", bytes.len() as u64, &UploadLimits::default()).unwrap();
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_size_checked_first() {
        let limits = UploadLimits {
            max_upload_size: 1024 * 1024,
            ..UploadLimits::default()
        };
        let mut cursor = Cursor::new(b"not a spreadsheet".to_vec());
        let err = validate(&mut cursor, "datos.csv", 3 * 1024 * 1024, &limits).unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { .. }));
        assert_eq!(
            err.to_string(),
            "File is too large (3.0 MB). Maximum allowed: 1.0 MB"
        );
    }

    #[test]
    fn test_extension_checked_before_content() {
        let mut cursor = Cursor::new(b"a,b\n1,2\n".to_vec());
        let err = validate(&mut cursor, "datos.csv", 8, &UploadLimits::default()).unwrap_err();
        assert!(matches!(err, ValidationError::DisallowedExtension { ref extension, .. } if extension == ".csv"));
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let bytes = xlsx_bytes();
        let mut cursor = Cursor::new(bytes.clone());
        validate(&mut cursor, "DATOS.XLSX", bytes.len() as u64, &UploadLimits::default()).unwrap();
    }

    #[test]
    fn test_renamed_text_file_is_rejected() {
        let mut cursor = Cursor::new(b"a,b\n1,2\n".to_vec());
        let err = validate(&mut cursor, "datos.xlsx", 8, &UploadLimits::default()).unwrap_err();
        assert!(matches!(err, ValidationError::MimeMismatch { .. }));
        assert_eq!(cursor.position(), 0);
    }

    // -------------------------------------------------------------------------
    // CONTENT SNIFFING
    // -------------------------------------------------------------------------

    #[test]
    fn test_sniff_xlsx() {
        let mut cursor = Cursor::new(xlsx_bytes());
        assert_eq!(sniff_mime(&mut cursor).unwrap(), Some(XLSX_MIME));
    }

    #[test]
    fn test_sniff_ole2_workbook() {
        let mut cursor = Cursor::new(ole2_bytes("Workbook"));
        assert_eq!(sniff_mime(&mut cursor).unwrap(), Some(XLS_MIME));
        let mut cursor = Cursor::new(ole2_bytes("Book"));
        assert_eq!(sniff_mime(&mut cursor).unwrap(), Some(XLS_MIME));
    }

    #[test]
    fn test_sniff_ole2_document_is_not_spreadsheet() {
        let mut cursor = Cursor::new(ole2_bytes("WordDocument"));
        assert_eq!(sniff_mime(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_sniff_plain_zip_is_not_spreadsheet() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut writer, b"<w:document/>").unwrap();
            writer.finish().unwrap();
        }
        buffer.set_position(0);
        assert_eq!(sniff_mime(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_sniff_short_input() {
        let mut cursor = Cursor::new(vec![0x50, 0x4B]);
        assert_eq!(sniff_mime(&mut cursor).unwrap(), None);
    }

    // -------------------------------------------------------------------------
    // LIMITS
    // -------------------------------------------------------------------------

    #[test]
    fn test_limits_from_lookup() {
        let limits = UploadLimits::from_lookup(|key| match key {
            "MAX_UPLOAD_SIZE" => Some("2048".to_string()),
            "ALLOWED_EXTENSIONS" => Some("XLSX, ods".to_string()),
            _ => None,
        });
        assert_eq!(limits.max_upload_size, 2048);
        assert_eq!(limits.allowed_extensions, vec![".xlsx", ".ods"]);

        let defaults = UploadLimits::from_lookup(|_| Some("".to_string()));
        assert_eq!(defaults, UploadLimits::default());
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/Informe.XLS"), ".xls");
        assert_eq!(extension_of("sin_extension"), "");
    }
}
