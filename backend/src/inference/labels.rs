use std::path::Path;

use super::InferenceError;
use super::artifacts::ArtifactError;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Maps classifier output indices back to class names.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDecoder {
    classes: Vec<String>,
}

impl LabelDecoder {
    pub fn new(classes: Vec<String>) -> Self {
        Self { classes }
    }

    /// Reads class names from a `.npy` string array, a `.json` array or a
    /// text file with one label per line.
    pub fn from_file(path: &Path) -> Result<Self, ArtifactError> {
        let bytes = std::fs::read(path).map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let classes = match extension.as_deref() {
            Some("npy") => parse_npy_strings(&bytes)?,
            Some("json") => serde_json::from_slice::<Vec<String>>(&bytes)?,
            _ => String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        };

        if classes.is_empty() {
            return Err(ArtifactError::Format(format!(
                "no class labels in {}",
                path.display()
            )));
        }
        Ok(Self::new(classes))
    }

    pub fn inverse_transform(&self, index: usize) -> Result<&str, InferenceError> {
        self.classes.get(index).map(String::as_str).ok_or_else(|| {
            InferenceError::Prediction(format!(
                "class index {} outside the {} known labels",
                index,
                self.classes.len()
            ))
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Decodes a NumPy array of fixed-width strings (`<U`, `>U`, `|S`).
fn parse_npy_strings(bytes: &[u8]) -> Result<Vec<String>, ArtifactError> {
    let format_error = |msg: &str| ArtifactError::Format(format!("npy label file: {}", msg));

    if bytes.len() < 10 || !bytes.starts_with(NPY_MAGIC) {
        return Err(format_error("missing NUMPY magic"));
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        version => return Err(format_error(&format!("unsupported version {}", version))),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .map(String::from_utf8_lossy)
        .ok_or_else(|| format_error("truncated header"))?;

    let descr = header_value(&header, "descr")
        .and_then(|value| value.split('\'').nth(1))
        .ok_or_else(|| format_error("missing descr"))?;
    let count = header_value(&header, "shape")
        .and_then(|value| {
            let inner = value.split('(').nth(1)?.split(')').next()?;
            inner
                .split(',')
                .map(str::trim)
                .filter(|dim| !dim.is_empty())
                .map(|dim| dim.parse::<usize>().ok())
                .product::<Option<usize>>()
        })
        .ok_or_else(|| format_error("missing shape"))?;

    if descr.len() < 2 || !descr.is_ascii() {
        return Err(format_error(&format!("unsupported dtype '{}'", descr)));
    }
    let (byte_order, kind) = descr.split_at(1);
    let (kind, width) = kind.split_at(1);
    if kind == "O" {
        return Err(ArtifactError::Unsupported(
            "pickled object arrays in the label file; re-export it with \
             `np.save(path, encoder.classes_.astype(str))` or save the classes as JSON"
                .to_string(),
        ));
    }
    let width: usize = width
        .parse()
        .map_err(|_| format_error(&format!("unsupported dtype '{}'", descr)))?;
    let item_size = match kind {
        "U" => width * 4,
        "S" | "a" => width,
        _ => return Err(format_error(&format!("unsupported dtype '{}'", descr))),
    };

    let data = &bytes[data_start..];
    if data.len() < count * item_size {
        return Err(format_error("truncated data"));
    }

    let big_endian = byte_order == ">";
    let labels = data
        .chunks_exact(item_size.max(1))
        .take(count)
        .map(|item| {
            let text: String = if kind == "U" {
                item.chunks_exact(4)
                    .map(|c| {
                        let raw = [c[0], c[1], c[2], c[3]];
                        let code = if big_endian {
                            u32::from_be_bytes(raw)
                        } else {
                            u32::from_le_bytes(raw)
                        };
                        char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
                    })
                    .collect()
            } else {
                String::from_utf8_lossy(item).into_owned()
            };
            text.trim_end_matches('\0').to_string()
        })
        .collect();
    Ok(labels)
}

/// Text following `'key':` in a NumPy header dict.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{}':", key);
    let start = header.find(&pattern)? + pattern.len();
    Some(header[start..].trim_start())
}
