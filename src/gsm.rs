//! SMS text handling: GSM 03.38 / UCS-2 detection, splitting into
//! concatenated parts, hex encoding and UDH generation.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// MessageBird accepts up to 9 concatenated parts.
pub const MAX_PARTS: usize = 9;

pub const SINGLE_PLAIN_SEPTETS: usize = 160;
pub const PART_PLAIN_SEPTETS: usize = 153;
pub const MAX_PLAIN_SEPTETS: usize = PART_PLAIN_SEPTETS * MAX_PARTS;

pub const SINGLE_UNICODE_UNITS: usize = 70;
pub const PART_UNICODE_UNITS: usize = 67;
pub const MAX_UNICODE_UNITS: usize = PART_UNICODE_UNITS * MAX_PARTS;

const ESCAPE: u8 = 0x1B;

#[rustfmt::skip]
const BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1B}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

const EXTENSION: [(char, u8); 10] = [
    ('\u{0C}', 0x0A),
    ('^', 0x14),
    ('{', 0x28),
    ('}', 0x29),
    ('\\', 0x2F),
    ('[', 0x3C),
    ('~', 0x3D),
    (']', 0x3E),
    ('|', 0x40),
    ('€', 0x65),
];

static BASIC_LOOKUP: LazyLock<HashMap<char, u8>> = LazyLock::new(|| {
    BASIC
        .iter()
        .enumerate()
        .filter(|(i, _)| *i as u8 != ESCAPE)
        .map(|(i, c)| (*c, i as u8))
        .collect()
});

static EXTENSION_LOOKUP: LazyLock<HashMap<char, u8>> =
    LazyLock::new(|| EXTENSION.iter().copied().collect());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCoding {
    /// GSM 03.38 7-bit default alphabet.
    Plain,
    /// UCS-2, sent as UTF-16BE.
    Unicode,
}

impl DataCoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataCoding::Plain => "plain",
            DataCoding::Unicode => "unicode",
        }
    }
}

/// Text split into SMS parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub encoding: DataCoding,
    pub parts: Vec<String>,
}

/// Hex encoded SMS parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub encoding: DataCoding,
    pub messages: Vec<String>,
}

fn push_septets(c: char, out: &mut Vec<u8>) -> bool {
    if let Some(s) = BASIC_LOOKUP.get(&c) {
        out.push(*s);
        true
    } else if let Some(s) = EXTENSION_LOOKUP.get(&c) {
        out.push(ESCAPE);
        out.push(*s);
        true
    } else {
        false
    }
}

fn septet_len(c: char) -> Option<usize> {
    if BASIC_LOOKUP.contains_key(&c) {
        Some(1)
    } else if EXTENSION_LOOKUP.contains_key(&c) {
        Some(2)
    } else {
        None
    }
}

/// Packs 7-bit septets into octets, least significant bit first.
pub fn pack_septets(septets: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(septets.len() * 7 / 8 + 1);
    let mut acc: u32 = 0;
    let mut bits = 0;

    for s in septets {
        acc |= u32::from(s & 0x7F) << bits;
        bits += 7;
        while bits >= 8 {
            out.push((acc & 0xFF) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push((acc & 0xFF) as u8);
    }

    out
}

pub fn to_ucs2(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}

pub fn detect(text: &str) -> DataCoding {
    if text.chars().all(|c| septet_len(c).is_some()) {
        DataCoding::Plain
    } else {
        DataCoding::Unicode
    }
}

/// Size of `text` in its own coding: septets for plain, UTF-16 units for
/// unicode.
pub fn measure(text: &str) -> (DataCoding, usize) {
    match detect(text) {
        DataCoding::Plain => {
            let len = text.chars().filter_map(septet_len).sum();
            (DataCoding::Plain, len)
        }
        DataCoding::Unicode => (DataCoding::Unicode, text.encode_utf16().count()),
    }
}

fn chunk_by<F>(text: &str, single: usize, part: usize, width: F) -> Vec<String>
where
    F: Fn(char) -> usize,
{
    let total: usize = text.chars().map(&width).sum();
    if total <= single {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut used = 0;

    for c in text.chars() {
        let w = width(c);
        if used + w > part {
            parts.push(std::mem::take(&mut current));
            used = 0;
        }
        used += w;
        current.push(c);
    }
    parts.push(current);

    parts
}

fn split_all(text: &str) -> Split {
    let encoding = detect(text);
    let parts = match encoding {
        DataCoding::Plain => chunk_by(text, SINGLE_PLAIN_SEPTETS, PART_PLAIN_SEPTETS, |c| {
            septet_len(c).unwrap_or(1)
        }),
        DataCoding::Unicode => {
            chunk_by(text, SINGLE_UNICODE_UNITS, PART_UNICODE_UNITS, char::len_utf16)
        }
    };

    Split { encoding, parts }
}

/// Number of SMS parts the whole of `text` needs, ignoring [`MAX_PARTS`].
pub fn part_count(text: &str) -> usize {
    split_all(text).parts.len()
}

/// Splits text into SMS sized parts. Multi-septet and surrogate pair
/// characters are never cut in half. Anything past [`MAX_PARTS`] is dropped.
pub fn split_text(text: &str) -> Split {
    let mut split = split_all(text);
    split.parts.truncate(MAX_PARTS);
    split
}

/// Hex encodes one part. Characters without a GSM mapping are encoded as
/// `?` when `encoding` is plain.
pub fn encode_part(part: &str, encoding: DataCoding) -> String {
    let bytes = match encoding {
        DataCoding::Plain => {
            let mut septets = Vec::with_capacity(part.len());
            for c in part.chars() {
                if !push_septets(c, &mut septets) {
                    septets.push(0x3F);
                }
            }
            pack_septets(&septets)
        }
        DataCoding::Unicode => to_ucs2(part),
    };
    hex::encode(bytes)
}

pub fn encode(text: &str) -> Encoded {
    let split = split_text(text);
    let messages = split
        .parts
        .iter()
        .map(|p| encode_part(p, split.encoding))
        .collect();

    Encoded {
        encoding: split.encoding,
        messages,
    }
}

/// Concatenation header: IEI 0x00, 8-bit reference, part count, 1-based part.
pub fn udh(reference: u8, part: u8, parts: u8) -> String {
    format!("050003{:02x}{:02x}{:02x}", reference, parts, part)
}

/// Hands out concatenation references. The same text from the same
/// originator keeps its reference while it is cached.
#[derive(Debug, Default)]
pub struct UdhGenerator {
    last: u8,
    cache: HashMap<u64, u8>,
}

impl UdhGenerator {
    const CACHE_LIMIT: usize = 255;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference(&mut self, originator: &str, text: &str) -> u8 {
        let mut hasher = DefaultHasher::new();
        originator.hash(&mut hasher);
        text.hash(&mut hasher);
        let key = hasher.finish();

        if let Some(r) = self.cache.get(&key) {
            return *r;
        }

        if self.cache.len() >= Self::CACHE_LIMIT {
            self.cache.clear();
        }

        self.last = match self.last.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.cache.insert(key, self.last);

        self.last
    }

    /// Headers for every part of a split message; empty strings when the
    /// message fits in a single SMS.
    pub fn headers(&mut self, originator: &str, text: &str, parts: usize) -> Vec<String> {
        if parts <= 1 {
            return vec![String::new(); parts];
        }

        let reference = self.reference(originator, text);
        let total = parts.min(MAX_PARTS) as u8;
        (1..=total).map(|p| udh(reference, p, total)).collect()
    }
}
