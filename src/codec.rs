use crate::error::{MorseError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const DOT: char = '.';
pub const DASH: char = '-';
pub const SHORT_GAP: char = '|';
pub const WORD_GAP: char = ' ';

const STANDARD_TABLE: &str = include_str!("../resources/morsecodes");

/// One element of a transcoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorseSymbol {
    Dot,
    Dash,
    ShortGap,
    WordGap,
}

impl MorseSymbol {
    pub const fn as_char(self) -> char {
        match self {
            MorseSymbol::Dot => DOT,
            MorseSymbol::Dash => DASH,
            MorseSymbol::ShortGap => SHORT_GAP,
            MorseSymbol::WordGap => WORD_GAP,
        }
    }

    /// Tone length in dot units.
    pub const fn tone_units(self) -> u32 {
        match self {
            MorseSymbol::Dot => 1,
            MorseSymbol::Dash => 3,
            MorseSymbol::ShortGap | MorseSymbol::WordGap => 0,
        }
    }

    /// Silence appended by this symbol, in dot units.
    ///
    /// Every mark is followed by one unit of silence, so the letter and word
    /// gaps only add what is missing to reach 3 and 7 units.
    pub const fn silence_units(self) -> u32 {
        match self {
            MorseSymbol::Dot | MorseSymbol::Dash => 1,
            MorseSymbol::ShortGap => 2,
            MorseSymbol::WordGap => 6,
        }
    }
}

impl TryFrom<char> for MorseSymbol {
    type Error = MorseError;

    fn try_from(c: char) -> Result<Self> {
        match c {
            DOT => Ok(MorseSymbol::Dot),
            DASH => Ok(MorseSymbol::Dash),
            SHORT_GAP => Ok(MorseSymbol::ShortGap),
            WORD_GAP => Ok(MorseSymbol::WordGap),
            other => Err(MorseError::InvalidSymbol(other)),
        }
    }
}

/// Character to Morse code mapping, keyed on uppercase letters and digits.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    codes: HashMap<char, String>,
}

impl SymbolTable {
    /// Parses a table with one `<char><code>` pair per line, e.g. `A.-`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut codes = HashMap::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end();
            if line.is_empty() {
                continue;
            }

            let mut chars = line.chars();
            let key = match chars.next() {
                Some(c) if c.is_alphanumeric() => to_upper(c),
                Some(c) => {
                    return Err(MorseError::MalformedTable {
                        line: line_no,
                        reason: format!("key {:?} is not a letter or digit", c),
                    })
                }
                None => continue,
            };

            let code = chars.as_str();
            if code.is_empty() {
                return Err(MorseError::MalformedTable {
                    line: line_no,
                    reason: format!("no code for {:?}", key),
                });
            }
            if let Some(bad) = code.chars().find(|&c| c != DOT && c != DASH) {
                return Err(MorseError::MalformedTable {
                    line: line_no,
                    reason: format!("unexpected {:?} in code for {:?}", bad, key),
                });
            }
            if codes.insert(key, code.to_string()).is_some() {
                return Err(MorseError::MalformedTable {
                    line: line_no,
                    reason: format!("duplicate key {:?}", key),
                });
            }
        }

        Ok(Self { codes })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MorseError::MissingResource(path.display().to_string()),
            _ => MorseError::Io(e),
        })?;
        Self::parse(&text)
    }

    /// The built-in international table (letters and digits).
    pub fn standard() -> Result<Self> {
        Self::parse(STANDARD_TABLE)
    }

    pub fn get(&self, c: char) -> Option<&str> {
        self.codes.get(&c).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, &str)> {
        self.codes.iter().map(|(&c, code)| (c, code.as_str()))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::standard().expect("Built-in Morse table is malformed")
    }
}

fn to_upper(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Letter(&'a str),
    Gap,
}

/// Text to Morse transcoder.
#[derive(Debug, Clone)]
pub struct MorseCodec {
    table: Arc<SymbolTable>,
}

impl MorseCodec {
    pub fn new(table: Arc<SymbolTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    pub fn code_for(&self, c: char) -> Option<&str> {
        self.table.get(to_upper(c))
    }

    /// Transcodes `text` into a symbol string such as `...|---|...`.
    ///
    /// Letters are separated by `|`, words by a single space. Characters
    /// missing from the table become word gaps. Gaps never appear twice in a
    /// row and never at either end of the result.
    pub fn encode(&self, text: &str) -> String {
        let tokens: Vec<Token<'_>> = text
            .to_uppercase()
            .chars()
            .map(|c| match c {
                WORD_GAP => Token::Gap,
                c => self.table.get(c).map_or(Token::Gap, Token::Letter),
            })
            .collect();

        let mut out = String::with_capacity(tokens.len() * 5);
        let mut previous: Option<Token<'_>> = None;

        for i in 0..tokens.len() {
            if !keep_token(&tokens, i) {
                continue;
            }
            match tokens[i] {
                Token::Gap if previous.is_none() => continue,
                Token::Gap => out.push(WORD_GAP),
                Token::Letter(code) => {
                    if let Some(Token::Letter(_)) = previous {
                        out.push(SHORT_GAP);
                    }
                    out.push_str(code);
                }
            }
            previous = Some(tokens[i]);
        }

        out
    }
}

impl Default for MorseCodec {
    fn default() -> Self {
        Self::new(Arc::new(SymbolTable::default()))
    }
}

/// A letter always survives. A gap survives only when it is interior and the
/// following token is a letter; first and last gaps are dropped.
fn keep_token(tokens: &[Token<'_>], i: usize) -> bool {
    match tokens[i] {
        Token::Letter(_) => true,
        Token::Gap => {
            let interior = i > 0 && i + 1 < tokens.len();
            interior && tokens[i + 1] != Token::Gap
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_codec() -> MorseCodec {
        let table = SymbolTable::parse("A.-\nB-...\n").unwrap();
        MorseCodec::new(Arc::new(table))
    }

    #[test]
    fn test_standard_table() {
        let table = SymbolTable::standard().unwrap();
        assert_eq!(table.len(), 36);
        for (key, code) in table.iter() {
            assert!(key.is_ascii_uppercase() || key.is_ascii_digit());
            assert!(!code.is_empty());
            assert!(code.chars().all(|c| c == DOT || c == DASH));
        }
    }

    #[test]
    fn test_encode_sos() {
        let codec = MorseCodec::default();
        assert_eq!(codec.encode("SOS"), "...|---|...");
        assert_eq!(codec.encode("sos"), "...|---|...");
    }

    #[test]
    fn test_encode_empty_and_blank() {
        let codec = MorseCodec::default();
        assert_eq!(codec.encode(""), "");
        assert_eq!(codec.encode("  "), "");
        assert_eq!(codec.encode("   "), "");
    }

    #[test]
    fn test_encode_words() {
        let codec = MorseCodec::default();
        let morse = codec.encode("HI THERE");
        assert_eq!(morse, "....|.. -|....|.|.-.|.");
        assert_eq!(morse.matches(WORD_GAP).count(), 1);
        assert!(!morse.contains("| "));
        assert!(!morse.contains(" |"));
    }

    #[test]
    fn test_encode_collapses_gaps() {
        let codec = MorseCodec::default();
        assert_eq!(codec.encode("A   B"), ".- -...");
        assert_eq!(codec.encode("  A"), ".-");
        assert_eq!(codec.encode(" A "), ".-");
    }

    #[test]
    fn test_unknown_character_is_single_gap() {
        let codec = minimal_codec();
        assert_eq!(codec.encode("A1B"), ".- -...");
        assert_eq!(codec.encode("A1 B"), ".- -...");
        assert_eq!(codec.encode("A1"), ".-");
        assert_eq!(codec.encode("1A"), ".-");
        assert_eq!(codec.encode("12"), "");
    }

    #[test]
    fn test_encode_single_keys() {
        let codec = MorseCodec::default();
        for (key, code) in codec.table().iter() {
            assert_eq!(codec.encode(&key.to_string()), code);
        }
        assert_eq!(codec.code_for('e'), Some("."));
        assert_eq!(codec.code_for('?'), None);
    }

    #[test]
    fn test_symbol_from_char() {
        assert_eq!(MorseSymbol::try_from('.').unwrap(), MorseSymbol::Dot);
        assert_eq!(MorseSymbol::try_from('|').unwrap(), MorseSymbol::ShortGap);
        assert!(matches!(
            MorseSymbol::try_from('x'),
            Err(MorseError::InvalidSymbol('x'))
        ));
    }

    #[test]
    fn test_parse_lowercase_keys_and_crlf() {
        let table = SymbolTable::parse("a.-\r\n\r\nb-...\r\n").unwrap();
        assert_eq!(table.get('A'), Some(".-"));
        assert_eq!(table.get('B'), Some("-..."));
        assert_eq!(table.get('a'), None);
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!(matches!(
            SymbolTable::parse("A.-\nB-x.."),
            Err(MorseError::MalformedTable { line: 2, .. })
        ));
        assert!(SymbolTable::parse("A").is_err());
        assert!(SymbolTable::parse("A.-\na.-").is_err());
        assert!(SymbolTable::parse("?..--..").is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "S...").unwrap();
        writeln!(file, "O---").unwrap();
        let table = SymbolTable::load(file.path()).unwrap();
        let codec = MorseCodec::new(Arc::new(table));
        assert_eq!(codec.encode("SOS"), "...|---|...");
    }

    #[test]
    fn test_load_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let result = SymbolTable::load(dir.path().join("morsecodes"));
        assert!(matches!(result, Err(MorseError::MissingResource(_))));
    }
}
