use std::io;

use crate::{
    document::Document,
    error::{PdfError, PdfResult},
    filter::{self, StreamFilter},
    lex::{LexBase, LexObject},
    objects::{Dictionary, Object, Reference, Stream},
};

/// A token scanned from a decoded content stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Number(f64),
    String(Vec<u8>),
    HexString(Vec<u8>),
    /// Operators and the boolean/null keywords.
    Keyword(String),
    ArrayOpen,
    ArrayClose,
    DictOpen,
    DictClose,
    ProcOpen,
    ProcClose,
}

/// Reader over a stream's decoded bytes.
///
/// Offers both raw byte motion (`read`, `peek`, `consume`) and PDF token
/// scanning, which is how content streams are walked without copying them
/// out first.
pub struct StreamReader {
    data: Vec<u8>,
    pos: usize,
    depth: usize,
}

impl LexBase for StreamReader {
    fn buffer(&self) -> &[u8] {
        &self.data
    }

    fn cursor(&self) -> usize {
        self.pos
    }

    fn cursor_mut(&mut self) -> &mut usize {
        &mut self.pos
    }
}

impl LexObject for StreamReader {
    fn depth_mut(&mut self) -> &mut usize {
        &mut self.depth
    }

    fn lex_dict(&mut self) -> PdfResult<Object> {
        Ok(Object::Dictionary(self.lex_dict_body()?))
    }
}

impl StreamReader {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// All decoded bytes, regardless of the cursor.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Copy up to `buf.len()` bytes, advancing. Zero means end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.peek(buf);
        self.pos += n;
        n
    }

    /// Copy up to `buf.len()` bytes without advancing.
    pub fn peek(&mut self, buf: &mut [u8]) -> usize {
        let available = &self.data[self.pos.min(self.data.len())..];
        let n = buf.len().min(available.len());

        buf[..n].copy_from_slice(&available[..n]);

        n
    }

    /// Advance up to `n` bytes without copying; returns how far it got.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.data.len() - self.pos.min(self.data.len()));
        self.pos += n;
        n
    }

    /// Scan the next token. `None` at end of stream.
    pub fn next_token(&mut self) -> PdfResult<Option<Token>> {
        self.skip_whitespace();

        let b = match self.peek_byte() {
            Some(b) => b,
            None => return Ok(None),
        };

        let token = match b {
            b'/' => Token::Name(self.lex_name()?),
            b'(' => Token::String(self.lex_literal_string()?),
            b'<' => {
                if self.peek_byte_offset(1) == Some(b'<') {
                    self.next_byte();
                    self.next_byte();
                    Token::DictOpen
                } else {
                    Token::HexString(self.lex_hex_string()?)
                }
            }
            b'>' => {
                self.next_byte();
                self.expect_byte(b'>')?;
                Token::DictClose
            }
            b'[' => {
                self.next_byte();
                Token::ArrayOpen
            }
            b']' => {
                self.next_byte();
                Token::ArrayClose
            }
            b'{' => {
                self.next_byte();
                Token::ProcOpen
            }
            b'}' => {
                self.next_byte();
                Token::ProcClose
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => Token::Number(self.scan_number()?),
            _ => {
                let mut keyword = String::new();

                while let Some(b) = self.peek_byte() {
                    if !Self::is_regular(b) {
                        break;
                    }

                    self.next_byte();
                    keyword.push(char::from(b));
                }

                if keyword.is_empty() {
                    anyhow::bail!(PdfError::Syntax(format!(
                        "unexpected byte {:?} in stream",
                        char::from(b)
                    )));
                }

                Token::Keyword(keyword)
            }
        };

        Ok(Some(token))
    }

    fn scan_number(&mut self) -> PdfResult<f64> {
        let mut spelling = String::new();

        match self.peek_byte() {
            Some(b @ (b'+' | b'-')) => {
                self.next_byte();

                if b == b'-' {
                    spelling.push('-');
                }
            }
            _ => {}
        }

        let mut seen_dot = false;

        while let Some(b) = self.peek_byte() {
            match b {
                b'0'..=b'9' => spelling.push(char::from(b)),
                b'.' if !seen_dot => {
                    seen_dot = true;
                    spelling.push('.');
                }
                _ => break,
            }

            self.next_byte();
        }

        spelling
            .parse::<f64>()
            .map_err(|_| PdfError::Syntax(format!("malformed number {:?}", spelling)).into())
    }
}

/// Producer side of a stream object.
///
/// Bytes are buffered raw; `finish` runs the configured filter chain,
/// records /Filter, /DecodeParms, and /Length in the dictionary, and stores
/// the finished stream in the document. Encryption, when active, is applied
/// later at save time like every other string and stream.
///
/// The writer implements [`io::Write`], so `write!` covers formatted
/// output.
pub struct StreamWriter<'a> {
    doc: &'a mut Document,
    reference: Reference,
    filter: StreamFilter,
    dict: Dictionary,
    buffer: Vec<u8>,
}

impl<'a> StreamWriter<'a> {
    pub(crate) fn new(
        doc: &'a mut Document,
        reference: Reference,
        dict: Dictionary,
        filter: StreamFilter,
    ) -> Self {
        Self {
            doc,
            reference,
            filter,
            dict,
            buffer: Vec::new(),
        }
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub fn puts(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
    }

    pub fn putc(&mut self, c: u8) {
        self.buffer.push(c);
    }

    /// Close the stream: encode the buffered bytes and store the object.
    pub fn finish(self) -> PdfResult<Reference> {
        let mut dict = self.dict;
        let encoded = filter::encode_stream(&self.buffer, &self.filter, &mut dict)?;

        dict.insert("Length", encoded.len() as i64);

        self.doc.replace_object(
            self.reference,
            Object::Stream(Stream {
                dict,
                data: encoded,
            }),
        );

        Ok(self.reference)
    }
}

impl io::Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tokenizes_a_content_stream() {
        let mut reader =
            StreamReader::new(b"q 1 0 0 1 72 720 cm BT /F1 12 Tf (Hi) Tj ET Q".to_vec());

        let mut tokens = Vec::new();
        while let Some(token) = reader.next_token().unwrap() {
            tokens.push(token);
        }

        assert_eq!(tokens[0], Token::Keyword("q".into()));
        assert_eq!(tokens[1], Token::Number(1.0));
        assert_eq!(tokens[7], Token::Keyword("cm".into()));
        assert!(tokens.contains(&Token::Name("F1".into())));
        assert!(tokens.contains(&Token::String(b"Hi".to_vec())));
        assert_eq!(tokens.last(), Some(&Token::Keyword("Q".into())));
    }

    #[test]
    fn read_peek_consume() {
        let mut reader = StreamReader::new(b"abcdefgh".to_vec());

        let mut buf = [0u8; 3];
        assert_eq!(reader.peek(&mut buf), 3);
        assert_eq!(&buf, b"abc");

        // peek does not advance
        assert_eq!(reader.read(&mut buf), 3);
        assert_eq!(&buf, b"abc");

        assert_eq!(reader.consume(2), 2);
        assert_eq!(reader.read(&mut buf), 3);
        assert_eq!(&buf, b"fgh");

        // end of stream reads zero
        assert_eq!(reader.read(&mut buf), 0);
    }

    #[test]
    fn negative_and_real_operands() {
        let mut reader = StreamReader::new(b"-72.5 .25 +3 re".to_vec());

        assert_eq!(reader.next_token().unwrap(), Some(Token::Number(-72.5)));
        assert_eq!(reader.next_token().unwrap(), Some(Token::Number(0.25)));
        assert_eq!(reader.next_token().unwrap(), Some(Token::Number(3.0)));
        assert_eq!(
            reader.next_token().unwrap(),
            Some(Token::Keyword("re".into()))
        );
    }

    #[test]
    fn inline_dictionaries() {
        let mut reader = StreamReader::new(b"<< /W 2 >> <1f2f>".to_vec());

        assert_eq!(reader.next_token().unwrap(), Some(Token::DictOpen));
        assert_eq!(reader.next_token().unwrap(), Some(Token::Name("W".into())));
        assert_eq!(reader.next_token().unwrap(), Some(Token::Number(2.0)));
        assert_eq!(reader.next_token().unwrap(), Some(Token::DictClose));
        assert_eq!(
            reader.next_token().unwrap(),
            Some(Token::HexString(vec![0x1F, 0x2F]))
        );
        assert_eq!(reader.next_token().unwrap(), None);
    }
}
