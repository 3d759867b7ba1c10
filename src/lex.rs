use log::warn;

use crate::{
    date,
    error::{PdfError, PdfResult},
    objects::{Dictionary, Name, Object, Reference},
};

const FORM_FEED: u8 = b'\x0C';
const BACKSPACE: u8 = b'\x08';

/// Maximum nesting depth of arrays and dictionaries.
pub(crate) const MAX_NESTING: usize = 32;

pub(crate) fn is_delimiter_byte(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Byte-level lexing over an in-memory buffer.
///
/// Implementors supply the buffer and a cursor; everything else is derived.
/// One token of pushback is available everywhere through the cursor
/// save/restore discipline (`next_matches` and friends never commit on a
/// failed match).
pub(crate) trait LexBase {
    fn buffer(&self) -> &[u8];
    fn cursor(&self) -> usize;
    fn cursor_mut(&mut self) -> &mut usize;

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            if Self::is_whitespace(b) {
                self.next_byte();
            } else if b == b'%' {
                self.next_byte();
                self.skip_comment();
            } else {
                break;
            }
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        self.buffer().get(self.cursor()).copied().map(|b| {
            *self.cursor_mut() += 1;
            b
        })
    }

    fn peek_byte(&self) -> Option<u8> {
        self.buffer().get(self.cursor()).copied()
    }

    fn peek_byte_offset(&self, offset: usize) -> Option<u8> {
        self.buffer().get(self.cursor() + offset).copied()
    }

    fn next_is_delimiter(&self) -> bool {
        self.peek_byte().map_or(false, Self::is_delimiter)
    }

    fn next_is_whitespace(&self) -> bool {
        self.peek_byte().map_or(false, Self::is_whitespace)
    }

    /// Whitespace chars are NUL, tab, line feed, form feed, carriage
    /// return, and space.
    fn is_whitespace(b: u8) -> bool {
        matches!(b, b'\0' | 0x9 | b'\n' | FORM_FEED | b'\r' | b' ')
    }

    fn is_delimiter(b: u8) -> bool {
        is_delimiter_byte(b)
    }

    fn is_regular(b: u8) -> bool {
        !Self::is_whitespace(b) && !Self::is_delimiter(b)
    }

    /// Assumes the leading `%` has already been consumed
    fn skip_comment(&mut self) {
        while !self.next_is_eol() {
            self.next_byte();
        }
    }

    fn next_is_eol(&self) -> bool {
        match self.peek_byte() {
            Some(b'\r' | b'\n') => true,
            Some(..) => false,
            None => true,
        }
    }

    /// Does not modify the cursor
    fn next_matches(&mut self, bytes: &[u8]) -> bool {
        let start_pos = self.cursor();

        for &b in bytes {
            if Some(b) != self.next_byte() {
                *self.cursor_mut() = start_pos;
                return false;
            }
        }

        *self.cursor_mut() = start_pos;

        true
    }

    fn next_byte_err(&mut self) -> PdfResult<u8> {
        match self.next_byte() {
            Some(b) => Ok(b),
            None => Err(PdfError::Syntax("unexpected end of input".into()).into()),
        }
    }

    fn expect_byte(&mut self, expected: u8) -> PdfResult<()> {
        match self.next_byte() {
            Some(found) if expected == found => Ok(()),
            found => Err(PdfError::Syntax(format!(
                "expected byte {:?}, found {:?}",
                char::from(expected),
                found.map(char::from)
            ))
            .into()),
        }
    }

    fn expect_bytes(&mut self, bytes: &[u8]) -> PdfResult<()> {
        for &b in bytes {
            self.expect_byte(b)?;
        }

        Ok(())
    }

    /// Consume `\n`, `\r`, or `\r\n`.
    fn expect_eol(&mut self) -> PdfResult<()> {
        match self.next_byte() {
            Some(b'\n') => {}
            Some(b'\r') => {
                if self.peek_byte() == Some(b'\n') {
                    self.next_byte();
                }
            }
            found => {
                anyhow::bail!(PdfError::Syntax(format!(
                    "expected end of line, found {:?}",
                    found.map(char::from)
                )));
            }
        }

        Ok(())
    }

    /// Copy out `n` bytes and advance.
    fn take_bytes(&mut self, n: usize) -> PdfResult<Vec<u8>> {
        let start = self.cursor();
        let end = start + n;

        if end > self.buffer().len() {
            anyhow::bail!(PdfError::Syntax("unexpected end of input".into()));
        }

        let bytes = self.buffer()[start..end].to_vec();
        *self.cursor_mut() = end;

        Ok(bytes)
    }

    fn hex_digit(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    /// Assumes the cursor is on the leading `/`. `#xx` escapes decode to
    /// raw bytes.
    fn lex_name(&mut self) -> PdfResult<String> {
        self.expect_byte(b'/')?;

        let mut name = String::new();

        while let Some(b) = self.peek_byte() {
            if !Self::is_regular(b) {
                break;
            }

            self.next_byte();

            if b == b'#' {
                let hi = self.next_byte().and_then(Self::hex_digit);
                let lo = self.next_byte().and_then(Self::hex_digit);

                match (hi, lo) {
                    (Some(hi), Some(lo)) => name.push(char::from(hi * 16 + lo)),
                    _ => {
                        anyhow::bail!(PdfError::Syntax(format!(
                            "invalid #xx escape in name /{}",
                            name
                        )));
                    }
                }
            } else {
                name.push(char::from(b));
            }
        }

        Ok(name)
    }

    /// Assumes the cursor is on the leading `(`. Bytes are collected
    /// unmodified apart from escape processing.
    fn lex_literal_string(&mut self) -> PdfResult<Vec<u8>> {
        self.expect_byte(b'(')?;

        let mut string = Vec::new();
        let mut num_open_parens = 0usize;

        loop {
            let b = self.next_byte_err()?;

            match b {
                b')' if num_open_parens == 0 => break,
                b')' => {
                    num_open_parens -= 1;
                    string.push(b')');
                }
                b'(' => {
                    num_open_parens += 1;
                    string.push(b'(');
                }
                b'\\' => match self.next_byte_err()? {
                    b'n' => string.push(b'\n'),
                    b'r' => string.push(b'\r'),
                    b't' => string.push(b'\t'),
                    b'b' => string.push(BACKSPACE),
                    b'f' => string.push(FORM_FEED),
                    b'(' => string.push(b'('),
                    b')' => string.push(b')'),
                    b'\\' => string.push(b'\\'),
                    // line continuation: the backslash and the end of line
                    // vanish from the string
                    b'\r' => {
                        if self.peek_byte() == Some(b'\n') {
                            self.next_byte();
                        }
                    }
                    b'\n' => {}
                    // octal escape of 1 to 3 digits; overflow keeps the
                    // low 8 bits
                    c @ b'0'..=b'7' => {
                        let mut value = u32::from(c - b'0');

                        for _ in 0..2 {
                            match self.peek_byte() {
                                Some(d @ b'0'..=b'7') => {
                                    self.next_byte();
                                    value = value * 8 + u32::from(d - b'0');
                                }
                                _ => break,
                            }
                        }

                        string.push((value & 0xFF) as u8);
                    }
                    // a backslash before any other byte is dropped
                    c => string.push(c),
                },
                _ => string.push(b),
            }
        }

        Ok(string)
    }

    /// Assumes the cursor is on the leading `<`. A trailing odd nibble is
    /// padded with zero.
    fn lex_hex_string(&mut self) -> PdfResult<Vec<u8>> {
        self.expect_byte(b'<')?;

        let mut bytes = Vec::new();
        let mut pending: Option<u8> = None;

        loop {
            let b = self.next_byte_err()?;

            if b == b'>' {
                break;
            }

            if Self::is_whitespace(b) {
                continue;
            }

            let digit = Self::hex_digit(b).ok_or_else(|| {
                PdfError::Syntax(format!("invalid hex digit {:?}", char::from(b)))
            })?;

            match pending.take() {
                Some(hi) => bytes.push(hi * 16 + digit),
                None => pending = Some(digit),
            }
        }

        if let Some(hi) = pending {
            bytes.push(hi * 16);
        }

        Ok(bytes)
    }

    fn lex_whole_number(&mut self) -> String {
        let mut whole_number = String::new();

        while let Some(b) = self.peek_byte() {
            if !b.is_ascii_digit() {
                break;
            }

            self.next_byte();

            whole_number.push(char::from(b));
        }

        whole_number
    }
}

/// PDF object lexing on top of [`LexBase`].
///
/// `lex_dict` stays abstract so the file-level lexer can recognize a
/// trailing `stream` keyword while lexers over decoded buffers reject it.
pub(crate) trait LexObject: LexBase {
    fn depth_mut(&mut self) -> &mut usize;

    fn lex_dict(&mut self) -> PdfResult<Object>;

    fn lex_object(&mut self) -> PdfResult<Object> {
        self.skip_whitespace();
        let obj = match self.peek_byte() {
            Some(b't') => self.lex_keyword(b"true", Object::Boolean(true)),
            Some(b'f') => self.lex_keyword(b"false", Object::Boolean(false)),
            Some(b'n') => self.lex_keyword(b"null", Object::Null),
            Some(b'<') => self.lex_angle(),
            Some(b'+' | b'-' | b'0'..=b'9' | b'.') => self.lex_number_or_reference(),
            Some(b'(') => {
                let bytes = self.lex_literal_string()?;

                Ok(match date::parse(&bytes) {
                    Some(seconds) => Object::Date(seconds),
                    None => Object::String(bytes),
                })
            }
            Some(b'/') => Ok(Object::Name(Name::from(self.lex_name()?))),
            Some(b'[') => self.lex_array(),
            Some(b) => Err(PdfError::Syntax(format!(
                "unexpected object start {:?} at offset {}",
                char::from(b),
                self.cursor()
            ))
            .into()),
            None => Err(PdfError::Syntax("unexpected end of input".into()).into()),
        }?;
        self.skip_whitespace();
        Ok(obj)
    }

    fn lex_keyword(&mut self, keyword: &[u8], obj: Object) -> PdfResult<Object> {
        self.expect_bytes(keyword)?;

        Ok(obj)
    }

    fn lex_angle(&mut self) -> PdfResult<Object> {
        match self.peek_byte_offset(1) {
            Some(b'<') => self.lex_dict(),
            Some(..) => Ok(Object::Binary(self.lex_hex_string()?)),
            None => Err(PdfError::Syntax("unexpected end of input".into()).into()),
        }
    }

    fn enter_container(&mut self) -> PdfResult<()> {
        *self.depth_mut() += 1;

        if *self.depth_mut() > MAX_NESTING {
            anyhow::bail!(PdfError::Syntax("nesting too deep".into()));
        }

        Ok(())
    }

    fn leave_container(&mut self) {
        *self.depth_mut() -= 1;
    }

    fn lex_dict_body(&mut self) -> PdfResult<Dictionary> {
        self.expect_byte(b'<')?;
        self.expect_byte(b'<')?;
        self.enter_container()?;

        let mut dict = Dictionary::new();

        loop {
            self.skip_whitespace();

            match self.peek_byte() {
                Some(b'>') => {
                    self.next_byte();
                    self.expect_byte(b'>')?;
                    break;
                }
                Some(..) => {}
                None => anyhow::bail!(PdfError::Syntax("unterminated dictionary".into())),
            }

            let name = self.lex_name()?;
            let value = self.lex_object()?;

            if dict.contains_key(&name) {
                warn!("duplicate dictionary key /{}, last occurrence wins", name);
            }

            dict.insert(Name::from(name), value);
        }

        self.leave_container();
        self.skip_whitespace();

        Ok(dict)
    }

    fn lex_array(&mut self) -> PdfResult<Object> {
        self.expect_byte(b'[')?;
        self.enter_container()?;

        let mut arr = Vec::new();

        loop {
            self.skip_whitespace();

            match self.peek_byte() {
                Some(b']') => {
                    self.next_byte();
                    break;
                }
                Some(..) => arr.push(self.lex_object()?),
                None => anyhow::bail!(PdfError::Syntax("unterminated array".into())),
            }
        }

        self.leave_container();

        Ok(Object::Array(arr))
    }

    /// A bare integer becomes a number unless it is followed by a second
    /// integer and the keyword `R`, in which case the three tokens form an
    /// indirect reference.
    fn lex_number_or_reference(&mut self) -> PdfResult<Object> {
        let (negative, signed) = match self.peek_byte() {
            Some(b'+') => {
                self.next_byte();
                (false, true)
            }
            Some(b'-') => {
                self.next_byte();
                (true, true)
            }
            _ => (false, false),
        };

        let whole_number = self.lex_whole_number();

        if self.peek_byte() == Some(b'.') {
            self.next_byte();
            let decimal = format!("{}.{}", whole_number, self.lex_whole_number());

            if decimal == "." {
                anyhow::bail!(PdfError::Syntax("malformed number".into()));
            }

            let value = decimal.parse::<f64>()?;

            return Ok(Object::Number(if negative { -value } else { value }));
        }

        if whole_number.is_empty() {
            anyhow::bail!(PdfError::Syntax("malformed number".into()));
        }

        let value = whole_number.parse::<f64>()?;
        let whole_end_pos = self.cursor();

        // the `N G R` lookahead; only unsigned integers can open a
        // reference
        if !signed {
            self.skip_whitespace();

            if self.peek_byte().map_or(false, |b| b.is_ascii_digit()) {
                let generation = self.lex_whole_number();
                self.skip_whitespace();

                if self.next_byte() == Some(b'R')
                    && (self.next_is_delimiter()
                        || self.next_is_whitespace()
                        || self.peek_byte().is_none())
                {
                    if let (Ok(number), Ok(generation)) =
                        (whole_number.parse::<usize>(), generation.parse::<u16>())
                    {
                        return Ok(Object::Reference(Reference::new(number, generation)));
                    }
                }
            }

            *self.cursor_mut() = whole_end_pos;
        }

        Ok(Object::Number(if negative { -value } else { value }))
    }

    /// Read `N G obj`, returning the object number and generation.
    fn read_obj_header(&mut self) -> PdfResult<(usize, u16)> {
        self.skip_whitespace();
        let number = self.lex_whole_number();
        self.skip_whitespace();
        let generation = self.lex_whole_number();
        self.skip_whitespace();
        self.expect_bytes(b"obj")?;
        self.skip_whitespace();

        match (number.parse::<usize>(), generation.parse::<u16>()) {
            (Ok(number), Ok(generation)) => Ok((number, generation)),
            _ => Err(PdfError::Syntax("malformed object header".into()).into()),
        }
    }

    fn read_obj_trailer(&mut self) -> PdfResult<()> {
        self.skip_whitespace();
        self.expect_bytes(b"endobj")?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct TestLexer {
        buffer: Vec<u8>,
        pos: usize,
        depth: usize,
    }

    impl TestLexer {
        fn new(buffer: &[u8]) -> Self {
            Self {
                buffer: buffer.to_vec(),
                pos: 0,
                depth: 0,
            }
        }
    }

    impl LexBase for TestLexer {
        fn buffer(&self) -> &[u8] {
            &self.buffer
        }

        fn cursor(&self) -> usize {
            self.pos
        }

        fn cursor_mut(&mut self) -> &mut usize {
            &mut self.pos
        }
    }

    impl LexObject for TestLexer {
        fn depth_mut(&mut self) -> &mut usize {
            &mut self.depth
        }

        fn lex_dict(&mut self) -> PdfResult<Object> {
            Ok(Object::Dictionary(self.lex_dict_body()?))
        }
    }

    fn lex(input: &[u8]) -> Object {
        TestLexer::new(input).lex_object().unwrap()
    }

    #[test]
    fn numbers() {
        assert_eq!(lex(b"42"), Object::Number(42.0));
        assert_eq!(lex(b"-17"), Object::Number(-17.0));
        assert_eq!(lex(b"+3"), Object::Number(3.0));
        assert_eq!(lex(b"3.25"), Object::Number(3.25));
        assert_eq!(lex(b"-.5"), Object::Number(-0.5));
        assert_eq!(lex(b"4."), Object::Number(4.0));
    }

    #[test]
    fn reference_lookahead() {
        assert_eq!(lex(b"12 0 R"), Object::Reference(Reference::new(12, 0)));
        // a second integer without `R` stays a plain number
        let mut lexer = TestLexer::new(b"12 0 obj");
        assert_eq!(lexer.lex_object().unwrap(), Object::Number(12.0));
        assert_eq!(lexer.lex_object().unwrap(), Object::Number(0.0));
    }

    #[test]
    fn literal_string_escapes() {
        assert_eq!(lex(b"(Hello)"), Object::String(b"Hello".to_vec()));
        assert_eq!(
            lex(br"(a\(b\)c\\d)"),
            Object::String(b"a(b)c\\d".to_vec())
        );
        assert_eq!(lex(b"(nested (parens) work)"), {
            Object::String(b"nested (parens) work".to_vec())
        });
        assert_eq!(lex(br"(\101\102)"), Object::String(b"AB".to_vec()));
        assert_eq!(lex(br"(\53)"), Object::String(b"+".to_vec()));
        assert_eq!(lex(b"(a\\\nb)"), Object::String(b"ab".to_vec()));
    }

    #[test]
    fn hex_strings() {
        assert_eq!(lex(b"<48656C6C6F>"), Object::Binary(b"Hello".to_vec()));
        assert_eq!(lex(b"<48 65 6c>"), Object::Binary(b"Hel".to_vec()));
        // odd trailing nibble padded with zero
        assert_eq!(lex(b"<901FA>"), Object::Binary(vec![0x90, 0x1F, 0xA0]));
        assert_eq!(lex(b"<>"), Object::Binary(Vec::new()));
    }

    #[test]
    fn names_with_escapes() {
        assert_eq!(lex(b"/Name1"), Object::name("Name1"));
        assert_eq!(lex(b"/A#20B"), Object::name("A B"));
        assert_eq!(lex(b"/paired#28#29parentheses"), {
            Object::name("paired()parentheses")
        });
    }

    #[test]
    fn dates_parse_from_literal_strings() {
        assert_eq!(lex(b"(D:20240101120000Z)"), Object::Date(1_704_110_400));
    }

    #[test]
    fn array_and_dict() {
        let obj = lex(b"[ 1 2.5 /Three (four) ]");
        match obj {
            Object::Array(items) => {
                assert_eq!(items.len(), 4);
                assert_eq!(items[0], Object::Number(1.0));
            }
            _ => panic!("expected array"),
        }

        let obj = lex(b"<< /Type /Page /Parent 2 0 R /Count 3 >>");
        match obj {
            Object::Dictionary(dict) => {
                assert_eq!(dict.get("Type"), Some(&Object::name("Page")));
                assert_eq!(
                    dict.get("Parent"),
                    Some(&Object::Reference(Reference::new(2, 0)))
                );
            }
            _ => panic!("expected dictionary"),
        }
    }

    #[test]
    fn comments_are_whitespace() {
        assert_eq!(lex(b"% a comment\n17"), Object::Number(17.0));
    }

    #[test]
    fn nesting_limit() {
        let mut input = Vec::new();
        input.extend(std::iter::repeat(b'[').take(MAX_NESTING + 1));
        input.extend(std::iter::repeat(b']').take(MAX_NESTING + 1));

        assert!(TestLexer::new(&input).lex_object().is_err());
    }
}
