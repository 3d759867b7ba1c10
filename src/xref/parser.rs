use crate::{
    error::{PdfError, PdfResult},
    filter,
    lex::{LexBase, LexObject},
    objects::{Dictionary, Object, Reference},
    resolve::{NoResolve, Resolve},
    xref::{stream::FieldWidths, Xref, XrefEntry},
};

const STARTXREF: &[u8] = b"startxref";

/// How far from the end of the file `startxref` may sit.
const STARTXREF_WINDOW: usize = 32;

/// One cross-reference section plus the trailer dictionary that came with
/// it (a classic `trailer` dict, or the xref stream's own dictionary).
pub(crate) struct XrefSection {
    pub xref: Xref,
    pub trailer: Dictionary,
}

pub(crate) struct XrefParser<'a> {
    buffer: &'a [u8],
    pos: usize,
    depth: usize,
}

impl LexBase for XrefParser<'_> {
    fn buffer(&self) -> &[u8] {
        self.buffer
    }

    fn cursor(&self) -> usize {
        self.pos
    }

    fn cursor_mut(&mut self) -> &mut usize {
        &mut self.pos
    }
}

impl LexObject for XrefParser<'_> {
    fn depth_mut(&mut self) -> &mut usize {
        &mut self.depth
    }

    fn lex_dict(&mut self) -> PdfResult<Object> {
        Ok(Object::Dictionary(self.lex_dict_body()?))
    }
}

/// Values in a cross-reference stream dictionary shall be direct, so
/// nothing ever needs real resolution here.
impl Resolve for XrefParser<'_> {
    fn resolve_reference(&mut self, _reference: Reference) -> PdfResult<Object> {
        Ok(Object::Null)
    }

    fn reference_exists(&mut self, _reference: Reference) -> PdfResult<bool> {
        Ok(false)
    }
}

impl<'a> XrefParser<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            pos: 0,
            depth: 0,
        }
    }

    /// Locate `startxref` in the trailing bytes and return the offset it
    /// names. Trailing whitespace after `%%EOF` is tolerated because only
    /// the final window is searched.
    pub fn find_startxref(&mut self) -> PdfResult<usize> {
        let window_start = self.buffer.len().saturating_sub(STARTXREF_WINDOW);

        let idx = self.buffer[window_start..]
            .windows(STARTXREF.len())
            .rposition(|window| window == STARTXREF)
            .ok_or_else(|| {
                PdfError::Syntax(format!(
                    "no startxref in the final {} bytes",
                    STARTXREF_WINDOW
                ))
            })?;

        self.pos = window_start + idx;
        self.expect_bytes(STARTXREF)?;
        self.skip_whitespace();

        let offset = self
            .lex_whole_number()
            .parse::<usize>()
            .map_err(|_| PdfError::Syntax("malformed startxref offset".into()))?;

        if offset == 0 || offset >= self.buffer.len() {
            anyhow::bail!(PdfError::Syntax(format!(
                "startxref offset {} is outside the file",
                offset
            )));
        }

        Ok(offset)
    }

    /// Parse the section at `offset`, in either serialization.
    pub fn read_section(&mut self, offset: usize) -> PdfResult<XrefSection> {
        if offset >= self.buffer.len() {
            anyhow::bail!(PdfError::Syntax(format!(
                "xref offset {} is outside the file",
                offset
            )));
        }

        self.pos = offset;
        self.skip_whitespace();

        if self.next_matches(b"xref") {
            self.read_classic_table()
        } else {
            self.read_xref_stream()
        }
    }

    fn read_classic_table(&mut self) -> PdfResult<XrefSection> {
        self.expect_bytes(b"xref")?;
        self.skip_whitespace();

        let mut xref = Xref::default();

        loop {
            let first = self.parse_whole_number("subsection start")?;
            self.skip_whitespace();
            let count = self.parse_whole_number("subsection count")?;
            self.skip_whitespace();

            for number in first..first + count {
                let offset = self.parse_whole_number("entry offset")?;
                self.skip_whitespace();
                let generation = self.parse_whole_number("entry generation")? as u16;
                self.skip_whitespace();

                let entry = match self.next_byte_err()? {
                    b'n' => XrefEntry::InUse { offset, generation },
                    b'f' => XrefEntry::Free {
                        next_free: offset as u64,
                        generation,
                    },
                    kind => {
                        anyhow::bail!(PdfError::Syntax(format!(
                            "xref entry kind must be `n` or `f`, found {:?}",
                            char::from(kind)
                        )));
                    }
                };

                xref.entries.entry(number).or_insert(entry);
                self.skip_whitespace();
            }

            match self.peek_byte() {
                Some(b't') => break,
                Some(b'0'..=b'9') => continue,
                found => {
                    anyhow::bail!(PdfError::Syntax(format!(
                        "expected trailer or another subsection, found {:?}",
                        found.map(char::from)
                    )));
                }
            }
        }

        self.expect_bytes(b"trailer")?;
        self.skip_whitespace();
        let trailer = self.lex_dict_body()?;

        Ok(XrefSection { xref, trailer })
    }

    fn read_xref_stream(&mut self) -> PdfResult<XrefSection> {
        self.read_obj_header()?;

        let dict = self.lex_dict_body()?;

        match dict.get_name("Type", &mut NoResolve)? {
            Some(name) if name == "XRef" => {}
            other => {
                anyhow::bail!(PdfError::Syntax(format!(
                    "expected /Type /XRef, found {:?}",
                    other
                )));
            }
        }

        self.expect_bytes(b"stream")?;
        self.expect_eol()?;

        // xref stream dictionaries may not use indirect values, so
        // /Length is readable in place
        let length = dict.expect_integer("Length", &mut NoResolve)?;
        let length = usize::try_from(length)
            .map_err(|_| PdfError::Syntax(format!("invalid stream /Length {}", length)))?;

        let data = self.take_bytes(length)?;

        self.skip_whitespace();
        self.expect_bytes(b"endstream")?;
        self.skip_whitespace();
        self.expect_bytes(b"endobj")?;

        let size = dict.expect_integer("Size", &mut NoResolve)?;
        let size = usize::try_from(size)
            .map_err(|_| PdfError::Syntax(format!("invalid xref /Size {}", size)))?;

        let index = match dict.get_arr("Index", &mut NoResolve)? {
            Some(arr) => {
                if arr.len() % 2 != 0 {
                    anyhow::bail!(PdfError::Syntax("odd number of /Index entries".into()));
                }

                arr.chunks_exact(2)
                    .map(|pair| {
                        let first = NoResolve.assert_unsigned_integer(pair[0].clone())?;
                        let count = NoResolve.assert_unsigned_integer(pair[1].clone())?;

                        Ok((first as usize, count as usize))
                    })
                    .collect::<PdfResult<Vec<_>>>()?
            }
            None => vec![(0, size)],
        };

        let widths = FieldWidths::from_arr(
            dict.expect_arr("W", &mut NoResolve)?,
            &mut NoResolve,
        )?;

        let decoded = filter::decode_stream(&data, &dict, &mut NoResolve)?;
        let xref = super::stream::parse_rows(&decoded, widths, &index)?;

        Ok(XrefSection {
            xref,
            trailer: dict,
        })
    }

    fn parse_whole_number(&mut self, what: &str) -> PdfResult<usize> {
        self.lex_whole_number()
            .parse::<usize>()
            .map_err(|_| PdfError::Syntax(format!("malformed xref {}", what)).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classic_table() {
        let table = b"xref\n0 3\n0000000000 65535 f \n0000000015 00000 n \n0000000123 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n9\n%%EOF\n";

        let mut parser = XrefParser::new(table);
        let section = parser.read_section(0).unwrap();

        assert_eq!(section.xref.len(), 3);
        assert!(matches!(
            section.xref.get(1),
            Some(XrefEntry::InUse { offset: 15, generation: 0 })
        ));
        assert!(matches!(section.xref.get(0), Some(XrefEntry::Free { .. })));
        assert_eq!(
            section.trailer.expect_reference("Root").unwrap(),
            Reference::new(1, 0)
        );
    }

    #[test]
    fn all_three_entry_eols_are_accepted() {
        for eol in [" \r", " \n", "\r\n"] {
            let table = format!(
                "xref\n0 2\n0000000000 65535 f{}0000000099 00001 n{}trailer\n<< /Size 2 >>\n",
                eol, eol
            );

            let mut parser = XrefParser::new(table.as_bytes());
            let section = parser.read_section(0).unwrap();

            assert!(matches!(
                section.xref.get(1),
                Some(XrefEntry::InUse { offset: 99, generation: 1 })
            ));
        }
    }

    #[test]
    fn startxref_discovery() {
        let file = b"%PDF-1.7\njunk junk junk\nstartxref\n42\n%%EOF\n";

        assert_eq!(XrefParser::new(file).find_startxref().unwrap(), 42);
    }

    #[test]
    fn startxref_with_trailing_whitespace() {
        let file = b"%PDF-1.7\npayload\nstartxref\n17\n%%EOF\n   \n";

        assert_eq!(XrefParser::new(file).find_startxref().unwrap(), 17);
    }

    #[test]
    fn zero_startxref_is_a_syntax_error() {
        let file = b"%PDF-1.7\nstartxref\n0\n%%EOF\n";
        let err = XrefParser::new(file).find_startxref().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PdfError>(),
            Some(PdfError::Syntax(..))
        ));
    }
}
