use crate::{
    error::{PdfError, PdfResult},
    lex::{LexBase, LexObject},
    objects::Object,
};

/// Upper bound on /N, so a corrupt count cannot balloon memory.
pub(crate) const MAX_ENTRIES: usize = 16_384;

/// Expand a decoded /ObjStm payload into its contained objects.
///
/// The stream begins with `n` pairs of (object number, relative offset),
/// followed by the concatenated object values starting at `first`. All
/// contained objects are materialized eagerly so the container can be
/// dropped afterwards.
pub(crate) fn expand(
    decoded: Vec<u8>,
    n: usize,
    first: usize,
) -> PdfResult<Vec<(usize, Object)>> {
    if n > MAX_ENTRIES {
        anyhow::bail!(PdfError::Resource(format!(
            "object stream declares {} objects, limit is {}",
            n, MAX_ENTRIES
        )));
    }

    if first > decoded.len() {
        anyhow::bail!(PdfError::Syntax(format!(
            "/First offset {} is beyond the {} decoded bytes",
            first,
            decoded.len()
        )));
    }

    let mut parser = ObjectStreamParser {
        buffer: decoded,
        pos: 0,
        depth: 0,
    };

    let mut offsets = Vec::with_capacity(n);

    for _ in 0..n {
        parser.skip_whitespace();
        let number = parser
            .lex_whole_number()
            .parse::<usize>()
            .map_err(|_| PdfError::Syntax("malformed object stream pair table".into()))?;
        parser.skip_whitespace();
        let offset = parser
            .lex_whole_number()
            .parse::<usize>()
            .map_err(|_| PdfError::Syntax("malformed object stream pair table".into()))?;

        offsets.push((number, offset));
    }

    let mut objects = Vec::with_capacity(n);

    for (number, offset) in offsets {
        let pos = first.checked_add(offset).filter(|&pos| pos <= parser.buffer.len());

        let pos = match pos {
            Some(pos) => pos,
            None => {
                anyhow::bail!(PdfError::Syntax(format!(
                    "object {} sits outside its object stream",
                    number
                )));
            }
        };

        parser.pos = pos;
        parser.depth = 0;

        objects.push((number, parser.lex_object()?));
    }

    Ok(objects)
}

struct ObjectStreamParser {
    buffer: Vec<u8>,
    pos: usize,
    depth: usize,
}

impl LexBase for ObjectStreamParser {
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

impl LexObject for ObjectStreamParser {
    fn depth_mut(&mut self) -> &mut usize {
        &mut self.depth
    }

    /// Streams cannot nest inside object streams.
    fn lex_dict(&mut self) -> PdfResult<Object> {
        let dict = self.lex_dict_body()?;

        if self.next_matches(b"stream") {
            anyhow::bail!(PdfError::Syntax(
                "stream object inside an object stream".into()
            ));
        }

        Ok(Object::Dictionary(dict))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::objects::Reference;

    #[test]
    fn expands_the_advertised_objects() {
        let payload = b"11 0 12 15 13 23 << /Kind /A >> (hello) [ 1 2 3 ]";
        let first = payload.iter().position(|&b| b == b'<').unwrap();

        let objects = expand(payload.to_vec(), 3, first).unwrap();

        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0].0, 11);
        assert!(matches!(objects[0].1, Object::Dictionary(..)));
        assert_eq!(objects[1].1, Object::String(b"hello".to_vec()));
        assert_eq!(
            objects[2].1,
            Object::Array(vec![
                Object::Number(1.0),
                Object::Number(2.0),
                Object::Number(3.0)
            ])
        );
    }

    #[test]
    fn contained_references_still_lex() {
        let payload = b"5 0 << /Parent 2 0 R >>";
        let first = payload.iter().position(|&b| b == b'<').unwrap();

        let objects = expand(payload.to_vec(), 1, first).unwrap();

        match &objects[0].1 {
            Object::Dictionary(dict) => {
                assert_eq!(
                    dict.get("Parent"),
                    Some(&Object::Reference(Reference::new(2, 0)))
                );
            }
            obj => panic!("expected dictionary, found {:?}", obj),
        }
    }

    #[test]
    fn runaway_count_is_rejected() {
        assert!(expand(Vec::new(), MAX_ENTRIES + 1, 0).is_err());
    }
}
