use crate::{
    error::{PdfError, PdfResult},
    objects::Object,
    resolve::Resolve,
    xref::{Xref, XrefEntry},
};

/// The /W entry: byte widths of the three fields in one row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldWidths([usize; 3]);

impl FieldWidths {
    pub fn from_arr(arr: Vec<Object>, resolver: &mut dyn Resolve) -> PdfResult<Self> {
        if arr.len() != 3 {
            anyhow::bail!(PdfError::Syntax(format!(
                "/W must have 3 entries, found {}",
                arr.len()
            )));
        }

        let mut widths = [0usize; 3];

        for (width, obj) in widths.iter_mut().zip(arr) {
            let value = resolver.assert_unsigned_integer(obj)?;

            if value > 8 {
                anyhow::bail!(PdfError::Syntax(format!(
                    "/W field width {} exceeds 8 bytes",
                    value
                )));
            }

            *width = value as usize;
        }

        Ok(Self(widths))
    }

    pub fn row_width(&self) -> usize {
        self.0.iter().sum()
    }
}

/// Decode the rows of a cross-reference stream into a table.
///
/// Fields are big-endian. A zero-width type field defaults to 1 (in use,
/// uncompressed); unknown entry types are ignored per the specification.
pub(crate) fn parse_rows(
    data: &[u8],
    widths: FieldWidths,
    index: &[(usize, usize)],
) -> PdfResult<Xref> {
    let row_width = widths.row_width();
    let expected: usize = index.iter().map(|(_, count)| count).sum::<usize>() * row_width;

    if row_width == 0 || data.len() < expected {
        anyhow::bail!(PdfError::Syntax(format!(
            "xref stream holds {} bytes but /Index requires {}",
            data.len(),
            expected
        )));
    }

    let mut xref = Xref::default();
    let mut rows = data.chunks_exact(row_width);

    for &(first, count) in index {
        for number in first..first + count {
            let row = rows
                .next()
                .ok_or_else(|| PdfError::Syntax("truncated xref stream".into()))?;

            let (field0, row) = row.split_at(widths.0[0]);
            let (field1, field2) = row.split_at(widths.0[1]);

            let entry_type = if widths.0[0] == 0 { 1 } else { read_field(field0) };
            let field1 = read_field(field1);
            let field2 = read_field(field2);

            let entry = match entry_type {
                0 => XrefEntry::Free {
                    next_free: field1,
                    generation: field2 as u16,
                },
                1 => XrefEntry::InUse {
                    offset: field1 as usize,
                    generation: field2 as u16,
                },
                2 => XrefEntry::Compressed {
                    container: field1 as usize,
                    index: field2 as usize,
                },
                other => {
                    log::warn!("ignoring xref entry of unknown type {}", other);
                    continue;
                }
            };

            xref.entries.entry(number).or_insert(entry);
        }
    }

    Ok(xref)
}

fn read_field(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
