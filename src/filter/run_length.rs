use log::warn;

use crate::error::{PdfError, PdfResult};

/// Byte-oriented run-length decoding: a length byte 0..=127 copies the next
/// `length + 1` bytes, 129..=255 repeats the next byte `257 - length`
/// times, and 128 marks end of data.
pub(crate) fn decode(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut pos = 0;

    while pos < data.len() {
        let length = data[pos];
        pos += 1;

        match length {
            128 => return Ok(out),
            0..=127 => {
                let count = usize::from(length) + 1;

                if pos + count > data.len() {
                    anyhow::bail!(PdfError::Filter("truncated run-length literal".into()));
                }

                out.extend_from_slice(&data[pos..pos + count]);
                pos += count;
            }
            129..=255 => {
                let count = 257 - usize::from(length);
                let b = *data
                    .get(pos)
                    .ok_or_else(|| PdfError::Filter("truncated run-length run".into()))?;
                pos += 1;

                out.extend(std::iter::repeat(b).take(count));
            }
        }
    }

    warn!("run-length data ended without an end-of-data marker");

    Ok(out)
}
