use weezl::{decode::Decoder, BitOrder};

use crate::error::{PdfError, PdfResult};

/// LZW as PDF uses it: MSB-first bit order, 8-bit codes, and by default the
/// "early change" code-size switch inherited from TIFF.
pub(crate) fn decode(data: &[u8], early_change: bool) -> PdfResult<Vec<u8>> {
    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };

    decoder
        .decode(data)
        .map_err(|err| PdfError::Filter(format!("lzw decode failed: {}", err)).into())
}
