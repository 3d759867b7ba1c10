use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::error::{PdfError, PdfResult};

pub(crate) fn inflate(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut buffer = Vec::new();

    decoder
        .read_to_end(&mut buffer)
        .map_err(|err| PdfError::Filter(format!("flate decode failed: {}", err)))?;

    Ok(buffer)
}

pub(crate) fn deflate(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());

    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|err| PdfError::Filter(format!("flate encode failed: {}", err)).into())
}

#[cfg(test)]
mod test {
    use super::{deflate, inflate};

    #[test]
    fn round_trip() {
        let data = b"q 612 0 0 792 0 0 cm /Im1 Do Q".repeat(40);

        let compressed = deflate(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(inflate(&compressed).unwrap(), data);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(inflate(b"not a zlib stream").is_err());
    }
}
